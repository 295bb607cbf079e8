//! Thread, process and loader-data blocks.
//!
//! Each builder maps one fixed-address region and fills it. Fields that are not listed are
//! left zero.
//!
//! Thread block (`NT_TIB` / `TEB` prefix):
//!
//! | Offset | Field |
//! |--------|-------|
//! | `0x00` | `ExceptionList` (default SEH frame) |
//! | `0x18` | `Self` |
//! | `0x30` | `ProcessEnvironmentBlock` |
//! | `0x34` | `LastErrorValue` (`0x11223344` marker) |
//!
//! Process block (`PEB` prefix):
//!
//! | Offset | Field |
//! |--------|-------|
//! | `0x08` | `ImageBaseAddress` (zero without a main module) |
//! | `0x0c` | `Ldr` |
//! | `0x10` | `ProcessParameters` |

use crate::{
    emulation::{
        exception::SEH_CHAIN_END,
        layout::{
            AddressLayout, LDR_LIST_HEADS_OFFSET, PEB_IMAGE_BASE_OFFSET, PEB_PARAMETERS_OFFSET,
            TEB_PEB_OFFSET, TEB_SELF_OFFSET, TEB_SEH_CHAIN_OFFSET, THREAD_BLOCK_SIZE,
        },
        loader::{wide_bytes, ModuleListKind, ModuleRegistry},
        memory::{MemoryProtection, VirtualMemory},
    },
    file::io::{pack_u32s, write_le},
    Result,
};

/// Value left in the thread block's `LastErrorValue`.
pub const THREAD_BLOCK_MARKER: u32 = 0x1122_3344;

/// Handler words of the default SEH frame.
pub const DEFAULT_SEH_HANDLERS: [u32; 2] = [0x4141_4141, 0x4242_4242];

/// Mapped size of the process block.
pub const PROCESS_BLOCK_SIZE: u32 = PEB_PARAMETERS_OFFSET + 4;

/// Mapped size of the loader data: header plus three `LIST_ENTRY` heads.
pub const LOADER_DATA_SIZE: u32 = LDR_LIST_HEADS_OFFSET + 0x18;

/// Mapped size of the environment block.
pub const ENVIRONMENT_BLOCK_SIZE: usize = 0x1000;

/// Offset of `Environment` within the process parameters.
pub const PARAMETERS_ENVIRONMENT_OFFSET: u32 = 0x48;

/// `MaximumLength` of the process parameters.
pub const PARAMETERS_LENGTH: u32 = 0x1000;

fn map(memory: &mut dyn VirtualMemory, address: u32, data: &[u8]) -> Result<()> {
    memory.allocate_region(u64::from(address), MemoryProtection::READ_WRITE, data)
}

/// Map the thread block, its chain head pointing at `seh_frame`.
///
/// # Errors
/// Returns an error if the region cannot be mapped.
pub fn build_thread_block(
    memory: &mut dyn VirtualMemory,
    layout: &AddressLayout,
    seh_frame: u32,
) -> Result<()> {
    let mut data = vec![0_u8; THREAD_BLOCK_SIZE as usize];
    write_le(&mut data[TEB_SEH_CHAIN_OFFSET as usize..], seh_frame)?;
    write_le(&mut data[TEB_SELF_OFFSET as usize..], layout.thread_block)?;
    write_le(&mut data[TEB_PEB_OFFSET as usize..], layout.process_block)?;
    write_le(&mut data[TEB_PEB_OFFSET as usize + 4..], THREAD_BLOCK_MARKER)?;

    map(memory, layout.thread_block, &data)
}

/// Map the process block.
///
/// # Errors
/// Returns an error if the region cannot be mapped.
pub fn build_process_block(
    memory: &mut dyn VirtualMemory,
    layout: &AddressLayout,
    image_base: Option<u32>,
) -> Result<()> {
    if image_base.is_none() {
        log::warn!("No main module, process block image base left empty");
    }

    let mut data = vec![0_u8; PROCESS_BLOCK_SIZE as usize];
    let words = [
        image_base.unwrap_or(0),
        layout.loader_data(),
        layout.process_parameters,
    ];
    data[PEB_IMAGE_BASE_OFFSET as usize..].copy_from_slice(&pack_u32s(&words));

    map(memory, layout.process_block, &data)
}

/// Map the loader data, pointing its list heads at the main and first core module.
///
/// The load-order head points at the main module's slot; the memory and initialization order
/// heads point into the `core_module` slot. Heads whose module is missing stay zero.
///
/// # Errors
/// Returns an error if the region cannot be mapped.
pub fn build_loader_data(
    memory: &mut dyn VirtualMemory,
    layout: &AddressLayout,
    registry: &ModuleRegistry,
    core_module: &str,
) -> Result<()> {
    let mut heads: Vec<u32> = Vec::with_capacity(6);

    match registry.main() {
        Some(main) => {
            log::info!("Ldr {:#x}", main.slot);
            heads.extend([main.slot, 0]);
        }
        None => {
            log::warn!("No main module, ldr data will be inconsistent");
            heads.extend([0, 0]);
        }
    }

    match registry.get(core_module) {
        Some(core) => {
            for kind in [ModuleListKind::MemoryOrder, ModuleListKind::InitializationOrder] {
                heads.extend([core.slot + kind.link_offset(), 0]);
            }
        }
        None => log::warn!("No {}, ldr data will be inconsistent", core_module),
    }

    let mut data = vec![0_u8; LOADER_DATA_SIZE as usize];
    let heads = pack_u32s(&heads);
    let start = LDR_LIST_HEADS_OFFSET as usize;
    data[start..start + heads.len()].copy_from_slice(&heads);

    map(memory, layout.loader_data(), &data)
}

/// Map the environment block: wide `NAME=value` strings, each NUL terminated.
///
/// # Errors
/// Returns an error if the strings exceed the block or the region cannot be mapped.
pub fn build_environment_block(
    memory: &mut dyn VirtualMemory,
    layout: &AddressLayout,
    environment: &[String],
) -> Result<()> {
    let mut data = Vec::new();
    for entry in environment {
        data.extend(wide_bytes(entry));
        data.extend([0, 0]);
    }

    if data.len() + 2 > ENVIRONMENT_BLOCK_SIZE {
        return Err(malformed_error!(
            "Environment strings need {:#x} bytes, block holds {:#x}",
            data.len() + 2,
            ENVIRONMENT_BLOCK_SIZE
        ));
    }
    data.resize(ENVIRONMENT_BLOCK_SIZE, 0);

    map(memory, layout.environment_block, &data)
}

/// Map the process parameters, referencing the environment block.
///
/// Only `MaximumLength` (offset `0x00`) and `Environment` (offset `0x48`) are set. Every
/// other byte up to `Environment` is zero rather than the `'E'` filler some emulators use,
/// so guest code reading an unmodeled field sees a null pointer or an empty string.
///
/// # Errors
/// Returns an error if the region cannot be mapped.
pub fn build_process_parameters(
    memory: &mut dyn VirtualMemory,
    layout: &AddressLayout,
) -> Result<()> {
    let mut data = vec![0_u8; PARAMETERS_ENVIRONMENT_OFFSET as usize + 4];
    write_le(&mut data, PARAMETERS_LENGTH)?;
    write_le(
        &mut data[PARAMETERS_ENVIRONMENT_OFFSET as usize..],
        layout.environment_block,
    )?;

    map(memory, layout.process_parameters, &data)
}

/// Map the default SEH frame: end-of-chain marker and two canary handler words.
///
/// # Errors
/// Returns an error if the region cannot be mapped.
pub fn build_default_seh_frame(memory: &mut dyn VirtualMemory, layout: &AddressLayout) -> Result<()> {
    let frame = pack_u32s(&[
        SEH_CHAIN_END,
        DEFAULT_SEH_HANDLERS[0],
        DEFAULT_SEH_HANDLERS[1],
    ]);
    map(memory, layout.default_seh_frame, &frame)
}

/// Map the zeroed context, exception-record and fake handler regions.
///
/// # Errors
/// Returns an error if a region cannot be mapped.
pub fn map_scratch_regions(memory: &mut dyn VirtualMemory, layout: &AddressLayout) -> Result<()> {
    for (address, size) in [
        (layout.context_scratch, layout.context_scratch_size),
        (
            layout.exception_record_scratch,
            layout.exception_record_scratch_size,
        ),
        (layout.fake_handler_region, layout.fake_handler_region_size),
    ] {
        map(memory, address, &vec![0_u8; size as usize])?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emulation::{loader::ModuleDescriptor, loader::ModuleRole, GuestMemory},
        file::io::read_le,
    };

    #[test]
    fn test_thread_block() {
        let layout = AddressLayout::default();
        let mut memory = GuestMemory::new();
        build_thread_block(&mut memory, &layout, layout.default_seh_frame).unwrap();

        assert_eq!(memory.read_u32(0x7ff7_0000).unwrap(), 0x7fff_f000);
        assert_eq!(memory.read_u32(0x7ff7_0018).unwrap(), 0x7ff7_0000);
        assert_eq!(memory.read_u32(0x7ff7_0030).unwrap(), 0x7ffd_f000);
        assert_eq!(memory.read_u32(0x7ff7_0034).unwrap(), THREAD_BLOCK_MARKER);
        assert_eq!(memory.read_u32(0x7ff7_0004).unwrap(), 0);
    }

    #[test]
    fn test_process_block() {
        let layout = AddressLayout::default();
        let mut memory = GuestMemory::new();
        build_process_block(&mut memory, &layout, Some(0x0040_0000)).unwrap();

        assert_eq!(memory.read_u32(0x7ffd_f008).unwrap(), 0x0040_0000);
        assert_eq!(memory.read_u32(0x7ffd_f00c).unwrap(), 0x0034_1ea0);
        assert_eq!(memory.read_u32(0x7ffd_f010).unwrap(), 0x0020_0000);
    }

    #[test]
    fn test_process_block_without_main() {
        let layout = AddressLayout::default();
        let mut memory = GuestMemory::new();
        build_process_block(&mut memory, &layout, None).unwrap();

        assert_eq!(memory.read_u32(0x7ffd_f008).unwrap(), 0);
        assert_eq!(memory.read_u32(0x7ffd_f00c).unwrap(), 0x0034_1ea0);
    }

    fn registry(memory: &mut GuestMemory, with_main: bool) -> ModuleRegistry {
        let layout = AddressLayout::default();
        let mut registry = ModuleRegistry::new();
        if with_main {
            registry
                .register(
                    memory,
                    &layout,
                    ModuleRole::Main,
                    ModuleDescriptor::new("a.exe", "a.exe", 0x40_0000, 0x40_1000, 0x1000),
                    "a.exe",
                )
                .unwrap();
        }
        registry
            .register(
                memory,
                &layout,
                ModuleRole::Ordinary,
                ModuleDescriptor::new("ntdll.dll", "ntdll.dll", 0x7c90_0000, 0x7c90_1000, 0x1000),
                "ntdll.dll",
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_loader_data() {
        let layout = AddressLayout::default();
        let mut memory = GuestMemory::new();
        let registry = registry(&mut memory, true);
        build_loader_data(&mut memory, &layout, &registry, "ntdll.dll").unwrap();

        let main = registry.main().unwrap().slot;
        let ntdll = registry.get("ntdll.dll").unwrap().slot;
        let data = memory
            .read(u64::from(layout.loader_data()), LOADER_DATA_SIZE as usize)
            .unwrap();
        assert_eq!(read_le::<u32>(&data[0x0c..]).unwrap(), main);
        assert_eq!(read_le::<u32>(&data[0x14..]).unwrap(), ntdll + 0x08);
        assert_eq!(read_le::<u32>(&data[0x1c..]).unwrap(), ntdll + 0x10);
    }

    #[test]
    fn test_loader_data_without_main() {
        let layout = AddressLayout::default();
        let mut memory = GuestMemory::new();
        let registry = registry(&mut memory, false);
        build_loader_data(&mut memory, &layout, &registry, "ntdll.dll").unwrap();

        let ntdll = registry.get("ntdll.dll").unwrap().slot;
        assert_eq!(memory.read_u32(layout.loader_data() + 0x0c).unwrap(), 0);
        assert_eq!(
            memory.read_u32(layout.loader_data() + 0x14).unwrap(),
            ntdll + 0x08
        );
    }

    #[test]
    fn test_environment_and_parameters() {
        let layout = AddressLayout::default();
        let mut memory = GuestMemory::new();
        build_environment_block(&mut memory, &layout, &["A=b".to_string()]).unwrap();
        build_process_parameters(&mut memory, &layout).unwrap();

        assert_eq!(
            memory.read(0x0001_0000, 10).unwrap(),
            vec![b'A', 0, b'=', 0, b'b', 0, 0, 0, 0, 0]
        );
        assert_eq!(memory.read_u32(0x0020_0000).unwrap(), 0x1000);
        assert_eq!(memory.read_u32(0x0020_0048).unwrap(), 0x0001_0000);

        // Unmodeled fields read as zero
        let filler = memory.read(0x0020_0004, 0x44).unwrap();
        assert!(filler.iter().all(|&byte| byte == 0));
    }

    #[test]
    fn test_environment_too_large() {
        let layout = AddressLayout::default();
        let mut memory = GuestMemory::new();
        let huge = vec!["X".repeat(ENVIRONMENT_BLOCK_SIZE)];
        assert!(build_environment_block(&mut memory, &layout, &huge).is_err());
    }

    #[test]
    fn test_default_seh_and_scratch() {
        let layout = AddressLayout::default();
        let mut memory = GuestMemory::new();
        build_default_seh_frame(&mut memory, &layout).unwrap();
        map_scratch_regions(&mut memory, &layout).unwrap();

        assert_eq!(memory.read_u32(0x7fff_f000).unwrap(), 0xFFFF_FFFF);
        assert_eq!(memory.read_u32(0x7fff_f004).unwrap(), 0x4141_4141);
        assert_eq!(memory.read_u32(0x7fff_f008).unwrap(), 0x4242_4242);
        assert!(memory.is_mapped(0x0020_1000 + 0x2cb));
        assert!(memory.is_mapped(0x0020_2000 + 199));
        assert!(memory.is_mapped(0x0021_2fff));
    }
}
