//! Guest address layout of the synthetic process environment.
//!
//! Every structure this crate fabricates lives at a fixed guest virtual address. Guest code
//! that inspects its own environment (`fs:[0]`, `fs:[0x30]`, the loader lists) depends on
//! these addresses staying put for the lifetime of a session, so they are collected in a
//! single immutable [`AddressLayout`] that the other components only read from.
//!
//! The [`Default`] layout is the classic 32-bit arrangement:
//!
//! | Region | Address |
//! |--------|---------|
//! | Thread block (`fs:[0]`) | `0x7ff70000` |
//! | Process block | `0x7ffdf000` |
//! | Default SEH frame | `0x7ffff000` |
//! | Loader region | `0x00340000` |
//! | Loader data | `0x00341ea0` |
//! | Module slots | `0x00341f00` + n * `0x1000` |
//! | Environment block | `0x00010000` |
//! | Process parameters | `0x00200000` |
//! | Context scratch | `0x00201000` |
//! | Exception-record scratch | `0x00202000` |
//! | Fake handler region | `0x00203000` |
//! | Return trampoline | `0x6eadbeef` |

use crate::{emulation::EmulationError, Result};

/// Size of the thread block region written at [`AddressLayout::thread_block`].
pub const THREAD_BLOCK_SIZE: u32 = 0x38;

/// Offset of the SEH chain head within the thread block.
pub const TEB_SEH_CHAIN_OFFSET: u32 = 0x00;
/// Offset of the thread block's self pointer.
pub const TEB_SELF_OFFSET: u32 = 0x18;
/// Offset of the process block pointer within the thread block.
pub const TEB_PEB_OFFSET: u32 = 0x30;

/// Offset of `ImageBaseAddress` within the process block.
pub const PEB_IMAGE_BASE_OFFSET: u32 = 0x08;
/// Offset of the loader data pointer within the process block.
pub const PEB_LDR_OFFSET: u32 = 0x0c;
/// Offset of the process parameters pointer within the process block.
pub const PEB_PARAMETERS_OFFSET: u32 = 0x10;

/// Offset of the first list head (`InLoadOrderModuleList`) within the loader data.
pub const LDR_LIST_HEADS_OFFSET: u32 = 0x0c;

/// Size of a serialized loader record at the start of each module slot.
pub const LOADER_RECORD_SIZE: u32 = 0x34;

/// Fixed guest addresses of every synthetic structure.
///
/// Create one per session and hand it to every builder; nothing in the crate stores
/// addresses elsewhere. Use [`AddressLayout::validate`] after customizing a layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressLayout {
    /// Thread block address; the FS segment base
    pub thread_block: u32,
    /// Process block address
    pub process_block: u32,
    /// Base of the loader region
    pub loader_base: u32,
    /// Offset of the loader data structure from [`loader_base`](Self::loader_base)
    pub loader_data_offset: u32,
    /// Offset of the first module slot from [`loader_base`](Self::loader_base)
    pub module_list_offset: u32,
    /// Size of one module slot
    pub module_slot_size: u32,
    /// Offset of the base-name buffer inside a module slot
    pub module_name_offset: u32,
    /// Offset of the full-path buffer inside a module slot
    pub module_path_offset: u32,
    /// Maximum number of module slots
    pub max_modules: u32,
    /// Address of the default SEH frame installed at initialization
    pub default_seh_frame: u32,
    /// Address of the synthetic environment-variable block
    pub environment_block: u32,
    /// Address of the synthetic process-parameters block
    pub process_parameters: u32,
    /// Address of the context scratch region
    pub context_scratch: u32,
    /// Size of the context scratch region
    pub context_scratch_size: u32,
    /// Address of the exception-record scratch region
    pub exception_record_scratch: u32,
    /// Size of the exception-record scratch region
    pub exception_record_scratch_size: u32,
    /// Address of the fake handler-chain region
    pub fake_handler_region: u32,
    /// Size of the fake handler-chain region
    pub fake_handler_region_size: u32,
    /// Return address pushed for guest handlers; reaching it triggers resolution
    pub return_trampoline: u32,
}

impl Default for AddressLayout {
    fn default() -> Self {
        let process_block = 0x7ffd_f000;
        let context_scratch = 0x0020_1000;
        Self {
            thread_block: 0x7ff7_0000,
            process_block,
            loader_base: 0x0034_0000,
            loader_data_offset: 0x1ea0,
            module_list_offset: 0x1f00,
            module_slot_size: 0x1000,
            module_name_offset: 0x500,
            module_path_offset: 0x600,
            max_modules: 0x40,
            default_seh_frame: process_block + 0x2_0000,
            environment_block: 0x0001_0000,
            process_parameters: 0x0020_0000,
            context_scratch,
            context_scratch_size: 0x2cc,
            exception_record_scratch: context_scratch + 0x1000,
            exception_record_scratch_size: 200,
            fake_handler_region: context_scratch + 0x2000,
            fake_handler_region_size: 0x1_0000,
            return_trampoline: 0x6ead_beef,
        }
    }
}

/// First address past the 32-bit guest address space.
const ADDRESS_SPACE_END: u64 = 1 << 32;

impl AddressLayout {
    /// Creates the default layout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Address of the loader data structure
    #[must_use]
    pub fn loader_data(&self) -> u32 {
        self.loader_base.wrapping_add(self.loader_data_offset)
    }

    /// Address of the first module slot
    #[must_use]
    pub fn module_list_base(&self) -> u32 {
        self.loader_base.wrapping_add(self.module_list_offset)
    }

    /// Address of module slot `index`, or `None` past the 32-bit address space.
    #[must_use]
    pub fn module_slot(&self, index: usize) -> Option<u32> {
        let index = u32::try_from(index).ok()?;
        index
            .checked_mul(self.module_slot_size)?
            .checked_add(self.module_list_base())
    }

    /// Named, sized regions of the layout, used for overlap validation.
    ///
    /// Regions whose extent is open-ended in guest memory (the trampoline is never mapped)
    /// are not listed.
    #[must_use]
    pub fn regions(&self) -> Vec<(&'static str, u64, u64)> {
        // Computed in u64 so oversized custom layouts cannot wrap
        let span = |start: u32, size: u32| (u64::from(start), u64::from(start) + u64::from(size));
        let (thread_start, thread_end) = span(self.thread_block, THREAD_BLOCK_SIZE);
        let (peb_start, peb_end) = span(self.process_block, PEB_PARAMETERS_OFFSET + 4);
        let ldr_start = u64::from(self.loader_base) + u64::from(self.loader_data_offset);
        let ldr_end = ldr_start + u64::from(LDR_LIST_HEADS_OFFSET + 0x18);
        let modules_start = u64::from(self.loader_base) + u64::from(self.module_list_offset);
        let modules_end =
            modules_start + u64::from(self.max_modules) * u64::from(self.module_slot_size);
        let (seh_start, seh_end) = span(self.default_seh_frame, 0xc);
        let (env_start, env_end) = span(self.environment_block, 0x1000);
        let (params_start, params_end) = span(self.process_parameters, 0x4c);
        let (ctx_start, ctx_end) = span(self.context_scratch, self.context_scratch_size);
        let (rec_start, rec_end) =
            span(self.exception_record_scratch, self.exception_record_scratch_size);
        let (fake_start, fake_end) = span(self.fake_handler_region, self.fake_handler_region_size);

        vec![
            ("thread block", thread_start, thread_end),
            ("process block", peb_start, peb_end),
            ("loader data", ldr_start, ldr_end),
            ("module slots", modules_start, modules_end),
            ("default seh frame", seh_start, seh_end),
            ("environment block", env_start, env_end),
            ("process parameters", params_start, params_end),
            ("context scratch", ctx_start, ctx_end),
            ("exception record scratch", rec_start, rec_end),
            ("fake handler region", fake_start, fake_end),
        ]
    }

    /// Checks that all regions fit the 32-bit address space, are distinct and
    /// non-overlapping, and that the return trampoline does not fall inside any of them.
    ///
    /// # Errors
    /// Returns [`EmulationError::LayoutOutOfRange`] for a region that does not fit, and
    /// [`EmulationError::LayoutOverlap`] naming the first colliding pair.
    pub fn validate(&self) -> Result<()> {
        let regions = self.regions();
        if let Some(&(region, _, _)) = regions
            .iter()
            .find(|&&(_, _, end)| end > ADDRESS_SPACE_END)
        {
            return Err(EmulationError::LayoutOutOfRange { region }.into());
        }

        for (index, &(first, start_a, end_a)) in regions.iter().enumerate() {
            for &(second, start_b, end_b) in &regions[index + 1..] {
                if start_a < end_b && start_b < end_a {
                    return Err(EmulationError::LayoutOverlap { first, second }.into());
                }
            }

            let trampoline = u64::from(self.return_trampoline);
            if trampoline >= start_a && trampoline < end_a {
                return Err(EmulationError::LayoutOverlap {
                    first,
                    second: "return trampoline",
                }
                .into());
            }
        }

        Ok(())
    }
}
