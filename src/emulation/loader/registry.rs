//! Module registry and loader-record serialization.
//!
//! The registry assigns one fixed-size slot per module in the loader region and writes the
//! module's `LDR_DATA_TABLE_ENTRY` prefix into it:
//!
//! | Offset | Field |
//! |--------|-------|
//! | `0x00` | `InLoadOrderLinks` (patched by the linker) |
//! | `0x08` | `InMemoryOrderLinks` (patched by the linker) |
//! | `0x10` | `InInitializationOrderLinks` (patched by the linker) |
//! | `0x18` | `DllBase` |
//! | `0x1c` | `EntryPoint` |
//! | `0x20` | `SizeOfImage` |
//! | `0x24` | `FullDllName` (`UNICODE_STRING`) |
//! | `0x2c` | `BaseDllName` (`UNICODE_STRING`) |
//!
//! The base name and full path buffers live at fixed offsets inside the same slot.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::{
    emulation::{
        layout::{AddressLayout, LOADER_RECORD_SIZE},
        loader::module::{wide_bytes, ModuleDescriptor, ModuleKey, ModuleRole, ModuleSource},
        memory::{MemoryProtection, VirtualMemory},
    },
    file::{io::write_le_at, ImageParser},
    Result,
};

/// Zero bytes appended after each name buffer.
const NAME_PADDING: usize = 3;

/// A registered module and the slot holding its loader record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleEntry {
    /// Descriptor of the module
    pub descriptor: ModuleDescriptor,
    /// Lookup key (lowercase wide base name)
    pub key: ModuleKey,
    /// Role in the loader lists
    pub role: ModuleRole,
    /// Guest address of the module's slot
    pub slot: u32,
}

/// All modules of a session, in registration order.
///
/// Registration order is always: main module, sentinel, then the auxiliary modules in the
/// order given. Modules whose images cannot be parsed are skipped but still consume a slot
/// position, so slot addresses depend only on the input position.
#[derive(Clone, Debug, Default)]
pub struct ModuleRegistry {
    entries: Vec<ModuleEntry>,
    by_key: HashMap<ModuleKey, usize>,
    positions: usize,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the main module, the sentinel and `auxiliary`, writing each loader record.
    ///
    /// Path sources of auxiliary modules are read from `dll_dir`; the main module's path is
    /// used as is. An auxiliary module that cannot be parsed is logged and skipped. A main
    /// module that cannot be parsed is logged as an error and left out, which produces an
    /// inconsistent process block and loader data.
    ///
    /// # Errors
    /// Returns an error if a slot cannot be mapped or a name does not fit its buffer.
    pub fn build(
        memory: &mut dyn VirtualMemory,
        layout: &AddressLayout,
        parser: &dyn ImageParser,
        main: &ModuleSource,
        auxiliary: &[ModuleSource],
        dll_dir: &Path,
    ) -> Result<Self> {
        let mut registry = ModuleRegistry::new();

        match resolve(parser, main, PathBuf::from(main.path())) {
            Ok(descriptor) => {
                registry.register(memory, layout, ModuleRole::Main, descriptor, main.path())?;
            }
            Err(error) => {
                log::error!(
                    "Cannot parse main module '{}' ({}), loader data will be inconsistent",
                    main.path(),
                    error
                );
                registry.skip();
            }
        }

        registry.register(
            memory,
            layout,
            ModuleRole::Sentinel,
            ModuleDescriptor::sentinel(),
            "",
        )?;

        for source in auxiliary {
            match resolve(parser, source, dll_dir.join(source.path())) {
                Ok(descriptor) => {
                    registry.register(
                        memory,
                        layout,
                        ModuleRole::Ordinary,
                        descriptor,
                        source.path(),
                    )?;
                }
                Err(error) => {
                    log::warn!("Cannot load module '{}': {}", source.path(), error);
                    registry.skip();
                }
            }
        }

        Ok(registry)
    }

    /// Register one module at the next slot position and write its loader record.
    ///
    /// The key is the base name of `guest_path`, or of the descriptor's name when the path is
    /// empty. Returns `None` if the module was not registered: a module with the same key
    /// already exists, or the slot range is exhausted. Both are logged. The sentinel is never
    /// rejected as a duplicate.
    ///
    /// # Errors
    /// Returns an error if the slot cannot be mapped or a name does not fit its buffer.
    pub fn register(
        &mut self,
        memory: &mut dyn VirtualMemory,
        layout: &AddressLayout,
        role: ModuleRole,
        mut descriptor: ModuleDescriptor,
        guest_path: &str,
    ) -> Result<Option<&ModuleEntry>> {
        let position = self.positions;
        self.positions += 1;

        let slot = match layout.module_slot(position) {
            Some(slot) if position < layout.max_modules as usize => slot,
            _ => {
                log::warn!(
                    "Module slots exhausted, '{}' is not registered",
                    descriptor.name
                );
                return Ok(None);
            }
        };

        let key = if guest_path.is_empty() {
            ModuleKey::new(&descriptor.name)
        } else {
            ModuleKey::new(guest_path)
        };
        // The sentinel is looked up by role and never counts as a duplicate
        if role != ModuleRole::Sentinel && self.by_key.contains_key(&key) {
            log::warn!("Module '{}' registered twice, keeping the first", key);
            return Ok(None);
        }

        descriptor.path = guest_path.to_string();
        log::info!("Add module {:#x} '{}'", descriptor.image_base, key);

        memory.allocate_region(
            u64::from(slot),
            MemoryProtection::READ_WRITE,
            &serialize_slot(layout, slot, &key, &descriptor)?,
        )?;

        let index = self.entries.len();
        if role == ModuleRole::Sentinel {
            self.by_key.entry(key.clone()).or_insert(index);
        } else {
            self.by_key.insert(key.clone(), index);
        }
        self.entries.push(ModuleEntry {
            descriptor,
            key,
            role,
            slot,
        });
        Ok(self.entries.last())
    }

    /// Consume a slot position without registering anything.
    fn skip(&mut self) {
        self.positions += 1;
    }

    /// Entry for a module name or path, case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ModuleEntry> {
        self.get_key(&ModuleKey::new(name))
    }

    /// Entry for an already normalized key.
    #[must_use]
    pub fn get_key(&self, key: &ModuleKey) -> Option<&ModuleEntry> {
        self.index_of(key).map(|index| &self.entries[index])
    }

    /// Registration index of `key`.
    #[must_use]
    pub fn index_of(&self, key: &ModuleKey) -> Option<usize> {
        self.by_key.get(key).copied()
    }

    /// Entry at registration index `index`.
    #[must_use]
    pub fn entry(&self, index: usize) -> Option<&ModuleEntry> {
        self.entries.get(index)
    }

    /// All entries in registration order.
    #[must_use]
    pub fn entries(&self) -> &[ModuleEntry] {
        &self.entries
    }

    /// The main module, if it was registered.
    #[must_use]
    pub fn main(&self) -> Option<&ModuleEntry> {
        self.by_role(ModuleRole::Main)
    }

    /// The sentinel module.
    #[must_use]
    pub fn sentinel(&self) -> Option<&ModuleEntry> {
        self.by_role(ModuleRole::Sentinel)
    }

    fn by_role(&self, role: ModuleRole) -> Option<&ModuleEntry> {
        self.entries.iter().find(|entry| entry.role == role)
    }

    /// Number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no module is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn resolve(
    parser: &dyn ImageParser,
    source: &ModuleSource,
    host_path: PathBuf,
) -> Result<ModuleDescriptor> {
    match source {
        ModuleSource::Descriptor(descriptor) => Ok(descriptor.clone()),
        ModuleSource::Path(path) => parser.parse_path(&host_path, path),
    }
}

/// Bytes of a complete module slot: loader record, base name and full path.
fn serialize_slot(
    layout: &AddressLayout,
    slot: u32,
    key: &ModuleKey,
    descriptor: &ModuleDescriptor,
) -> Result<Vec<u8>> {
    let name = key.as_bytes();
    let path = wide_bytes(&descriptor.guest_path());

    let name_offset = layout.module_name_offset as usize;
    let path_offset = layout.module_path_offset as usize;
    let slot_size = layout.module_slot_size as usize;

    if name_offset + name.len() + NAME_PADDING > path_offset {
        return Err(malformed_error!(
            "Module name '{}' does not fit its {:#x} byte buffer",
            key,
            path_offset - name_offset
        ));
    }
    if path_offset + path.len() + NAME_PADDING > slot_size {
        return Err(malformed_error!(
            "Module path '{}' does not fit its {:#x} byte buffer",
            descriptor.path,
            slot_size - path_offset
        ));
    }

    let name_len = u16::try_from(name.len())
        .map_err(|_| malformed_error!("Module name too long: {}", name.len()))?;
    let path_len = u16::try_from(path.len())
        .map_err(|_| malformed_error!("Module path too long: {}", path.len()))?;

    let mut data = vec![0_u8; slot_size];
    // The three list-entry pairs stay zero until linked
    let mut offset = 0x18_usize;
    write_le_at(&mut data, &mut offset, descriptor.image_base)?;
    write_le_at(&mut data, &mut offset, descriptor.entry_point)?;
    write_le_at(&mut data, &mut offset, descriptor.image_size)?;
    write_le_at(&mut data, &mut offset, path_len)?;
    write_le_at(&mut data, &mut offset, path_len + 2)?;
    write_le_at(&mut data, &mut offset, slot + layout.module_path_offset)?;
    write_le_at(&mut data, &mut offset, name_len)?;
    write_le_at(&mut data, &mut offset, name_len + 2)?;
    write_le_at(&mut data, &mut offset, slot + layout.module_name_offset)?;
    debug_assert_eq!(offset, LOADER_RECORD_SIZE as usize);

    data[name_offset..name_offset + name.len()].copy_from_slice(name);
    data[path_offset..path_offset + path.len()].copy_from_slice(&path);

    Ok(data)
}
