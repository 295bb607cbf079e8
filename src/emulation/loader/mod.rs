//! Module registry and loader lists.
//!
//! This module fabricates the loader side of the synthetic process: one loader record per
//! module, laid out in fixed-size slots, and the three circular lists
//! (`InLoadOrderModuleList`, `InMemoryOrderModuleList`, `InInitializationOrderModuleList`)
//! threaded through those records.
//!
//! # Components
//!
//! - [`ModuleRegistry`] - Assigns slots and writes loader records, name and path buffers
//! - [`ModuleList`] - Computes one list ordering and patches its link pairs
//! - [`ModuleDescriptor`] / [`ModuleSource`] - What the registry is fed
//!
//! # Architecture
//!
//! ```text
//! +----------------+     +------------------+     +-------------------+
//! | ModuleSource   | --> | ModuleRegistry   | --> | slots in guest    |
//! | (path or desc) |     | (index <-> slot) |     | memory            |
//! +----------------+     +------------------+     +-------------------+
//!                                 |                         ^
//!                                 v                         |
//!                        +------------------+               |
//!                        | ModuleList x3    | --------------+
//!                        +------------------+   link pairs
//! ```
//!
//! # Example
//!
//! ```rust
//! use ntscope::emulation::{
//!     AddressLayout, GuestMemory, ModuleDescriptor, ModuleList, ModuleListKind, ModuleRegistry,
//! };
//! use ntscope::file::PeParser;
//! use std::path::Path;
//!
//! let layout = AddressLayout::default();
//! let mut memory = GuestMemory::new();
//! let main = ModuleDescriptor::new("toto.exe", "toto.exe", 0x40_0000, 0x40_1000, 0x5000);
//! let ntdll = ModuleDescriptor::new("ntdll.dll", "ntdll.dll", 0x7c90_0000, 0x7c91_2c28, 0xaf000);
//!
//! let registry = ModuleRegistry::build(
//!     &mut memory,
//!     &layout,
//!     &PeParser,
//!     &main.into(),
//!     &[ntdll.into()],
//!     Path::new("win_dll"),
//! )?;
//!
//! let list = ModuleList::build(
//!     ModuleListKind::LoadOrder,
//!     &registry,
//!     &["toto.exe", "", "ntdll.dll"],
//!     ["ntdll.dll", "kernel32.dll"],
//! );
//! list.write(&mut memory)?;
//! assert_eq!(list.len(), 3);
//! # Ok::<(), ntscope::Error>(())
//! ```

mod linker;
mod module;
mod registry;

pub use linker::{link, ListLink, ModuleList, ModuleListKind};
pub use module::{wide_bytes, ModuleDescriptor, ModuleKey, ModuleRole, ModuleSource};
pub use registry::{ModuleEntry, ModuleRegistry};
