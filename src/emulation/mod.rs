//! Win32 x86 environment emulation.
//!
//! This module provides the pieces an x86 CPU emulator needs to run 32-bit Windows code
//! that inspects its own process environment or relies on structured exception handling.
//! It does not execute instructions; it drives an external CPU engine and guest memory
//! through the [`CpuEngine`] and [`VirtualMemory`] traits.
//!
//! # Architecture
//!
//! - Fixed guest addresses of every synthetic structure
//! - Guest memory and CPU abstractions
//! - Module registry and the three circular loader lists
//! - Thread block, process block, loader data and environment
//! - `CONTEXT` codec and the SEH dispatch/resolve state machine
//!
//! # Key Components
//!
//! ## Environment
//! - [`crate::emulation::EmulationSession`] - One emulated process, end to end
//! - [`crate::emulation::EnvironmentConfig`] - Modules, layout and fixed values
//! - [`crate::emulation::AddressLayout`] - Guest addresses of every structure
//!
//! ## Loader
//! - [`crate::emulation::ModuleRegistry`] - Module slots and loader records
//! - [`crate::emulation::ModuleList`] - One of the three loader list orderings
//!
//! ## Exceptions
//! - [`crate::emulation::SehDispatcher`] - Builds handler frames and resolves dispositions
//! - [`crate::emulation::exception::context`] - `CONTEXT` encode/decode
//!
//! ## Host interfaces
//! - [`crate::emulation::VirtualMemory`] / [`crate::emulation::GuestMemory`]
//! - [`crate::emulation::CpuEngine`] / [`crate::emulation::X86Cpu`]
//!
//! # Usage Examples
//!
//! ```rust
//! use ntscope::emulation::{
//!     CpuEngine, EmulationSession, EnvironmentConfig, GuestMemory, MemoryProtection,
//!     ModuleDescriptor, Register, VirtualMemory, X86Cpu,
//! };
//!
//! let main = ModuleDescriptor::new("toto.exe", "c:\\toto.exe", 0x40_0000, 0x40_1000, 0x5000);
//! let config = EnvironmentConfig::new().with_main(main).with_modules(vec![]);
//! let mut session = EmulationSession::new(config, GuestMemory::new(), X86Cpu::new())?;
//! session.init_environment()?;
//!
//! // A stack with one registered handler
//! session
//!     .memory_mut()
//!     .allocate_region(0x12_0000, MemoryProtection::READ_WRITE, &vec![0; 0x1_0000])?;
//! session.memory_mut().write_u32s(0x12_ff00, &[0xffff_ffff, 0x40_5000])?;
//! session.memory_mut().write_u32(0x7ff7_0000, 0x12_ff00)?;
//! session.cpu_mut().set_reg(Register::Esp, 0x12_fec0);
//!
//! let handler = session.dispatch_exception(0xc000_0005)?;
//! assert_eq!(handler, 0x40_5000);
//! # Ok::<(), ntscope::Error>(())
//! ```
//!
//! # Thread Safety
//!
//! A session is single-threaded and owns all of its state. Independent sessions do not
//! share anything and may live on different threads.

pub mod cpu;
pub mod exception;
pub mod layout;
pub mod loader;
pub mod memory;
pub mod process;

mod error;

pub use error::EmulationError;

pub use cpu::{CpuEngine, Register, RegisterSnapshot, X86Cpu};

pub use layout::AddressLayout;

pub use memory::{GuestMemory, MemoryProtection, VirtualMemory};

pub use loader::{
    link, ModuleDescriptor, ModuleEntry, ModuleKey, ModuleList, ModuleListKind, ModuleRegistry,
    ModuleRole, ModuleSource,
};

pub use exception::{
    walk_chain, ChainWalk, DispatchFrame, DispatchState, ExceptionCode, ExceptionDisposition,
    ExceptionRecord, SehDispatcher, SehFrame,
};

pub use process::{EmulationSession, EnvironmentConfig};
