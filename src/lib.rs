// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # ntscope
//!
//! A Win32 x86 process-environment and structured-exception-handling layer for CPU emulators.
//!
//! Malware and packed executables routinely walk their own process environment: they read
//! the thread block through `fs:[0]`, follow it to the process block, and enumerate the loader's
//! module lists to locate `kernel32.dll` without importing anything. Many of them also rely on
//! SEH for control flow. `ntscope` fabricates those structures in guest memory at the addresses
//! real Windows uses, and turns CPU exceptions into SEH handler invocations.
//!
//! ## Features
//!
//! - **🧱 Synthetic environment** - Thread block, process block, loader data, environment block
//! - **🔗 Loader lists** - Load, memory and initialization order, circular and consistent
//! - **⚡ SEH dispatch** - `EXCEPTION_RECORD` + `CONTEXT` frames, guard frame, trampoline return
//! - **📦 PE module metadata** - Base, entry point and size read with goblin from real images
//! - **🔧 Engine agnostic** - Any CPU engine and memory model behind two small traits
//!
//! ## Quick Start
//!
//! ```rust
//! use ntscope::prelude::*;
//!
//! let main = ModuleDescriptor::new("toto.exe", "c:\\xxx\\toto.exe", 0x40_0000, 0x40_1000, 0x5000);
//! let ntdll = ModuleDescriptor::new("ntdll.dll", "ntdll.dll", 0x7c90_0000, 0x7c91_2c28, 0xaf000);
//! let config = EnvironmentConfig::new()
//!     .with_main(main)
//!     .with_modules(vec![ntdll.into()]);
//!
//! let mut session = EmulationSession::new(config, GuestMemory::new(), X86Cpu::new())?;
//! session.init_environment()?;
//! session.install_fs_segment();
//!
//! // fs:[0x30] -> process block -> Ldr -> InLoadOrderModuleList
//! let peb = session.memory().read_u32(0x7ff7_0030)?;
//! let ldr = session.memory().read_u32(peb + 0xc)?;
//! let first = session.memory().read_u32(ldr + 0xc)?;
//! assert_eq!(session.memory().read_u32(first + 0x18)?, 0x40_0000);
//! # Ok::<(), ntscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`prelude`] - Convenient re-exports of commonly used types and traits
//! - [`emulation`] - Environment builder, loader lists and SEH dispatcher
//! - [`file`] - Module image access and PE metadata extraction
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Logging
//!
//! All diagnostics go through the [`log`](https://docs.rs/log) facade. Degraded configurations
//! (a missing main module, missing core system modules) are reported at `warn`; module
//! registration, loader-list contents and SEH chain walks are reported at `info` and `debug`.
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, Error>`](Result):
//!
//! ```rust,no_run
//! use ntscope::{emulation::EmulationError, Error};
//!
//! # fn run() -> ntscope::Result<u32> { Ok(0) }
//! match run() {
//!     Ok(eip) => println!("resume at {:#x}", eip),
//!     Err(Error::Emulation(EmulationError::NoDispatchInFlight)) => println!("nothing to resolve"),
//!     Err(e) => println!("error: {}", e),
//! }
//! ```
#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use ntscope::prelude::*;
///
/// let layout = AddressLayout::default();
/// assert_eq!(layout.thread_block, 0x7ff7_0000);
/// ```
pub mod prelude;

/// Module image access and PE metadata extraction
///
/// This module provides the file-level plumbing for module registration: memory-mapped or
/// in-memory image backends, a little-endian [`Parser`], guest I/O helpers and the
/// [`file::ImageParser`] seam that yields base, entry point and size of a PE image.
///
/// # Examples
///
/// ```rust,no_run
/// use ntscope::file::{ImageParser, PeParser};
/// use std::path::Path;
///
/// let descriptor = PeParser.parse_path(Path::new("win_dll/kernel32.dll"), "kernel32.dll")?;
/// println!("{} at {:#x}", descriptor.name, descriptor.image_base);
/// # Ok::<(), ntscope::Error>(())
/// ```
pub mod file;

/// Win32 x86 environment emulation
///
/// The synthetic process environment, the loader module registry and its three lists,
/// the `CONTEXT` codec and the SEH dispatch/resolve state machine.
///
/// # Key Components
///
/// - [`emulation::EmulationSession`] - One emulated process, end to end
/// - [`emulation::ModuleRegistry`] - Module slots and loader records
/// - [`emulation::SehDispatcher`] - Exception dispatch and resolution
///
/// See the module documentation for a full walk-through.
pub mod emulation;

/// `ntscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `ntscope` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

/// Little-endian binary parser over a byte slice.
///
/// # Example
///
/// ```rust
/// use ntscope::Parser;
///
/// let data = [0x05, 0x00, 0x00, 0xc0];
/// let mut parser = Parser::new(&data);
/// assert_eq!(parser.read_le::<u32>()?, 0xc000_0005);
/// # Ok::<(), ntscope::Error>(())
/// ```
pub use file::parser::Parser;
