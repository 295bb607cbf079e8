//! Synthetic Win32 process environment.
//!
//! This module fabricates the in-memory structures a 32-bit Windows program inspects about
//! itself at startup: the thread block reachable through `FS`, the process block, the loader
//! data with its three module lists, the environment block and the process parameters.
//!
//! # Key Components
//!
//! - [`EnvironmentConfig`] - Which modules to register and where everything lives
//! - [`EmulationSession`] - Owns memory, CPU, registry and SEH dispatcher for one process
//! - The `build_*` functions - Individual block builders, usable on their own
//!
//! # Workflow
//!
//! 1. Create an [`EnvironmentConfig`]
//! 2. Create an [`EmulationSession`] over guest memory and a CPU engine
//! 3. Call [`init_environment`](EmulationSession::init_environment)
//! 4. Call [`install_fs_segment`](EmulationSession::install_fs_segment)
//! 5. Run guest code, routing faults to
//!    [`dispatch_exception`](EmulationSession::dispatch_exception) and returns to the trampoline
//!    to [`resolve_exception`](EmulationSession::resolve_exception)

mod blocks;
mod config;
mod session;

pub use blocks::{
    build_default_seh_frame, build_environment_block, build_loader_data, build_process_block,
    build_process_parameters, build_thread_block, map_scratch_regions, DEFAULT_SEH_HANDLERS,
    ENVIRONMENT_BLOCK_SIZE, THREAD_BLOCK_MARKER,
};
pub use config::EnvironmentConfig;
pub use session::EmulationSession;
