//! # ntscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the ntscope library. Import this module to get quick access to the essential
//! types for building an emulated Win32 process environment.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all ntscope operations
pub use crate::Error;

/// The result type used throughout ntscope
pub use crate::Result;

/// Errors raised by the emulation layer
pub use crate::emulation::EmulationError;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// One emulated process and its configuration
pub use crate::emulation::{EmulationSession, EnvironmentConfig};

/// Guest addresses of every synthetic structure
pub use crate::emulation::AddressLayout;

/// Low-level file parsing utilities
pub use crate::{file::File, Parser};

/// Image metadata extraction
pub use crate::file::{ImageParser, PeParser};

// ================================================================================================
// Host Interfaces
// ================================================================================================

/// Guest memory abstraction and the bundled implementation
pub use crate::emulation::{GuestMemory, MemoryProtection, VirtualMemory};

/// CPU abstraction and the bundled register file
pub use crate::emulation::{CpuEngine, Register, RegisterSnapshot, X86Cpu};

// ================================================================================================
// Loader
// ================================================================================================

/// Module registry and loader lists
pub use crate::emulation::{
    ModuleDescriptor, ModuleList, ModuleListKind, ModuleRegistry, ModuleSource,
};

// ================================================================================================
// Structured Exception Handling
// ================================================================================================

/// SEH dispatcher and related guest structures
pub use crate::emulation::{
    DispatchState, ExceptionCode, ExceptionDisposition, ExceptionRecord, SehDispatcher, SehFrame,
};

/// `CONTEXT` record codec
pub use crate::emulation::exception::context;
