//! Structured exception handling for the emulated thread.
//!
//! This module turns an exception raised by the external CPU engine into the calling
//! convention a guest SEH handler expects, and undoes it when the handler returns.
//!
//! # Overview
//!
//! When guest code faults, the host does not unwind anything itself. Instead it:
//!
//! 1. Builds an `EXCEPTION_RECORD` and a `CONTEXT` on the guest stack
//! 2. Installs a guard frame at the head of the thread's SEH chain
//! 3. Calls the first registered handler with a return address pointing at a trampoline
//!
//! When execution reaches the trampoline, the handler's disposition (in `EAX`) decides what
//! happens next. Only "continue execution" is resolved here; the other dispositions are
//! reported as [`EmulationError::UnsupportedDisposition`](crate::emulation::EmulationError).
//!
//! # Key Components
//!
//! - [`SehDispatcher`] - The dispatch/resolve state machine
//! - [`context`] - `CONTEXT` record codec
//! - [`ExceptionRecord`] / [`SehFrame`] - Guest structures read and written during dispatch
//! - [`walk_chain`] - Bounded traversal of the SEH chain
//!
//! # State Transitions
//!
//! ```text
//! Idle --dispatch()--> Dispatching --> HandlerRunning --resolve()--> Resolving --> Idle
//! ```

pub mod context;

mod chain;
mod dispatch;
mod record;

pub use chain::{walk_chain, ChainWalk};
pub use dispatch::{DispatchFrame, DispatchState, SehDispatcher};
pub use record::{ExceptionRecord, SehFrame, EXCEPTION_RECORD_SIZE, SEH_CHAIN_END};

use strum::{Display, EnumIter, IntoEnumIterator};

/// `EXCEPTION_BREAKPOINT`
pub const EXCEPTION_BREAKPOINT: u32 = 0x8000_0003;
/// `EXCEPTION_ACCESS_VIOLATION`
pub const EXCEPTION_ACCESS_VIOLATION: u32 = 0xC000_0005;
/// `EXCEPTION_INT_DIVIDE_BY_ZERO`
pub const EXCEPTION_INT_DIVIDE_BY_ZERO: u32 = 0xC000_0094;
/// `EXCEPTION_PRIV_INSTRUCTION`
pub const EXCEPTION_PRIV_INSTRUCTION: u32 = 0xC000_0096;
/// `EXCEPTION_ILLEGAL_INSTRUCTION`
pub const EXCEPTION_ILLEGAL_INSTRUCTION: u32 = 0xC000_001D;

/// Exception codes the CPU engine is expected to raise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ExceptionCode {
    /// `int3`
    Breakpoint,
    /// Unmapped or protected memory access
    AccessViolation,
    /// Integer division by zero
    IntDivideByZero,
    /// Privileged instruction in user mode
    PrivilegedInstruction,
    /// Undefined opcode
    IllegalInstruction,
}

impl ExceptionCode {
    /// Raw NTSTATUS value.
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            ExceptionCode::Breakpoint => EXCEPTION_BREAKPOINT,
            ExceptionCode::AccessViolation => EXCEPTION_ACCESS_VIOLATION,
            ExceptionCode::IntDivideByZero => EXCEPTION_INT_DIVIDE_BY_ZERO,
            ExceptionCode::PrivilegedInstruction => EXCEPTION_PRIV_INSTRUCTION,
            ExceptionCode::IllegalInstruction => EXCEPTION_ILLEGAL_INSTRUCTION,
        }
    }

    /// Look up a raw value.
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        ExceptionCode::iter().find(|candidate| candidate.code() == code)
    }
}

impl From<ExceptionCode> for u32 {
    fn from(code: ExceptionCode) -> Self {
        code.code()
    }
}

/// `EXCEPTION_DISPOSITION` values a handler returns in `EAX`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ExceptionDisposition {
    /// Resume at the (possibly edited) context
    ContinueExecution,
    /// Pass the exception to the next handler
    ContinueSearch,
    /// Exception raised while dispatching another
    NestedException,
    /// Unwind collided with another unwind
    CollidedUnwind,
}

impl ExceptionDisposition {
    /// Decode the handler's return value; `None` for values outside `0..=3`.
    #[must_use]
    pub fn from_eax(value: u32) -> Option<Self> {
        match value {
            0 => Some(ExceptionDisposition::ContinueExecution),
            1 => Some(ExceptionDisposition::ContinueSearch),
            2 => Some(ExceptionDisposition::NestedException),
            3 => Some(ExceptionDisposition::CollidedUnwind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_lookup() {
        assert_eq!(
            ExceptionCode::from_code(0xC000_0005),
            Some(ExceptionCode::AccessViolation)
        );
        assert_eq!(ExceptionCode::from_code(0x1234), None);
        assert_eq!(u32::from(ExceptionCode::Breakpoint), 0x8000_0003);

        for code in ExceptionCode::iter() {
            assert_eq!(ExceptionCode::from_code(code.code()), Some(code));
        }
    }

    #[test]
    fn test_disposition_from_eax() {
        assert_eq!(
            ExceptionDisposition::from_eax(0),
            Some(ExceptionDisposition::ContinueExecution)
        );
        assert_eq!(
            ExceptionDisposition::from_eax(1),
            Some(ExceptionDisposition::ContinueSearch)
        );
        assert_eq!(ExceptionDisposition::from_eax(0xFFFF_FFFF), None);
    }
}
