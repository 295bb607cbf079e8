//! Errors raised by the emulation layer.

use thiserror::Error;

use crate::emulation::exception::ExceptionDisposition;

/// Failure modes of guest memory access, context marshalling and SEH dispatch.
///
/// These are converted into [`crate::Error::Emulation`] by `?`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmulationError {
    /// A guest address is not backed by any region, or an access would leave its region.
    #[error("Invalid guest pointer {address:#010x}: {reason}")]
    InvalidPointer {
        /// The offending guest address
        address: u64,
        /// Why the access was rejected
        reason: &'static str,
    },

    /// A fixed-address allocation collides with an existing region.
    #[error("Region {address:#010x}+{size:#x} overlaps existing region at {existing:#010x}")]
    RegionOverlap {
        /// Requested base address
        address: u64,
        /// Requested size
        size: usize,
        /// Base address of the region already occupying the range
        existing: u64,
    },

    /// Two regions of an [`AddressLayout`](crate::emulation::AddressLayout) collide.
    #[error("Address layout regions '{first}' and '{second}' overlap")]
    LayoutOverlap {
        /// Name of the first region
        first: &'static str,
        /// Name of the second region
        second: &'static str,
    },

    /// A region of an [`AddressLayout`](crate::emulation::AddressLayout) ends beyond the
    /// 32-bit guest address space.
    #[error("Address layout region '{region}' exceeds the 32-bit address space")]
    LayoutOutOfRange {
        /// Name of the region
        region: &'static str,
    },

    /// A context record buffer does not have the fixed context size.
    #[error("Context record must be {expected:#x} bytes, got {actual:#x}")]
    ContextSizeMismatch {
        /// The fixed context record size
        expected: usize,
        /// The size that was supplied
        actual: usize,
    },

    /// A guest handler returned an outcome this layer does not implement.
    ///
    /// Only "continue execution" is resolved; "continue search", the "go to next handler"
    /// sentinel and unrecognized values stop the dispatch here.
    #[error("Unsupported exception disposition {value:#x} ({disposition:?})")]
    UnsupportedDisposition {
        /// Raw value of the handler's return register
        value: u32,
        /// Decoded disposition, if the value is a known one
        disposition: Option<ExceptionDisposition>,
    },

    /// The return trampoline was reached with no dispatch in flight.
    #[error("No exception dispatch is in flight")]
    NoDispatchInFlight,

    /// Carving the dispatch frame would wrap the stack pointer below zero.
    #[error("Stack pointer {esp:#010x} cannot hold a {needed:#x} byte dispatch frame")]
    StackOverflow {
        /// Stack pointer at the time of the exception
        esp: u32,
        /// Bytes the dispatch frame needs
        needed: u32,
    },
}
