//! Guest virtual memory abstraction.
//!
//! The environment builder and the SEH dispatcher never own guest memory; they drive
//! whatever backing store the surrounding emulator uses through the [`VirtualMemory`] trait.
//! Addresses are always chosen by the caller, never by the engine: the synthetic structures
//! must land at the exact addresses guest code expects.
//!
//! [`GuestMemory`] is a self-contained implementation suitable for tests and for embedding
//! in emulators that do not bring their own memory model.

mod guest;

pub use guest::GuestMemory;

use bitflags::bitflags;

use crate::{
    file::io::{pack_u32s, read_le},
    Result,
};

bitflags! {
    /// Page protection flags for guest regions.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MemoryProtection: u32 {
        /// Region can be read
        const READ = 0x1;
        /// Region can be written
        const WRITE = 0x2;
        /// Region can be executed
        const EXECUTE = 0x4;
        /// Read and write access, used for every synthetic structure
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

/// Byte-level access to the guest address space.
///
/// Implementations must accept allocations at caller-chosen addresses, including regions
/// adjacent to one another, and should reject allocations that overlap an existing region.
pub trait VirtualMemory {
    /// Map a new region at `address`, initialized with `data`.
    ///
    /// # Errors
    /// Returns an error if the range is already (partially) mapped.
    fn allocate_region(&mut self, address: u64, protection: MemoryProtection, data: &[u8])
        -> Result<()>;

    /// Read `length` bytes starting at `address`.
    ///
    /// # Errors
    /// Returns an error if any byte of the range is unmapped.
    fn read(&self, address: u64, length: usize) -> Result<Vec<u8>>;

    /// Write `data` starting at `address`.
    ///
    /// # Errors
    /// Returns an error if any byte of the range is unmapped.
    fn write(&mut self, address: u64, data: &[u8]) -> Result<()>;

    /// Acknowledge the memory-side exception that triggered a dispatch.
    fn clear_pending_exception(&mut self);

    /// Read a little-endian DWORD.
    ///
    /// # Errors
    /// Returns an error if the four bytes are not mapped.
    fn read_u32(&self, address: u32) -> Result<u32> {
        read_le::<u32>(&self.read(u64::from(address), 4)?)
    }

    /// Write a little-endian DWORD.
    ///
    /// # Errors
    /// Returns an error if the four bytes are not mapped.
    fn write_u32(&mut self, address: u32, value: u32) -> Result<()> {
        self.write(u64::from(address), &value.to_le_bytes())
    }

    /// Write a run of little-endian DWORDs.
    ///
    /// # Errors
    /// Returns an error if the range is not mapped.
    fn write_u32s(&mut self, address: u32, values: &[u32]) -> Result<()> {
        self.write(u64::from(address), &pack_u32s(values))
    }
}
