//! `EXCEPTION_RECORD` and `EXCEPTION_REGISTRATION_RECORD` views.

use crate::{
    emulation::memory::VirtualMemory,
    file::io::{pack_u32s, read_le_at},
    Result,
};

/// Size of the fixed part of an `EXCEPTION_RECORD` this layer writes.
pub const EXCEPTION_RECORD_SIZE: usize = 0x14;

/// `Next` value terminating the SEH chain.
pub const SEH_CHAIN_END: u32 = 0xFFFF_FFFF;

/// The exception record handed to a guest handler.
///
/// Nested records and exception parameters are not produced, so `nested` and
/// `parameter_count` are zero for every record built by [`ExceptionRecord::new`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExceptionRecord {
    /// `ExceptionCode`
    pub code: u32,
    /// `ExceptionFlags`
    pub flags: u32,
    /// `ExceptionRecord` (nested record pointer)
    pub nested: u32,
    /// `ExceptionAddress`, the faulting EIP
    pub address: u32,
    /// `NumberParameters`
    pub parameter_count: u32,
}

impl ExceptionRecord {
    /// A record for `code` raised at `address`.
    #[must_use]
    pub fn new(code: u32, address: u32) -> Self {
        Self {
            code,
            address,
            ..Self::default()
        }
    }

    /// Little-endian bytes of the record.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        pack_u32s(&[
            self.code,
            self.flags,
            self.nested,
            self.address,
            self.parameter_count,
        ])
    }

    /// Read a record from guest memory.
    ///
    /// # Errors
    /// Returns an error if the record is not mapped.
    pub fn read(memory: &dyn VirtualMemory, address: u32) -> Result<Self> {
        let data = memory.read(u64::from(address), EXCEPTION_RECORD_SIZE)?;
        let mut offset = 0;
        Ok(Self {
            code: read_le_at(&data, &mut offset)?,
            flags: read_le_at(&data, &mut offset)?,
            nested: read_le_at(&data, &mut offset)?,
            address: read_le_at(&data, &mut offset)?,
            parameter_count: read_le_at(&data, &mut offset)?,
        })
    }
}

/// One frame of the SEH chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SehFrame {
    /// Guest address of the frame
    pub address: u32,
    /// `Next`
    pub previous: u32,
    /// `Handler`
    pub handler: u32,
}

impl SehFrame {
    /// Read the frame at `address`.
    ///
    /// # Errors
    /// Returns an error if the frame is not mapped.
    pub fn read(memory: &dyn VirtualMemory, address: u32) -> Result<Self> {
        Ok(Self {
            address,
            previous: memory.read_u32(address)?,
            handler: memory.read_u32(address.wrapping_add(4))?,
        })
    }

    /// Whether this is the last frame of the chain.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.previous == SEH_CHAIN_END || self.previous == 0
    }
}
