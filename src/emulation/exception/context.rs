//! x86 `CONTEXT` record codec.
//!
//! The record has the native 32-bit layout:
//!
//! | Offset | Field |
//! |--------|-------|
//! | `0x000` | `ContextFlags` (always 0) |
//! | `0x004` | `Dr0`..`Dr3`, `Dr6`, `Dr7` (always 0) |
//! | `0x01c` | `FloatSave`, 112 bytes (always 0) |
//! | `0x08c` | `SegGs`, `SegFs`, `SegEs`, `SegDs` |
//! | `0x09c` | `Edi`, `Esi`, `Ebx`, `Edx`, `Ecx`, `Eax`, `Ebp` |
//! | `0x0b8` | `Eip`, `SegCs`, `EFlags` (always 0), `Esp`, `SegSs` |
//! | `0x0cc` | `ExtendedRegisters`, 512 bytes (always 0) |
//!
//! Encoding and decoding are pure; callers copy the bytes in and out of guest memory.

use crate::{
    emulation::{
        cpu::{Register, RegisterSnapshot},
        EmulationError,
    },
    Parser, Result,
};

/// Total size of a `CONTEXT` record.
pub const CONTEXT_SIZE: usize = 0x2cc;

/// Offset of the first segment selector (`SegGs`).
pub const CONTEXT_SEGMENTS_OFFSET: usize = 0x8c;

/// Offset of `Eip`.
pub const CONTEXT_EIP_OFFSET: usize = 0xb8;

/// Offset of `EFlags`.
pub const CONTEXT_EFLAGS_OFFSET: usize = 0xc0;

/// Offset of `Esp`; the dispatcher reloads the stack pointer from here.
pub const CONTEXT_ESP_OFFSET: usize = 0xc4;

const SEGMENTS: [Register; 4] = [Register::Gs, Register::Fs, Register::Es, Register::Ds];

const INTEGER: [Register; 8] = [
    Register::Edi,
    Register::Esi,
    Register::Ebx,
    Register::Edx,
    Register::Ecx,
    Register::Eax,
    Register::Ebp,
    Register::Eip,
];

/// Serialize `registers` into a [`CONTEXT_SIZE`] byte record.
#[must_use]
pub fn encode(registers: &RegisterSnapshot) -> Vec<u8> {
    let mut data = vec![0_u8; CONTEXT_SEGMENTS_OFFSET];

    let mut push = |value: u32| data.extend_from_slice(&value.to_le_bytes());
    for register in SEGMENTS.iter().chain(INTEGER.iter()) {
        push(registers.get(*register));
    }
    push(registers.get(Register::Cs));
    // EFlags is not modeled
    push(0);
    push(registers.get(Register::Esp));
    push(registers.get(Register::Ss));

    data.resize(CONTEXT_SIZE, 0);
    data
}

/// Deserialize a record produced by [`encode`] (or edited by a guest handler).
///
/// # Errors
/// Returns [`EmulationError::ContextSizeMismatch`] unless `data` is exactly
/// [`CONTEXT_SIZE`] bytes long.
pub fn decode(data: &[u8]) -> Result<RegisterSnapshot> {
    if data.len() != CONTEXT_SIZE {
        return Err(EmulationError::ContextSizeMismatch {
            expected: CONTEXT_SIZE,
            actual: data.len(),
        }
        .into());
    }

    let mut parser = Parser::new(data);
    parser.seek(CONTEXT_SEGMENTS_OFFSET)?;

    let mut registers = RegisterSnapshot::new();
    for register in SEGMENTS.iter().chain(INTEGER.iter()) {
        registers.set(*register, parser.read_le::<u32>()?);
    }
    registers.set(Register::Cs, parser.read_le::<u32>()?);
    parser.skip(4)?;
    registers.set(Register::Esp, parser.read_le::<u32>()?);
    registers.set(Register::Ss, parser.read_le::<u32>()?);

    Ok(registers)
}
