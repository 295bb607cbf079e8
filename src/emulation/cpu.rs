//! x86 register file abstraction.
//!
//! The instruction-stepping engine is external to this crate. The environment builder and the
//! SEH dispatcher only need named register access, a pending-exception flag, a stack push and a
//! way to point the FS segment at the thread block; [`CpuEngine`] captures exactly that.
//! [`X86Cpu`] is a plain register file implementing it.

use strum::{Display, EnumCount, EnumIter, IntoEnumIterator};

use crate::{emulation::memory::VirtualMemory, Result};

/// Registers the emulation layer reads or writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter, EnumCount)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Register {
    /// Accumulator; carries the handler's disposition on return
    Eax,
    /// Counter
    Ecx,
    /// Data
    Edx,
    /// Base; zeroed before a guest handler runs
    Ebx,
    /// Stack pointer
    Esp,
    /// Frame pointer
    Ebp,
    /// Source index
    Esi,
    /// Destination index
    Edi,
    /// Instruction pointer
    Eip,
    /// Code segment selector
    Cs,
    /// Stack segment selector
    Ss,
    /// Data segment selector
    Ds,
    /// Extra segment selector
    Es,
    /// FS selector; its base is the thread block
    Fs,
    /// GS selector
    Gs,
}

/// Values of every [`Register`], in [`Register`] declaration order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegisterSnapshot {
    values: [u32; Register::COUNT],
}

impl RegisterSnapshot {
    /// A snapshot with every register zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `register`.
    #[must_use]
    pub fn get(&self, register: Register) -> u32 {
        self.values[register as usize]
    }

    /// Set `register` to `value`.
    pub fn set(&mut self, register: Register, value: u32) {
        self.values[register as usize] = value;
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, register: Register, value: u32) -> Self {
        self.set(register, value);
        self
    }

    /// Iterate `(register, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Register, u32)> + '_ {
        Register::iter().map(|register| (register, self.get(register)))
    }
}

/// Register-level access to the external CPU engine.
pub trait CpuEngine {
    /// Current value of `register`.
    fn reg(&self, register: Register) -> u32;

    /// Set `register` to `value`.
    fn set_reg(&mut self, register: Register, value: u32);

    /// Pending exception code, `0` when none.
    fn exception(&self) -> u32;

    /// Raise (non-zero) or clear (`0`) the pending exception.
    fn set_exception(&mut self, code: u32);

    /// Map segment `selector` to linear base `base`.
    fn set_segment_base(&mut self, selector: u32, base: u32);

    /// Decrement ESP by four and store `value` at the new top of stack.
    ///
    /// # Errors
    /// Returns an error if the new top of stack is not mapped.
    fn push_u32(&mut self, memory: &mut dyn VirtualMemory, value: u32) -> Result<()> {
        let esp = self.reg(Register::Esp).wrapping_sub(4);
        memory.write_u32(esp, value)?;
        self.set_reg(Register::Esp, esp);
        Ok(())
    }

    /// Capture every register.
    fn snapshot(&self) -> RegisterSnapshot {
        let mut snapshot = RegisterSnapshot::new();
        for register in Register::iter() {
            snapshot.set(register, self.reg(register));
        }
        snapshot
    }

    /// Load every register from `snapshot`.
    fn restore(&mut self, snapshot: &RegisterSnapshot) {
        for (register, value) in snapshot.iter() {
            self.set_reg(register, value);
        }
    }
}

/// A standalone 32-bit x86 register file.
#[derive(Clone, Debug, Default)]
pub struct X86Cpu {
    registers: RegisterSnapshot,
    exception: u32,
    segment_bases: Vec<(u32, u32)>,
}

impl X86Cpu {
    /// A CPU with all registers zero and no segment mappings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Linear base mapped for `selector`, if any.
    #[must_use]
    pub fn segment_base(&self, selector: u32) -> Option<u32> {
        self.segment_bases
            .iter()
            .find(|(mapped, _)| *mapped == selector)
            .map(|&(_, base)| base)
    }
}

impl CpuEngine for X86Cpu {
    fn reg(&self, register: Register) -> u32 {
        self.registers.get(register)
    }

    fn set_reg(&mut self, register: Register, value: u32) {
        self.registers.set(register, value);
    }

    fn exception(&self) -> u32 {
        self.exception
    }

    fn set_exception(&mut self, code: u32) {
        self.exception = code;
    }

    fn set_segment_base(&mut self, selector: u32, base: u32) {
        match self
            .segment_bases
            .iter_mut()
            .find(|(mapped, _)| *mapped == selector)
        {
            Some(entry) => entry.1 = base,
            None => self.segment_bases.push((selector, base)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation::{GuestMemory, MemoryProtection};

    #[test]
    fn test_register_names() {
        assert_eq!(Register::Eax.to_string(), "EAX");
        assert_eq!(Register::Eip.to_string(), "EIP");
        assert_eq!(Register::iter().count(), 15);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut cpu = X86Cpu::new();
        cpu.set_reg(Register::Eax, 1);
        cpu.set_reg(Register::Esp, 0x0012_ff00);
        cpu.set_reg(Register::Gs, 0x2b);

        let snapshot = cpu.snapshot();
        assert_eq!(snapshot.get(Register::Esp), 0x0012_ff00);

        let mut other = X86Cpu::new();
        other.restore(&snapshot);
        assert_eq!(other.snapshot(), snapshot);
    }

    #[test]
    fn test_push_u32() {
        let mut memory = GuestMemory::new();
        memory
            .allocate_region(0x1000, MemoryProtection::READ_WRITE, &[0; 0x100])
            .unwrap();

        let mut cpu = X86Cpu::new();
        cpu.set_reg(Register::Esp, 0x1100);
        cpu.push_u32(&mut memory, 0xAABB_CCDD).unwrap();
        cpu.push_u32(&mut memory, 0x1122_3344).unwrap();

        assert_eq!(cpu.reg(Register::Esp), 0x10f8);
        assert_eq!(memory.read_u32(0x10fc).unwrap(), 0xAABB_CCDD);
        assert_eq!(memory.read_u32(0x10f8).unwrap(), 0x1122_3344);
    }

    #[test]
    fn test_push_unmapped_keeps_esp() {
        let mut memory = GuestMemory::new();
        let mut cpu = X86Cpu::new();
        cpu.set_reg(Register::Esp, 0x5000);

        assert!(cpu.push_u32(&mut memory, 1).is_err());
        assert_eq!(cpu.reg(Register::Esp), 0x5000);
    }

    #[test]
    fn test_segment_base() {
        let mut cpu = X86Cpu::new();
        assert_eq!(cpu.segment_base(4), None);

        cpu.set_segment_base(4, 0x7ff7_0000);
        cpu.set_segment_base(4, 0x7ff8_0000);
        assert_eq!(cpu.segment_base(4), Some(0x7ff8_0000));
    }
}
