//! SEH dispatch and resolution.
//!
//! [`SehDispatcher::dispatch`] is called by the stepping loop when the CPU engine reports an
//! exception. It carves a dispatch frame out of the guest stack:
//!
//! ```text
//! new ESP - 0x10 -> return trampoline      <- handler's return address
//!                   exception record ptr
//!                   SEH chain head
//!                   context ptr
//! new ESP + 0x14 -> guard frame            (prev, 0xaaaaaaaa, 0xaaaaaabb, 0xaaaaaacc)
//! new ESP + 0xe8 -> EXCEPTION_RECORD
//! new ESP + 0xfc -> CONTEXT                (0x2cc bytes, ends at the old ESP)
//! ```
//!
//! and returns the address of the first registered handler. When guest execution later
//! reaches the return trampoline, [`SehDispatcher::resolve`] unlinks the guard frame and acts
//! on the handler's disposition.

use crate::{
    emulation::{
        cpu::{CpuEngine, Register},
        exception::{
            chain::walk_chain,
            context::{self, CONTEXT_ESP_OFFSET, CONTEXT_SIZE},
            record::{ExceptionRecord, SehFrame},
            ExceptionDisposition,
        },
        layout::{AddressLayout, TEB_SEH_CHAIN_OFFSET},
        memory::VirtualMemory,
        EmulationError,
    },
    Result,
};

/// Bytes carved from the guest stack per dispatch.
pub const DISPATCH_FRAME_SIZE: u32 = 0x3c8;
/// Offset of the guard frame within the dispatch frame.
pub const GUARD_FRAME_OFFSET: u32 = 0x14;
/// Offset of the exception record within the dispatch frame.
pub const EXCEPTION_RECORD_OFFSET: u32 = 0xe8;
/// Offset of the context record within the dispatch frame.
pub const CONTEXT_RECORD_OFFSET: u32 = 0xfc;
/// Handler words of the guard frame.
pub const GUARD_HANDLERS: [u32; 3] = [0xAAAA_AAAA, 0xAAAA_AABB, 0xAAAA_AACC];

/// Where the dispatcher is in the dispatch/resolve cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DispatchState {
    /// No exception in flight
    #[default]
    Idle,
    /// Building the dispatch frame
    Dispatching,
    /// A guest handler is executing
    HandlerRunning,
    /// Unwinding the dispatch frame after the handler returned
    Resolving,
}

/// Addresses of one in-flight dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchFrame {
    /// Exception code being dispatched
    pub code: u32,
    /// Stack pointer after carving the frame
    pub base: u32,
    /// Exception record address
    pub record: u32,
    /// Context record address
    pub context: u32,
    /// Guard frame address
    pub guard: u32,
    /// SEH chain head at the time of the exception
    pub chain_head: u32,
    /// Handler the guest was redirected to
    pub handler: u32,
}

/// The SEH dispatch state machine of one emulated thread.
#[derive(Clone, Debug)]
pub struct SehDispatcher {
    layout: AddressLayout,
    walk_budget: usize,
    state: DispatchState,
    dispatch_count: u64,
    in_flight: Vec<DispatchFrame>,
    context_address: u32,
}

impl SehDispatcher {
    /// Creates an idle dispatcher.
    ///
    /// # Arguments
    /// * `layout` - Address layout of the session
    /// * `walk_budget` - Maximum frames visited by the diagnostic chain walk
    #[must_use]
    pub fn new(layout: AddressLayout, walk_budget: usize) -> Self {
        let context_address = layout.context_scratch;
        Self {
            layout,
            walk_budget,
            state: DispatchState::Idle,
            dispatch_count: 0,
            in_flight: Vec::new(),
            context_address,
        }
    }

    /// Return to the initial state, forgetting any in-flight dispatch.
    pub fn reset(&mut self) {
        self.state = DispatchState::Idle;
        self.dispatch_count = 0;
        self.in_flight.clear();
        self.context_address = self.layout.context_scratch;
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Number of dispatches since creation or the last [`reset`](Self::reset).
    #[must_use]
    pub fn dispatch_count(&self) -> u64 {
        self.dispatch_count
    }

    /// Dispatches whose handler has not returned yet, innermost last.
    #[must_use]
    pub fn in_flight(&self) -> &[DispatchFrame] {
        &self.in_flight
    }

    /// Context record address of the most recent dispatch.
    #[must_use]
    pub fn context_address(&self) -> u32 {
        self.context_address
    }

    /// Budget of the diagnostic chain walk.
    #[must_use]
    pub fn walk_budget(&self) -> usize {
        self.walk_budget
    }

    /// Whether `eip` is the return trampoline, i.e. [`resolve`](Self::resolve) is due.
    #[must_use]
    pub fn is_return_trampoline(&self, eip: u32) -> bool {
        eip == self.layout.return_trampoline
    }

    /// Dispatch exception `code` to the first handler of the guest's SEH chain.
    ///
    /// Returns the handler address; the caller sets its program counter there. The CPU's
    /// `EBX` is zeroed and the pending exception is cleared on both engines.
    ///
    /// # Errors
    /// Returns an error if the chain head or the stack is not mapped, or the stack pointer is
    /// too low to hold the dispatch frame. The stack pointer and state are left unchanged.
    pub fn dispatch(
        &mut self,
        memory: &mut dyn VirtualMemory,
        cpu: &mut dyn CpuEngine,
        code: u32,
    ) -> Result<u32> {
        let previous_state = self.state;
        let esp = cpu.reg(Register::Esp);
        self.state = DispatchState::Dispatching;

        match self.build_frame(memory, cpu, code) {
            Ok(frame) => {
                self.context_address = frame.context;
                self.in_flight.push(frame);
                self.state = DispatchState::HandlerRunning;

                log::info!("Jumping at {:#x}", frame.handler);
                Ok(frame.handler)
            }
            Err(error) => {
                cpu.set_reg(Register::Esp, esp);
                self.state = previous_state;
                Err(error)
            }
        }
    }

    fn build_frame(
        &mut self,
        memory: &mut dyn VirtualMemory,
        cpu: &mut dyn CpuEngine,
        code: u32,
    ) -> Result<DispatchFrame> {
        let eip = cpu.reg(Register::Eip);
        log::warn!("Exception {:#x} at {:#x} ({})", code, eip, self.dispatch_count);
        self.dispatch_count += 1;

        let context = context::encode(&cpu.snapshot());

        let head_address = self.layout.thread_block + TEB_SEH_CHAIN_OFFSET;
        let chain_head = memory.read_u32(head_address)?;
        let current = SehFrame::read(memory, chain_head)?;

        let esp = cpu.reg(Register::Esp);
        let base = esp
            .checked_sub(DISPATCH_FRAME_SIZE)
            .ok_or(EmulationError::StackOverflow {
                esp,
                needed: DISPATCH_FRAME_SIZE,
            })?;
        let frame = DispatchFrame {
            code,
            base,
            record: base + EXCEPTION_RECORD_OFFSET,
            context: base + CONTEXT_RECORD_OFFSET,
            guard: base + GUARD_FRAME_OFFSET,
            chain_head,
            handler: current.handler,
        };
        log::info!(
            "seh_ptr {:#x} {{ old_seh {:#x} eh {:#x} }} ctx_addr {:#x}",
            chain_head,
            current.previous,
            current.handler,
            frame.context
        );

        cpu.set_reg(Register::Esp, base);
        memory.write(u64::from(frame.context), &context)?;
        memory.write(
            u64::from(frame.record),
            &ExceptionRecord::new(code, eip).to_bytes(),
        )?;

        cpu.push_u32(memory, frame.context)?;
        cpu.push_u32(memory, chain_head)?;
        cpu.push_u32(memory, frame.record)?;
        cpu.push_u32(memory, self.layout.return_trampoline)?;

        log::info!("Fake seh ad {:#x}", frame.guard);
        memory.write_u32s(
            frame.guard,
            &[chain_head, GUARD_HANDLERS[0], GUARD_HANDLERS[1], GUARD_HANDLERS[2]],
        )?;
        memory.write_u32(head_address, frame.guard)?;

        self.dump_chain(memory);

        memory.clear_pending_exception();
        cpu.set_exception(0);
        cpu.set_reg(Register::Ebx, 0);

        Ok(frame)
    }

    /// Finish the innermost dispatch once its handler returned to the trampoline.
    ///
    /// The stack pointer is reloaded from the context record and the guard frame is unlinked
    /// regardless of the outcome. For `ExceptionContinueExecution` (`EAX == 0`) every register
    /// is restored from the context record and its `Eip` is returned.
    ///
    /// # Errors
    /// Returns [`EmulationError::NoDispatchInFlight`] if nothing was dispatched, and
    /// [`EmulationError::UnsupportedDisposition`] for any other `EAX` value; registers other
    /// than the stack pointer are not restored in that case.
    ///
    /// If the handler left unreadable pointers on the stack or in the chain, the error is
    /// returned before anything is changed: the dispatch stays in flight and the state stays
    /// [`DispatchState::HandlerRunning`].
    pub fn resolve(
        &mut self,
        memory: &mut dyn VirtualMemory,
        cpu: &mut dyn CpuEngine,
    ) -> Result<u32> {
        let Some(frame) = self.in_flight.last().copied() else {
            return Err(EmulationError::NoDispatchInFlight.into());
        };
        self.state = DispatchState::Resolving;

        let context_address = match self.unlink_frame(memory, cpu, &frame) {
            Ok(context_address) => context_address,
            Err(error) => {
                self.state = DispatchState::HandlerRunning;
                return Err(error);
            }
        };

        self.in_flight.pop();
        self.state = if self.in_flight.is_empty() {
            DispatchState::Idle
        } else {
            DispatchState::HandlerRunning
        };
        Self::apply_disposition(memory, cpu, context_address)
    }

    /// Reload ESP from the context record and drop the guard frame from the chain.
    ///
    /// All guest reads happen before the first write, so a failure leaves memory and
    /// registers untouched. Returns the context record address.
    fn unlink_frame(
        &self,
        memory: &mut dyn VirtualMemory,
        cpu: &mut dyn CpuEngine,
        frame: &DispatchFrame,
    ) -> Result<u32> {
        // The handler's `ret` popped the trampoline: [ESP] record, [ESP+4] head, [ESP+8] context
        let esp = cpu.reg(Register::Esp);
        let context_address = memory.read_u32(esp.wrapping_add(8))?;
        let pushed_head = memory.read_u32(esp.wrapping_add(4))?;
        log::info!("Context address: {:#x}", context_address);
        if context_address != frame.context {
            log::warn!(
                "Context address {:#x} differs from dispatched {:#x}",
                context_address,
                frame.context
            );
        }

        let esp_slot = context_address
            .checked_add(CONTEXT_ESP_OFFSET as u32)
            .ok_or(EmulationError::InvalidPointer {
                address: u64::from(context_address),
                reason: "context record wraps the address space",
            })?;
        let new_esp = memory.read_u32(esp_slot)?;

        let head_address = self.layout.thread_block + TEB_SEH_CHAIN_OFFSET;
        let guard = memory.read_u32(head_address)?;
        let restored = memory.read_u32(guard)?;
        log::info!("Old seh: {:#x} New seh: {:#x}", guard, restored);
        if restored != pushed_head {
            log::warn!(
                "Unlinked chain head {:#x} differs from pushed head {:#x}",
                restored,
                pushed_head
            );
        }

        memory.write_u32(head_address, restored)?;
        cpu.set_reg(Register::Esp, new_esp);
        log::info!("New esp: {:#x}", new_esp);

        self.dump_chain(memory);
        Ok(context_address)
    }

    fn apply_disposition(
        memory: &mut dyn VirtualMemory,
        cpu: &mut dyn CpuEngine,
        context_address: u32,
    ) -> Result<u32> {
        let eax = cpu.reg(Register::Eax);
        match ExceptionDisposition::from_eax(eax) {
            Some(ExceptionDisposition::ContinueExecution) => {
                log::info!("Seh continues Context: {:#x}", context_address);
                let data = memory.read(u64::from(context_address), CONTEXT_SIZE)?;
                let registers = context::decode(&data)?;
                cpu.restore(&registers);

                let eip = cpu.reg(Register::Eip);
                log::info!("Context::Eip: {:#x}", eip);
                Ok(eip)
            }
            disposition => {
                log::error!(
                    "Handler returned {:#x} ({:?}), only ContinueExecution is supported",
                    eax,
                    disposition
                );
                Err(EmulationError::UnsupportedDisposition {
                    value: eax,
                    disposition,
                }
                .into())
            }
        }
    }

    fn dump_chain(&self, memory: &dyn VirtualMemory) {
        if let Err(error) = walk_chain(memory, &self.layout, self.walk_budget) {
            log::warn!("SEH chain walk failed: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emulation::{
            cpu::X86Cpu, exception::record::SEH_CHAIN_END, memory::MemoryProtection,
            GuestMemory,
        },
        file::io::pack_u32s,
        Error,
    };

    const STACK_BASE: u32 = 0x0012_0000;
    const STACK_TOP: u32 = 0x0013_0000;
    const HANDLER: u32 = 0x0040_5000;

    /// Thread block, one guest-registered frame on the stack, and a CPU about to fault.
    fn setup() -> (GuestMemory, X86Cpu, SehDispatcher) {
        let layout = AddressLayout::default();
        let mut memory = GuestMemory::new();
        memory
            .allocate_region(
                u64::from(STACK_BASE),
                MemoryProtection::READ_WRITE,
                &vec![0; (STACK_TOP - STACK_BASE) as usize],
            )
            .unwrap();

        let frame = STACK_TOP - 0x100;
        memory
            .write_u32s(frame, &[SEH_CHAIN_END, HANDLER])
            .unwrap();
        memory
            .allocate_region(
                u64::from(layout.thread_block),
                MemoryProtection::READ_WRITE,
                &pack_u32s(&[frame]),
            )
            .unwrap();

        let mut cpu = X86Cpu::new();
        cpu.set_reg(Register::Esp, frame - 0x40);
        cpu.set_reg(Register::Ebp, frame - 0x10);
        cpu.set_reg(Register::Eip, 0x0040_1000);
        cpu.set_reg(Register::Eax, 0x1234);
        cpu.set_reg(Register::Ebx, 0x7FFD_F000);
        cpu.set_reg(Register::Cs, 0x1b);
        cpu.set_reg(Register::Ss, 0x23);
        cpu.set_exception(0xC000_0005);
        memory.set_pending_exception(0xC000_0005);

        (memory, cpu, SehDispatcher::new(layout, 5))
    }

    /// Simulate the handler's `ret`: pop the trampoline into EIP.
    fn handler_returns(memory: &GuestMemory, cpu: &mut X86Cpu, eax: u32) {
        let esp = cpu.reg(Register::Esp);
        cpu.set_reg(Register::Eip, memory.read_u32(esp).unwrap());
        cpu.set_reg(Register::Esp, esp + 4);
        cpu.set_reg(Register::Eax, eax);
    }

    #[test]
    fn test_dispatch_builds_frame() {
        let (mut memory, mut cpu, mut dispatcher) = setup();
        let esp = cpu.reg(Register::Esp);
        let head = memory.read_u32(0x7ff7_0000).unwrap();

        let handler = dispatcher.dispatch(&mut memory, &mut cpu, 0xC000_0005).unwrap();
        assert_eq!(handler, HANDLER);
        assert_eq!(dispatcher.state(), DispatchState::HandlerRunning);
        assert_eq!(dispatcher.dispatch_count(), 1);

        let frame = dispatcher.in_flight()[0];
        assert_eq!(frame.base, esp - DISPATCH_FRAME_SIZE);
        assert_eq!(dispatcher.context_address(), frame.base + 0xfc);

        // Handler arguments
        let top = cpu.reg(Register::Esp);
        assert_eq!(top, frame.base - 16);
        assert_eq!(memory.read_u32(top).unwrap(), 0x6ead_beef);
        assert_eq!(memory.read_u32(top + 4).unwrap(), frame.record);
        assert_eq!(memory.read_u32(top + 8).unwrap(), head);
        assert_eq!(memory.read_u32(top + 12).unwrap(), frame.context);

        // Exception record
        assert_eq!(memory.read_u32(frame.record).unwrap(), 0xC000_0005);
        assert_eq!(memory.read_u32(frame.record + 12).unwrap(), 0x0040_1000);

        // Guard frame
        assert_eq!(memory.read_u32(0x7ff7_0000).unwrap(), frame.guard);
        assert_eq!(memory.read_u32(frame.guard).unwrap(), head);
        assert_eq!(memory.read_u32(frame.guard + 4).unwrap(), 0xAAAA_AAAA);
        assert_eq!(memory.read_u32(frame.guard + 12).unwrap(), 0xAAAA_AACC);

        // Saved context keeps the original EBX and ESP
        let saved = context::decode(
            &memory
                .read(u64::from(frame.context), CONTEXT_SIZE)
                .unwrap(),
        )
        .unwrap();
        assert_eq!(saved.get(Register::Ebx), 0x7FFD_F000);
        assert_eq!(saved.get(Register::Esp), esp);

        assert_eq!(cpu.reg(Register::Ebx), 0);
        assert_eq!(cpu.exception(), 0);
        assert_eq!(memory.pending_exception(), 0);
    }

    #[test]
    fn test_continue_execution_restores_registers() {
        let (mut memory, mut cpu, mut dispatcher) = setup();
        let before = cpu.snapshot();

        dispatcher.dispatch(&mut memory, &mut cpu, 0xC000_0005).unwrap();
        handler_returns(&memory, &mut cpu, 0);
        assert!(dispatcher.is_return_trampoline(cpu.reg(Register::Eip)));

        let eip = dispatcher.resolve(&mut memory, &mut cpu).unwrap();
        assert_eq!(eip, 0x0040_1000);
        assert_eq!(cpu.snapshot(), before);
        assert_eq!(dispatcher.state(), DispatchState::Idle);
        assert!(dispatcher.in_flight().is_empty());
    }

    #[test]
    fn test_handler_edits_context() {
        let (mut memory, mut cpu, mut dispatcher) = setup();
        dispatcher.dispatch(&mut memory, &mut cpu, 0x8000_0003).unwrap();
        let frame = dispatcher.in_flight()[0];

        // Skip the faulting instruction and move the stack, as a handler would
        memory
            .write_u32(frame.context + 0xb8, 0x0040_1002)
            .unwrap();
        memory
            .write_u32(frame.context + 0xc4, 0x0012_F000)
            .unwrap();
        handler_returns(&memory, &mut cpu, 0);

        let eip = dispatcher.resolve(&mut memory, &mut cpu).unwrap();
        assert_eq!(eip, 0x0040_1002);
        assert_eq!(cpu.reg(Register::Eip), 0x0040_1002);
        assert_eq!(cpu.reg(Register::Esp), 0x0012_F000);
    }

    #[test]
    fn test_continue_search_is_unsupported() {
        let (mut memory, mut cpu, mut dispatcher) = setup();
        let head = memory.read_u32(0x7ff7_0000).unwrap();
        dispatcher.dispatch(&mut memory, &mut cpu, 0xC000_0005).unwrap();
        handler_returns(&memory, &mut cpu, 1);

        let error = dispatcher.resolve(&mut memory, &mut cpu).unwrap_err();
        assert!(matches!(
            error,
            Error::Emulation(EmulationError::UnsupportedDisposition {
                value: 1,
                disposition: Some(ExceptionDisposition::ContinueSearch),
            })
        ));

        // No register restoration, but the guard frame is gone
        assert_eq!(cpu.reg(Register::Ebx), 0);
        assert_eq!(cpu.reg(Register::Eax), 1);
        assert_eq!(memory.read_u32(0x7ff7_0000).unwrap(), head);
        assert_eq!(dispatcher.state(), DispatchState::Idle);
    }

    #[test]
    fn test_next_handler_sentinel_is_unsupported() {
        let (mut memory, mut cpu, mut dispatcher) = setup();
        dispatcher.dispatch(&mut memory, &mut cpu, 0xC000_0005).unwrap();
        handler_returns(&memory, &mut cpu, 0xFFFF_FFFF);

        assert!(matches!(
            dispatcher.resolve(&mut memory, &mut cpu),
            Err(Error::Emulation(EmulationError::UnsupportedDisposition {
                value: 0xFFFF_FFFF,
                disposition: None,
            }))
        ));
    }

    #[test]
    fn test_resolve_without_dispatch() {
        let (mut memory, mut cpu, mut dispatcher) = setup();
        assert!(matches!(
            dispatcher.resolve(&mut memory, &mut cpu),
            Err(Error::Emulation(EmulationError::NoDispatchInFlight))
        ));
    }

    #[test]
    fn test_wrapping_context_pointer_is_rejected() {
        let (mut memory, mut cpu, mut dispatcher) = setup();
        dispatcher.dispatch(&mut memory, &mut cpu, 0xC000_0005).unwrap();
        handler_returns(&memory, &mut cpu, 0);
        let esp = cpu.reg(Register::Esp);
        memory.write_u32(esp + 8, 0xFFFF_FF80).unwrap();

        assert!(matches!(
            dispatcher.resolve(&mut memory, &mut cpu),
            Err(Error::Emulation(EmulationError::InvalidPointer {
                address: 0xFFFF_FF80,
                ..
            }))
        ));
        assert_eq!(cpu.reg(Register::Esp), esp);
    }

    #[test]
    fn test_failed_resolve_keeps_dispatch_in_flight() {
        let (mut memory, mut cpu, mut dispatcher) = setup();
        let head = memory.read_u32(0x7ff7_0000).unwrap();
        dispatcher.dispatch(&mut memory, &mut cpu, 0xC000_0005).unwrap();
        let frame = dispatcher.in_flight()[0];
        handler_returns(&memory, &mut cpu, 0);
        let esp = cpu.reg(Register::Esp);

        // Corrupted context argument: nothing may change
        memory.write_u32(esp + 8, 0x0BAD_0000).unwrap();
        assert!(matches!(
            dispatcher.resolve(&mut memory, &mut cpu),
            Err(Error::Emulation(EmulationError::InvalidPointer { .. }))
        ));
        assert_eq!(dispatcher.state(), DispatchState::HandlerRunning);
        assert_eq!(dispatcher.in_flight(), &[frame]);
        assert_eq!(memory.read_u32(0x7ff7_0000).unwrap(), frame.guard);
        assert_eq!(cpu.reg(Register::Esp), esp);

        // Once repaired, the same dispatch resolves
        memory.write_u32(esp + 8, frame.context).unwrap();
        assert_eq!(dispatcher.resolve(&mut memory, &mut cpu).unwrap(), 0x0040_1000);
        assert_eq!(dispatcher.state(), DispatchState::Idle);
        assert_eq!(memory.read_u32(0x7ff7_0000).unwrap(), head);
    }

    #[test]
    fn test_nested_dispatch() {
        let (mut memory, mut cpu, mut dispatcher) = setup();
        let head = memory.read_u32(0x7ff7_0000).unwrap();

        dispatcher.dispatch(&mut memory, &mut cpu, 0xC000_0005).unwrap();
        let outer = dispatcher.in_flight()[0];
        // The handler faults too; the guard frame is now the chain head
        cpu.set_reg(Register::Eip, HANDLER + 0x10);
        let nested = dispatcher.dispatch(&mut memory, &mut cpu, 0xC000_0094).unwrap();
        assert_eq!(nested, GUARD_HANDLERS[0]);
        assert_eq!(dispatcher.in_flight().len(), 2);

        handler_returns(&memory, &mut cpu, 0);
        dispatcher.resolve(&mut memory, &mut cpu).unwrap();
        assert_eq!(dispatcher.state(), DispatchState::HandlerRunning);
        assert_eq!(memory.read_u32(0x7ff7_0000).unwrap(), outer.guard);

        // Back in the outer handler with its original stack
        assert_eq!(cpu.reg(Register::Esp), outer.base - 16);
        handler_returns(&memory, &mut cpu, 0);
        dispatcher.resolve(&mut memory, &mut cpu).unwrap();
        assert_eq!(dispatcher.state(), DispatchState::Idle);
        assert_eq!(memory.read_u32(0x7ff7_0000).unwrap(), head);
    }

    #[test]
    fn test_stack_overflow() {
        let (mut memory, mut cpu, mut dispatcher) = setup();
        cpu.set_reg(Register::Esp, 0x100);

        assert!(matches!(
            dispatcher.dispatch(&mut memory, &mut cpu, 0xC000_0005),
            Err(Error::Emulation(EmulationError::StackOverflow { esp: 0x100, .. }))
        ));
        assert_eq!(cpu.reg(Register::Esp), 0x100);
        assert_eq!(dispatcher.state(), DispatchState::Idle);
        assert_eq!(memory.read_u32(0x7ff7_0000).unwrap(), STACK_TOP - 0x100);
    }

    #[test]
    fn test_reset() {
        let (mut memory, mut cpu, mut dispatcher) = setup();
        dispatcher.dispatch(&mut memory, &mut cpu, 0xC000_0005).unwrap();

        dispatcher.reset();
        assert_eq!(dispatcher.dispatch_count(), 0);
        assert_eq!(dispatcher.state(), DispatchState::Idle);
        assert_eq!(dispatcher.context_address(), 0x0020_1000);
    }
}
