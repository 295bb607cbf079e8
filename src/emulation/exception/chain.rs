//! Bounded SEH chain traversal.

use crate::{
    emulation::{
        exception::record::SehFrame,
        layout::{AddressLayout, TEB_SEH_CHAIN_OFFSET},
        memory::VirtualMemory,
    },
    Result,
};

/// Frames visited by [`walk_chain`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainWalk {
    /// Frames from the chain head outward
    pub frames: Vec<SehFrame>,
    /// The budget ran out before a terminating frame was found
    pub exhausted: bool,
}

impl ChainWalk {
    /// Number of frames visited.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Follow the SEH chain from the thread block, visiting at most `budget` frames.
///
/// The walk stops at a frame whose `Next` is `0xFFFFFFFF` or `0`. Running out of budget is
/// logged and reported through [`ChainWalk::exhausted`], it is not an error.
///
/// # Errors
/// Returns an error if the thread block or a visited frame is not mapped.
pub fn walk_chain(
    memory: &dyn VirtualMemory,
    layout: &AddressLayout,
    budget: usize,
) -> Result<ChainWalk> {
    let mut walk = ChainWalk::default();
    let mut current = memory.read_u32(layout.thread_block + TEB_SEH_CHAIN_OFFSET)?;
    log::info!("Dump SEH chain, thread block {:#x}", layout.thread_block);

    loop {
        if walk.frames.len() >= budget {
            log::warn!("Too many SEH frames, stopping after {}", budget);
            walk.exhausted = true;
            break;
        }

        let frame = SehFrame::read(memory, current)?;
        log::info!(
            "{:indent$}seh_ptr: {:#x} {{ prev_seh: {:#x} eh: {:#x} }}",
            "",
            frame.address,
            frame.previous,
            frame.handler,
            indent = walk.frames.len() + 1
        );
        walk.frames.push(frame);

        if frame.is_last() {
            break;
        }
        current = frame.previous;
    }

    Ok(walk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emulation::{GuestMemory, MemoryProtection},
        emulation::exception::record::SEH_CHAIN_END as SEH_END,
        file::io::pack_u32s,
    };

    /// Thread block at the default address with a chain of `count` frames at 0x1000 apart.
    fn chain(count: u32, terminator: u32) -> (GuestMemory, AddressLayout) {
        let layout = AddressLayout::default();
        let mut memory = GuestMemory::new();
        memory
            .allocate_region(
                u64::from(layout.thread_block),
                MemoryProtection::READ_WRITE,
                &pack_u32s(&[0x0010_0000]),
            )
            .unwrap();

        for index in 0..count {
            let address = 0x0010_0000 + index * 0x1000;
            let previous = if index + 1 == count {
                terminator
            } else {
                address + 0x1000
            };
            memory
                .allocate_region(
                    u64::from(address),
                    MemoryProtection::READ_WRITE,
                    &pack_u32s(&[previous, 0x0040_2000 + index]),
                )
                .unwrap();
        }

        (memory, layout)
    }

    #[test]
    fn test_walk_terminates() {
        let (memory, layout) = chain(3, SEH_END);
        let walk = walk_chain(&memory, &layout, 5).unwrap();

        assert_eq!(walk.depth(), 3);
        assert!(!walk.exhausted);
        assert_eq!(walk.frames[2].handler, 0x0040_2002);
    }

    #[test]
    fn test_walk_zero_terminator() {
        let (memory, layout) = chain(2, 0);
        let walk = walk_chain(&memory, &layout, 5).unwrap();
        assert_eq!(walk.depth(), 2);
        assert!(!walk.exhausted);
    }

    #[test]
    fn test_budget_exhausted() {
        let (memory, layout) = chain(8, SEH_END);
        let walk = walk_chain(&memory, &layout, 5).unwrap();

        assert_eq!(walk.depth(), 5);
        assert!(walk.exhausted);
    }

    #[test]
    fn test_cycle_is_bounded() {
        let (mut memory, layout) = chain(2, SEH_END);
        // Point the last frame back at the first
        memory.write_u32(0x0010_1000, 0x0010_0000).unwrap();

        let walk = walk_chain(&memory, &layout, 4).unwrap();
        assert_eq!(walk.depth(), 4);
        assert!(walk.exhausted);
    }

    #[test]
    fn test_broken_pointer() {
        let (mut memory, layout) = chain(1, SEH_END);
        memory.write_u32(0x0010_0000, 0x0bad_0000).unwrap();

        assert!(walk_chain(&memory, &layout, 5).is_err());
    }
}
