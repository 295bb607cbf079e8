//! Sparse guest address space made of fixed-address regions.
//!
//! This module provides [`GuestMemory`], a [`VirtualMemory`] implementation that keeps each
//! mapped region as its own byte vector, indexed by base address.
//!
//! # Address Space
//!
//! Regions are placed exactly where the caller asks. Adjacent regions are allowed and an
//! access may run from one region into the next as long as every byte is mapped; a region
//! that would overlap an existing one is rejected with
//! [`EmulationError::RegionOverlap`](crate::emulation::EmulationError::RegionOverlap).

use std::collections::BTreeMap;

use crate::{
    emulation::{
        memory::{MemoryProtection, VirtualMemory},
        EmulationError,
    },
    Result,
};

/// A mapped region of guest memory (internal).
#[derive(Clone, Debug)]
struct InternalRegion {
    /// The raw bytes in this region.
    data: Vec<u8>,

    /// Protection requested at allocation time.
    protection: MemoryProtection,
}

impl InternalRegion {
    /// Returns the size of this region in bytes.
    #[inline]
    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Simulated guest address space with caller-chosen region placement.
///
/// # Example
///
/// ```rust
/// use ntscope::emulation::{GuestMemory, MemoryProtection, VirtualMemory};
///
/// let mut mem = GuestMemory::new();
/// mem.allocate_region(0x7ff7_0000, MemoryProtection::READ_WRITE, &[0; 0x38])?;
/// mem.write_u32(0x7ff7_0018, 0x7ff7_0000)?;
/// assert_eq!(mem.read_u32(0x7ff7_0018)?, 0x7ff7_0000);
/// # Ok::<(), ntscope::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct GuestMemory {
    /// Memory regions indexed by their base address.
    regions: BTreeMap<u64, InternalRegion>,
    /// Exception code raised by the memory side, `0` when none is pending.
    pending_exception: u32,
}

impl GuestMemory {
    /// Creates an empty address space.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds the region containing `address`, returning its base and the offset into it.
    fn find_region(&self, address: u64) -> Option<(u64, &InternalRegion, usize)> {
        let (&base, region) = self.regions.range(..=address).next_back()?;
        if address >= base + region.size() {
            return None;
        }

        #[allow(clippy::cast_possible_truncation)] // Offset bounded by region size
        let offset = (address - base) as usize;
        Some((base, region, offset))
    }

    /// Returns the base address of a region overlapping `[address, address + size)`.
    fn overlapping(&self, address: u64, size: usize) -> Option<u64> {
        let end = address.saturating_add(size as u64);

        if let Some((&base, region)) = self.regions.range(..=address).next_back() {
            if address < base + region.size() {
                return Some(base);
            }
        }

        self.regions
            .range(address..end)
            .next()
            .map(|(&base, _)| base)
    }

    /// Returns `true` if `address` is mapped.
    #[must_use]
    pub fn is_mapped(&self, address: u64) -> bool {
        self.find_region(address).is_some()
    }

    /// Protection of the region containing `address`.
    #[must_use]
    pub fn protection(&self, address: u64) -> Option<MemoryProtection> {
        self.find_region(address)
            .map(|(_, region, _)| region.protection)
    }

    /// Number of mapped regions.
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Raise a memory-side exception (as a faulting access would).
    pub fn set_pending_exception(&mut self, code: u32) {
        self.pending_exception = code;
    }

    /// Exception code currently pending on the memory side, `0` when none.
    #[must_use]
    pub fn pending_exception(&self) -> u32 {
        self.pending_exception
    }

    /// Returns an iterator over all regions as `(base_address, data)`.
    pub fn regions(&self) -> impl Iterator<Item = (u64, &[u8])> {
        self.regions
            .iter()
            .map(|(&addr, region)| (addr, region.data.as_slice()))
    }
}

impl VirtualMemory for GuestMemory {
    fn allocate_region(
        &mut self,
        address: u64,
        protection: MemoryProtection,
        data: &[u8],
    ) -> Result<()> {
        if data.is_empty() {
            return Err(EmulationError::InvalidPointer {
                address,
                reason: "cannot map an empty region",
            }
            .into());
        }

        if address.checked_add(data.len() as u64).is_none() {
            return Err(EmulationError::InvalidPointer {
                address,
                reason: "region wraps the address space",
            }
            .into());
        }

        if let Some(existing) = self.overlapping(address, data.len()) {
            return Err(EmulationError::RegionOverlap {
                address,
                size: data.len(),
                existing,
            }
            .into());
        }

        self.regions.insert(
            address,
            InternalRegion {
                data: data.to_vec(),
                protection,
            },
        );
        Ok(())
    }

    fn read(&self, address: u64, length: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(length);
        let mut cursor = address;

        while out.len() < length {
            let (_, region, offset) =
                self.find_region(cursor)
                    .ok_or(EmulationError::InvalidPointer {
                        address: cursor,
                        reason: "address not in any mapped region",
                    })?;

            let chunk = (length - out.len()).min(region.data.len() - offset);
            out.extend_from_slice(&region.data[offset..offset + chunk]);
            cursor += chunk as u64;
        }

        Ok(out)
    }

    fn write(&mut self, address: u64, data: &[u8]) -> Result<()> {
        // Validate the whole range first so a failing write leaves memory untouched.
        let mut spans = Vec::new();
        let mut cursor = address;
        let mut written = 0_usize;
        while written < data.len() {
            let (base, region, offset) =
                self.find_region(cursor)
                    .ok_or(EmulationError::InvalidPointer {
                        address: cursor,
                        reason: "address not in any mapped region",
                    })?;

            let chunk = (data.len() - written).min(region.data.len() - offset);
            spans.push((base, offset, written, chunk));
            written += chunk;
            cursor += chunk as u64;
        }

        for (base, offset, start, chunk) in spans {
            if let Some(region) = self.regions.get_mut(&base) {
                region.data[offset..offset + chunk].copy_from_slice(&data[start..start + chunk]);
            }
        }

        Ok(())
    }

    fn clear_pending_exception(&mut self) {
        self.pending_exception = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_allocate_and_read() {
        let mut mem = GuestMemory::new();
        mem.allocate_region(0x1000, MemoryProtection::READ_WRITE, &[1, 2, 3, 4])
            .unwrap();

        assert_eq!(mem.read(0x1000, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(mem.read(0x1002, 2).unwrap(), vec![3, 4]);
        assert!(mem.is_mapped(0x1003));
        assert!(!mem.is_mapped(0x1004));
        assert_eq!(mem.protection(0x1000), Some(MemoryProtection::READ_WRITE));
    }

    #[test]
    fn test_read_write_u32() {
        let mut mem = GuestMemory::new();
        mem.allocate_region(0x2000, MemoryProtection::READ_WRITE, &[0; 16])
            .unwrap();

        mem.write_u32(0x2004, 0xDEAD_BEEF).unwrap();
        assert_eq!(mem.read_u32(0x2004).unwrap(), 0xDEAD_BEEF);
        assert_eq!(mem.read(0x2004, 4).unwrap(), vec![0xEF, 0xBE, 0xAD, 0xDE]);

        mem.write_u32s(0x2008, &[1, 2]).unwrap();
        assert_eq!(mem.read_u32(0x200c).unwrap(), 2);
    }

    #[test]
    fn test_overlap_rejected() {
        let mut mem = GuestMemory::new();
        mem.allocate_region(0x1000, MemoryProtection::READ_WRITE, &[0; 0x100])
            .unwrap();

        let error = mem
            .allocate_region(0x10f0, MemoryProtection::READ_WRITE, &[0; 0x20])
            .unwrap_err();
        assert!(matches!(
            error,
            Error::Emulation(EmulationError::RegionOverlap {
                existing: 0x1000,
                ..
            })
        ));

        // A region that starts below and swallows an existing one
        assert!(mem
            .allocate_region(0x0f00, MemoryProtection::READ_WRITE, &[0; 0x200])
            .is_err());

        // Same base twice
        assert!(mem
            .allocate_region(0x1000, MemoryProtection::READ_WRITE, &[0; 4])
            .is_err());
    }

    #[test]
    fn test_adjacent_regions_span() {
        let mut mem = GuestMemory::new();
        mem.allocate_region(0x1000, MemoryProtection::READ_WRITE, &[0xAA; 4])
            .unwrap();
        mem.allocate_region(0x1004, MemoryProtection::READ_WRITE, &[0xBB; 4])
            .unwrap();

        assert_eq!(
            mem.read(0x1002, 4).unwrap(),
            vec![0xAA, 0xAA, 0xBB, 0xBB]
        );

        mem.write(0x1003, &[1, 2]).unwrap();
        assert_eq!(mem.read(0x1000, 8).unwrap(), vec![0xAA, 0xAA, 0xAA, 1, 2, 0xBB, 0xBB, 0xBB]);
    }

    #[test]
    fn test_unmapped_access() {
        let mut mem = GuestMemory::new();
        mem.allocate_region(0x1000, MemoryProtection::READ_WRITE, &[0; 8])
            .unwrap();

        assert!(mem.read(0x0fff, 2).is_err());
        assert!(mem.read(0x1006, 4).is_err());

        // A write that runs off the end must not partially apply
        assert!(mem.write(0x1006, &[9, 9, 9, 9]).is_err());
        assert_eq!(mem.read(0x1006, 2).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_empty_region_rejected() {
        let mut mem = GuestMemory::new();
        assert!(mem
            .allocate_region(0x1000, MemoryProtection::READ_WRITE, &[])
            .is_err());
    }

    #[test]
    fn test_pending_exception() {
        let mut mem = GuestMemory::new();
        mem.set_pending_exception(0xC000_0005);
        assert_eq!(mem.pending_exception(), 0xC000_0005);

        mem.clear_pending_exception();
        assert_eq!(mem.pending_exception(), 0);
    }
}
