//! Simulated Hardware
//!
//! Physical memory as a flat byte array plus a 2-entry TLB. The hardware
//! never walks page tables: a translation either hits the TLB or the access
//! reports a miss, and the kernel decides what the miss means.

use crate::{PAGE_SIZE, TLB_SLOTS};

/// One TLB translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    /// Virtual page number
    pub virtual_page: usize,
    /// Physical frame number
    pub frame: usize,
}

/// A virtual access that missed every TLB slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbMiss {
    /// Virtual page the access fell into
    pub virtual_page: usize,
}

/// Simulated physical memory and TLB
pub struct Hardware {
    memory: Vec<u8>,
    tlb: [Option<TlbEntry>; TLB_SLOTS],
}

impl Hardware {
    /// Create hardware with the given number of physical frames, zeroed
    pub fn new(frames: usize) -> Self {
        Self {
            memory: vec![0u8; frames * PAGE_SIZE],
            tlb: [None; TLB_SLOTS],
        }
    }

    /// Translate a virtual address through the TLB
    fn translate(&self, virtual_address: usize) -> Result<usize, TlbMiss> {
        let virtual_page = virtual_address / PAGE_SIZE;
        let offset = virtual_address % PAGE_SIZE;

        for entry in self.tlb.iter().flatten() {
            if entry.virtual_page == virtual_page {
                return Ok(entry.frame * PAGE_SIZE + offset);
            }
        }

        Err(TlbMiss { virtual_page })
    }

    /// Read one byte at a virtual address
    pub fn read(&self, virtual_address: usize) -> Result<u8, TlbMiss> {
        let physical = self.translate(virtual_address)?;
        Ok(self.memory.get(physical).copied().unwrap_or(0))
    }

    /// Write one byte at a virtual address
    pub fn write(&mut self, virtual_address: usize, value: u8) -> Result<(), TlbMiss> {
        let physical = self.translate(virtual_address)?;
        if let Some(cell) = self.memory.get_mut(physical) {
            *cell = value;
        }
        Ok(())
    }

    /// Install a translation into the given TLB slot
    pub fn install(&mut self, slot: usize, virtual_page: usize, frame: usize) {
        if slot < TLB_SLOTS {
            self.tlb[slot] = Some(TlbEntry { virtual_page, frame });
        }
    }

    /// Drop any slot translating the given virtual page
    pub fn invalidate_page(&mut self, virtual_page: usize) {
        for slot in self.tlb.iter_mut() {
            if matches!(slot, Some(e) if e.virtual_page == virtual_page) {
                *slot = None;
            }
        }
    }

    /// Clear every TLB slot (done on every process switch)
    pub fn flush_tlb(&mut self) {
        self.tlb = [None; TLB_SLOTS];
    }

    /// Borrow the bytes of one physical frame
    pub fn frame(&self, frame: usize) -> &[u8] {
        let start = frame * PAGE_SIZE;
        &self.memory[start..start + PAGE_SIZE]
    }

    /// Mutably borrow the bytes of one physical frame
    pub fn frame_mut(&mut self, frame: usize) -> &mut [u8] {
        let start = frame * PAGE_SIZE;
        &mut self.memory[start..start + PAGE_SIZE]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_misses_without_translation() {
        let hw = Hardware::new(4);
        let miss = hw.read(PAGE_SIZE + 3).unwrap_err();
        assert_eq!(miss.virtual_page, 1);
    }

    #[test]
    fn test_install_then_read_write() {
        let mut hw = Hardware::new(4);
        hw.install(0, 5, 2);

        hw.write(5 * PAGE_SIZE + 10, 0xAB).unwrap();
        assert_eq!(hw.read(5 * PAGE_SIZE + 10).unwrap(), 0xAB);
        assert_eq!(hw.frame(2)[10], 0xAB);
    }

    #[test]
    fn test_install_evicts_slot() {
        let mut hw = Hardware::new(4);
        hw.install(0, 1, 0);
        hw.install(0, 2, 1);

        assert!(hw.read(PAGE_SIZE).is_err());
        assert!(hw.read(2 * PAGE_SIZE).is_ok());
    }

    #[test]
    fn test_invalidate_and_flush() {
        let mut hw = Hardware::new(4);
        hw.install(0, 1, 0);
        hw.install(1, 2, 1);

        hw.invalidate_page(1);
        assert!(hw.read(PAGE_SIZE).is_err());
        assert!(hw.read(2 * PAGE_SIZE).is_ok());

        hw.flush_tlb();
        assert!(hw.read(2 * PAGE_SIZE).is_err());
    }
}
