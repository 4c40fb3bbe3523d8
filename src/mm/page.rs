//! Per-Process Page Tables
//!
//! A page table is a fixed array of 100 entry slots. A slot is `None` until
//! allocated; an allocated entry starts with neither a frame nor a swap slot
//! and gains them lazily on first touch and first eviction.

use crate::PAGES_PER_PROCESS;

/// One virtual-page mapping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageTableEntry {
    /// Physical frame holding the page, if resident
    pub frame: Option<usize>,
    /// Swap-file slot holding the page's last evicted contents
    pub swap_slot: Option<u64>,
}

/// Fixed-size page table
#[derive(Debug, Clone)]
pub struct PageTable {
    entries: [Option<PageTableEntry>; PAGES_PER_PROCESS],
}

impl Default for PageTable {
    fn default() -> Self {
        Self {
            entries: [None; PAGES_PER_PROCESS],
        }
    }
}

impl PageTable {
    /// Entry for a virtual page, if allocated
    pub fn get(&self, virtual_page: usize) -> Option<PageTableEntry> {
        self.entries.get(virtual_page).copied().flatten()
    }

    /// Install or replace the entry for a virtual page
    pub fn set(&mut self, virtual_page: usize, entry: PageTableEntry) {
        if let Some(slot) = self.entries.get_mut(virtual_page) {
            *slot = Some(entry);
        }
    }

    /// Remove the entry for a virtual page, returning it
    pub fn take(&mut self, virtual_page: usize) -> Option<PageTableEntry> {
        self.entries.get_mut(virtual_page).and_then(|slot| slot.take())
    }

    /// Lowest start of a run of `count` consecutive unallocated pages
    pub fn find_free_run(&self, count: usize) -> Option<usize> {
        if count == 0 || count > PAGES_PER_PROCESS {
            return None;
        }

        let mut run_start = 0;
        let mut run_length = 0;

        for (page, entry) in self.entries.iter().enumerate() {
            if entry.is_none() {
                if run_length == 0 {
                    run_start = page;
                }
                run_length += 1;
                if run_length >= count {
                    return Some(run_start);
                }
            } else {
                run_length = 0;
            }
        }

        None
    }

    /// First resident page, as (virtual page, frame, swap slot)
    pub fn first_resident(&self) -> Option<(usize, usize, Option<u64>)> {
        self.entries.iter().enumerate().find_map(|(page, entry)| {
            let entry = (*entry)?;
            entry.frame.map(|frame| (page, frame, entry.swap_slot))
        })
    }

    /// Iterate over allocated entries as (virtual page, entry)
    pub fn allocated(&self) -> impl Iterator<Item = (usize, PageTableEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(page, entry)| entry.map(|e| (page, e)))
    }
}
