//! Memory Manager
//!
//! Paged virtual memory on top of the frame table and the swap store:
//!
//! - `allocate` reserves a contiguous run of virtual pages but no frames;
//!   a page gets its frame on first touch (TLB miss).
//! - `get_mapping` services a miss: segfault for unmapped pages, zero-fill
//!   for first touches, swap-in for evicted pages. When every frame is in
//!   use, a random other process loses its first resident page to swap.
//! - Swap-file slots are assigned once per page and never reclaimed; the
//!   swap file only grows.

pub mod frame;
pub mod page;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::dev::vfs::Vfs;
use crate::hw::Hardware;
use crate::sys::scheduler::Scheduler;
use crate::{KernelError, KernelResult, PAGES_PER_PROCESS, PAGE_SIZE, TLB_SLOTS};

use frame::FrameTable;
use page::{PageTable, PageTableEntry};

/// Kernel memory manager
pub struct MemoryManager {
    frames: FrameTable,
    /// VFS id of the swap store, opened once at boot
    swap: usize,
    next_swap_slot: u64,
    rng: StdRng,
}

impl MemoryManager {
    /// New manager over `total_frames` frames, swapping through VFS id
    /// `swap`; `seed` fixes TLB replacement and victim choice
    pub fn new(total_frames: usize, swap: usize, seed: Option<u64>) -> Self {
        Self {
            frames: FrameTable::new(total_frames),
            swap,
            next_swap_slot: 0,
            rng: seed
                .map(StdRng::seed_from_u64)
                .unwrap_or_else(StdRng::from_entropy),
        }
    }

    /// Number of free physical frames
    pub fn free_frames(&self) -> usize {
        self.frames.free_frames()
    }

    /// Reserve `size` bytes of contiguous virtual address space for `table`.
    /// No frame is assigned until first touch. Returns the start address.
    pub fn allocate(&mut self, table: &mut PageTable, size: usize) -> KernelResult<usize> {
        if size == 0 || size % PAGE_SIZE != 0 {
            return Err(KernelError::InvalidArgument(
                "allocation size must be a nonzero multiple of the page size",
            ));
        }

        let pages = size / PAGE_SIZE;
        let start = table.find_free_run(pages).ok_or(KernelError::OutOfAddressSpace)?;

        for page in start..start + pages {
            table.set(page, PageTableEntry::default());
        }

        log::debug!("allocated pages {}..{} (lazy)", start, start + pages);
        Ok(start * PAGE_SIZE)
    }

    /// Release a region previously returned by [`allocate`](Self::allocate).
    /// Resident frames go back to the pool and their translations are
    /// dropped; already-unmapped pages in range are ignored.
    pub fn free(
        &mut self,
        table: &mut PageTable,
        hw: &mut Hardware,
        address: usize,
        size: usize,
    ) -> KernelResult<()> {
        if size == 0 || size % PAGE_SIZE != 0 || address % PAGE_SIZE != 0 {
            return Err(KernelError::InvalidArgument(
                "free needs a page-aligned address and size",
            ));
        }

        let start = address / PAGE_SIZE;
        let pages = size / PAGE_SIZE;
        if start + pages > PAGES_PER_PROCESS {
            return Err(KernelError::InvalidArgument("free range past the address space"));
        }

        for page in start..start + pages {
            match table.take(page) {
                Some(entry) => {
                    if let Some(frame) = entry.frame {
                        self.frames.release(frame);
                    }
                    hw.invalidate_page(page);
                }
                None => log::debug!("free of unmapped page {}", page),
            }
        }

        Ok(())
    }

    /// Release every resident frame of a page table (process teardown)
    pub fn free_all(&mut self, table: &PageTable, hw: &mut Hardware) {
        for (page, entry) in table.allocated() {
            if let Some(frame) = entry.frame {
                self.frames.release(frame);
            }
            hw.invalidate_page(page);
        }
    }

    /// Service a TLB miss for the running process.
    ///
    /// Unallocated or out-of-range pages are segfaults. Otherwise the page
    /// is made resident (zero-filled on first touch, read back from swap if
    /// evicted) and installed into a random TLB slot.
    pub fn get_mapping(
        &mut self,
        sched: &mut Scheduler,
        hw: &mut Hardware,
        vfs: &mut Vfs,
        virtual_page: usize,
    ) -> KernelResult<()> {
        let pid = sched
            .current()
            .ok_or(KernelError::InvalidArgument("no running process"))?;

        if virtual_page >= PAGES_PER_PROCESS {
            return Err(KernelError::SegmentationFault(virtual_page));
        }

        let entry = sched
            .table
            .get(pid)
            .and_then(|record| record.page_table.get(virtual_page))
            .ok_or(KernelError::SegmentationFault(virtual_page))?;

        let frame = match entry.frame {
            Some(frame) => frame,
            None => {
                let frame = match self.frames.allocate() {
                    Some(frame) => frame,
                    None => self.swap_out_victim(sched, hw, vfs)?,
                };

                let target = hw.frame_mut(frame);
                target.fill(0);
                if let Some(slot) = entry.swap_slot {
                    vfs.seek(self.swap, slot * PAGE_SIZE as u64);
                    let data = vfs.read(self.swap, PAGE_SIZE);
                    if data.len() == PAGE_SIZE {
                        target.copy_from_slice(&data);
                        log::debug!("page {} swapped in from slot {}", virtual_page, slot);
                    } else {
                        log::warn!(
                            "short swap read for slot {} ({} bytes), page {} zero-filled",
                            slot,
                            data.len(),
                            virtual_page
                        );
                    }
                } else {
                    log::debug!("page {} resident in frame {} (first touch)", virtual_page, frame);
                }

                let record = sched
                    .table
                    .get_mut(pid)
                    .ok_or(KernelError::SegmentationFault(virtual_page))?;
                record.page_table.set(
                    virtual_page,
                    PageTableEntry {
                        frame: Some(frame),
                        swap_slot: entry.swap_slot,
                    },
                );
                frame
            }
        };

        let slot = self.rng.gen_range(0..TLB_SLOTS);
        hw.install(slot, virtual_page, frame);
        Ok(())
    }

    /// Evict the first resident page of a random other process and return
    /// its frame. The victim's page keeps (or gains) a swap slot; the
    /// frame is handed straight to the caller, never through the free pool.
    fn swap_out_victim(
        &mut self,
        sched: &mut Scheduler,
        hw: &Hardware,
        vfs: &mut Vfs,
    ) -> KernelResult<usize> {
        let mut candidates = sched.swap_victim_candidates();
        candidates.shuffle(&mut self.rng);

        for victim in candidates {
            let Some((page, frame, existing_slot)) = sched
                .table
                .get(victim)
                .and_then(|record| record.page_table.first_resident())
            else {
                continue;
            };

            let slot = existing_slot.unwrap_or_else(|| {
                let slot = self.next_swap_slot;
                self.next_swap_slot += 1;
                slot
            });

            vfs.seek(self.swap, slot * PAGE_SIZE as u64);
            let written = vfs.write(self.swap, hw.frame(frame));
            if written < PAGE_SIZE {
                log::error!(
                    "swap write for pid {} page {} stored {}/{} bytes, trying next victim",
                    victim,
                    page,
                    written,
                    PAGE_SIZE
                );
                continue;
            }

            if let Some(record) = sched.table.get_mut(victim) {
                record.page_table.set(
                    page,
                    PageTableEntry {
                        frame: None,
                        swap_slot: Some(slot),
                    },
                );
            }

            // The TLB only ever holds the running process's translations,
            // so a victim page cannot be cached there.
            log::debug!("pid {} page {} evicted to swap slot {}", victim, page, slot);
            return Ok(frame);
        }

        Err(KernelError::OutOfMemory)
    }
}
