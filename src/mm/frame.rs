//! Physical Frame Table
//!
//! Bitmap-based allocator for simulated physical frames.

/// Frame allocator using a bitmap
pub struct FrameTable {
    /// Bitmap of frame usage (1 = free, 0 = used)
    bitmap: Vec<u64>,
    /// Total number of frames
    total_frames: usize,
    /// Number of free frames
    free_count: usize,
}

impl FrameTable {
    /// Create a table with every frame free
    pub fn new(total_frames: usize) -> Self {
        let bitmap_size = (total_frames + 63) / 64; // 64 bits per entry
        let mut bitmap = vec![0u64; bitmap_size];

        for frame in 0..total_frames {
            bitmap[frame / 64] |= 1 << (frame % 64);
        }

        Self {
            bitmap,
            total_frames,
            free_count: total_frames,
        }
    }

    /// Allocate the lowest-numbered free frame
    pub fn allocate(&mut self) -> Option<usize> {
        for (idx, entry) in self.bitmap.iter_mut().enumerate() {
            if *entry != 0 {
                let bit = entry.trailing_zeros() as usize;
                let frame = idx * 64 + bit;
                if frame >= self.total_frames {
                    break;
                }

                // Clear bit (mark as used)
                *entry &= !(1 << bit);
                self.free_count -= 1;
                return Some(frame);
            }
        }

        None
    }

    /// Return a frame to the free pool
    pub fn release(&mut self, frame: usize) {
        if frame >= self.total_frames {
            log::warn!("release of out-of-range frame {}", frame);
            return;
        }

        let idx = frame / 64;
        let bit = frame % 64;

        if self.bitmap[idx] & (1 << bit) != 0 {
            log::warn!("double release of frame {}", frame);
            return;
        }

        self.bitmap[idx] |= 1 << bit;
        self.free_count += 1;
    }

    /// Get number of free frames
    pub fn free_frames(&self) -> usize {
        self.free_count
    }

    /// Get total number of frames
    pub fn total_frames(&self) -> usize {
        self.total_frames
    }
}
