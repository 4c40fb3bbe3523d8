//! File Device
//!
//! Random-access files with read/write/create semantics. Ten open slots;
//! the swap store is just slot-zero traffic from the kernel's point of view.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use crate::dev::Device;
use crate::MAX_OPEN_DEVICES;

/// File-backed device
pub struct FileDevice {
    files: [Option<File>; MAX_OPEN_DEVICES],
}

impl FileDevice {
    /// New device with every slot free
    pub fn new() -> Self {
        Self {
            files: Default::default(),
        }
    }
}

impl Default for FileDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for FileDevice {
    fn open(&mut self, arg: &str) -> Option<usize> {
        let path = arg.trim();
        if path.is_empty() {
            return None;
        }

        let slot = self.files.iter().position(|f| f.is_none())?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| log::warn!("open of {} failed: {}", path, e))
            .ok()?;

        self.files[slot] = Some(file);
        Some(slot)
    }

    fn close(&mut self, id: usize) {
        if let Some(slot) = self.files.get_mut(id) {
            *slot = None;
        }
    }

    fn read(&mut self, id: usize, size: usize) -> Vec<u8> {
        let Some(Some(file)) = self.files.get_mut(id) else {
            return Vec::new();
        };

        let mut data = vec![0u8; size];
        let mut filled = 0;
        // Keep reading until EOF so a page-sized request is short only
        // when the file really ends
        while filled < size {
            match file.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    log::warn!("read on descriptor {} failed: {}", id, e);
                    return Vec::new();
                }
            }
        }
        data.truncate(filled);
        data
    }

    fn seek(&mut self, id: usize, offset: u64) {
        if let Some(Some(file)) = self.files.get_mut(id) {
            if let Err(e) = file.seek(SeekFrom::Start(offset)) {
                log::warn!("seek on descriptor {} failed: {}", id, e);
            }
        }
    }

    fn write(&mut self, id: usize, data: &[u8]) -> usize {
        let Some(Some(file)) = self.files.get_mut(id) else {
            return 0;
        };

        match file.write_all(data) {
            Ok(()) => data.len(),
            Err(e) => {
                log::warn!("write on descriptor {} failed: {}", id, e);
                0
            }
        }
    }
}
