//! Virtual File System
//!
//! Routes open strings to a device by their first word and hides the
//! device-local ids behind VFS ids:
//!
//! - `"file <path>"` opens through the [`FileDevice`]
//! - `"random [seed]"` opens through the [`RandomDevice`]
//!
//! Ten mappings total; a full table closes the device id it just obtained
//! rather than leaking it.

use crate::dev::file::FileDevice;
use crate::dev::random::RandomDevice;
use crate::dev::Device;
use crate::MAX_OPEN_DEVICES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceKind {
    File,
    Random,
}

/// Name-to-device router
pub struct Vfs {
    mappings: [Option<(DeviceKind, usize)>; MAX_OPEN_DEVICES],
    files: FileDevice,
    random: RandomDevice,
}

impl Vfs {
    /// New router over fresh devices
    pub fn new() -> Self {
        Self {
            mappings: [None; MAX_OPEN_DEVICES],
            files: FileDevice::new(),
            random: RandomDevice::new(),
        }
    }

    fn device(&mut self, kind: DeviceKind) -> &mut dyn Device {
        match kind {
            DeviceKind::File => &mut self.files,
            DeviceKind::Random => &mut self.random,
        }
    }

    /// Open a device by routing string, returning a VFS id
    pub fn open(&mut self, name: &str) -> Option<usize> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return None;
        }

        let mut parts = trimmed.splitn(2, char::is_whitespace);
        let kind = match parts.next()?.to_ascii_lowercase().as_str() {
            "file" => DeviceKind::File,
            "random" => DeviceKind::Random,
            other => {
                log::warn!("open of unknown device {:?}", other);
                return None;
            }
        };
        let arg = parts.next().unwrap_or("").trim();

        let device_id = self.device(kind).open(arg)?;

        let Some(vfs_id) = self.mappings.iter().position(|m| m.is_none()) else {
            log::warn!("vfs table full, dropping fresh {:?} open", kind);
            self.device(kind).close(device_id);
            return None;
        };

        self.mappings[vfs_id] = Some((kind, device_id));
        Some(vfs_id)
    }

    /// Close a VFS id; unknown ids are ignored
    pub fn close(&mut self, id: usize) {
        let Some(Some((kind, device_id))) = self.mappings.get(id).copied() else {
            return;
        };
        self.device(kind).close(device_id);
        self.mappings[id] = None;
    }

    /// Read up to `size` bytes from a VFS id
    pub fn read(&mut self, id: usize, size: usize) -> Vec<u8> {
        match self.mappings.get(id).copied().flatten() {
            Some((kind, device_id)) => self.device(kind).read(device_id, size),
            None => Vec::new(),
        }
    }

    /// Reposition a VFS id
    pub fn seek(&mut self, id: usize, offset: u64) {
        if let Some((kind, device_id)) = self.mappings.get(id).copied().flatten() {
            self.device(kind).seek(device_id, offset);
        }
    }

    /// Write through a VFS id
    pub fn write(&mut self, id: usize, data: &[u8]) -> usize {
        match self.mappings.get(id).copied().flatten() {
            Some((kind, device_id)) => self.device(kind).write(device_id, data),
            None => 0,
        }
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_routes_by_first_word() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("log.txt");
        let mut vfs = Vfs::new();

        let file = vfs.open(&format!("file {}", path.display())).unwrap();
        let random = vfs.open("random 5").unwrap();

        assert_eq!(vfs.write(file, b"abc"), 3);
        assert_eq!(vfs.write(random, b"abc"), 0);

        vfs.seek(file, 0);
        assert_eq!(vfs.read(file, 3), b"abc");
        assert_eq!(vfs.read(random, 4).len(), 4);
    }

    #[test]
    fn test_unknown_device_or_empty_name() {
        let mut vfs = Vfs::new();
        assert_eq!(vfs.open("tape x"), None);
        assert_eq!(vfs.open(""), None);
        assert_eq!(vfs.open("   "), None);
    }

    #[test]
    fn test_full_table_rejects_open() {
        // Split across devices so the mapping table, not a device, is the
        // limit being hit
        let tmp = tempdir().unwrap();
        let mut vfs = Vfs::new();
        for i in 0..MAX_OPEN_DEVICES / 2 {
            vfs.open("random 1").unwrap();
            let path = tmp.path().join(format!("f{}", i));
            vfs.open(&format!("file {}", path.display())).unwrap();
        }

        assert_eq!(vfs.open("random 1"), None);

        vfs.close(0);
        assert_eq!(vfs.open("random 1"), Some(0));
    }

    #[test]
    fn test_unmapped_ids_are_quiet() {
        let mut vfs = Vfs::new();
        assert!(vfs.read(7, 4).is_empty());
        assert_eq!(vfs.write(7, b"x"), 0);
        vfs.seek(7, 10);
        vfs.close(7);
    }
}
