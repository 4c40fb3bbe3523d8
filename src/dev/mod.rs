//! Device Layer
//!
//! Devices expose a small descriptor-based contract; the VFS routes open
//! strings to a device and multiplexes device-local ids behind its own.

pub mod file;
pub mod random;
pub mod vfs;

/// Contract every device implements.
///
/// Errors are deliberately quiet, matching real device registers more than
/// a library API: a failed open is `None`, a failed read is short or
/// empty, a failed write reports fewer bytes.
pub trait Device {
    /// Open a device instance; `arg` is device-specific
    fn open(&mut self, arg: &str) -> Option<usize>;

    /// Close a device-local id; unknown ids are ignored
    fn close(&mut self, id: usize);

    /// Read up to `size` bytes
    fn read(&mut self, id: usize, size: usize) -> Vec<u8>;

    /// Reposition to an absolute offset
    fn seek(&mut self, id: usize, offset: u64);

    /// Write bytes, returning how many were accepted
    fn write(&mut self, id: usize, data: &[u8]) -> usize;
}
