//! Random Device
//!
//! A stream of pseudo-random bytes per open. Opening with a numeric
//! argument seeds the stream, so two opens with the same seed replay the
//! same bytes; `seek` discards bytes instead of repositioning.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::dev::Device;
use crate::MAX_OPEN_DEVICES;

/// Seedable PRNG device
pub struct RandomDevice {
    streams: [Option<StdRng>; MAX_OPEN_DEVICES],
}

impl RandomDevice {
    /// New device with every slot free
    pub fn new() -> Self {
        Self {
            streams: Default::default(),
        }
    }
}

impl Default for RandomDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for RandomDevice {
    fn open(&mut self, arg: &str) -> Option<usize> {
        let slot = self.streams.iter().position(|s| s.is_none())?;

        let rng = match arg.trim().parse::<u64>() {
            Ok(seed) => StdRng::seed_from_u64(seed),
            Err(_) => StdRng::from_entropy(),
        };

        self.streams[slot] = Some(rng);
        Some(slot)
    }

    fn close(&mut self, id: usize) {
        if let Some(slot) = self.streams.get_mut(id) {
            *slot = None;
        }
    }

    fn read(&mut self, id: usize, size: usize) -> Vec<u8> {
        let Some(Some(rng)) = self.streams.get_mut(id) else {
            return Vec::new();
        };

        let mut data = vec![0u8; size];
        rng.fill_bytes(&mut data);
        data
    }

    fn seek(&mut self, id: usize, offset: u64) {
        // Seeking forward in a random stream just burns bytes
        let Some(Some(rng)) = self.streams.get_mut(id) else {
            return;
        };

        let mut scratch = [0u8; 256];
        let mut remaining = offset as usize;
        while remaining > 0 {
            let chunk = remaining.min(scratch.len());
            rng.fill_bytes(&mut scratch[..chunk]);
            remaining -= chunk;
        }
    }

    fn write(&mut self, _id: usize, _data: &[u8]) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_replays_stream() {
        let mut dev = RandomDevice::new();
        let a = dev.open("42").unwrap();
        let b = dev.open("42").unwrap();

        assert_eq!(dev.read(a, 32), dev.read(b, 32));
    }

    #[test]
    fn test_seek_discards_bytes() {
        let mut dev = RandomDevice::new();
        let a = dev.open("7").unwrap();
        let b = dev.open("7").unwrap();

        let long = dev.read(a, 64);
        dev.seek(b, 48);
        assert_eq!(dev.read(b, 16), long[48..]);
    }

    #[test]
    fn test_writes_are_swallowed() {
        let mut dev = RandomDevice::new();
        let id = dev.open("1").unwrap();
        assert_eq!(dev.write(id, b"noise"), 0);
    }

    #[test]
    fn test_closed_stream_reads_empty() {
        let mut dev = RandomDevice::new();
        let id = dev.open("1").unwrap();
        dev.close(id);
        assert!(dev.read(id, 8).is_empty());
    }
}
