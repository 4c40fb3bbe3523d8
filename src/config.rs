//! Kernel Configuration
//!
//! Tunables for the simulated machine: memory size, quantum length,
//! demotion threshold, swap location, and an optional determinism seed.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{KernelError, KernelResult, PHYSICAL_FRAMES};

/// Kernel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Data directory for the swap file and any file-device backing files
    pub data_dir: PathBuf,

    /// Number of physical frames in simulated RAM
    pub physical_frames: usize,

    /// Quantum length in milliseconds; 0 disables the preemption timer
    pub quantum_ms: u64,

    /// Timeouts tolerated before a process is demoted one priority tier
    pub demotion_threshold: u32,

    /// Swap file name, relative to `data_dir`
    pub swap_file: String,

    /// Seed for the scheduler lottery and paging RNG; None draws from entropy
    pub deterministic_seed: Option<u64>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            data_dir: std::env::temp_dir().join("simkern"),
            physical_frames: PHYSICAL_FRAMES,
            quantum_ms: 250,
            demotion_threshold: 5,
            swap_file: "swap.bin".into(),
            deterministic_seed: None,
        }
    }
}

impl KernelConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &std::path::Path) -> KernelResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KernelError::DeviceUnavailable(format!("config: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| KernelError::DeviceUnavailable(format!("config: {}", e)))
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &std::path::Path) -> KernelResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| KernelError::DeviceUnavailable(format!("config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| KernelError::DeviceUnavailable(format!("config: {}", e)))
    }

    /// Validate configuration and materialize the data directory
    pub fn validate(&self) -> KernelResult<()> {
        if self.physical_frames == 0 {
            return Err(KernelError::InvalidArgument("physical_frames must be nonzero"));
        }
        if self.swap_file.is_empty() {
            return Err(KernelError::InvalidArgument("swap_file must be named"));
        }

        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .map_err(|e| KernelError::DeviceUnavailable(format!("data dir: {}", e)))?;
        }

        Ok(())
    }

    /// Full path of the swap file
    pub fn swap_path(&self) -> PathBuf {
        self.data_dir.join(&self.swap_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = KernelConfig::default();
        assert_eq!(config.physical_frames, PHYSICAL_FRAMES);
        assert_eq!(config.quantum_ms, 250);
        assert_eq!(config.demotion_threshold, 5);
    }

    #[test]
    fn test_config_save_load() {
        let tmp = tempdir().unwrap();
        let config_path = tmp.path().join("config.json");

        let mut config = KernelConfig::default();
        config.quantum_ms = 100;
        config.deterministic_seed = Some(7);
        config.save(&config_path).unwrap();

        let loaded = KernelConfig::load(&config_path).unwrap();
        assert_eq!(loaded.quantum_ms, 100);
        assert_eq!(loaded.deterministic_seed, Some(7));
    }

    #[test]
    fn test_validate_creates_data_dir() {
        let tmp = tempdir().unwrap();
        let config = KernelConfig {
            data_dir: tmp.path().join("nested").join("state"),
            ..KernelConfig::default()
        };
        config.validate().unwrap();
        assert!(config.data_dir.exists());
    }

    #[test]
    fn test_validate_rejects_zero_frames() {
        let config = KernelConfig {
            physical_frames: 0,
            ..KernelConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
