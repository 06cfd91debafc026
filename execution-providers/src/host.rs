/*!
Host Detection (cores, RAM, OS)

Feeds thread defaults for the CPU/WASM providers and memory checks before a
model load.
*/

use serde::{Deserialize, Serialize};
use sysinfo::System;

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub logical_cores: usize,
    pub physical_cores: usize,
    /// Total system RAM in bytes
    pub total_memory_bytes: u64,
    /// Available (free) system RAM in bytes
    pub available_memory_bytes: u64,
    pub os: String,
    pub os_version: String,
    pub arch: String,
}

impl HostInfo {
    /// Detect the current host using the `sysinfo` and `num_cpus` crates
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let os_version = System::long_os_version()
            .or_else(System::os_version)
            .unwrap_or_else(|| "unknown".to_string());

        let info = Self {
            logical_cores: num_cpus::get(),
            physical_cores: num_cpus::get_physical(),
            total_memory_bytes: sys.total_memory(),
            available_memory_bytes: sys.available_memory(),
            os: std::env::consts::OS.to_string(),
            os_version,
            arch: std::env::consts::ARCH.to_string(),
        };

        log::debug!(
            "Host: {} {} ({}), {} logical cores, {} MB RAM available",
            info.os,
            info.os_version,
            info.arch,
            info.logical_cores,
            info.available_memory_mb()
        );
        info
    }

    pub fn total_memory_mb(&self) -> u64 {
        self.total_memory_bytes / BYTES_PER_MB
    }

    pub fn available_memory_mb(&self) -> u64 {
        self.available_memory_bytes / BYTES_PER_MB
    }

    /// Whether a model of `size_bytes` fits in currently available RAM
    pub fn fits_in_memory(&self, size_bytes: u64) -> bool {
        size_bytes <= self.available_memory_bytes
    }

    /// Default intra-op thread count: physical cores, at least one
    pub fn default_threads(&self) -> usize {
        self.physical_cores.max(1)
    }
}
