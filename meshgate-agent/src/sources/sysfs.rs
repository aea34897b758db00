//! Host network counters read from sysfs
//!
//! The kernel exposes per-device byte counters at
//! `/sys/class/net/{device}/statistics/{rx,tx}_bytes`. The multi-cluster tunnel
//! device only exists while submariner has a gateway on this node.

use super::HostCounters;
use crate::error::SourceError;
use log::debug;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Default sysfs mount point
const SYSFS_ROOT: &str = "/sys";

const RX_BYTES: &str = "rx_bytes";
const TX_BYTES: &str = "tx_bytes";

/// Reads device byte counters below a sysfs root
pub struct SysfsCounters {
    sysfs_root: PathBuf,
}

impl SysfsCounters {
    /// Create a reader for the default sysfs root
    pub fn new() -> Self {
        Self {
            sysfs_root: PathBuf::from(SYSFS_ROOT),
        }
    }

    /// Create a reader for a custom root (for testing)
    pub fn with_root(sysfs_root: PathBuf) -> Self {
        Self { sysfs_root }
    }

    fn device_dir(&self, device: &str) -> PathBuf {
        self.sysfs_root.join("class").join("net").join(device)
    }

    fn counter_path(&self, device: &str, counter: &str) -> PathBuf {
        self.device_dir(device).join("statistics").join(counter)
    }

    fn read_counter(&self, device: &str, counter: &str) -> Result<u64, SourceError> {
        let path = self.counter_path(device, counter);
        read_u64(&path)
    }
}

impl Default for SysfsCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl HostCounters for SysfsCounters {
    fn device_present(&self, device: &str) -> bool {
        self.device_dir(device).is_dir()
    }

    fn counters_present(&self, device: &str) -> bool {
        self.counter_path(device, RX_BYTES).is_file()
            && self.counter_path(device, TX_BYTES).is_file()
    }

    fn rx_bytes(&self, device: &str) -> Result<u64, SourceError> {
        self.read_counter(device, RX_BYTES)
    }

    fn tx_bytes(&self, device: &str) -> Result<u64, SourceError> {
        self.read_counter(device, TX_BYTES)
    }
}

fn read_u64(path: &Path) -> Result<u64, SourceError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        debug!("Could not read {}: {}", path.display(), e);
        match e.kind() {
            ErrorKind::NotFound => SourceError::Missing(path.display().to_string()),
            _ => SourceError::Query(format!("{}: {}", path.display(), e)),
        }
    })?;

    raw.trim().parse::<u64>().map_err(|e| {
        SourceError::Query(format!(
            "{} holds {:?}, not a counter: {}",
            path.display(),
            raw.trim(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_device(root: &Path, device: &str, rx: &str, tx: &str) {
        let stats = root.join("class/net").join(device).join("statistics");
        fs::create_dir_all(&stats).unwrap();
        fs::write(stats.join("rx_bytes"), rx).unwrap();
        fs::write(stats.join("tx_bytes"), tx).unwrap();
    }

    #[test]
    fn test_reads_counters() {
        let root = TempDir::new().unwrap();
        fake_device(root.path(), "vx-submariner", "1024\n", "2048\n");

        let counters = SysfsCounters::with_root(root.path().to_path_buf());
        assert!(counters.device_present("vx-submariner"));
        assert!(counters.counters_present("vx-submariner"));
        assert_eq!(counters.rx_bytes("vx-submariner"), Ok(1024));
        assert_eq!(counters.tx_bytes("vx-submariner"), Ok(2048));
    }

    #[test]
    fn test_missing_device() {
        let root = TempDir::new().unwrap();
        let counters = SysfsCounters::with_root(root.path().to_path_buf());

        assert!(!counters.device_present("vx-submariner"));
        assert!(!counters.counters_present("vx-submariner"));
        assert!(matches!(
            counters.rx_bytes("vx-submariner"),
            Err(SourceError::Missing(_))
        ));
    }

    #[test]
    fn test_device_without_statistics() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("class/net/vx-submariner")).unwrap();

        let counters = SysfsCounters::with_root(root.path().to_path_buf());
        assert!(counters.device_present("vx-submariner"));
        assert!(!counters.counters_present("vx-submariner"));
    }

    #[test]
    fn test_garbage_counter() {
        let root = TempDir::new().unwrap();
        fake_device(root.path(), "vx-submariner", "lots", "1");

        let counters = SysfsCounters::with_root(root.path().to_path_buf());
        assert!(matches!(
            counters.rx_bytes("vx-submariner"),
            Err(SourceError::Query(_))
        ));
    }
}
