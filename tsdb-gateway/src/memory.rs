//! Host memory watermark checked while formatting large results.

use model::FormatterError;
use parking_lot::Mutex;
use sysinfo::System;
use tracing::debug;

pub struct MemoryMonitor {
    threshold_percent: u8,
    system: Mutex<System>,
}

impl MemoryMonitor {
    /// `None` when `threshold_percent` is zero, which disables the check.
    pub fn new(threshold_percent: u8) -> Option<Self> {
        (threshold_percent > 0).then(|| Self {
            threshold_percent,
            system: Mutex::new(System::new()),
        })
    }

    pub fn threshold_percent(&self) -> u8 {
        self.threshold_percent
    }

    /// Fails with [`FormatterError::MemoryExhausted`] once used memory
    /// reaches the threshold.
    pub fn check(&self) -> Result<(), FormatterError> {
        let (used, total) = {
            let mut system = self.system.lock();
            system.refresh_memory();
            (system.used_memory(), system.total_memory())
        };
        debug!(used, total, "sampled memory");

        match used_percent(used, total) {
            Some(percent) if percent >= u64::from(self.threshold_percent) => {
                Err(FormatterError::MemoryExhausted(format!(
                    "memory usage at {percent}% exceeds the {}% limit",
                    self.threshold_percent
                )))
            }
            _ => Ok(()),
        }
    }
}

fn used_percent(used: u64, total: u64) -> Option<u64> {
    (total > 0).then(|| used.saturating_mul(100) / total)
}
