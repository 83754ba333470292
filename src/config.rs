//! Tunables for blocking and threading.

use crate::error::{GemmError, Result};

/// Cache and threading targets used by the orchestrators.
///
/// Defaults match a typical desktop core: 32 KiB L1d and 256 KiB of L2
/// per core, one thread per hardware thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GemmConfig {
    /// Upper bound on threads used by a multi-threaded call, including the
    /// calling thread.
    pub max_threads: usize,
    /// Bytes of packed LHS+RHS a kernel sweep over one depth block may touch.
    pub l1_bytes: usize,
    /// Bytes budgeted for one packed row block and its accumulators.
    pub l2_bytes: usize,
    /// Multiply-adds below which adding another thread is not worth it.
    pub min_ops_per_thread: usize,
}

impl Default for GemmConfig {
    fn default() -> Self {
        Self {
            max_threads: hardware_threads(),
            l1_bytes: 32 * 1024,
            l2_bytes: 256 * 1024,
            min_ops_per_thread: 1 << 20,
        }
    }
}

impl GemmConfig {
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub fn with_cache_sizes(mut self, l1_bytes: usize, l2_bytes: usize) -> Self {
        self.l1_bytes = l1_bytes;
        self.l2_bytes = l2_bytes;
        self
    }

    pub fn with_min_ops_per_thread(mut self, min_ops_per_thread: usize) -> Self {
        self.min_ops_per_thread = min_ops_per_thread;
        self
    }

    /// Threads a call may actually run: the configured maximum, but never
    /// more than the hardware offers.
    pub fn thread_budget(&self) -> usize {
        self.max_threads.min(hardware_threads()).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            return Err(GemmError::InvalidConfig(
                "max_threads must be at least 1".to_string(),
            ));
        }
        if self.l1_bytes == 0 || self.l2_bytes == 0 {
            return Err(GemmError::InvalidConfig(
                "cache sizes must be non-zero".to_string(),
            ));
        }
        if self.l1_bytes > self.l2_bytes {
            return Err(GemmError::InvalidConfig(format!(
                "l1_bytes ({}) exceeds l2_bytes ({})",
                self.l1_bytes, self.l2_bytes
            )));
        }
        Ok(())
    }
}

/// Threads the OS lets this process run concurrently (1 if unknown).
pub fn hardware_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = GemmConfig::default();
        assert!(config.max_threads >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_thread_budget_never_exceeds_hardware() {
        let hw = hardware_threads();
        assert_eq!(GemmConfig::default().thread_budget(), hw);
        assert_eq!(GemmConfig::default().with_max_threads(1).thread_budget(), 1);
        assert_eq!(GemmConfig::default().with_max_threads(hw * 8).thread_budget(), hw);
    }

    #[test]
    fn test_builders_and_validation() {
        let config = GemmConfig::default()
            .with_max_threads(3)
            .with_cache_sizes(1024, 4096)
            .with_min_ops_per_thread(7);
        assert_eq!(config.max_threads, 3);
        assert_eq!(config.l1_bytes, 1024);
        assert_eq!(config.l2_bytes, 4096);
        assert_eq!(config.min_ops_per_thread, 7);

        assert!(GemmConfig::default().with_max_threads(0).validate().is_err());
        assert!(
            GemmConfig::default()
                .with_cache_sizes(8192, 4096)
                .validate()
                .is_err()
        );
    }
}
