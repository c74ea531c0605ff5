//! Scheduler Configuration

use serde::{Deserialize, Serialize};

use crate::{Result, SchedulerError};

/// Default number of specialized threads
pub const DEFAULT_SPECIALIZED_THREADS: usize = 2;

/// Default sync-block pool capacity (maximum live tasks)
pub const DEFAULT_SYNC_BLOCK_CAPACITY: usize = 16_384;

/// Task scheduler configuration options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Generic worker count. `None` derives it from the core count.
    pub worker_threads: Option<usize>,

    /// Number of specialized (RHI / I/O-like) threads
    pub specialized_threads: usize,

    /// Maximum number of simultaneously live tasks
    pub sync_block_capacity: usize,

    /// Prefix for OS thread names
    pub thread_name_prefix: String,

    /// Worker wait timeout before re-checking its queues (milliseconds)
    pub idle_poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            specialized_threads: DEFAULT_SPECIALIZED_THREADS,
            sync_block_capacity: DEFAULT_SYNC_BLOCK_CAPACITY,
            thread_name_prefix: "fos".to_string(),
            idle_poll_interval_ms: 100,
        }
    }
}

impl SchedulerConfig {
    /// Set an explicit generic worker count
    pub fn with_worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = Some(count);
        self
    }

    /// Set the specialized thread count
    pub fn with_specialized_threads(mut self, count: usize) -> Self {
        self.specialized_threads = count;
        self
    }

    /// Set the sync-block pool capacity
    pub fn with_sync_block_capacity(mut self, capacity: usize) -> Self {
        self.sync_block_capacity = capacity;
        self
    }

    /// Set the thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: &str) -> Self {
        self.thread_name_prefix = prefix.to_string();
        self
    }

    /// Generic worker count after applying the core-count formula
    ///
    /// `max(1, cores - 2 - specialized_threads)`: one core stays with the
    /// main thread and one with the render thread.
    pub fn resolved_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            let cores = std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4);
            Self::workers_for_cores(cores, self.specialized_threads)
        })
    }

    pub(crate) fn workers_for_cores(cores: usize, specialized_threads: usize) -> usize {
        cores.saturating_sub(2 + specialized_threads).max(1)
    }

    /// Check the configuration for values the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sync_block_capacity == 0 {
            return Err(SchedulerError::InvalidConfig(
                "sync_block_capacity must be at least 1".to_string(),
            ));
        }
        if u32::try_from(self.sync_block_capacity).is_err() {
            return Err(SchedulerError::InvalidConfig(format!(
                "sync_block_capacity {} does not fit a 32-bit handle",
                self.sync_block_capacity
            )));
        }
        if self.worker_threads == Some(0) {
            return Err(SchedulerError::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_formula() {
        assert_eq!(SchedulerConfig::workers_for_cores(16, 2), 12);
        assert_eq!(SchedulerConfig::workers_for_cores(4, 2), 1);
        assert_eq!(SchedulerConfig::workers_for_cores(1, 2), 1);
        assert_eq!(SchedulerConfig::workers_for_cores(8, 0), 6);
    }

    #[test]
    fn test_explicit_worker_count() {
        let config = SchedulerConfig::default().with_worker_threads(3);
        assert_eq!(config.resolved_worker_threads(), 3);
        assert!(SchedulerConfig::default().resolved_worker_threads() >= 1);
    }

    #[test]
    fn test_validate() {
        assert!(SchedulerConfig::default().validate().is_ok());
        assert!(SchedulerConfig::default().with_sync_block_capacity(0).validate().is_err());
        assert!(SchedulerConfig::default().with_worker_threads(0).validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{ "worker_threads": 2, "sync_block_capacity": 64 }"#).unwrap();

        assert_eq!(config.worker_threads, Some(2));
        assert_eq!(config.sync_block_capacity, 64);
        assert_eq!(config.specialized_threads, DEFAULT_SPECIALIZED_THREADS);
        assert_eq!(config.thread_name_prefix, "fos");
    }
}
