use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of messages processed in parallel.
    pub concurrency: usize,
    /// Bound for each origin dial.
    pub connect_timeout_ms: u64,
    /// Longest gap between two archive chunks before the retrieval is
    /// abandoned.
    pub idle_timeout_ms: u64,
    /// Extra attempts after a failed transfer.
    pub storage_retries: u32,
    /// Linear backoff step between transfer attempts.
    pub storage_backoff_ms: u64,
    /// Long-poll duration of one queue receive.
    pub receive_wait_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            connect_timeout_ms: 10_000,
            idle_timeout_ms: 120_000,
            storage_retries: 3,
            storage_backoff_ms: 500,
            receive_wait_ms: 20_000,
        }
    }
}

impl WorkerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn storage_backoff(&self) -> Duration {
        Duration::from_millis(self.storage_backoff_ms)
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_millis(self.receive_wait_ms)
    }
}
