use std::time::Duration;

use serde::Deserialize;

/// What a single overdue entry takes down with it when the sweeper fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryScope {
    /// Every pending entry of the overdue entry's request id times out.
    #[default]
    Request,
    /// Only entries past their own deadline time out.
    Entry,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifierConfig {
    /// Deadline given to batches that arrive without one.
    pub batch_ttl_secs: u64,
    pub sweep_interval_ms: u64,
    /// Capacity of each of the four message queues.
    pub queue_capacity: usize,
    /// Capacity of the eviction queue between dispatcher and sweeper.
    pub cleanup_capacity: usize,
    pub expiry: ExpiryScope,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            batch_ttl_secs: 60,
            sweep_interval_ms: 1000,
            queue_capacity: 256,
            cleanup_capacity: 128,
            expiry: ExpiryScope::Request,
        }
    }
}

impl VerifierConfig {
    pub fn batch_ttl(&self) -> Duration {
        Duration::from_secs(self.batch_ttl_secs)
    }

    /// Never zero: tokio intervals reject a zero period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub(crate) fn queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }

    pub(crate) fn cleanup_capacity(&self) -> usize {
        self.cleanup_capacity.max(1)
    }
}
