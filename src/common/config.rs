//! Configuration for the quire store client

use serde::{Deserialize, Serialize};

/// Client configuration
///
/// Every knob has a serde default so partial config files work; call
/// [`ClientConfig::validate`] after deserializing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Per-backend-call timeout (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Steady-state retry count for backend calls
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,

    /// Base backoff before the first retry (milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Linear backoff increment per attempt (milliseconds)
    #[serde(default = "default_retry_backoff_step_ms")]
    pub retry_backoff_step_ms: u64,

    /// Retry count for the one-time startup connectivity probe
    #[serde(default = "default_probe_retry_count")]
    pub probe_retry_count: usize,

    /// Backoff base for the startup probe (milliseconds)
    #[serde(default = "default_probe_backoff_ms")]
    pub probe_backoff_ms: u64,

    /// Whole-batch retry count for the update engine's retryable phase
    #[serde(default = "default_bulk_retry_count")]
    pub bulk_retry_count: usize,

    /// Backoff between whole-batch retries (milliseconds)
    #[serde(default = "default_bulk_backoff_ms")]
    pub bulk_backoff_ms: u64,

    /// Maximum keys per multi-get sub-batch (bounds request header size)
    #[serde(default = "default_max_get_batch")]
    pub max_get_batch: usize,

    /// Maximum documents per body-write sub-batch
    #[serde(default = "default_max_put_batch")]
    pub max_put_batch: usize,

    /// Ceiling on ids scanned by one range-query call before it must
    /// return a continuation cursor
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,

    /// Default scan budget for count queries
    #[serde(default = "default_count_budget")]
    pub count_budget: usize,

    /// Exclusive-lock expiry (seconds); crash-recovery bound
    #[serde(default = "default_lock_expiry_secs")]
    pub lock_expiry_secs: u64,

    /// Bounded worker pool size for parallel fan-out
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Payload fields covered by the secondary index
    #[serde(default = "default_indexed_fields")]
    pub indexed_fields: Vec<String>,

    /// Partition key the full-text index is sharded by
    #[serde(default = "default_fulltext_partition_key")]
    pub fulltext_partition_key: String,

    /// Whether the full-text index is partitioned (requires an equality
    /// predicate on the partition key in every full-text clause)
    #[serde(default)]
    pub fulltext_partitioned: bool,

    /// Log each retrieve/update entry point at info level
    #[serde(default)]
    pub access_log: bool,
}

fn default_request_timeout_ms() -> u64 {
    5_000
}
fn default_retry_count() -> usize {
    3
}
fn default_retry_backoff_ms() -> u64 {
    100
}
fn default_retry_backoff_step_ms() -> u64 {
    200
}
fn default_probe_retry_count() -> usize {
    10
}
fn default_probe_backoff_ms() -> u64 {
    1_000
}
fn default_bulk_retry_count() -> usize {
    3
}
fn default_bulk_backoff_ms() -> u64 {
    250
}
fn default_max_get_batch() -> usize {
    64
}
fn default_max_put_batch() -> usize {
    32
}
fn default_fetch_limit() -> usize {
    10_000
}
fn default_count_budget() -> usize {
    50_000
}
fn default_lock_expiry_secs() -> u64 {
    120
}
fn default_max_workers() -> usize {
    16
}
fn default_indexed_fields() -> Vec<String> {
    vec!["kind".to_string(), "owner".to_string(), "name".to_string()]
}
fn default_fulltext_partition_key() -> String {
    "owner".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            retry_count: default_retry_count(),
            retry_backoff_ms: default_retry_backoff_ms(),
            retry_backoff_step_ms: default_retry_backoff_step_ms(),
            probe_retry_count: default_probe_retry_count(),
            probe_backoff_ms: default_probe_backoff_ms(),
            bulk_retry_count: default_bulk_retry_count(),
            bulk_backoff_ms: default_bulk_backoff_ms(),
            max_get_batch: default_max_get_batch(),
            max_put_batch: default_max_put_batch(),
            fetch_limit: default_fetch_limit(),
            count_budget: default_count_budget(),
            lock_expiry_secs: default_lock_expiry_secs(),
            max_workers: default_max_workers(),
            indexed_fields: default_indexed_fields(),
            fulltext_partition_key: default_fulltext_partition_key(),
            fulltext_partitioned: false,
            access_log: false,
        }
    }
}

impl ClientConfig {
    /// Check internal consistency of the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_get_batch == 0 {
            return Err(crate::Error::InvalidConfig(
                "max_get_batch must be at least 1".into(),
            ));
        }
        if self.max_put_batch == 0 {
            return Err(crate::Error::InvalidConfig(
                "max_put_batch must be at least 1".into(),
            ));
        }
        if self.fetch_limit == 0 {
            return Err(crate::Error::InvalidConfig(
                "fetch_limit must be at least 1".into(),
            ));
        }
        if self.max_workers == 0 {
            return Err(crate::Error::InvalidConfig(
                "max_workers must be at least 1".into(),
            ));
        }
        if self.lock_expiry_secs == 0 {
            return Err(crate::Error::InvalidConfig(
                "lock_expiry_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
