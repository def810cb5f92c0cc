use std::{
    fmt::{Display, Formatter},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    pipeline::DefaultPipelineOptions, publisher::PublisherOptions, DEFAULT_BATCH_SIZE,
    DEFAULT_BUILD_INTERVAL, DEFAULT_FEE_LIMIT, DEFAULT_MAX_BATCH_WAIT, DEFAULT_PUBLISH_INTERVAL,
    DEFAULT_RECEIPT_POLL_INTERVAL, DEFAULT_RETRY_BACKOFF,
};

// Sequencer config
// ================================================================================================

#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequencerConfig {
    /// Number of transaction slots per batch.
    pub batch_size: u32,

    pub build_interval_ms: u64,

    /// Longest time a pending transaction waits for its batch to fill up.
    pub max_batch_wait_secs: u64,

    /// Minimum time between two settled batches.
    pub publish_interval_secs: u64,

    /// Wait before retrying a failed chain call.
    pub retry_backoff_secs: u64,

    pub receipt_poll_interval_ms: u64,

    /// Fee limit signed along with every batch.
    pub fee_limit: u64,

    /// Gas price charged by the development chain.
    pub gas_price: u64,

    /// Hex encoded address which receives the fees on the development chain.
    pub fee_distributor: String,

    /// Hex encoded secp256k1 key the batches are signed with. A random key is used if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_private_key: Option<String>,

    #[serde(default)]
    pub metrics: MetricsSink,
}

/// Where the sequencer's measurements go.
#[derive(Clone, Copy, Default, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsSink {
    /// Structured events under the `metrics` tracing target.
    #[default]
    Tracing,
    /// Histograms in a Prometheus registry. Requires the `prometheus` feature.
    Prometheus,
}

impl Display for MetricsSink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricsSink::Tracing => f.write_str("tracing"),
            MetricsSink::Prometheus => f.write_str("prometheus"),
        }
    }
}

impl SequencerConfig {
    pub fn publisher_options(&self) -> PublisherOptions {
        PublisherOptions {
            publish_interval: Duration::from_secs(self.publish_interval_secs),
            retry_backoff: self.retry_backoff(),
            receipt_poll_interval: Duration::from_millis(self.receipt_poll_interval_ms),
            fee_limit: self.fee_limit,
        }
    }

    pub fn pipeline_options(&self) -> DefaultPipelineOptions {
        DefaultPipelineOptions {
            batch_size: self.batch_size,
            build_interval: Duration::from_millis(self.build_interval_ms),
            max_batch_wait: Duration::from_secs(self.max_batch_wait_secs),
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

impl Display for SequencerConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // The provider key stays out of logs.
        f.write_fmt(format_args!(
            "{{ batch_size: {}, build_interval_ms: {}, max_batch_wait_secs: {}, \
             publish_interval_secs: {}, retry_backoff_secs: {}, receipt_poll_interval_ms: {}, \
             fee_limit: {}, gas_price: {}, fee_distributor: {}, provider_key_set: {}, \
             metrics: {} }}",
            self.batch_size,
            self.build_interval_ms,
            self.max_batch_wait_secs,
            self.publish_interval_secs,
            self.retry_backoff_secs,
            self.receipt_poll_interval_ms,
            self.fee_limit,
            self.gas_price,
            self.fee_distributor,
            self.provider_private_key.is_some(),
            self.metrics,
        ))
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            build_interval_ms: DEFAULT_BUILD_INTERVAL.as_millis() as u64,
            max_batch_wait_secs: DEFAULT_MAX_BATCH_WAIT.as_secs(),
            publish_interval_secs: DEFAULT_PUBLISH_INTERVAL.as_secs(),
            retry_backoff_secs: DEFAULT_RETRY_BACKOFF.as_secs(),
            receipt_poll_interval_ms: DEFAULT_RECEIPT_POLL_INTERVAL.as_millis() as u64,
            fee_limit: DEFAULT_FEE_LIMIT,
            gas_price: 1,
            fee_distributor: format!("0x{}", "fd".repeat(20)),
            provider_private_key: None,
            metrics: MetricsSink::default(),
        }
    }
}
