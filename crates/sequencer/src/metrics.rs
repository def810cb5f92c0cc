//! Fire-and-forget measurements of the sequencer.

use std::time::Duration;

use rollup_node_objects::TransactionId;
use tracing::info;

/// Target of the events emitted by [`TracingMetrics`].
pub const METRICS_TARGET: &str = "metrics";

/// Sink for the sequencer's measurements. Implementations must not block.
pub trait Metrics: Send + Sync + 'static {
    /// Time from submitting a batch transaction until it was mined.
    ///
    /// Only the attempt which succeeded is measured. Pacing and reverted attempts are not.
    fn publish_duration(&self, batch_id: u32, duration: Duration);

    /// Time taken to reconcile one confirmed block.
    fn block_processing_duration(&self, batch_id: u32, duration: Duration);

    /// Time from a transaction entering the pool until its batch settled.
    fn settlement_latency(&self, tx_id: &TransactionId, latency: Duration);
}

// TRACING METRICS
// ================================================================================================

/// Emits every measurement as a structured `tracing` event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingMetrics;

impl Metrics for TracingMetrics {
    fn publish_duration(&self, batch_id: u32, duration: Duration) {
        info!(target: METRICS_TARGET, batch_id, duration_ms = duration.as_millis(), "publish_duration");
    }

    fn block_processing_duration(&self, batch_id: u32, duration: Duration) {
        info!(
            target: METRICS_TARGET,
            batch_id,
            duration_ms = duration.as_millis(),
            "block_processing_duration"
        );
    }

    fn settlement_latency(&self, tx_id: &TransactionId, latency: Duration) {
        info!(target: METRICS_TARGET, %tx_id, latency_ms = latency.as_millis(), "settlement_latency");
    }
}

// PROMETHEUS METRICS
// ================================================================================================

#[cfg(feature = "prometheus")]
pub use self::prometheus_metrics::{encode_metrics, PrometheusMetrics};

#[cfg(feature = "prometheus")]
mod prometheus_metrics {
    use std::time::Duration;

    use prometheus::{Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
    use rollup_node_objects::TransactionId;

    use super::Metrics;

    /// Records the measurements as histograms, in seconds.
    #[derive(Clone)]
    pub struct PrometheusMetrics {
        publish: Histogram,
        block_processing: Histogram,
        settlement: Histogram,
    }

    impl PrometheusMetrics {
        /// Creates the histograms and registers them with `registry`.
        pub fn new(registry: &Registry) -> prometheus::Result<Self> {
            let publish = Histogram::with_opts(HistogramOpts::new(
                "rollup_publish_duration_seconds",
                "Time from submitting a batch transaction until it was mined",
            ))?;
            let block_processing = Histogram::with_opts(HistogramOpts::new(
                "rollup_block_processing_duration_seconds",
                "Time taken to reconcile a confirmed block",
            ))?;
            let settlement = Histogram::with_opts(
                HistogramOpts::new(
                    "rollup_settlement_latency_seconds",
                    "Time from a transaction entering the pool until its batch settled",
                )
                .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
            )?;

            registry.register(Box::new(publish.clone()))?;
            registry.register(Box::new(block_processing.clone()))?;
            registry.register(Box::new(settlement.clone()))?;

            Ok(Self { publish, block_processing, settlement })
        }
    }

    /// Encodes everything registered with `registry` in the Prometheus text format.
    pub fn encode_metrics(registry: &Registry) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }

    impl Metrics for PrometheusMetrics {
        fn publish_duration(&self, _batch_id: u32, duration: Duration) {
            self.publish.observe(duration.as_secs_f64());
        }

        fn block_processing_duration(&self, _batch_id: u32, duration: Duration) {
            self.block_processing.observe(duration.as_secs_f64());
        }

        fn settlement_latency(&self, _tx_id: &TransactionId, latency: Duration) {
            self.settlement.observe(latency.as_secs_f64());
        }
    }

}
