use std::{sync::Mutex, time::Duration};

use rollup_node_objects::TransactionId;

use crate::metrics::Metrics;

/// Keeps every observation for later inspection.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    pub publish: Mutex<Vec<(u32, Duration)>>,
    pub block_processing: Mutex<Vec<u32>>,
    pub settlement: Mutex<Vec<(TransactionId, Duration)>>,
}

impl RecordingMetrics {
    pub fn published(&self) -> Vec<u32> {
        self.publish.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    pub fn publish_durations(&self) -> Vec<Duration> {
        self.publish.lock().unwrap().iter().map(|(_, duration)| *duration).collect()
    }

    pub fn processed(&self) -> Vec<u32> {
        self.block_processing.lock().unwrap().clone()
    }

    pub fn settled(&self) -> Vec<TransactionId> {
        self.settlement.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }
}

impl Metrics for RecordingMetrics {
    fn publish_duration(&self, batch_id: u32, duration: Duration) {
        self.publish.lock().unwrap().push((batch_id, duration));
    }

    fn block_processing_duration(&self, batch_id: u32, _duration: Duration) {
        self.block_processing.lock().unwrap().push(batch_id);
    }

    fn settlement_latency(&self, tx_id: &TransactionId, latency: Duration) {
        self.settlement.lock().unwrap().push((*tx_id, latency));
    }
}
