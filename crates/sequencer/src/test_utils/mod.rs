use std::time::Duration;

use rollup_node_objects::{
    viewing_key::VIEWING_KEY_SIZE, InnerTransaction, NoteCommitment, Nullifier, Timestamp,
    TransactionRecord, ViewingKey,
};

mod batch;

pub use batch::{block_for, unsettled_record, BatchBuilder};

mod chain;

pub use chain::{mined_receipt, MockChain};

mod metrics;

pub use metrics::RecordingMetrics;

mod pipeline;

pub use pipeline::MockPipelineFactory;

mod state;

pub use state::RecordingState;

mod store;

pub use store::MockRecordStore;

/// A transfer whose notes and nullifiers are derived from `seed`.
pub fn mock_transaction(seed: u8) -> InnerTransaction {
    let digest = |tag: u8| {
        let mut bytes = [0u8; 32];
        bytes[0] = seed;
        bytes[1] = tag;
        bytes
    };

    InnerTransaction::new(
        [NoteCommitment::new(digest(1)), NoteCommitment::new(digest(2))],
        [Nullifier::new(digest(3)), Nullifier::new(digest(4))],
    )
}

pub fn mock_viewing_key(seed: u8) -> ViewingKey {
    ViewingKey::new([seed; VIEWING_KEY_SIZE])
}

/// Pending record of [`mock_transaction`] with its own viewing keys.
pub fn mock_tx_record(seed: u8, created: Timestamp) -> TransactionRecord {
    TransactionRecord::new(
        &mock_transaction(seed),
        [mock_viewing_key(seed), mock_viewing_key(seed.wrapping_add(128))],
        None,
        created,
    )
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition was not met in time");
}
