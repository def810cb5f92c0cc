use std::time::Duration;

#[cfg(test)]
pub mod test_utils;

mod errors;
mod interrupt;
mod store;

pub mod chain;
pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod publisher;
pub mod world_state;

pub use errors::{
    BlockProcessingError, ChainError, PipelineError, PublishError, SequencerError, SignerError,
    StoreError,
};
pub use interrupt::InterruptToken;
pub use store::{stage_batch_writes, BatchWrites, MerkleStateStore, RecordStore, StagedWrites};

// CONSTANTS
// =================================================================================================

/// The name of the sequencer component.
pub const COMPONENT: &str = "rollup-node-sequencer";

/// Wait before retrying a failed chain call or resubmitting a failed batch transaction.
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(60);

/// Wait between two polls of a pending transaction receipt.
const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Number of transaction slots per batch.
const DEFAULT_BATCH_SIZE: u32 = 4;

/// The frequency at which the pipeline checks whether a batch should be built.
const DEFAULT_BUILD_INTERVAL: Duration = Duration::from_secs(1);

/// The longest a pending transaction waits for its batch to fill up.
const DEFAULT_MAX_BATCH_WAIT: Duration = Duration::from_secs(30);

/// Fee limit signed along with a batch, in the chain's smallest fee unit.
const DEFAULT_FEE_LIMIT: u64 = 10_000_000_000_000_000;

/// Minimum time between two published batches.
const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(0);
