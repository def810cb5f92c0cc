use rollup_node_objects::{errors::ConversionError, StateRoots};
use rollup_node_store::errors::{DatabaseError, WorldStateError};
use thiserror::Error;
use tokio::task::JoinError;

// Chain errors
// =================================================================================================

/// Failures of the chain client. All of them are transient and retried by their callers.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("transaction submission failed: {0}")]
    SubmissionFailed(String),

    #[error("chain query failed: {0}")]
    QueryFailed(String),

    #[error("fetching blocks from batch {from} failed: {reason}")]
    BlockFetchFailed { from: u32, reason: String },

    #[error("block subscription failed: {0}")]
    SubscriptionFailed(String),
}

// Store errors
// =================================================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error")]
    DatabaseError(#[from] DatabaseError),

    #[error("world state error")]
    WorldStateError(#[from] WorldStateError),

    #[error("stored record is malformed")]
    ConversionError(#[from] ConversionError),

    #[error("store is unavailable: {0}")]
    Unavailable(String),
}

// Signer errors
// =================================================================================================

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("provider key is not valid hex")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("provider key or signature is invalid")]
    InvalidKey(#[from] k256::ecdsa::Error),
}

// Publish errors
// =================================================================================================

#[derive(Debug, Error)]
pub enum PublishError {
    /// The interrupt of a previous call was not reset before publishing again.
    #[error("publisher interrupt was not cleared before publishing")]
    InterruptNotCleared,

    #[error("batch record store failed")]
    StoreError(#[from] StoreError),

    #[error("batch proof of the record is malformed")]
    MalformedBatch(#[from] ConversionError),

    #[error("signing the batch failed")]
    SignerError(#[from] SignerError),
}

// Pipeline errors
// =================================================================================================

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline task panicked")]
    Panicked(#[source] JoinError),

    #[error("store failed while building a batch")]
    StoreError(#[from] StoreError),

    #[error("publishing the batch failed")]
    PublishError(#[from] PublishError),

    #[error("batch could not be encoded")]
    ConversionError(#[from] ConversionError),
}

// Block processing errors
// =================================================================================================

/// Errors which abort the reconciliation of a confirmed block. None of them can be retried.
#[derive(Debug, Error)]
pub enum BlockProcessingError {
    #[error("block {batch_id} carries a malformed batch")]
    MalformedBlock {
        batch_id: u32,
        source: ConversionError,
    },

    #[error("block {block_id} carries the proof of batch {proof_id}")]
    BatchIdMismatch { block_id: u32, proof_id: u32 },

    #[error("replaying batch {batch_id} produced roots {actual:?} instead of {expected:?}")]
    StateRootMismatch {
        batch_id: u32,
        expected: StateRoots,
        actual: StateRoots,
    },

    #[error("store failed while reconciling a block")]
    StoreError(#[from] StoreError),
}

// Sequencer errors
// =================================================================================================

#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("world state synchronizer is already running")]
    AlreadyStarted,

    #[error("block processor task panicked")]
    ProcessorPanicked(#[source] JoinError),

    #[error("block processing failed")]
    BlockProcessingError(#[from] BlockProcessingError),

    #[error("store failed")]
    StoreError(#[from] StoreError),

    #[error("chain client failed")]
    ChainError(#[from] ChainError),
}
