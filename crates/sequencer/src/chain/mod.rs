//! The sequencer's view of the base chain.

use async_trait::async_trait;
use rollup_node_objects::{Address, ChainTxHash, ConfirmedBlock, Timestamp};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::errors::ChainError;

mod local;

pub use local::LocalChain;

// CHAIN TYPES
// ================================================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainStatus {
    /// Id the next settled batch must carry.
    pub next_batch_id: u32,
    /// Address of the contract which distributes transaction fees.
    pub fee_distributor: Address,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    /// Whether the transaction executed, i.e. the batch settled.
    pub success: bool,
    pub gas_used: u64,
    pub gas_price: u64,
    pub block_time: Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiptStatus {
    Pending,
    Mined(TxReceipt),
}

// CHAIN CLIENT
// ================================================================================================

/// Access to the rollup contract on the base chain.
///
/// Every error is transient: callers retry them with a backoff.
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// Returns all confirmed blocks with a batch id of at least `from`, ordered by id.
    async fn get_blocks(&self, from: u32) -> Result<Vec<ConfirmedBlock>, ChainError>;

    /// Streams confirmed blocks with a batch id of at least `from` in increasing id order,
    /// starting with the ones which are already confirmed.
    async fn subscribe(&self, from: u32) -> Result<UnboundedReceiver<ConfirmedBlock>, ChainError>;

    /// Closes all streams opened by [`ChainClient::subscribe`].
    async fn unsubscribe(&self);

    async fn get_chain_status(&self) -> Result<ChainStatus, ChainError>;

    /// Submits a rollup transaction payload, returning the chain transaction hash.
    async fn submit_transaction(&self, payload: Vec<u8>) -> Result<ChainTxHash, ChainError>;

    async fn get_receipt(&self, tx_hash: ChainTxHash) -> Result<ReceiptStatus, ChainError>;
}
