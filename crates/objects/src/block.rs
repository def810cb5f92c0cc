use crate::{digest::ChainTxHash, timestamp::Timestamp};

/// A batch settled on the base chain, as reported by the chain block source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmedBlock {
    /// Sequence number of the settled batch, equal to its batch id.
    pub batch_id: u32,
    /// Encoded [`crate::BatchProofData`] without viewing keys.
    pub proof_data: Vec<u8>,
    /// Concatenated viewing keys of the batch's non-padding transactions.
    pub viewing_keys_data: Vec<u8>,
    pub tx_hash: ChainTxHash,
    pub gas_used: u64,
    pub gas_price: u64,
    /// Time of the chain block which included the batch.
    pub mined_at: Timestamp,
    /// Time the block source first observed the batch.
    pub created_at: Timestamp,
}
