//! Batch, proof and transaction records persisted by the sequencer.

use crate::{
    batch::{BatchProofData, InnerTransaction},
    block::ConfirmedBlock,
    digest::{BatchHash, ChainTxHash, Nullifier, Root, TransactionId},
    errors::ConversionError,
    timestamp::Timestamp,
    viewing_key::ViewingKey,
};

// TRANSACTION RECORD
// ================================================================================================

/// A non-padding transaction, either waiting in the pending pool or part of a proof record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: TransactionId,
    /// Encoded [`InnerTransaction`].
    pub proof_data: Vec<u8>,
    pub viewing_key_1: ViewingKey,
    pub viewing_key_2: ViewingKey,
    pub nullifier_1: Nullifier,
    pub nullifier_2: Nullifier,
    /// Signature authorising a deposit, submitted along with the batch when present.
    pub signature: Option<Vec<u8>>,
    pub created: Timestamp,
}

impl TransactionRecord {
    pub fn new(
        tx: &InnerTransaction,
        viewing_keys: [ViewingKey; 2],
        signature: Option<Vec<u8>>,
        created: Timestamp,
    ) -> Self {
        let [viewing_key_1, viewing_key_2] = viewing_keys;
        Self {
            id: tx.id(),
            proof_data: tx.to_bytes(),
            viewing_key_1,
            viewing_key_2,
            nullifier_1: tx.nullifier_1,
            nullifier_2: tx.nullifier_2,
            signature,
            created,
        }
    }

    pub fn inner_transaction(&self) -> Result<InnerTransaction, ConversionError> {
        InnerTransaction::from_bytes(&self.proof_data)
    }

    pub fn viewing_keys(&self) -> [&ViewingKey; 2] {
        [&self.viewing_key_1, &self.viewing_key_2]
    }
}

// PROOF RECORD
// ================================================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofRecord {
    /// Batch hash of the proof's public inputs.
    pub id: BatchHash,
    pub batch_size: u32,
    pub data_start_index: u32,
    pub proof_data: Vec<u8>,
    /// Non-padding transactions in batch order.
    pub txs: Vec<TransactionRecord>,
    pub created: Timestamp,
}

// BATCH RECORD
// ================================================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchRecord {
    /// Batch id, which is the on-chain sequence number once the batch settled.
    pub id: u32,
    /// Data tree root after the batch.
    pub data_root: Root,
    pub proof: ProofRecord,
    pub viewing_keys: Vec<u8>,
    pub chain_tx_hash: Option<ChainTxHash>,
    pub gas_used: Option<u64>,
    pub gas_price: Option<u64>,
    pub mined: Option<Timestamp>,
    pub created: Timestamp,
}

impl BatchRecord {
    pub fn batch_hash(&self) -> BatchHash {
        self.proof.id
    }

    pub fn is_settled(&self) -> bool {
        self.mined.is_some()
    }

    /// Builds the settled record of a batch which was published by somebody else.
    pub fn from_confirmed_block(block: &ConfirmedBlock, batch: &BatchProofData) -> Self {
        let txs = batch
            .non_padding_transactions()
            .map(|(tx, keys)| {
                TransactionRecord::new(
                    tx,
                    [keys[0].clone(), keys[1].clone()],
                    None,
                    block.created_at,
                )
            })
            .collect();

        Self {
            id: batch.batch_id,
            data_root: batch.new_roots.data,
            proof: ProofRecord {
                id: batch.batch_hash(),
                batch_size: batch.batch_size,
                data_start_index: batch.data_start_index,
                proof_data: block.proof_data.clone(),
                txs,
                created: block.created_at,
            },
            viewing_keys: block.viewing_keys_data.clone(),
            chain_tx_hash: Some(block.tx_hash),
            gas_used: Some(block.gas_used),
            gas_price: Some(block.gas_price),
            mined: Some(block.mined_at),
            created: block.created_at,
        }
    }
}
