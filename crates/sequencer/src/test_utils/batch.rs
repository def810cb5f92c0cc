use rollup_node_objects::{
    BatchProofData, BatchRecord, ChainTxHash, ConfirmedBlock, InnerTransaction, ProofRecord,
    Timestamp, TransactionRecord,
};
use rollup_node_store::{TreeId, WorldStateDb};

use super::mock_viewing_key;
use crate::store::{stage_batch_writes, StagedWrites};

/// Builds consecutive batches with the roots a correct prover would claim.
///
/// The builder keeps its own world state, so batches line up with a store which has seen every
/// previous batch.
pub struct BatchBuilder {
    state: WorldStateDb,
    batch_size: u32,
    next_batch_id: u32,
}

impl BatchBuilder {
    pub async fn new(batch_size: u32) -> Self {
        let mut state = WorldStateDb::ephemeral().unwrap();
        state.start().await.unwrap();

        Self { state, batch_size, next_batch_id: 0 }
    }

    pub fn next_batch_id(&self) -> u32 {
        self.next_batch_id
    }

    /// Builds the next batch out of `txs`, padded to the batch size, and applies it.
    pub async fn next_batch(&mut self, txs: Vec<InnerTransaction>) -> BatchProofData {
        let batch = self.peek_batch(txs);

        let mut staged = StagedWrites::new(&mut self.state);
        stage_batch_writes(&mut staged, &batch).unwrap();
        staged.commit().await.unwrap();
        self.next_batch_id += 1;

        batch
    }

    /// Builds the next batch without applying it, e.g. to model a competing batch.
    pub fn peek_batch(&mut self, mut txs: Vec<InnerTransaction>) -> BatchProofData {
        txs.resize(self.batch_size as usize, InnerTransaction::padding());

        let viewing_keys = txs
            .iter()
            .filter(|tx| !tx.is_padding)
            .flat_map(|tx| {
                let seed = tx.note_1.as_bytes()[0];
                [mock_viewing_key(seed), mock_viewing_key(seed.wrapping_add(128))]
            })
            .collect();

        let old_roots = self.state.roots();
        let mut batch = BatchProofData {
            batch_id: self.next_batch_id,
            batch_size: self.batch_size,
            data_start_index: u32::try_from(self.state.size(TreeId::Data) / 2).unwrap(),
            old_roots,
            new_roots: old_roots,
            transactions: txs,
            viewing_keys,
            proof: Vec::new(),
        };

        let mut staged = StagedWrites::new(&mut self.state);
        stage_batch_writes(&mut staged, &batch).unwrap();
        batch.new_roots = staged.roots();
        staged.rollback();

        batch
    }
}

/// The block which settles `batch`.
pub fn block_for(batch: &BatchProofData, mined_at: Timestamp) -> ConfirmedBlock {
    ConfirmedBlock {
        batch_id: batch.batch_id,
        proof_data: batch.to_proof_bytes(),
        viewing_keys_data: batch.viewing_keys_bytes(),
        tx_hash: ChainTxHash::new([batch.batch_id as u8 + 1; 32]),
        gas_used: 50_000,
        gas_price: 10,
        mined_at,
        created_at: mined_at,
    }
}

/// The record a node keeps for a batch it built but did not see settle yet.
pub fn unsettled_record(batch: &BatchProofData, txs: Vec<TransactionRecord>) -> BatchRecord {
    let created = txs.iter().map(|tx| tx.created).max().unwrap_or_default();

    BatchRecord {
        id: batch.batch_id,
        data_root: batch.new_roots.data,
        proof: ProofRecord {
            id: batch.batch_hash(),
            batch_size: batch.batch_size,
            data_start_index: batch.data_start_index,
            proof_data: batch.to_proof_bytes(),
            txs,
            created,
        },
        viewing_keys: batch.viewing_keys_bytes(),
        chain_tx_hash: None,
        gas_used: None,
        gas_price: None,
        mined: None,
        created,
    }
}
