use std::sync::Mutex;

use async_trait::async_trait;
use rollup_node_objects::{
    BatchHash, BatchRecord, ChainTxHash, ProofRecord, Timestamp, TransactionId,
    TransactionRecord,
};
use rollup_node_store::Db;

use crate::{errors::StoreError, store::RecordStore};

/// An in-memory record store which logs the status updates it receives.
pub struct MockRecordStore {
    db: Db,
    sent: Mutex<Vec<(u32, ChainTxHash)>>,
    mined: Mutex<Vec<(u32, ChainTxHash)>>,
}

impl MockRecordStore {
    pub async fn new() -> Self {
        Self {
            db: Db::open_in_memory().await.unwrap(),
            sent: Mutex::default(),
            mined: Mutex::default(),
        }
    }

    pub fn sent(&self) -> Vec<(u32, ChainTxHash)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn mined(&self) -> Vec<(u32, ChainTxHash)> {
        self.mined.lock().unwrap().clone()
    }

    pub async fn batch(&self, batch_id: u32) -> Option<BatchRecord> {
        self.db.get_batch(batch_id).await.unwrap()
    }
}

#[async_trait]
impl RecordStore for MockRecordStore {
    async fn next_batch_id(&self) -> Result<u32, StoreError> {
        Ok(self.db.next_batch_id().await?)
    }

    async fn settled_batches(
        &self,
        offset: u32,
        descending: bool,
        limit: u32,
    ) -> Result<Vec<BatchRecord>, StoreError> {
        Ok(self.db.settled_batches(offset, descending, limit).await?)
    }

    async fn get_proof_record(
        &self,
        batch_hash: BatchHash,
    ) -> Result<Option<ProofRecord>, StoreError> {
        Ok(self.db.get_proof_record(batch_hash).await?)
    }

    async fn confirm_sent(&self, batch_id: u32, tx_hash: ChainTxHash) -> Result<bool, StoreError> {
        let updated = self.db.confirm_sent(batch_id, tx_hash).await?;
        self.sent.lock().unwrap().push((batch_id, tx_hash));
        Ok(updated)
    }

    async fn confirm_mined(
        &self,
        batch_id: u32,
        gas_used: u64,
        gas_price: u64,
        mined_at: Timestamp,
        tx_hash: ChainTxHash,
    ) -> Result<bool, StoreError> {
        let updated = self.db.confirm_mined(batch_id, gas_used, gas_price, mined_at, tx_hash).await?;
        self.mined.lock().unwrap().push((batch_id, tx_hash));
        Ok(updated)
    }

    async fn add_batch(&self, batch: BatchRecord) -> Result<(), StoreError> {
        Ok(self.db.add_batch(batch).await?)
    }

    async fn delete_unsettled_batches(&self) -> Result<usize, StoreError> {
        Ok(self.db.delete_unsettled_batches().await?)
    }

    async fn delete_orphaned_proof_records(&self) -> Result<usize, StoreError> {
        Ok(self.db.delete_orphaned_proof_records().await?)
    }

    async fn delete_pending_transactions(&self) -> Result<usize, StoreError> {
        Ok(self.db.delete_pending_transactions().await?)
    }

    async fn delete_transactions(&self, ids: Vec<TransactionId>) -> Result<usize, StoreError> {
        Ok(self.db.delete_transactions(ids).await?)
    }

    async fn add_pending_transaction(&self, tx: TransactionRecord) -> Result<bool, StoreError> {
        Ok(self.db.add_pending_transaction(tx).await?)
    }

    async fn pending_transactions(&self, limit: u32) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(self.db.pending_transactions(limit).await?)
    }
}
