//! Seams between the sequencer and its two stores.

use async_trait::async_trait;
use rollup_node_objects::{
    BatchHash, BatchProofData, BatchRecord, ChainTxHash, ProofRecord, Root, StateRoots,
    Timestamp, TransactionId, TransactionRecord,
};
use rollup_node_store::{
    world_state::NULLIFIER_MARKER, Db, LeafKey, LeafValue, TreeId, WorldStateDb,
};

use crate::errors::StoreError;

// RECORD STORE
// ================================================================================================

/// Persisted batch, proof and transaction records.
///
/// Every operation is atomic with respect to the records it touches.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Id following the highest settled batch.
    async fn next_batch_id(&self) -> Result<u32, StoreError>;

    async fn settled_batches(
        &self,
        offset: u32,
        descending: bool,
        limit: u32,
    ) -> Result<Vec<BatchRecord>, StoreError>;

    /// Proof record with the given batch hash, its transactions in batch order.
    async fn get_proof_record(&self, batch_hash: BatchHash)
        -> Result<Option<ProofRecord>, StoreError>;

    /// Returns `false` if there is no batch with the given id.
    async fn confirm_sent(&self, batch_id: u32, tx_hash: ChainTxHash) -> Result<bool, StoreError>;

    /// Marks a batch as settled. Returns `false` if there is no batch with the given id.
    async fn confirm_mined(
        &self,
        batch_id: u32,
        gas_used: u64,
        gas_price: u64,
        mined_at: Timestamp,
        tx_hash: ChainTxHash,
    ) -> Result<bool, StoreError>;

    /// Inserts a batch with its proof and transactions, replacing a batch with the same id.
    async fn add_batch(&self, batch: BatchRecord) -> Result<(), StoreError>;

    async fn delete_unsettled_batches(&self) -> Result<usize, StoreError>;

    /// Deletes proof records no batch refers to. Their transactions become pending again.
    async fn delete_orphaned_proof_records(&self) -> Result<usize, StoreError>;

    async fn delete_pending_transactions(&self) -> Result<usize, StoreError>;

    /// Deletes the given transactions if they are still pending.
    async fn delete_transactions(&self, ids: Vec<TransactionId>) -> Result<usize, StoreError>;

    /// Returns `false` if the transaction is already known.
    async fn add_pending_transaction(&self, tx: TransactionRecord) -> Result<bool, StoreError>;

    /// Up to `limit` pending transactions, oldest first.
    async fn pending_transactions(&self, limit: u32) -> Result<Vec<TransactionRecord>, StoreError>;
}

#[async_trait]
impl RecordStore for Db {
    async fn next_batch_id(&self) -> Result<u32, StoreError> {
        Ok(Db::next_batch_id(self).await?)
    }

    async fn settled_batches(
        &self,
        offset: u32,
        descending: bool,
        limit: u32,
    ) -> Result<Vec<BatchRecord>, StoreError> {
        Ok(Db::settled_batches(self, offset, descending, limit).await?)
    }

    async fn get_proof_record(
        &self,
        batch_hash: BatchHash,
    ) -> Result<Option<ProofRecord>, StoreError> {
        Ok(Db::get_proof_record(self, batch_hash).await?)
    }

    async fn confirm_sent(&self, batch_id: u32, tx_hash: ChainTxHash) -> Result<bool, StoreError> {
        Ok(Db::confirm_sent(self, batch_id, tx_hash).await?)
    }

    async fn confirm_mined(
        &self,
        batch_id: u32,
        gas_used: u64,
        gas_price: u64,
        mined_at: Timestamp,
        tx_hash: ChainTxHash,
    ) -> Result<bool, StoreError> {
        Ok(Db::confirm_mined(self, batch_id, gas_used, gas_price, mined_at, tx_hash).await?)
    }

    async fn add_batch(&self, batch: BatchRecord) -> Result<(), StoreError> {
        Ok(Db::add_batch(self, batch).await?)
    }

    async fn delete_unsettled_batches(&self) -> Result<usize, StoreError> {
        Ok(Db::delete_unsettled_batches(self).await?)
    }

    async fn delete_orphaned_proof_records(&self) -> Result<usize, StoreError> {
        Ok(Db::delete_orphaned_proof_records(self).await?)
    }

    async fn delete_pending_transactions(&self) -> Result<usize, StoreError> {
        Ok(Db::delete_pending_transactions(self).await?)
    }

    async fn delete_transactions(&self, ids: Vec<TransactionId>) -> Result<usize, StoreError> {
        Ok(Db::delete_transactions(self, ids).await?)
    }

    async fn add_pending_transaction(&self, tx: TransactionRecord) -> Result<bool, StoreError> {
        Ok(Db::add_pending_transaction(self, tx).await?)
    }

    async fn pending_transactions(&self, limit: u32) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(Db::pending_transactions(self, limit).await?)
    }
}

// MERKLE STATE STORE
// ================================================================================================

/// The data, nullifier and root-history trees with staged writes.
///
/// Writes are staged until [`MerkleStateStore::commit`] or [`MerkleStateStore::rollback`];
/// reads observe staged writes.
#[async_trait]
pub trait MerkleStateStore: Send + 'static {
    async fn start(&mut self) -> Result<(), StoreError>;

    fn stop(&mut self);

    fn put(&mut self, tree: TreeId, key: LeafKey, value: LeafValue) -> Result<(), StoreError>;

    fn leaf(&self, tree: TreeId, key: &LeafKey) -> Option<LeafValue>;

    fn root(&self, tree: TreeId) -> Root;

    fn size(&self, tree: TreeId) -> u64;

    fn has_staged_writes(&self) -> bool;

    /// Makes the staged writes durable, returning how many leaves were written.
    async fn commit(&mut self) -> Result<usize, StoreError>;

    /// Drops the staged writes, returning how many leaves were discarded.
    fn rollback(&mut self) -> usize;

    fn roots(&self) -> StateRoots {
        StateRoots {
            data: self.root(TreeId::Data),
            nullifier: self.root(TreeId::Nullifier),
            root_history: self.root(TreeId::RootHistory),
        }
    }
}

#[async_trait]
impl MerkleStateStore for WorldStateDb {
    async fn start(&mut self) -> Result<(), StoreError> {
        Ok(WorldStateDb::start(self).await?)
    }

    fn stop(&mut self) {
        WorldStateDb::stop(self);
    }

    fn put(&mut self, tree: TreeId, key: LeafKey, value: LeafValue) -> Result<(), StoreError> {
        Ok(WorldStateDb::put(self, tree, key, value)?)
    }

    fn leaf(&self, tree: TreeId, key: &LeafKey) -> Option<LeafValue> {
        self.get(tree, key)
    }

    fn root(&self, tree: TreeId) -> Root {
        WorldStateDb::root(self, tree)
    }

    fn size(&self, tree: TreeId) -> u64 {
        WorldStateDb::size(self, tree)
    }

    fn has_staged_writes(&self) -> bool {
        WorldStateDb::has_staged_writes(self)
    }

    async fn commit(&mut self) -> Result<usize, StoreError> {
        Ok(WorldStateDb::commit(self).await?)
    }

    fn rollback(&mut self) -> usize {
        WorldStateDb::rollback(self)
    }

    fn roots(&self) -> StateRoots {
        WorldStateDb::roots(self)
    }
}

// STAGED WRITES
// ================================================================================================

/// A write transaction on a [`MerkleStateStore`].
///
/// The handle borrows the store mutably, so no other writer can interleave. Dropping it without
/// calling [`StagedWrites::commit`] or [`StagedWrites::rollback`] leaves the writes staged in
/// the store.
pub struct StagedWrites<'a, S: MerkleStateStore> {
    store: &'a mut S,
}

impl<'a, S: MerkleStateStore> StagedWrites<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    pub fn put(&mut self, tree: TreeId, key: LeafKey, value: LeafValue) -> Result<(), StoreError> {
        self.store.put(tree, key, value)
    }

    /// Root of the tree including the writes staged so far.
    pub fn peek_root(&self, tree: TreeId) -> Root {
        self.store.root(tree)
    }

    pub fn roots(&self) -> StateRoots {
        self.store.roots()
    }

    pub async fn commit(self) -> Result<usize, StoreError> {
        self.store.commit().await
    }

    pub fn rollback(self) -> usize {
        self.store.rollback()
    }
}

/// Leaves written by [`stage_batch_writes`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchWrites {
    pub data_leaves: usize,
    pub nullifiers: usize,
}

/// Stages the writes of a batch.
///
/// The two notes of the transaction at position `i` go to data leaves
/// `2 * (data_start_index + i)` and the one after, padding transactions included. Nullifiers of
/// non-padding transactions are marked as spent. Finally the resulting data root is recorded in
/// the root-history tree at `batch_id + 1`.
pub fn stage_batch_writes<S: MerkleStateStore>(
    staged: &mut StagedWrites<'_, S>,
    batch: &BatchProofData,
) -> Result<BatchWrites, StoreError> {
    let mut writes = BatchWrites::default();

    for (position, tx) in batch.transactions.iter().enumerate() {
        let index = batch.data_leaf_index(position);
        staged.put(TreeId::Data, LeafKey::from(index), tx.note_1.into())?;
        staged.put(TreeId::Data, LeafKey::from(index + 1), tx.note_2.into())?;
        writes.data_leaves += 2;

        if !tx.is_padding {
            for nullifier in tx.nullifiers() {
                staged.put(TreeId::Nullifier, nullifier.into(), NULLIFIER_MARKER)?;
                writes.nullifiers += 1;
            }
        }
    }

    let data_root = staged.peek_root(TreeId::Data);
    staged.put(
        TreeId::RootHistory,
        LeafKey::from(u64::from(batch.batch_id) + 1),
        data_root.into(),
    )?;

    Ok(writes)
}
