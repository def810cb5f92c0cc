use std::{collections::BTreeSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use rollup_node_objects::{
    errors::ConversionError, BatchProofData, BatchRecord, InnerTransaction, ProofRecord,
    Timestamp, TransactionId, TransactionRecord,
};
use rollup_node_store::{world_state::NULLIFIER_MARKER, LeafKey, TreeId};
use rollup_node_utils::formatting::format_array;
use tokio::{
    sync::Mutex,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, instrument, warn};

use super::{BatchPipeline, PipelineControl, PipelineFactory};
use crate::{
    errors::{PipelineError, PublishError},
    publisher::BatchPublisher,
    store::{stage_batch_writes, MerkleStateStore, RecordStore, StagedWrites},
    COMPONENT, DEFAULT_BATCH_SIZE, DEFAULT_BUILD_INTERVAL, DEFAULT_MAX_BATCH_WAIT,
};

#[cfg(test)]
mod tests;

// DEFAULT PIPELINE OPTIONS
// ================================================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefaultPipelineOptions {
    /// Number of transaction slots of a batch, padding included.
    pub batch_size: u32,

    /// The frequency at which the pipeline checks whether a batch should be built.
    pub build_interval: Duration,

    /// A batch is built once its oldest transaction has waited this long, even if not full.
    pub max_batch_wait: Duration,
}

impl Default for DefaultPipelineOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            build_interval: DEFAULT_BUILD_INTERVAL,
            max_batch_wait: DEFAULT_MAX_BATCH_WAIT,
        }
    }
}

// DEFAULT PIPELINE FACTORY
// ================================================================================================

pub struct DefaultPipelineFactory<R, S> {
    records: Arc<R>,
    state: Arc<Mutex<S>>,
    publisher: Arc<BatchPublisher<R>>,
    options: DefaultPipelineOptions,
}

impl<R, S> DefaultPipelineFactory<R, S>
where
    R: RecordStore,
    S: MerkleStateStore,
{
    pub fn new(
        records: Arc<R>,
        state: Arc<Mutex<S>>,
        publisher: Arc<BatchPublisher<R>>,
        options: DefaultPipelineOptions,
    ) -> Self {
        Self { records, state, publisher, options }
    }
}

impl<R, S> PipelineFactory for DefaultPipelineFactory<R, S>
where
    R: RecordStore,
    S: MerkleStateStore,
{
    fn create(&self) -> Box<dyn BatchPipeline> {
        Box::new(DefaultPipeline {
            records: Arc::clone(&self.records),
            state: Arc::clone(&self.state),
            publisher: Arc::clone(&self.publisher),
            options: self.options.clone(),
        })
    }
}

// DEFAULT PIPELINE
// ================================================================================================

/// Builds one batch out of the pending transactions and publishes it.
///
/// The batch's writes stay staged in the world state, so the roots of the store equal the roots
/// the batch claims until the synchronizer sees the batch settle.
pub struct DefaultPipeline<R, S> {
    records: Arc<R>,
    state: Arc<Mutex<S>>,
    publisher: Arc<BatchPublisher<R>>,
    options: DefaultPipelineOptions,
}

#[async_trait]
impl<R, S> BatchPipeline for DefaultPipeline<R, S>
where
    R: RecordStore,
    S: MerkleStateStore,
{
    async fn run(self: Box<Self>, control: PipelineControl) -> Result<(), PipelineError> {
        let mut interval = time::interval(self.options.build_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let batch = loop {
            let flush = tokio::select! {
                () = control.stop.requested() => return Ok(()),
                _ = interval.tick() => false,
                () = control.flush.notified() => true,
            };

            if let Some(batch) = self.try_build_batch(flush).await? {
                break batch;
            }
        };

        if control.stop.is_requested() {
            return Ok(());
        }

        match self.publisher.publish_batch(&batch, &control.stop).await {
            Ok(true) => {
                control.last_published.record(Timestamp::now());
                info!(target: COMPONENT, batch_id = batch.id, "Batch published, waiting for block");
            },
            Ok(false) => {
                info!(target: COMPONENT, batch_id = batch.id, "Batch was not published");
            },
            // Stopped between the check above and the call.
            Err(PublishError::InterruptNotCleared) => return Ok(()),
            Err(err) => return Err(err.into()),
        }

        // Nothing else can be built on top of the unsettled batch.
        control.stop.requested().await;

        Ok(())
    }
}

impl<R, S> DefaultPipeline<R, S>
where
    R: RecordStore,
    S: MerkleStateStore,
{
    /// Builds, stages and records a batch if enough transactions are pending.
    #[instrument(target = COMPONENT, skip_all, err)]
    async fn try_build_batch(&self, flush: bool) -> Result<Option<BatchRecord>, PipelineError> {
        let batch_size = self.options.batch_size;
        let pending = self.records.pending_transactions(batch_size).await?;

        let Some(oldest) = pending.first() else {
            return Ok(None);
        };
        let waited = Timestamp::now().saturating_duration_since(oldest.created);
        let full = pending.len() >= batch_size as usize;
        if !(full || flush || waited >= self.options.max_batch_wait) {
            debug!(
                target: COMPONENT,
                num_pending = pending.len(),
                waited_ms = waited.as_millis(),
                "Waiting for more transactions"
            );
            return Ok(None);
        }

        let mut state = self.state.lock().await;

        let (txs, rejected) = select_transactions(&*state, pending)?;
        if !rejected.is_empty() {
            warn!(
                target: COMPONENT,
                tx_ids = %format_array(&rejected),
                "Dropping transactions which spend spent nullifiers"
            );
            self.records.delete_transactions(rejected).await?;
        }
        if txs.is_empty() {
            return Ok(None);
        }

        let batch_id = self.records.next_batch_id().await?;
        let data_start_index = u32::try_from(state.size(TreeId::Data) / 2)
            .map_err(|_| ConversionError::ValueOutOfRange { field: "data_start_index" })?;

        let mut transactions = txs
            .iter()
            .map(TransactionRecord::inner_transaction)
            .collect::<Result<Vec<_>, _>>()?;
        transactions.resize(batch_size as usize, InnerTransaction::padding());

        let old_roots = state.roots();
        let mut batch = BatchProofData {
            batch_id,
            batch_size,
            data_start_index,
            old_roots,
            new_roots: old_roots,
            transactions,
            viewing_keys: txs.iter().flat_map(TransactionRecord::viewing_keys).cloned().collect(),
            proof: Vec::new(),
        };

        let mut staged = StagedWrites::new(&mut *state);
        let writes = match stage_batch_writes(&mut staged, &batch) {
            Ok(writes) => writes,
            Err(err) => {
                staged.rollback();
                return Err(err.into());
            },
        };
        batch.new_roots = staged.roots();
        drop(state);

        let now = Timestamp::now();
        let record = BatchRecord {
            id: batch_id,
            data_root: batch.new_roots.data,
            proof: ProofRecord {
                id: batch.batch_hash(),
                batch_size,
                data_start_index,
                proof_data: batch.to_proof_bytes(),
                txs,
                created: now,
            },
            viewing_keys: batch.viewing_keys_bytes(),
            chain_tx_hash: None,
            gas_used: None,
            gas_price: None,
            mined: None,
            created: now,
        };
        self.records.add_batch(record.clone()).await?;

        info!(
            target: COMPONENT,
            batch_id,
            batch_hash = %record.batch_hash(),
            num_txs = record.proof.txs.len(),
            data_start_index,
            data_leaves = writes.data_leaves,
            nullifiers = writes.nullifiers,
            "Built batch"
        );

        Ok(Some(record))
    }
}

/// Splits pending transactions into the ones which fit into the next batch and the ones which
/// can never settle because one of their nullifiers is already spent.
///
/// A transaction whose nullifier is spent by an earlier transaction of the same batch stays
/// pending.
fn select_transactions<S: MerkleStateStore>(
    state: &S,
    pending: Vec<TransactionRecord>,
) -> Result<(Vec<TransactionRecord>, Vec<TransactionId>), ConversionError> {
    let mut selected = Vec::with_capacity(pending.len());
    let mut rejected = Vec::new();
    let mut nullifiers = BTreeSet::new();

    for tx in pending {
        let [first, second] = tx.inner_transaction()?.nullifiers();

        let spent = [first, second].into_iter().any(|nullifier| {
            state.leaf(TreeId::Nullifier, &LeafKey::from(nullifier)) == Some(NULLIFIER_MARKER)
        });
        if spent || first == second {
            rejected.push(tx.id);
            continue;
        }

        if nullifiers.contains(&first) || nullifiers.contains(&second) {
            debug!(target: COMPONENT, tx_id = %tx.id, "Nullifier already used in this batch");
            continue;
        }

        nullifiers.extend([first, second]);
        selected.push(tx);
    }

    Ok((selected, rejected))
}
