//! Keeps the local world state and batch records in step with the blocks confirmed on chain.
//!
//! Confirmed blocks are consumed strictly one at a time and in batch id order. Every block stops
//! the running batch pipeline, reconciles the world state and the batch records with the block,
//! and starts a fresh pipeline on top of the new state.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use rollup_node_objects::{BatchProofData, BatchRecord, ConfirmedBlock, ProofRecord, Timestamp};
use rollup_node_store::TreeId;
use tokio::{
    sync::{mpsc::UnboundedReceiver, watch, Mutex},
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    chain::ChainClient,
    errors::{BlockProcessingError, PipelineError, SequencerError},
    metrics::Metrics,
    pipeline::{LastPublished, PipelineFactory, PipelineHandle},
    store::{stage_batch_writes, MerkleStateStore, RecordStore, StagedWrites},
    InterruptToken, COMPONENT,
};


// STATUS
// ================================================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStatus {
    Stopped,
    Starting,
    Syncing,
    PipelineActive,
    HandlingBlock,
    /// A block could not be reconciled. No further blocks are processed.
    Failed,
}

/// How the world state was brought in line with a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateUpdate {
    /// The store already held the block's writes, staged by the pipeline. They were committed.
    Committed { leaves: usize },
    /// Staged writes were discarded and the block's writes replayed and committed.
    Replayed {
        discarded: usize,
        data_leaves: usize,
        nullifiers: usize,
    },
}

/// How the batch records were brought in line with a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordUpdate {
    /// The batch was built locally and is now marked as settled.
    Confirmed,
    /// The batch was built elsewhere and its records were created from the block.
    Inserted,
}

/// Outcome of reconciling one confirmed block.
#[derive(Debug)]
pub struct ProcessedBlock {
    pub batch_id: u32,
    pub state: StateUpdate,
    pub record: RecordUpdate,
    /// Error of the pipeline which was stopped to process the block, if it failed.
    pub pipeline: Option<PipelineError>,
}

// SYNCHRONIZER
// ================================================================================================

/// The single writer of the world state and the batch records.
struct Synchronizer<R, S> {
    records: Arc<R>,
    state: Arc<Mutex<S>>,
    chain: Arc<dyn ChainClient>,
    factory: Arc<dyn PipelineFactory>,
    metrics: Arc<dyn Metrics>,
    retry_backoff: Duration,

    pipeline: Option<PipelineHandle>,
    last_published: LastPublished,
    status: watch::Sender<SyncStatus>,

    /// Id of the next block to reconcile.
    next_batch_id: u32,
    /// Blocks which arrived ahead of a missing one.
    held: BTreeMap<u32, ConfirmedBlock>,
}

impl<R, S> Synchronizer<R, S>
where
    R: RecordStore,
    S: MerkleStateStore,
{
    fn set_status(&self, status: SyncStatus) {
        self.status.send_replace(status);
    }

    fn start_pipeline(&mut self) {
        if self.pipeline.is_none() {
            let pipeline = PipelineHandle::spawn(self.factory.create(), self.last_published.clone());
            self.pipeline = Some(pipeline);
        }
        self.set_status(SyncStatus::PipelineActive);
    }

    /// Stops the running pipeline, if any, and returns its failure.
    async fn stop_pipeline(&mut self) -> Option<PipelineError> {
        let pipeline = self.pipeline.take()?;
        pipeline.stop().await.err()
    }

    fn flush_txs(&self) {
        match &self.pipeline {
            Some(pipeline) => pipeline.flush_txs(),
            None => debug!(target: COMPONENT, "No pipeline to flush"),
        }
    }

    /// Replays the blocks confirmed since the last settled batch and drops speculative records.
    ///
    /// Returns the number of blocks replayed.
    #[instrument(target = COMPONENT, skip_all, err)]
    async fn sync_state(&mut self) -> Result<usize, SequencerError> {
        self.set_status(SyncStatus::Syncing);
        self.next_batch_id = self.records.next_batch_id().await?;

        let blocks = loop {
            match self.chain.get_blocks(self.next_batch_id).await {
                Ok(blocks) => break blocks,
                Err(err) => {
                    warn!(
                        target: COMPONENT,
                        from = self.next_batch_id,
                        %err,
                        backoff_secs = self.retry_backoff.as_secs(),
                        "Fetching confirmed blocks failed, retrying after backoff"
                    );
                    time::sleep(self.retry_backoff).await;
                },
            }
        };

        let mut replayed = 0;
        for block in blocks {
            if block.batch_id < self.next_batch_id {
                continue;
            }
            if block.batch_id > self.next_batch_id {
                // The subscription delivers the rest.
                warn!(
                    target: COMPONENT,
                    expected = self.next_batch_id,
                    got = block.batch_id,
                    "Gap in confirmed blocks"
                );
                break;
            }

            self.reconcile(&block).await?;
            replayed += 1;
        }

        let next_batch_id = self.next_batch_id;
        self.held.retain(|batch_id, _| *batch_id >= next_batch_id);

        let unsettled = self.records.delete_unsettled_batches().await?;
        let orphaned = self.records.delete_orphaned_proof_records().await?;

        info!(
            target: COMPONENT,
            replayed,
            next_batch_id = self.next_batch_id,
            unsettled,
            orphaned,
            "World state synced"
        );

        Ok(replayed)
    }

    /// Discards all speculative work and starts a fresh pipeline.
    #[instrument(target = COMPONENT, skip_all, err)]
    async fn reset_pipeline(&mut self) -> Result<Option<PipelineError>, SequencerError> {
        let failure = self.stop_pipeline().await;
        let discarded = self.state.lock().await.rollback();

        let unsettled = self.records.delete_unsettled_batches().await?;
        let orphaned = self.records.delete_orphaned_proof_records().await?;
        let pending = self.records.delete_pending_transactions().await?;

        info!(target: COMPONENT, discarded, unsettled, orphaned, pending, "Pipeline reset");

        self.start_pipeline();
        Ok(failure)
    }

    /// Puts `block` into the ordering buffer and processes every block which is now next.
    async fn accept_block(
        &mut self,
        block: ConfirmedBlock,
    ) -> Result<Vec<ProcessedBlock>, SequencerError> {
        if block.batch_id < self.next_batch_id {
            debug!(target: COMPONENT, batch_id = block.batch_id, "Dropping already processed block");
            return Ok(Vec::new());
        }

        self.held.insert(block.batch_id, block);

        let mut processed = Vec::new();
        while let Some(block) = self.held.remove(&self.next_batch_id) {
            processed.push(self.handle_block(block).await?);
        }

        if let Some(first_held) = self.held.keys().next() {
            info!(
                target: COMPONENT,
                expected = self.next_batch_id,
                first_held,
                num_held = self.held.len(),
                "Holding blocks until the missing one arrives"
            );
        }

        Ok(processed)
    }

    /// Stops the pipeline, reconciles `block` and starts a new pipeline.
    ///
    /// `block` has to be the next one in batch id order.
    #[instrument(target = COMPONENT, skip_all, err, fields(batch_id = block.batch_id))]
    async fn handle_block(&mut self, block: ConfirmedBlock) -> Result<ProcessedBlock, SequencerError> {
        let started = Instant::now();
        self.set_status(SyncStatus::HandlingBlock);

        let pipeline = self.stop_pipeline().await;

        let (state, record) = match self.reconcile(&block).await {
            Ok(update) => update,
            Err(err) => {
                self.set_status(SyncStatus::Failed);
                return Err(err.into());
            },
        };

        self.start_pipeline();

        let duration = started.elapsed();
        self.metrics.block_processing_duration(block.batch_id, duration);
        info!(
            target: COMPONENT,
            batch_id = block.batch_id,
            ?state,
            ?record,
            duration_ms = duration.as_millis(),
            "Processed block"
        );

        Ok(ProcessedBlock {
            batch_id: block.batch_id,
            state,
            record,
            pipeline,
        })
    }

    /// Applies a confirmed block to the world state and the batch records.
    async fn reconcile(
        &mut self,
        block: &ConfirmedBlock,
    ) -> Result<(StateUpdate, RecordUpdate), BlockProcessingError> {
        let batch = BatchProofData::decode(&block.proof_data, &block.viewing_keys_data).map_err(
            |source| BlockProcessingError::MalformedBlock { batch_id: block.batch_id, source },
        )?;
        if batch.batch_id != block.batch_id {
            return Err(BlockProcessingError::BatchIdMismatch {
                block_id: block.batch_id,
                proof_id: batch.batch_id,
            });
        }

        let state = self.reconcile_state(&batch).await?;
        let record = self.reconcile_records(block, &batch).await?;

        self.next_batch_id = self.next_batch_id.max(block.batch_id + 1);
        self.log_world_state().await;

        Ok((state, record))
    }

    async fn reconcile_state(
        &self,
        batch: &BatchProofData,
    ) -> Result<StateUpdate, BlockProcessingError> {
        let mut state = self.state.lock().await;

        // Our own batch: the pipeline staged exactly these writes.
        if state.roots() == batch.new_roots {
            let leaves = state.commit().await?;
            return Ok(StateUpdate::Committed { leaves });
        }

        let discarded = state.rollback();
        if discarded > 0 {
            info!(
                target: COMPONENT,
                batch_id = batch.batch_id,
                discarded,
                "Discarded speculative writes"
            );
        }

        let mut staged = StagedWrites::new(&mut *state);
        let writes = match stage_batch_writes(&mut staged, batch) {
            Ok(writes) => writes,
            Err(err) => {
                staged.rollback();
                return Err(err.into());
            },
        };

        let actual = staged.roots();
        if actual != batch.new_roots {
            staged.rollback();
            return Err(BlockProcessingError::StateRootMismatch {
                batch_id: batch.batch_id,
                expected: batch.new_roots,
                actual,
            });
        }
        staged.commit().await?;

        Ok(StateUpdate::Replayed {
            discarded,
            data_leaves: writes.data_leaves,
            nullifiers: writes.nullifiers,
        })
    }

    async fn reconcile_records(
        &self,
        block: &ConfirmedBlock,
        batch: &BatchProofData,
    ) -> Result<RecordUpdate, BlockProcessingError> {
        let Some(proof) = self.records.get_proof_record(batch.batch_hash()).await? else {
            self.records.add_batch(BatchRecord::from_confirmed_block(block, batch)).await?;

            // A local batch with the same id lost the race, its transactions are pending again.
            let orphaned = self.records.delete_orphaned_proof_records().await?;
            if orphaned > 0 {
                info!(
                    target: COMPONENT,
                    batch_id = block.batch_id,
                    orphaned,
                    "Released transactions of a lost batch"
                );
            }

            return Ok(RecordUpdate::Inserted);
        };

        let confirmed = self
            .records
            .confirm_mined(
                block.batch_id,
                block.gas_used,
                block.gas_price,
                block.mined_at,
                block.tx_hash,
            )
            .await?;

        if !confirmed {
            warn!(
                target: COMPONENT,
                batch_id = block.batch_id,
                batch_hash = %proof.id,
                "Known proof has no batch record, inserting it"
            );
            let mut record = BatchRecord::from_confirmed_block(block, batch);
            record.proof.txs.clone_from(&proof.txs);
            self.records.add_batch(record).await?;
        }

        self.observe_settlement(block, batch, &proof);

        Ok(RecordUpdate::Confirmed)
    }

    fn observe_settlement(&self, block: &ConfirmedBlock, batch: &BatchProofData, proof: &ProofRecord) {
        for (tx, _) in batch.non_padding_transactions() {
            let tx_id = tx.id();
            match proof.txs.iter().find(|record| record.id == tx_id) {
                Some(record) => {
                    let latency = block.mined_at.saturating_duration_since(record.created);
                    self.metrics.settlement_latency(&tx_id, latency);
                },
                None => {
                    warn!(
                        target: COMPONENT,
                        %tx_id,
                        batch_id = batch.batch_id,
                        "Settled transaction has no local record"
                    );
                },
            }
        }
    }

    async fn log_world_state(&self) {
        let state = self.state.lock().await;
        for tree in TreeId::ALL {
            info!(
                target: COMPONENT,
                %tree,
                root = %state.root(tree),
                size = state.size(tree),
                "World state tree"
            );
        }
    }
}

// WORLD STATE
// ================================================================================================

struct BlockProcessor {
    stop: InterruptToken,
    task: JoinHandle<Result<(), SequencerError>>,
}

/// The world-state synchronizer.
///
/// All operations are serialized: an administrative call waits for the block being processed,
/// and blocks wait for administrative calls.
pub struct WorldState<R, S> {
    inner: Arc<Mutex<Synchronizer<R, S>>>,
    chain: Arc<dyn ChainClient>,
    status: watch::Receiver<SyncStatus>,
    last_published: LastPublished,
    processor: Option<BlockProcessor>,
}

impl<R, S> WorldState<R, S>
where
    R: RecordStore,
    S: MerkleStateStore,
{
    pub fn new(
        records: Arc<R>,
        state: Arc<Mutex<S>>,
        chain: Arc<dyn ChainClient>,
        factory: Arc<dyn PipelineFactory>,
        metrics: Arc<dyn Metrics>,
        retry_backoff: Duration,
    ) -> Self {
        let (status_sender, status) = watch::channel(SyncStatus::Stopped);
        let last_published = LastPublished::default();

        let inner = Synchronizer {
            records,
            state,
            chain: Arc::clone(&chain),
            factory,
            metrics,
            retry_backoff,
            pipeline: None,
            last_published: last_published.clone(),
            status: status_sender,
            next_batch_id: 0,
            held: BTreeMap::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
            chain,
            status,
            last_published,
            processor: None,
        }
    }

    /// Starts the world state, catches up with the chain, starts a pipeline and begins
    /// processing confirmed blocks.
    #[instrument(target = COMPONENT, skip_all, err)]
    pub async fn start(&mut self) -> Result<(), SequencerError> {
        if self.processor.is_some() {
            return Err(SequencerError::AlreadyStarted);
        }

        let blocks = match self.initialize().await {
            Ok(blocks) => blocks,
            Err(err) => {
                self.inner.lock().await.set_status(SyncStatus::Failed);
                return Err(err);
            },
        };

        let stop = InterruptToken::new();
        let task = tokio::spawn(process_blocks(Arc::clone(&self.inner), blocks, stop.clone()));
        self.processor = Some(BlockProcessor { stop, task });

        info!(target: COMPONENT, "World state synchronizer started");

        Ok(())
    }

    async fn initialize(&self) -> Result<UnboundedReceiver<ConfirmedBlock>, SequencerError> {
        let mut inner = self.inner.lock().await;
        inner.set_status(SyncStatus::Starting);

        inner.state.lock().await.start().await?;
        inner.sync_state().await?;
        inner.start_pipeline();

        Ok(self.chain.subscribe(inner.next_batch_id).await?)
    }

    /// Stops block processing, the subscription, the pipeline and the world state, in that
    /// order.
    ///
    /// Returns the error block processing failed with, if any.
    pub async fn stop(&mut self) -> Result<(), SequencerError> {
        let mut failure = None;
        if let Some(processor) = self.processor.take() {
            processor.stop.request();
            match processor.task.await {
                Ok(result) => failure = result.err(),
                Err(err) => failure = Some(SequencerError::ProcessorPanicked(err)),
            }
        }

        self.chain.unsubscribe().await;

        let mut inner = self.inner.lock().await;
        if let Some(err) = inner.stop_pipeline().await {
            warn!(target: COMPONENT, %err, "Pipeline failed before shutdown");
        }
        inner.state.lock().await.stop();
        inner.set_status(SyncStatus::Stopped);

        info!(target: COMPONENT, "World state synchronizer stopped");

        failure.map_or(Ok(()), Err)
    }

    /// Asks the pipeline to batch its pending transactions without waiting for more.
    pub async fn flush_txs(&self) {
        self.inner.lock().await.flush_txs();
    }

    /// Discards speculative batches, staged writes and pending transactions.
    ///
    /// Returns the error the stopped pipeline failed with, if any.
    pub async fn reset_pipeline(&self) -> Result<Option<PipelineError>, SequencerError> {
        self.inner.lock().await.reset_pipeline().await
    }

    /// Replays the blocks confirmed since the last settled batch, pausing the pipeline meanwhile.
    pub async fn sync_state(&self) -> Result<usize, SequencerError> {
        let mut inner = self.inner.lock().await;

        let restart = inner.pipeline.is_some();
        if let Some(err) = inner.stop_pipeline().await {
            warn!(target: COMPONENT, %err, "Pipeline failed before sync");
        }

        let replayed = inner.sync_state().await?;
        if restart {
            inner.start_pipeline();
        }

        Ok(replayed)
    }

    /// Reconciles `block` in batch id order, the same way blocks of the subscription are.
    ///
    /// Returns the blocks processed by the call. That is none if `block` was already processed or
    /// is held until a missing block arrives, and several if it fills a gap.
    pub async fn handle_block(
        &self,
        block: ConfirmedBlock,
    ) -> Result<Vec<ProcessedBlock>, SequencerError> {
        self.inner.lock().await.accept_block(block).await
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    /// When a batch published by this node was last mined, if any was since the node started.
    pub fn last_published_time(&self) -> Option<Timestamp> {
        self.last_published.get()
    }

    pub async fn next_batch_id(&self) -> u32 {
        self.inner.lock().await.next_batch_id
    }
}

/// Consumes the block stream until stopped, the stream ends or a block cannot be reconciled.
async fn process_blocks<R, S>(
    inner: Arc<Mutex<Synchronizer<R, S>>>,
    mut blocks: UnboundedReceiver<ConfirmedBlock>,
    stop: InterruptToken,
) -> Result<(), SequencerError>
where
    R: RecordStore,
    S: MerkleStateStore,
{
    loop {
        let block = tokio::select! {
            biased;
            () = stop.requested() => return Ok(()),
            block = blocks.recv() => match block {
                Some(block) => block,
                None => {
                    info!(target: COMPONENT, "Block stream closed");
                    return Ok(());
                },
            },
        };

        let batch_id = block.batch_id;
        if let Err(err) = inner.lock().await.accept_block(block).await {
            error!(target: COMPONENT, batch_id, %err, "Processing block failed, synchronizer halted");
            return Err(err);
        }
    }
}
