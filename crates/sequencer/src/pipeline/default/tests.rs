use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use rollup_node_objects::{BatchProofData, RollupTransaction, Timestamp, ViewingKey};
use rollup_node_store::{world_state::NULLIFIER_MARKER, LeafKey, TreeId};
use rollup_node_test_macro::enable_logging;
use tokio::sync::Mutex;

use super::*;
use crate::{
    pipeline::{LastPublished, PipelineHandle},
    publisher::{
        signer::{recover_address, signing_message, ProviderSigner},
        PublisherOptions,
    },
    test_utils::{
        mock_transaction, mock_tx_record, wait_until, MockChain, MockRecordStore,
        RecordingMetrics, RecordingState,
    },
};

struct TestPipeline {
    records: Arc<MockRecordStore>,
    state: Arc<Mutex<RecordingState>>,
    chain: Arc<MockChain>,
    signer: ProviderSigner,
    factory: DefaultPipelineFactory<MockRecordStore, RecordingState>,
}

impl TestPipeline {
    async fn new(options: DefaultPipelineOptions) -> Self {
        let records = Arc::new(MockRecordStore::new().await);
        let mut state = RecordingState::new();
        state.start().await.unwrap();
        let state = Arc::new(Mutex::new(state));
        let chain = Arc::new(MockChain::new());
        let signer = ProviderSigner::random();

        let publisher = Arc::new(BatchPublisher::new(
            Arc::clone(&records),
            chain.clone(),
            signer.clone(),
            Arc::new(RecordingMetrics::default()),
            PublisherOptions::default(),
        ));
        let factory = DefaultPipelineFactory::new(
            Arc::clone(&records),
            Arc::clone(&state),
            publisher,
            options,
        );

        Self { records, state, chain, signer, factory }
    }

    async fn add_pending(&self, seeds: impl IntoIterator<Item = u8>, created: Timestamp) {
        for seed in seeds {
            assert!(self.records.add_pending_transaction(mock_tx_record(seed, created)).await.unwrap());
        }
    }
}

fn options(max_batch_wait: Duration) -> DefaultPipelineOptions {
    DefaultPipelineOptions {
        batch_size: 4,
        build_interval: Duration::from_millis(10),
        max_batch_wait,
    }
}

#[tokio::test]
#[enable_logging]
async fn full_batch_is_built_staged_and_published() {
    let pipeline = TestPipeline::new(options(Duration::from_secs(3600))).await;
    pipeline.add_pending(1..=4, Timestamp::now()).await;
    let before = Timestamp::now();
    let last_published = LastPublished::default();

    let handle = PipelineHandle::spawn(pipeline.factory.create(), last_published.clone());
    wait_until(|| last_published.get().is_some()).await;

    assert_eq!(pipeline.records.sent().len(), 1);
    assert!(last_published.get() >= Some(before));

    let record = pipeline.records.batch(0).await.unwrap();
    let expected_ids: Vec<_> = (1..=4).map(|seed| mock_transaction(seed).id()).collect();
    assert_eq!(record.proof.txs.iter().map(|tx| tx.id).collect::<Vec<_>>(), expected_ids);
    assert_eq!(record.chain_tx_hash, Some(pipeline.records.sent()[0].1));
    assert!(!record.is_settled());

    let batch = BatchProofData::decode(&record.proof.proof_data, &record.viewing_keys).unwrap();
    assert_eq!(batch.batch_id, 0);
    assert_eq!(batch.data_start_index, 0);
    {
        let state = pipeline.state.lock().await;
        assert!(state.has_staged_writes());
        assert_eq!(state.roots(), batch.new_roots);
        assert_ne!(state.committed_roots(), batch.new_roots);
    }

    let submitted = pipeline.chain.submitted();
    let tx = RollupTransaction::from_bytes(&submitted[0]).unwrap();
    assert_eq!(tx.proof_data, record.proof.proof_data);
    assert_eq!(ViewingKey::concat(&tx.viewing_keys), record.viewing_keys);
    assert_eq!(tx.provider, pipeline.signer.address());
    let message = signing_message(
        &batch.public_inputs(),
        &tx.fee_receiver,
        tx.fee_limit,
        &pipeline.chain.fee_distributor(),
    );
    assert_eq!(recover_address(&message, &tx.provider_signature).unwrap(), tx.provider);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn partial_batch_waits_for_flush() {
    let pipeline = TestPipeline::new(options(Duration::from_secs(3600))).await;
    pipeline.add_pending([7], Timestamp::now()).await;

    let handle = PipelineHandle::spawn(pipeline.factory.create(), LastPublished::default());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(pipeline.chain.submitted().is_empty());

    handle.flush_txs();
    wait_until(|| pipeline.chain.submitted().len() == 1).await;

    let record = pipeline.records.batch(0).await.unwrap();
    let batch = BatchProofData::decode(&record.proof.proof_data, &record.viewing_keys).unwrap();
    assert_eq!(batch.transactions.len(), 4);
    assert_eq!(batch.transactions[0], mock_transaction(7));
    assert!(batch.transactions[1..].iter().all(|tx| tx.is_padding));

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn old_transactions_are_batched_without_flush() {
    let pipeline = TestPipeline::new(options(Duration::from_secs(30))).await;
    let two_minutes_ago = Timestamp::from_millis(Timestamp::now().as_millis() - 120_000);
    pipeline.add_pending([1, 2], two_minutes_ago).await;

    let handle = PipelineHandle::spawn(pipeline.factory.create(), LastPublished::default());
    wait_until(|| pipeline.chain.submitted().len() == 1).await;

    let record = pipeline.records.batch(0).await.unwrap();
    assert_eq!(record.proof.txs.len(), 2);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn transactions_with_spent_nullifiers_are_dropped() {
    let pipeline = TestPipeline::new(options(Duration::from_secs(3600))).await;
    {
        let mut state = pipeline.state.lock().await;
        let spent = mock_transaction(1).nullifier_2;
        state.put(TreeId::Nullifier, LeafKey::from(spent), NULLIFIER_MARKER).unwrap();
        state.commit().await.unwrap();
    }
    pipeline.add_pending([1, 2], Timestamp::now()).await;

    let handle = PipelineHandle::spawn(pipeline.factory.create(), LastPublished::default());
    handle.flush_txs();
    wait_until(|| pipeline.chain.submitted().len() == 1).await;

    let record = pipeline.records.batch(0).await.unwrap();
    assert_eq!(
        record.proof.txs.iter().map(|tx| tx.id).collect::<Vec<_>>(),
        vec![mock_transaction(2).id()]
    );
    // The first transaction is gone, the second one is claimed by the batch.
    assert!(pipeline.records.pending_transactions(10).await.unwrap().is_empty());

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn stop_interrupts_publishing_and_keeps_writes_staged() {
    let pipeline = TestPipeline::new(options(Duration::from_secs(3600))).await;
    pipeline.chain.fail_submissions(usize::MAX);
    pipeline.add_pending(1..=4, Timestamp::now()).await;

    let handle = PipelineHandle::spawn(pipeline.factory.create(), LastPublished::default());
    wait_until(|| {
        pipeline.state.try_lock().is_ok_and(|state| state.has_staged_writes())
    })
    .await;

    tokio::time::timeout(Duration::from_secs(1), handle.stop()).await.unwrap().unwrap();

    assert!(pipeline.chain.submitted().is_empty());
    assert!(pipeline.records.sent().is_empty());
    assert!(pipeline.state.lock().await.has_staged_writes());
}
