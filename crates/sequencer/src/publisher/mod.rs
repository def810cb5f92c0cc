use std::{future::Future, sync::Arc, time::Duration};

use rollup_node_objects::{
    Address, BatchProofData, BatchRecord, ChainTxHash, RollupTransaction, Timestamp,
};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::{
    chain::{ChainClient, ReceiptStatus, TxReceipt},
    errors::{ChainError, PublishError},
    metrics::Metrics,
    store::RecordStore,
    InterruptToken, COMPONENT, DEFAULT_FEE_LIMIT, DEFAULT_PUBLISH_INTERVAL,
    DEFAULT_RECEIPT_POLL_INTERVAL, DEFAULT_RETRY_BACKOFF,
};

pub mod signer;

use self::signer::{signing_message, ProviderSigner};


// PUBLISHER OPTIONS
// ================================================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublisherOptions {
    /// Minimum time between the creation of the last settled batch and publishing the next one.
    pub publish_interval: Duration,

    /// Wait before retrying a failed chain call, and before resubmitting a reverted batch.
    pub retry_backoff: Duration,

    /// Wait between two polls of a pending receipt.
    pub receipt_poll_interval: Duration,

    /// Highest fee the provider is willing to pay for a batch, signed along with the batch.
    pub fee_limit: u64,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
            fee_limit: DEFAULT_FEE_LIMIT,
        }
    }
}

// BATCH PUBLISHER
// ================================================================================================

/// Publishes batches to the rollup contract and follows them until they are mined.
///
/// The publisher keeps no state across calls. Cancellation goes through the [`InterruptToken`]
/// passed to [`BatchPublisher::publish_batch`]: requesting it wakes any wait of the call in
/// progress, which then returns `false`. The token must be reset before it is used again.
pub struct BatchPublisher<R> {
    records: Arc<R>,
    chain: Arc<dyn ChainClient>,
    signer: ProviderSigner,
    metrics: Arc<dyn Metrics>,
    options: PublisherOptions,
}

impl<R: RecordStore> BatchPublisher<R> {
    pub fn new(
        records: Arc<R>,
        chain: Arc<dyn ChainClient>,
        signer: ProviderSigner,
        metrics: Arc<dyn Metrics>,
        options: PublisherOptions,
    ) -> Self {
        Self { records, chain, signer, metrics, options }
    }

    pub fn options(&self) -> &PublisherOptions {
        &self.options
    }

    /// Publishes `batch` and waits until its transaction is mined.
    ///
    /// Returns `true` once the batch transaction succeeded. Returns `false` if the call was
    /// interrupted or another batch with the same id settled first. A `false` result does not
    /// mean the transaction was never mined, only that it is no longer followed.
    ///
    /// Chain errors are retried after the backoff until the call succeeds or is interrupted.
    /// Record store failures abort the call.
    #[instrument(target = COMPONENT, skip_all, err, fields(batch_id = batch.id))]
    pub async fn publish_batch(
        &self,
        batch: &BatchRecord,
        interrupt: &InterruptToken,
    ) -> Result<bool, PublishError> {
        if interrupt.is_requested() {
            return Err(PublishError::InterruptNotCleared);
        }

        if !self.wait_for_publish_interval(interrupt).await? {
            return Ok(false);
        }

        let Some(status) = self
            .retry("query chain status", interrupt, || self.chain.get_chain_status())
            .await
        else {
            return Ok(false);
        };
        let payload = self.create_payload(batch, &status.fee_distributor)?;

        info!(
            target: COMPONENT,
            batch_id = batch.id,
            batch_hash = %batch.batch_hash(),
            num_txs = batch.proof.txs.len(),
            payload_size = payload.len(),
            "Publishing batch"
        );

        loop {
            // Measures the attempt which gets mined, not the pacing or earlier reverted attempts.
            let started = Instant::now();

            let Some(tx_hash) = self
                .retry("submit batch transaction", interrupt, || {
                    self.chain.submit_transaction(payload.clone())
                })
                .await
            else {
                return Ok(false);
            };

            if !self.records.confirm_sent(batch.id, tx_hash).await? {
                warn!(target: COMPONENT, batch_id = batch.id, %tx_hash, "Sent batch has no record");
            }

            let Some(receipt) = self.wait_for_receipt(tx_hash, interrupt).await else {
                return Ok(false);
            };

            if receipt.success {
                let duration = started.elapsed();
                self.metrics.publish_duration(batch.id, duration);
                info!(
                    target: COMPONENT,
                    batch_id = batch.id,
                    %tx_hash,
                    gas_used = receipt.gas_used,
                    duration_ms = duration.as_millis(),
                    "Batch transaction mined"
                );
                return Ok(true);
            }

            let Some(status) = self
                .retry("query chain status", interrupt, || self.chain.get_chain_status())
                .await
            else {
                return Ok(false);
            };

            if status.next_batch_id > batch.id {
                info!(
                    target: COMPONENT,
                    batch_id = batch.id,
                    next_batch_id = status.next_batch_id,
                    "Another batch settled first, abandoning publish"
                );
                return Ok(false);
            }

            warn!(
                target: COMPONENT,
                batch_id = batch.id,
                %tx_hash,
                backoff_secs = self.options.retry_backoff.as_secs(),
                "Batch transaction failed, resubmitting after backoff"
            );
            if !interrupt.sleep(self.options.retry_backoff).await {
                return Ok(false);
            }
        }
    }

    // HELPER METHODS
    // --------------------------------------------------------------------------------------------

    /// Waits until the publish interval has passed since the last settled batch was created.
    ///
    /// Returns `false` if interrupted.
    async fn wait_for_publish_interval(
        &self,
        interrupt: &InterruptToken,
    ) -> Result<bool, PublishError> {
        if self.options.publish_interval.is_zero() {
            return Ok(true);
        }

        let Some(last) = self.records.settled_batches(0, true, 1).await?.into_iter().next() else {
            return Ok(true);
        };

        let elapsed = Timestamp::now().saturating_duration_since(last.created);
        let remaining = self.options.publish_interval.saturating_sub(elapsed);
        if remaining.is_zero() {
            return Ok(true);
        }

        info!(
            target: COMPONENT,
            last_batch_id = last.id,
            wait_ms = remaining.as_millis(),
            "Waiting for the publish interval"
        );

        Ok(interrupt.sleep(remaining).await)
    }

    /// Encodes the rollup transaction of `batch` signed by the provider.
    fn create_payload(
        &self,
        batch: &BatchRecord,
        fee_distributor: &Address,
    ) -> Result<Vec<u8>, PublishError> {
        let proof = BatchProofData::decode(&batch.proof.proof_data, &batch.viewing_keys)?;
        let provider = self.signer.address();

        let message =
            signing_message(&proof.public_inputs(), &provider, self.options.fee_limit, fee_distributor);
        let provider_signature = self.signer.sign(&message)?;

        let tx = RollupTransaction {
            proof_data: batch.proof.proof_data.clone(),
            viewing_keys: batch
                .proof
                .txs
                .iter()
                .flat_map(|tx| tx.viewing_keys())
                .cloned()
                .collect(),
            signatures: batch.proof.txs.iter().filter_map(|tx| tx.signature.clone()).collect(),
            provider_signature,
            provider,
            fee_receiver: provider,
            fee_limit: self.options.fee_limit,
        };

        Ok(tx.to_bytes())
    }

    /// Polls the receipt of `tx_hash` until it is mined. Returns `None` if interrupted.
    async fn wait_for_receipt(
        &self,
        tx_hash: ChainTxHash,
        interrupt: &InterruptToken,
    ) -> Option<TxReceipt> {
        loop {
            match self
                .retry("fetch receipt", interrupt, || self.chain.get_receipt(tx_hash))
                .await?
            {
                ReceiptStatus::Mined(receipt) => return Some(receipt),
                ReceiptStatus::Pending => {
                    debug!(target: COMPONENT, %tx_hash, "Receipt pending");
                    if !interrupt.sleep(self.options.receipt_poll_interval).await {
                        return None;
                    }
                },
            }
        }
    }

    /// Calls `operation` until it succeeds, sleeping for the backoff after every failure.
    ///
    /// Returns `None` once the interrupt is requested.
    async fn retry<T, F, Fut>(
        &self,
        operation: &'static str,
        interrupt: &InterruptToken,
        mut call: F,
    ) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        loop {
            if interrupt.is_requested() {
                return None;
            }

            match call().await {
                Ok(value) => return Some(value),
                Err(err) => {
                    warn!(
                        target: COMPONENT,
                        operation,
                        %err,
                        backoff_secs = self.options.retry_backoff.as_secs(),
                        "Chain call failed, retrying after backoff"
                    );
                    if !interrupt.sleep(self.options.retry_backoff).await {
                        return None;
                    }
                },
            }
        }
    }
}
