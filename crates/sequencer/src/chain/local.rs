use std::collections::BTreeMap;

use async_trait::async_trait;
use rollup_node_objects::{
    keccak256, Address, BatchProofData, ChainTxHash, ConfirmedBlock, RollupTransaction,
    StateRoots, Timestamp, ViewingKey,
};
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    Mutex,
};
use tracing::{info, instrument, warn};

use super::{ChainClient, ChainStatus, ReceiptStatus, TxReceipt};
use crate::{
    errors::ChainError,
    publisher::signer::{recover_address, signing_message},
    COMPONENT,
};

/// Base cost of a chain transaction.
const BASE_GAS: u64 = 21_000;

/// Cost of one byte of transaction payload.
const GAS_PER_BYTE: u64 = 16;

/// An in-process chain which settles batches as soon as they are submitted.
///
/// A submitted batch settles if it carries the next batch id, starts from the roots the previous
/// batch ended with and is signed by the provider it names. Otherwise its transaction is mined
/// with a failed receipt, the way the rollup contract reverts.
pub struct LocalChain {
    fee_distributor: Address,
    gas_price: u64,
    inner: Mutex<LocalChainState>,
}

#[derive(Default)]
struct LocalChainState {
    blocks: Vec<ConfirmedBlock>,
    roots: Option<StateRoots>,
    receipts: BTreeMap<ChainTxHash, TxReceipt>,
    subscribers: Vec<UnboundedSender<ConfirmedBlock>>,
}

impl LocalChain {
    pub fn new(fee_distributor: Address, gas_price: u64) -> Self {
        Self {
            fee_distributor,
            gas_price,
            inner: Mutex::new(LocalChainState::default()),
        }
    }

    /// Checks a submitted transaction the way the rollup contract would.
    fn verify(
        &self,
        state: &LocalChainState,
        tx: &RollupTransaction,
        batch: &BatchProofData,
    ) -> Result<(), String> {
        let next_batch_id = state.blocks.len() as u32;
        if batch.batch_id != next_batch_id {
            return Err(format!("expected batch {next_batch_id}, got {}", batch.batch_id));
        }

        if state.roots.is_some_and(|roots| roots != batch.old_roots) {
            return Err("batch does not start from the current roots".to_string());
        }

        let message = signing_message(
            &batch.public_inputs(),
            &tx.fee_receiver,
            tx.fee_limit,
            &self.fee_distributor,
        );
        match recover_address(&message, &tx.provider_signature) {
            Ok(signer) if signer == tx.provider => Ok(()),
            Ok(signer) => Err(format!("signed by {signer} instead of {}", tx.provider)),
            Err(err) => Err(format!("invalid provider signature: {err}")),
        }
    }
}

#[async_trait]
impl ChainClient for LocalChain {
    async fn get_blocks(&self, from: u32) -> Result<Vec<ConfirmedBlock>, ChainError> {
        let state = self.inner.lock().await;
        Ok(state.blocks.iter().skip(from as usize).cloned().collect())
    }

    async fn subscribe(&self, from: u32) -> Result<UnboundedReceiver<ConfirmedBlock>, ChainError> {
        let mut state = self.inner.lock().await;
        let (sender, receiver) = unbounded_channel();

        for block in state.blocks.iter().skip(from as usize) {
            sender
                .send(block.clone())
                .map_err(|err| ChainError::SubscriptionFailed(err.to_string()))?;
        }
        state.subscribers.push(sender);

        Ok(receiver)
    }

    async fn unsubscribe(&self) {
        self.inner.lock().await.subscribers.clear();
    }

    async fn get_chain_status(&self) -> Result<ChainStatus, ChainError> {
        let state = self.inner.lock().await;
        Ok(ChainStatus {
            next_batch_id: state.blocks.len() as u32,
            fee_distributor: self.fee_distributor,
        })
    }

    #[instrument(target = COMPONENT, skip_all, err)]
    async fn submit_transaction(&self, payload: Vec<u8>) -> Result<ChainTxHash, ChainError> {
        let tx = RollupTransaction::from_bytes(&payload)
            .map_err(|err| ChainError::SubmissionFailed(err.to_string()))?;
        let viewing_keys_data = ViewingKey::concat(&tx.viewing_keys);
        let batch = BatchProofData::decode(&tx.proof_data, &viewing_keys_data)
            .map_err(|err| ChainError::SubmissionFailed(err.to_string()))?;

        let now = Timestamp::now();
        let gas_used = BASE_GAS + GAS_PER_BYTE * payload.len() as u64;

        let mut state = self.inner.lock().await;

        // Every submission is a distinct transaction, even when the payload repeats.
        let nonce = state.receipts.len() as u64;
        let tx_hash =
            ChainTxHash::new(keccak256([payload.as_slice(), &nonce.to_be_bytes()].concat()));

        let success = match self.verify(&state, &tx, &batch) {
            Ok(()) => {
                let block = ConfirmedBlock {
                    batch_id: batch.batch_id,
                    proof_data: tx.proof_data,
                    viewing_keys_data,
                    tx_hash,
                    gas_used,
                    gas_price: self.gas_price,
                    mined_at: now,
                    created_at: now,
                };

                info!(target: COMPONENT, batch_id = batch.batch_id, %tx_hash, "Batch settled");

                state.subscribers.retain(|subscriber| subscriber.send(block.clone()).is_ok());
                state.blocks.push(block);
                state.roots = Some(batch.new_roots);
                true
            },
            Err(reason) => {
                warn!(
                    target: COMPONENT,
                    batch_id = batch.batch_id,
                    %tx_hash,
                    %reason,
                    "Batch transaction reverted"
                );
                false
            },
        };

        state.receipts.insert(
            tx_hash,
            TxReceipt {
                success,
                gas_used,
                gas_price: self.gas_price,
                block_time: now,
            },
        );

        Ok(tx_hash)
    }

    async fn get_receipt(&self, tx_hash: ChainTxHash) -> Result<ReceiptStatus, ChainError> {
        let state = self.inner.lock().await;
        state
            .receipts
            .get(&tx_hash)
            .map(|receipt| ReceiptStatus::Mined(*receipt))
            .ok_or_else(|| ChainError::QueryFailed(format!("unknown transaction {tx_hash}")))
    }
}
