use std::{collections::VecDeque, sync::Mutex};

use async_trait::async_trait;
use rollup_node_objects::{keccak256, Address, ChainTxHash, ConfirmedBlock, Timestamp};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::{
    chain::{ChainClient, ChainStatus, ReceiptStatus, TxReceipt},
    errors::ChainError,
};

#[derive(Default)]
struct MockChainState {
    blocks: Vec<ConfirmedBlock>,
    next_batch_id: Option<u32>,
    submission_failures: usize,
    block_fetch_failures: usize,
    receipts: VecDeque<ReceiptStatus>,
    submitted: Vec<Vec<u8>>,
    subscribers: Vec<UnboundedSender<ConfirmedBlock>>,
}

/// A scriptable chain.
///
/// Receipts are served from a queue and default to a successful receipt once it is empty. The
/// next batch id defaults to the number of known blocks.
pub struct MockChain {
    fee_distributor: Address,
    state: Mutex<MockChainState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            fee_distributor: Address::new([0xfd; 20]),
            state: Mutex::default(),
        }
    }

    pub fn with_blocks(blocks: Vec<ConfirmedBlock>) -> Self {
        let chain = Self::new();
        chain.state.lock().unwrap().blocks = blocks;
        chain
    }

    pub fn fee_distributor(&self) -> Address {
        self.fee_distributor
    }

    pub fn fail_submissions(&self, count: usize) {
        self.state.lock().unwrap().submission_failures = count;
    }

    pub fn fail_block_fetches(&self, count: usize) {
        self.state.lock().unwrap().block_fetch_failures = count;
    }

    pub fn push_receipt(&self, receipt: ReceiptStatus) {
        self.state.lock().unwrap().receipts.push_back(receipt);
    }

    pub fn set_next_batch_id(&self, next_batch_id: u32) {
        self.state.lock().unwrap().next_batch_id = Some(next_batch_id);
    }

    /// Confirms a block and streams it to the subscribers.
    pub fn push_block(&self, block: ConfirmedBlock) {
        let mut state = self.state.lock().unwrap();
        state.subscribers.retain(|subscriber| subscriber.send(block.clone()).is_ok());
        state.blocks.push(block);
    }

    /// Streams a block to the subscribers without confirming it, e.g. a redelivery.
    pub fn deliver(&self, block: ConfirmedBlock) {
        let mut state = self.state.lock().unwrap();
        state.subscribers.retain(|subscriber| subscriber.send(block.clone()).is_ok());
    }

    pub fn submitted(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn num_subscribers(&self) -> usize {
        self.state.lock().unwrap().subscribers.len()
    }
}

pub fn mined_receipt(success: bool) -> ReceiptStatus {
    ReceiptStatus::Mined(TxReceipt {
        success,
        gas_used: 60_000,
        gas_price: 10,
        block_time: Timestamp::now(),
    })
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_blocks(&self, from: u32) -> Result<Vec<ConfirmedBlock>, ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.block_fetch_failures > 0 {
            state.block_fetch_failures -= 1;
            return Err(ChainError::BlockFetchFailed { from, reason: "node unreachable".into() });
        }

        Ok(state.blocks.iter().filter(|block| block.batch_id >= from).cloned().collect())
    }

    async fn subscribe(&self, from: u32) -> Result<UnboundedReceiver<ConfirmedBlock>, ChainError> {
        let mut state = self.state.lock().unwrap();
        let (sender, receiver) = unbounded_channel();
        for block in state.blocks.iter().filter(|block| block.batch_id >= from) {
            sender.send(block.clone()).unwrap();
        }
        state.subscribers.push(sender);

        Ok(receiver)
    }

    async fn unsubscribe(&self) {
        self.state.lock().unwrap().subscribers.clear();
    }

    async fn get_chain_status(&self) -> Result<ChainStatus, ChainError> {
        let state = self.state.lock().unwrap();
        Ok(ChainStatus {
            next_batch_id: state.next_batch_id.unwrap_or(state.blocks.len() as u32),
            fee_distributor: self.fee_distributor,
        })
    }

    async fn submit_transaction(&self, payload: Vec<u8>) -> Result<ChainTxHash, ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.submission_failures > 0 {
            state.submission_failures -= 1;
            return Err(ChainError::SubmissionFailed("gas price spike".into()));
        }

        let nonce = state.submitted.len() as u64;
        let tx_hash =
            ChainTxHash::new(keccak256([payload.as_slice(), &nonce.to_be_bytes()].concat()));
        state.submitted.push(payload);

        Ok(tx_hash)
    }

    async fn get_receipt(&self, _tx_hash: ChainTxHash) -> Result<ReceiptStatus, ChainError> {
        let mut state = self.state.lock().unwrap();
        Ok(state.receipts.pop_front().unwrap_or_else(|| mined_receipt(true)))
    }
}
