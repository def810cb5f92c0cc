pub mod batch;
pub mod block;
pub mod digest;
pub mod errors;
pub mod records;
pub mod rollup_tx;
pub mod timestamp;
pub mod viewing_key;

mod codec;

pub use batch::{BatchProofData, InnerTransaction, StateRoots};
pub use block::ConfirmedBlock;
pub use digest::{
    keccak256, Address, BatchHash, ChainTxHash, NoteCommitment, Nullifier, Root, TransactionId,
};
pub use records::{BatchRecord, ProofRecord, TransactionRecord};
pub use rollup_tx::RollupTransaction;
pub use timestamp::Timestamp;
pub use viewing_key::ViewingKey;
