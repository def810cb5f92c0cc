use crate::{
    codec::ByteReader,
    digest::{keccak256, BatchHash, NoteCommitment, Nullifier, Root, TransactionId, DIGEST_SIZE},
    errors::ConversionError,
    viewing_key::{ViewingKey, VIEWING_KEY_SIZE},
};

// CONSTANTS
// ================================================================================================

/// Size of an encoded [`InnerTransaction`]: padding flag, two notes and two nullifiers.
pub const INNER_TX_SIZE: usize = 1 + 4 * DIGEST_SIZE;

/// Size of the batch header: three `u32` fields, six roots and the transaction count.
pub const BATCH_HEADER_SIZE: usize = 3 * 4 + 6 * DIGEST_SIZE + 4;

/// Upper bound on the number of transactions a batch may declare.
pub const MAX_BATCH_TRANSACTIONS: usize = 4096;

const PADDING_FLAG: u8 = 1;
const TRANSFER_FLAG: u8 = 0;

// INNER TRANSACTION
// ================================================================================================

/// The public part of a single transaction proof aggregated into a batch.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InnerTransaction {
    pub is_padding: bool,
    pub note_1: NoteCommitment,
    pub note_2: NoteCommitment,
    pub nullifier_1: Nullifier,
    pub nullifier_2: Nullifier,
}

impl InnerTransaction {
    pub fn new(notes: [NoteCommitment; 2], nullifiers: [Nullifier; 2]) -> Self {
        let [note_1, note_2] = notes;
        let [nullifier_1, nullifier_2] = nullifiers;
        Self {
            is_padding: false,
            note_1,
            note_2,
            nullifier_1,
            nullifier_2,
        }
    }

    /// The filler transaction used to bring a batch up to its size. It has zero notes and
    /// nullifiers, and none of its nullifiers are ever written to the nullifier tree.
    pub fn padding() -> Self {
        Self {
            is_padding: true,
            note_1: NoteCommitment::default(),
            note_2: NoteCommitment::default(),
            nullifier_1: Nullifier::default(),
            nullifier_2: Nullifier::default(),
        }
    }

    pub fn id(&self) -> TransactionId {
        TransactionId::new(keccak256(self.to_bytes()))
    }

    pub fn notes(&self) -> [NoteCommitment; 2] {
        [self.note_1, self.note_2]
    }

    pub fn nullifiers(&self) -> [Nullifier; 2] {
        [self.nullifier_1, self.nullifier_2]
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(INNER_TX_SIZE);
        self.write_into(&mut out);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConversionError> {
        let mut reader = ByteReader::new(bytes);
        let tx = Self::read_from(&mut reader)?;
        reader.finish()?;
        Ok(tx)
    }

    fn write_into(&self, out: &mut Vec<u8>) {
        out.push(if self.is_padding { PADDING_FLAG } else { TRANSFER_FLAG });
        out.extend_from_slice(self.note_1.as_bytes());
        out.extend_from_slice(self.note_2.as_bytes());
        out.extend_from_slice(self.nullifier_1.as_bytes());
        out.extend_from_slice(self.nullifier_2.as_bytes());
    }

    fn read_from(reader: &mut ByteReader<'_>) -> Result<Self, ConversionError> {
        let is_padding = match reader.read_u8()? {
            PADDING_FLAG => true,
            TRANSFER_FLAG => false,
            other => return Err(ConversionError::InvalidPaddingFlag(other)),
        };

        Ok(Self {
            is_padding,
            note_1: reader.read_array::<DIGEST_SIZE>()?.into(),
            note_2: reader.read_array::<DIGEST_SIZE>()?.into(),
            nullifier_1: reader.read_array::<DIGEST_SIZE>()?.into(),
            nullifier_2: reader.read_array::<DIGEST_SIZE>()?.into(),
        })
    }
}

// STATE ROOTS
// ================================================================================================

/// Roots of the three world-state trees at one point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StateRoots {
    pub data: Root,
    pub nullifier: Root,
    pub root_history: Root,
}

// BATCH PROOF DATA
// ================================================================================================

/// Decoded content of a batch proof together with the viewing keys of its transactions.
///
/// Encoding of the proof bytes (all integers big-endian):
///
/// ```text
/// batch_id u32 | batch_size u32 | data_start_index u32
/// | old data root | new data root | old nullifier root | new nullifier root
/// | old root-history root | new root-history root | num_txs u32
/// | num_txs x inner transaction | opaque proof
/// ```
///
/// Everything but the opaque proof forms the public inputs, whose Keccak-256 is the batch hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchProofData {
    pub batch_id: u32,
    /// Number of transaction slots of the batch, padding included.
    pub batch_size: u32,
    /// Transaction slot of the data tree where this batch starts writing notes.
    pub data_start_index: u32,
    pub old_roots: StateRoots,
    pub new_roots: StateRoots,
    pub transactions: Vec<InnerTransaction>,
    /// Two keys per non-padding transaction, in transaction order.
    pub viewing_keys: Vec<ViewingKey>,
    pub proof: Vec<u8>,
}

impl BatchProofData {
    /// Decodes the proof bytes and the viewing-key payload of a batch.
    pub fn decode(proof_data: &[u8], viewing_keys_data: &[u8]) -> Result<Self, ConversionError> {
        let mut reader = ByteReader::new(proof_data);

        let batch_id = reader.read_u32()?;
        let batch_size = reader.read_u32()?;
        let data_start_index = reader.read_u32()?;
        let old_data = reader.read_array::<DIGEST_SIZE>()?.into();
        let new_data = reader.read_array::<DIGEST_SIZE>()?.into();
        let old_nullifier = reader.read_array::<DIGEST_SIZE>()?.into();
        let new_nullifier = reader.read_array::<DIGEST_SIZE>()?.into();
        let old_root_history = reader.read_array::<DIGEST_SIZE>()?.into();
        let new_root_history = reader.read_array::<DIGEST_SIZE>()?.into();

        let num_txs = reader.read_len()?;
        if num_txs > MAX_BATCH_TRANSACTIONS {
            return Err(ConversionError::TooManyTransactions {
                got: num_txs,
                max: MAX_BATCH_TRANSACTIONS,
            });
        }

        let transactions = (0..num_txs)
            .map(|_| InnerTransaction::read_from(&mut reader))
            .collect::<Result<Vec<_>, _>>()?;
        let proof = reader.read_remaining().to_vec();

        let non_padding = transactions.iter().filter(|tx| !tx.is_padding).count();
        let expected = non_padding * 2 * VIEWING_KEY_SIZE;
        if viewing_keys_data.len() != expected {
            return Err(ConversionError::InvalidViewingKeysLength {
                non_padding,
                expected,
                got: viewing_keys_data.len(),
            });
        }
        let viewing_keys = ViewingKey::split_all(viewing_keys_data)?;

        Ok(Self {
            batch_id,
            batch_size,
            data_start_index,
            old_roots: StateRoots {
                data: old_data,
                nullifier: old_nullifier,
                root_history: old_root_history,
            },
            new_roots: StateRoots {
                data: new_data,
                nullifier: new_nullifier,
                root_history: new_root_history,
            },
            transactions,
            viewing_keys,
            proof,
        })
    }

    /// The header and the inner transactions, the part of the proof which the chain verifies.
    pub fn public_inputs(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(BATCH_HEADER_SIZE + self.transactions.len() * INNER_TX_SIZE);

        out.extend_from_slice(&self.batch_id.to_be_bytes());
        out.extend_from_slice(&self.batch_size.to_be_bytes());
        out.extend_from_slice(&self.data_start_index.to_be_bytes());
        for (old, new) in [
            (self.old_roots.data, self.new_roots.data),
            (self.old_roots.nullifier, self.new_roots.nullifier),
            (self.old_roots.root_history, self.new_roots.root_history),
        ] {
            out.extend_from_slice(old.as_bytes());
            out.extend_from_slice(new.as_bytes());
        }
        out.extend_from_slice(&(self.transactions.len() as u32).to_be_bytes());
        for tx in &self.transactions {
            tx.write_into(&mut out);
        }

        out
    }

    /// Encodes the proof bytes, i.e. the public inputs followed by the opaque proof.
    pub fn to_proof_bytes(&self) -> Vec<u8> {
        let mut out = self.public_inputs();
        out.extend_from_slice(&self.proof);
        out
    }

    pub fn viewing_keys_bytes(&self) -> Vec<u8> {
        ViewingKey::concat(&self.viewing_keys)
    }

    pub fn batch_hash(&self) -> BatchHash {
        BatchHash::new(keccak256(self.public_inputs()))
    }

    pub fn num_non_padding(&self) -> usize {
        self.transactions.iter().filter(|tx| !tx.is_padding).count()
    }

    /// Non-padding transactions paired with their viewing keys.
    pub fn non_padding_transactions(
        &self,
    ) -> impl Iterator<Item = (&InnerTransaction, &[ViewingKey])> + '_ {
        self.transactions
            .iter()
            .filter(|tx| !tx.is_padding)
            .zip(self.viewing_keys.chunks_exact(2))
    }

    /// Data tree leaf holding the first note of the transaction at `position`; the second note
    /// sits right after it.
    pub fn data_leaf_index(&self, position: usize) -> u64 {
        data_leaf_index(self.data_start_index, position)
    }
}

/// Data tree leaf of the first note of the transaction at `position` of a batch starting at
/// transaction slot `data_start_index`.
pub fn data_leaf_index(data_start_index: u32, position: usize) -> u64 {
    2 * (u64::from(data_start_index) + position as u64)
}
