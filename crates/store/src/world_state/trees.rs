use std::collections::BTreeMap;

use miden_crypto::{
    hash::rpo::{Rpo256, RpoDigest},
    merkle::{LeafIndex, MerkleError, SimpleSmt, Smt},
    Word,
};
use rollup_node_objects::Root;

use super::{LeafKey, LeafValue, TreeId};
use crate::errors::WorldStateError;

/// Depth of the data tree, two leaves per transaction slot.
pub const DATA_TREE_DEPTH: u8 = 48;

/// Depth of the root-history tree, one leaf per batch.
pub const ROOT_TREE_DEPTH: u8 = 40;

fn to_root(digest: RpoDigest) -> Root {
    Root::new(digest.as_bytes())
}

fn leaf_word(value: &LeafValue) -> Word {
    Rpo256::hash(value.as_bytes()).into()
}

// INDEXED TREE
// ================================================================================================

/// Sparse Merkle tree addressed by a leaf position.
#[derive(Clone, Debug)]
struct IndexedTree<const DEPTH: u8> {
    smt: SimpleSmt<DEPTH>,
    leaves: BTreeMap<u64, LeafValue>,
}

impl<const DEPTH: u8> IndexedTree<DEPTH> {
    fn new() -> Result<Self, MerkleError> {
        Ok(Self { smt: SimpleSmt::new()?, leaves: BTreeMap::new() })
    }

    fn insert(&mut self, index: u64, value: LeafValue) -> Result<(), MerkleError> {
        self.smt.insert(LeafIndex::<DEPTH>::new(index)?, leaf_word(&value));
        self.leaves.insert(index, value);
        Ok(())
    }

    fn get(&self, index: u64) -> Option<LeafValue> {
        self.leaves.get(&index).copied()
    }

    /// One past the highest written position.
    fn size(&self) -> u64 {
        self.leaves.last_key_value().map_or(0, |(index, _)| index + 1)
    }

    fn accepts(index: u64) -> bool {
        index < 1 << DEPTH
    }
}

// KEYED TREE
// ================================================================================================

/// Sparse Merkle tree addressed by an arbitrary 256-bit key.
#[derive(Clone, Debug)]
struct KeyedTree {
    smt: Smt,
    leaves: BTreeMap<LeafKey, LeafValue>,
}

impl KeyedTree {
    fn new() -> Self {
        Self { smt: Smt::new(), leaves: BTreeMap::new() }
    }

    fn insert(&mut self, key: LeafKey, value: LeafValue) {
        self.smt.insert(Rpo256::hash(key.as_bytes()), leaf_word(&value));
        self.leaves.insert(key, value);
    }

    fn get(&self, key: &LeafKey) -> Option<LeafValue> {
        self.leaves.get(key).copied()
    }

    fn size(&self) -> u64 {
        self.leaves.len() as u64
    }
}

// TREES
// ================================================================================================

/// The data, nullifier and root-history trees.
#[derive(Clone, Debug)]
pub(super) struct Trees {
    data: IndexedTree<DATA_TREE_DEPTH>,
    nullifiers: KeyedTree,
    root_history: IndexedTree<ROOT_TREE_DEPTH>,
}

impl Trees {
    pub fn new() -> Result<Self, MerkleError> {
        Ok(Self {
            data: IndexedTree::new()?,
            nullifiers: KeyedTree::new(),
            root_history: IndexedTree::new()?,
        })
    }

    pub fn put(
        &mut self,
        tree: TreeId,
        key: LeafKey,
        value: LeafValue,
    ) -> Result<(), WorldStateError> {
        let out_of_range = || WorldStateError::IndexOutOfRange { tree, key };

        match tree {
            TreeId::Data => {
                let index = key
                    .to_index()
                    .filter(|index| IndexedTree::<DATA_TREE_DEPTH>::accepts(*index))
                    .ok_or_else(out_of_range)?;
                self.data.insert(index, value)?;
            },
            TreeId::Nullifier => self.nullifiers.insert(key, value),
            TreeId::RootHistory => {
                let index = key
                    .to_index()
                    .filter(|index| IndexedTree::<ROOT_TREE_DEPTH>::accepts(*index))
                    .ok_or_else(out_of_range)?;
                self.root_history.insert(index, value)?;
            },
        }

        Ok(())
    }

    pub fn get(&self, tree: TreeId, key: &LeafKey) -> Option<LeafValue> {
        match tree {
            TreeId::Data => key.to_index().and_then(|index| self.data.get(index)),
            TreeId::Nullifier => self.nullifiers.get(key),
            TreeId::RootHistory => key.to_index().and_then(|index| self.root_history.get(index)),
        }
    }

    pub fn root(&self, tree: TreeId) -> Root {
        match tree {
            TreeId::Data => to_root(self.data.smt.root()),
            TreeId::Nullifier => to_root(self.nullifiers.smt.root()),
            TreeId::RootHistory => to_root(self.root_history.smt.root()),
        }
    }

    pub fn size(&self, tree: TreeId) -> u64 {
        match tree {
            TreeId::Data => self.data.size(),
            TreeId::Nullifier => self.nullifiers.size(),
            TreeId::RootHistory => self.root_history.size(),
        }
    }
}
