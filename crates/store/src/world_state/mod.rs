//! The sequencer's mirror of the on-chain world state.
//!
//! Three sparse Merkle trees are kept in memory: the data tree holding note commitments, the
//! nullifier tree marking spent notes, and the root-history tree recording the data root after
//! every batch. Writes are staged on a copy of the trees until they are committed, which persists
//! the written leaves, or rolled back, which drops the copy.

use std::{
    collections::BTreeMap,
    fmt::{Debug, Display, Formatter},
    sync::Arc,
};

use rollup_node_objects::{NoteCommitment, Nullifier, Root, StateRoots};
use rollup_node_utils::formatting::format_hex;
use tracing::{debug, info, instrument};

use crate::{db::Db, errors::WorldStateError, COMPONENT};

mod trees;

pub use trees::{DATA_TREE_DEPTH, ROOT_TREE_DEPTH};
use trees::Trees;

// TREE IDENTIFIERS
// ================================================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TreeId {
    Data = 0,
    Nullifier = 1,
    RootHistory = 2,
}

impl TreeId {
    pub const ALL: [TreeId; 3] = [TreeId::Data, TreeId::Nullifier, TreeId::RootHistory];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|tree| tree.as_u8() == id)
    }
}

impl Display for TreeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeId::Data => f.write_str("data"),
            TreeId::Nullifier => f.write_str("nullifier"),
            TreeId::RootHistory => f.write_str("root-history"),
        }
    }
}

// LEAF KEYS AND VALUES
// ================================================================================================

/// A 256-bit big-endian leaf key.
///
/// Indexed trees only accept keys which fit into `u64`; the nullifier tree is keyed by the
/// nullifier itself.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LeafKey([u8; 32]);

impl LeafKey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the key as a leaf position if it fits into `u64`.
    pub fn to_index(&self) -> Option<u64> {
        let (high, low) = self.0.split_at(24);
        if high.iter().any(|byte| *byte != 0) {
            return None;
        }
        let mut index = [0u8; 8];
        index.copy_from_slice(low);
        Some(u64::from_be_bytes(index))
    }
}

impl From<u64> for LeafKey {
    fn from(index: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&index.to_be_bytes());
        Self(bytes)
    }
}

impl From<Nullifier> for LeafKey {
    fn from(nullifier: Nullifier) -> Self {
        Self(*nullifier.as_bytes())
    }
}

impl Display for LeafKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.to_index() {
            Some(index) => write!(f, "{index}"),
            None => f.write_str(&format_hex(self.0)),
        }
    }
}

impl Debug for LeafKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// A 32 byte leaf value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LeafValue([u8; 32]);

impl LeafValue {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<NoteCommitment> for LeafValue {
    fn from(note: NoteCommitment) -> Self {
        Self(*note.as_bytes())
    }
}

impl From<Root> for LeafValue {
    fn from(root: Root) -> Self {
        Self(*root.as_bytes())
    }
}

impl Debug for LeafValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_hex(self.0))
    }
}

/// Value stored for a spent nullifier: the integer one, big-endian.
pub const NULLIFIER_MARKER: LeafValue = {
    let mut bytes = [0u8; 32];
    bytes[31] = 1;
    LeafValue(bytes)
};

// WORLD STATE
// ================================================================================================

/// Writes which have not been committed yet, applied to a copy of the committed trees.
struct Staged {
    trees: Trees,
    writes: BTreeMap<(TreeId, LeafKey), LeafValue>,
}

/// The three world-state trees with staged writes and optional persistence.
pub struct WorldStateDb {
    db: Option<Arc<Db>>,
    committed: Trees,
    staged: Option<Staged>,
    started: bool,
}

impl WorldStateDb {
    /// World state persisted to the provided database. Leaves are loaded by [`Self::start`].
    pub fn new(db: Arc<Db>) -> Result<Self, WorldStateError> {
        Ok(Self {
            db: Some(db),
            committed: Trees::new()?,
            staged: None,
            started: false,
        })
    }

    /// World state which lives in memory only.
    pub fn ephemeral() -> Result<Self, WorldStateError> {
        Ok(Self {
            db: None,
            committed: Trees::new()?,
            staged: None,
            started: false,
        })
    }

    /// Loads the committed leaves from the database and accepts writes afterwards.
    #[instrument(target = COMPONENT, skip_all, err)]
    pub async fn start(&mut self) -> Result<(), WorldStateError> {
        let mut trees = Trees::new()?;
        if let Some(db) = &self.db {
            for (tree, key, value) in db.select_tree_leaves().await? {
                trees.put(tree, key, value)?;
            }
        }

        self.committed = trees;
        self.staged = None;
        self.started = true;

        info!(
            target: COMPONENT,
            data_size = self.committed.size(TreeId::Data),
            nullifier_size = self.committed.size(TreeId::Nullifier),
            root_history_size = self.committed.size(TreeId::RootHistory),
            "World state started",
        );

        Ok(())
    }

    /// Drops any staged writes and rejects writes until started again.
    pub fn stop(&mut self) {
        let discarded = self.rollback();
        self.started = false;
        info!(target: COMPONENT, discarded, "World state stopped");
    }

    /// Stages a leaf write.
    ///
    /// Writing the spent marker for a nullifier which is already marked as spent fails with
    /// [`WorldStateError::NullifierAlreadySpent`].
    pub fn put(
        &mut self,
        tree: TreeId,
        key: LeafKey,
        value: LeafValue,
    ) -> Result<(), WorldStateError> {
        if !self.started {
            return Err(WorldStateError::NotStarted);
        }

        if tree == TreeId::Nullifier
            && value == NULLIFIER_MARKER
            && self.get(tree, &key) == Some(NULLIFIER_MARKER)
        {
            return Err(WorldStateError::NullifierAlreadySpent(key));
        }

        let committed = &self.committed;
        let staged = self.staged.get_or_insert_with(|| Staged {
            trees: committed.clone(),
            writes: BTreeMap::new(),
        });
        staged.trees.put(tree, key, value)?;
        staged.writes.insert((tree, key), value);

        Ok(())
    }

    /// Reads a leaf, staged writes included.
    pub fn get(&self, tree: TreeId, key: &LeafKey) -> Option<LeafValue> {
        self.current().get(tree, key)
    }

    /// Root of the tree, staged writes included.
    pub fn root(&self, tree: TreeId) -> Root {
        self.current().root(tree)
    }

    /// Size of the tree, staged writes included.
    ///
    /// Indexed trees report one past their highest written position, the nullifier tree reports
    /// its number of entries.
    pub fn size(&self, tree: TreeId) -> u64 {
        self.current().size(tree)
    }

    pub fn roots(&self) -> StateRoots {
        StateRoots {
            data: self.root(TreeId::Data),
            nullifier: self.root(TreeId::Nullifier),
            root_history: self.root(TreeId::RootHistory),
        }
    }

    pub fn committed_roots(&self) -> StateRoots {
        StateRoots {
            data: self.committed.root(TreeId::Data),
            nullifier: self.committed.root(TreeId::Nullifier),
            root_history: self.committed.root(TreeId::RootHistory),
        }
    }

    pub fn has_staged_writes(&self) -> bool {
        self.staged.is_some()
    }

    /// Persists the staged writes and makes them the committed state.
    ///
    /// Returns the number of leaves written.
    #[instrument(target = COMPONENT, skip_all, err)]
    pub async fn commit(&mut self) -> Result<usize, WorldStateError> {
        let Some(staged) = self.staged.take() else {
            return Ok(0);
        };
        let count = staged.writes.len();

        if let Some(db) = &self.db {
            let leaves = staged
                .writes
                .iter()
                .map(|((tree, key), value)| (*tree, *key, *value))
                .collect();

            if let Err(err) = db.insert_tree_leaves(leaves).await {
                // Keep the writes staged so the caller can still decide what to do with them.
                self.staged = Some(staged);
                return Err(err.into());
            }
        }

        self.committed = staged.trees;
        debug!(target: COMPONENT, count, "Committed world state writes");

        Ok(count)
    }

    /// Drops the staged writes, restoring the last committed roots.
    ///
    /// Returns the number of leaves discarded.
    pub fn rollback(&mut self) -> usize {
        let discarded = self.staged.take().map_or(0, |staged| staged.writes.len());
        if discarded > 0 {
            debug!(target: COMPONENT, discarded, "Rolled back world state writes");
        }
        discarded
    }

    fn current(&self) -> &Trees {
        self.staged.as_ref().map_or(&self.committed, |staged| &staged.trees)
    }
}

#[cfg(test)]
mod tests;
