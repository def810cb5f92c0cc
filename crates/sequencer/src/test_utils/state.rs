use async_trait::async_trait;
use rollup_node_objects::{Root, StateRoots};
use rollup_node_store::{LeafKey, LeafValue, TreeId, WorldStateDb};

use crate::{errors::StoreError, store::MerkleStateStore};

/// An in-memory world state which logs every leaf write.
pub struct RecordingState {
    inner: WorldStateDb,
    puts: Vec<(TreeId, LeafKey, LeafValue)>,
}

impl RecordingState {
    pub fn new() -> Self {
        Self {
            inner: WorldStateDb::ephemeral().unwrap(),
            puts: Vec::new(),
        }
    }

    pub fn puts(&self) -> &[(TreeId, LeafKey, LeafValue)] {
        &self.puts
    }

    pub fn keys(&self, tree: TreeId) -> Vec<LeafKey> {
        self.puts.iter().filter(|(id, ..)| *id == tree).map(|(_, key, _)| *key).collect()
    }

    pub fn clear_puts(&mut self) {
        self.puts.clear();
    }

    pub fn committed_roots(&self) -> StateRoots {
        self.inner.committed_roots()
    }
}

#[async_trait]
impl MerkleStateStore for RecordingState {
    async fn start(&mut self) -> Result<(), StoreError> {
        Ok(self.inner.start().await?)
    }

    fn stop(&mut self) {
        self.inner.stop();
    }

    fn put(&mut self, tree: TreeId, key: LeafKey, value: LeafValue) -> Result<(), StoreError> {
        self.inner.put(tree, key, value)?;
        self.puts.push((tree, key, value));
        Ok(())
    }

    fn leaf(&self, tree: TreeId, key: &LeafKey) -> Option<LeafValue> {
        self.inner.get(tree, key)
    }

    fn root(&self, tree: TreeId) -> Root {
        self.inner.root(tree)
    }

    fn size(&self, tree: TreeId) -> u64 {
        self.inner.size(tree)
    }

    fn has_staged_writes(&self) -> bool {
        self.inner.has_staged_writes()
    }

    async fn commit(&mut self) -> Result<usize, StoreError> {
        Ok(self.inner.commit().await?)
    }

    fn rollback(&mut self) -> usize {
        self.inner.rollback()
    }
}
