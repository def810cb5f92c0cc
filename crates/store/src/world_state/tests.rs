use std::sync::Arc;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use rollup_node_objects::Root;
use rollup_node_test_macro::enable_logging;

use super::*;

fn leaf(seed: u8) -> LeafValue {
    LeafValue::new([seed; 32])
}

async fn started() -> WorldStateDb {
    let mut state = WorldStateDb::ephemeral().unwrap();
    state.start().await.unwrap();
    state
}

#[tokio::test]
async fn writes_require_start() {
    let mut state = WorldStateDb::ephemeral().unwrap();

    assert_matches!(
        state.put(TreeId::Data, LeafKey::from(0u64), leaf(1)),
        Err(WorldStateError::NotStarted)
    );

    state.start().await.unwrap();
    state.put(TreeId::Data, LeafKey::from(0u64), leaf(1)).unwrap();

    state.stop();
    assert!(!state.has_staged_writes());
    assert_matches!(
        state.put(TreeId::Data, LeafKey::from(0u64), leaf(1)),
        Err(WorldStateError::NotStarted)
    );
}

#[tokio::test]
async fn empty_trees_have_distinct_default_roots() {
    let state = started().await;
    let roots = state.roots();

    assert_ne!(roots.data, Root::default());
    assert_ne!(roots.data, roots.nullifier);
    assert_eq!(roots, state.committed_roots());
}

#[tokio::test]
async fn rollback_restores_committed_roots() {
    let mut state = started().await;
    let before = state.roots();

    state.put(TreeId::Data, LeafKey::from(4u64), leaf(1)).unwrap();
    state.put(TreeId::Nullifier, LeafKey::new([9; 32]), NULLIFIER_MARKER).unwrap();

    assert!(state.has_staged_writes());
    assert_ne!(state.roots(), before);
    assert_eq!(state.committed_roots(), before);

    assert_eq!(state.rollback(), 2);
    assert_eq!(state.roots(), before);
    assert_eq!(state.get(TreeId::Data, &LeafKey::from(4u64)), None);
    assert_eq!(state.rollback(), 0);
}

#[tokio::test]
async fn sizes_follow_tree_kind() {
    let mut state = started().await;

    state.put(TreeId::Data, LeafKey::from(21u64), leaf(1)).unwrap();
    state.put(TreeId::Data, LeafKey::from(20u64), leaf(2)).unwrap();
    state.put(TreeId::Nullifier, LeafKey::new([7; 32]), NULLIFIER_MARKER).unwrap();
    state.put(TreeId::Nullifier, LeafKey::new([8; 32]), NULLIFIER_MARKER).unwrap();

    assert_eq!(state.size(TreeId::Data), 22);
    assert_eq!(state.size(TreeId::Nullifier), 2);
    assert_eq!(state.size(TreeId::RootHistory), 0);
}

#[tokio::test]
async fn root_does_not_depend_on_write_order() {
    let mut first = started().await;
    first.put(TreeId::Data, LeafKey::from(0u64), leaf(1)).unwrap();
    first.put(TreeId::Data, LeafKey::from(1u64), leaf(2)).unwrap();

    let mut second = started().await;
    second.put(TreeId::Data, LeafKey::from(1u64), leaf(2)).unwrap();
    second.put(TreeId::Data, LeafKey::from(0u64), leaf(1)).unwrap();

    assert_eq!(first.root(TreeId::Data), second.root(TreeId::Data));
}

#[tokio::test]
async fn spent_nullifier_cannot_be_spent_again() {
    let mut state = started().await;
    let key = LeafKey::new([5; 32]);

    state.put(TreeId::Nullifier, key, NULLIFIER_MARKER).unwrap();
    assert_matches!(
        state.put(TreeId::Nullifier, key, NULLIFIER_MARKER),
        Err(WorldStateError::NullifierAlreadySpent(spent)) if spent == key
    );

    state.commit().await.unwrap();
    assert_matches!(
        state.put(TreeId::Nullifier, key, NULLIFIER_MARKER),
        Err(WorldStateError::NullifierAlreadySpent(_))
    );
}

#[tokio::test]
async fn keys_outside_indexed_trees_are_rejected() {
    let mut state = started().await;

    let too_large = LeafKey::from(1u64 << DATA_TREE_DEPTH);
    assert_matches!(
        state.put(TreeId::Data, too_large, leaf(1)),
        Err(WorldStateError::IndexOutOfRange { tree: TreeId::Data, .. })
    );

    let wide = LeafKey::new([1; 32]);
    assert_matches!(
        state.put(TreeId::RootHistory, wide, leaf(1)),
        Err(WorldStateError::IndexOutOfRange { tree: TreeId::RootHistory, .. })
    );

    assert!(!state.has_staged_writes());
}

#[tokio::test]
#[enable_logging]
async fn committed_leaves_survive_restart() {
    let db = Arc::new(Db::open_in_memory().await.unwrap());

    let mut state = WorldStateDb::new(Arc::clone(&db)).unwrap();
    state.start().await.unwrap();
    state.put(TreeId::Data, LeafKey::from(20u64), leaf(1)).unwrap();
    state.put(TreeId::Nullifier, LeafKey::new([3; 32]), NULLIFIER_MARKER).unwrap();
    state
        .put(TreeId::RootHistory, LeafKey::from(6u64), state.root(TreeId::Data).into())
        .unwrap();

    assert_eq!(state.commit().await.unwrap(), 3);
    let committed = state.committed_roots();
    assert_eq!(state.roots(), committed);

    // Staged but never committed.
    state.put(TreeId::Data, LeafKey::from(22u64), leaf(2)).unwrap();

    let mut restarted = WorldStateDb::new(db).unwrap();
    restarted.start().await.unwrap();

    assert_eq!(restarted.roots(), committed);
    assert_eq!(restarted.size(TreeId::Data), 21);
    assert_eq!(restarted.get(TreeId::Data, &LeafKey::from(20u64)), Some(leaf(1)));
    assert_eq!(restarted.get(TreeId::Data, &LeafKey::from(22u64)), None);
}
