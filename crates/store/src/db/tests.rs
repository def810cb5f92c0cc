#![allow(clippy::similar_names, reason = "naming dummy test values")]
#![allow(clippy::too_many_lines, reason = "test code can be long")]

use pretty_assertions::assert_eq;
use rollup_node_objects::{
    BatchHash, BatchRecord, ChainTxHash, InnerTransaction, NoteCommitment, Nullifier,
    ProofRecord, Root, Timestamp, TransactionRecord, ViewingKey,
};
use rusqlite::Connection;

use super::{migrations::apply_migrations, sql};
use crate::world_state::{LeafKey, LeafValue, TreeId};

fn create_db() -> Connection {
    let mut conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    apply_migrations(&mut conn).unwrap();
    conn
}

fn digest(seed: u8) -> [u8; 32] {
    [seed; 32]
}

fn mock_transaction(seed: u8, created: u64) -> TransactionRecord {
    let tx = InnerTransaction::new(
        [NoteCommitment::new(digest(seed)), NoteCommitment::new(digest(seed + 1))],
        [Nullifier::new(digest(seed + 2)), Nullifier::new(digest(seed + 3))],
    );
    let keys = [ViewingKey::new([seed; 176]), ViewingKey::new([seed + 1; 176])];

    TransactionRecord::new(&tx, keys, None, Timestamp::from_millis(created))
}

fn mock_batch(id: u32, hash_seed: u8, txs: Vec<TransactionRecord>) -> BatchRecord {
    BatchRecord {
        id,
        data_root: Root::new(digest(hash_seed + 100)),
        proof: ProofRecord {
            id: BatchHash::new(digest(hash_seed)),
            batch_size: 2,
            data_start_index: 10,
            proof_data: vec![hash_seed; 64],
            txs,
            created: Timestamp::from_millis(1_000),
        },
        viewing_keys: vec![hash_seed; 352],
        chain_tx_hash: None,
        gas_used: None,
        gas_price: None,
        mined: None,
        created: Timestamp::from_millis(2_000),
    }
}

fn add_batch(conn: &mut Connection, batch: &BatchRecord) {
    let transaction = conn.transaction().unwrap();
    sql::upsert_batch(&transaction, batch).unwrap();
    transaction.commit().unwrap();
}

fn mine(conn: &mut Connection, batch_id: u32) {
    let tx_hash = ChainTxHash::new(digest(200));
    assert!(sql::update_batch_mined(
        conn,
        batch_id,
        21_000,
        7,
        Timestamp::from_millis(3_000),
        &tx_hash
    )
    .unwrap());
}

#[test]
fn next_batch_id_follows_highest_settled_batch() {
    let mut conn = create_db();
    assert_eq!(sql::select_next_batch_id(&mut conn).unwrap(), 0);

    add_batch(&mut conn, &mock_batch(0, 1, vec![]));
    assert_eq!(sql::select_next_batch_id(&mut conn).unwrap(), 0);

    mine(&mut conn, 0);
    assert_eq!(sql::select_next_batch_id(&mut conn).unwrap(), 1);

    add_batch(&mut conn, &mock_batch(1, 2, vec![]));
    mine(&mut conn, 1);
    assert_eq!(sql::select_next_batch_id(&mut conn).unwrap(), 2);
}

#[test]
fn batch_round_trips_with_transactions_in_order() {
    let mut conn = create_db();
    let txs = vec![mock_transaction(30, 5), mock_transaction(10, 1)];
    let batch = mock_batch(4, 1, txs);

    add_batch(&mut conn, &batch);

    let stored = sql::select_batch(&mut conn, 4).unwrap().unwrap();
    assert_eq!(stored, batch);
    assert!(!stored.is_settled());

    let proof = sql::select_proof(&mut conn, &batch.batch_hash()).unwrap().unwrap();
    assert_eq!(proof, batch.proof);

    assert!(sql::select_batch(&mut conn, 5).unwrap().is_none());
}

#[test]
fn upsert_replaces_existing_batch() {
    let mut conn = create_db();
    add_batch(&mut conn, &mock_batch(0, 1, vec![mock_transaction(10, 1)]));

    let replacement = mock_batch(0, 2, vec![mock_transaction(20, 2)]);
    add_batch(&mut conn, &replacement);

    assert_eq!(sql::select_batch(&mut conn, 0).unwrap().unwrap(), replacement);
}

#[test]
fn settled_batches_are_paginated() {
    let mut conn = create_db();
    for id in 0..4 {
        add_batch(&mut conn, &mock_batch(id, id as u8 + 1, vec![]));
    }
    mine(&mut conn, 0);
    mine(&mut conn, 1);
    mine(&mut conn, 2);

    let ids = |batches: Vec<BatchRecord>| batches.iter().map(|b| b.id).collect::<Vec<_>>();

    assert_eq!(ids(sql::select_settled_batches(&mut conn, 0, false, 10).unwrap()), vec![0, 1, 2]);
    assert_eq!(ids(sql::select_settled_batches(&mut conn, 0, true, 1).unwrap()), vec![2]);
    assert_eq!(ids(sql::select_settled_batches(&mut conn, 1, true, 10).unwrap()), vec![1, 0]);

    let latest = sql::select_settled_batches(&mut conn, 0, true, 1).unwrap().remove(0);
    assert_eq!(latest.gas_used, Some(21_000));
    assert_eq!(latest.gas_price, Some(7));
    assert_eq!(latest.mined, Some(Timestamp::from_millis(3_000)));
    assert_eq!(latest.chain_tx_hash, Some(ChainTxHash::new(digest(200))));
}

#[test]
fn confirm_sent_requires_existing_batch() {
    let mut conn = create_db();
    let tx_hash = ChainTxHash::new(digest(9));

    assert!(!sql::update_batch_sent(&mut conn, 0, &tx_hash).unwrap());

    add_batch(&mut conn, &mock_batch(0, 1, vec![]));
    assert!(sql::update_batch_sent(&mut conn, 0, &tx_hash).unwrap());

    let stored = sql::select_batch(&mut conn, 0).unwrap().unwrap();
    assert_eq!(stored.chain_tx_hash, Some(tx_hash));
    assert!(!stored.is_settled());
}

#[test]
fn pending_transactions_are_claimed_by_batches() {
    let mut conn = create_db();
    let first = mock_transaction(10, 1);
    let second = mock_transaction(20, 2);

    assert!(sql::insert_pending_transaction(&mut conn, &second).unwrap());
    assert!(sql::insert_pending_transaction(&mut conn, &first).unwrap());
    assert!(!sql::insert_pending_transaction(&mut conn, &first).unwrap());

    assert_eq!(
        sql::select_pending_transactions(&mut conn, 10).unwrap(),
        vec![first.clone(), second.clone()]
    );
    assert_eq!(sql::select_pending_transactions(&mut conn, 1).unwrap(), vec![first.clone()]);

    add_batch(&mut conn, &mock_batch(0, 1, vec![first]));

    assert_eq!(sql::select_pending_transactions(&mut conn, 10).unwrap(), vec![second]);
}

#[test]
fn orphaned_proofs_release_their_transactions() {
    let mut conn = create_db();
    let tx = mock_transaction(10, 1);
    add_batch(&mut conn, &mock_batch(0, 1, vec![tx.clone()]));
    add_batch(&mut conn, &mock_batch(1, 2, vec![mock_transaction(20, 2)]));
    mine(&mut conn, 0);

    assert_eq!(sql::delete_unsettled_batches(&mut conn).unwrap(), 1);
    assert!(sql::select_batch(&mut conn, 1).unwrap().is_none());

    // Proof of the deleted batch is still there until orphans are collected.
    assert!(sql::select_proof(&mut conn, &BatchHash::new(digest(2))).unwrap().is_some());

    let transaction = conn.transaction().unwrap();
    assert_eq!(sql::delete_orphaned_proofs(&transaction).unwrap(), 1);
    transaction.commit().unwrap();

    assert!(sql::select_proof(&mut conn, &BatchHash::new(digest(2))).unwrap().is_none());
    assert_eq!(
        sql::select_pending_transactions(&mut conn, 10).unwrap(),
        vec![mock_transaction(20, 2)]
    );
    assert_eq!(sql::select_batch(&mut conn, 0).unwrap().unwrap().proof.txs, vec![tx]);
}

#[test]
fn deleting_transactions_spares_claimed_ones() {
    let mut conn = create_db();
    let claimed = mock_transaction(10, 1);
    let pending = mock_transaction(20, 2);
    let other = mock_transaction(30, 3);
    add_batch(&mut conn, &mock_batch(0, 1, vec![claimed.clone()]));
    sql::insert_pending_transaction(&mut conn, &pending).unwrap();
    sql::insert_pending_transaction(&mut conn, &other).unwrap();

    let transaction = conn.transaction().unwrap();
    let deleted =
        sql::delete_pending_transactions_by_id(&transaction, &[claimed.id, pending.id]).unwrap();
    transaction.commit().unwrap();

    assert_eq!(deleted, 1);
    assert_eq!(sql::select_pending_transactions(&mut conn, 10).unwrap(), vec![other]);

    assert_eq!(sql::delete_pending_transactions(&mut conn).unwrap(), 1);
    assert!(sql::select_pending_transactions(&mut conn, 10).unwrap().is_empty());
    assert_eq!(sql::select_batch(&mut conn, 0).unwrap().unwrap().proof.txs, vec![claimed]);
}

#[test]
fn tree_leaves_are_replaced() {
    let mut conn = create_db();
    let leaves = vec![
        (TreeId::Data, LeafKey::from(3u64), LeafValue::new(digest(1))),
        (TreeId::Nullifier, LeafKey::new(digest(7)), LeafValue::new(digest(2))),
        (TreeId::RootHistory, LeafKey::from(0u64), LeafValue::new(digest(3))),
    ];

    let transaction = conn.transaction().unwrap();
    sql::upsert_tree_leaves(&transaction, &leaves).unwrap();
    sql::upsert_tree_leaves(
        &transaction,
        &[(TreeId::Data, LeafKey::from(3u64), LeafValue::new(digest(4)))],
    )
    .unwrap();
    transaction.commit().unwrap();

    let mut stored = sql::select_tree_leaves(&mut conn).unwrap();
    stored.sort();

    assert_eq!(
        stored,
        vec![
            (TreeId::Data, LeafKey::from(3u64), LeafValue::new(digest(4))),
            (TreeId::Nullifier, LeafKey::new(digest(7)), LeafValue::new(digest(2))),
            (TreeId::RootHistory, LeafKey::from(0u64), LeafValue::new(digest(3))),
        ]
    );
}
