//! Wrapper functions for SQL statements.

use rollup_node_objects::{
    BatchHash, BatchRecord, ChainTxHash, Nullifier, ProofRecord, Root, Timestamp,
    TransactionId, TransactionRecord, ViewingKey,
};
use rusqlite::{params, types::Value, Connection, Row, Transaction};

use super::Result;
use crate::{
    errors::DatabaseError,
    world_state::{LeafKey, LeafValue, TreeId},
};

// UTILITIES
// ================================================================================================

/// Converts a `u64` into a [Value].
///
/// Sqlite uses `i64` as its internal representation format. Note that the `as` operator performs
/// a lossless conversion from `u64` to `i64`.
fn u64_to_value(v: u64) -> Value {
    #[allow(
        clippy::cast_possible_wrap,
        reason = "We store u64 as i64 as sqlite only allows the latter."
    )]
    Value::Integer(v as i64)
}

/// Gets a `u64` value from the database.
fn column_value_as_u64(row: &Row<'_>, index: &str) -> rusqlite::Result<u64> {
    let value: i64 = row.get(index)?;
    #[allow(
        clippy::cast_sign_loss,
        reason = "We store u64 as i64 as sqlite only allows the latter."
    )]
    Ok(value as u64)
}

fn column_value_as_opt_u64(row: &Row<'_>, index: &str) -> rusqlite::Result<Option<u64>> {
    let value: Option<i64> = row.get(index)?;
    #[allow(
        clippy::cast_sign_loss,
        reason = "We store u64 as i64 as sqlite only allows the latter."
    )]
    Ok(value.map(|value| value as u64))
}

fn column_value_as_u32(row: &Row<'_>, column: &'static str) -> Result<u32> {
    let value: i64 = row.get(column)?;
    u32::try_from(value).map_err(|_| DatabaseError::ValueOutOfRange { column, value })
}

fn timestamp_to_value(timestamp: Timestamp) -> Value {
    u64_to_value(timestamp.as_millis())
}

// BATCHES
// ================================================================================================

const BATCH_COLUMNS: &str = "
    batches.batch_id AS batch_id,
    batches.data_root AS data_root,
    batches.viewing_keys AS viewing_keys,
    batches.chain_tx_hash AS chain_tx_hash,
    batches.gas_used AS gas_used,
    batches.gas_price AS gas_price,
    batches.mined_at AS mined_at,
    batches.created_at AS created_at,
    batch_proofs.batch_hash AS batch_hash,
    batch_proofs.batch_size AS batch_size,
    batch_proofs.data_start_index AS data_start_index,
    batch_proofs.proof_data AS proof_data,
    batch_proofs.created_at AS proof_created_at";

/// Returns the id following the highest settled batch, zero if nothing settled yet.
pub fn select_next_batch_id(conn: &mut Connection) -> Result<u32> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(batch_id) FROM batches WHERE mined_at IS NOT NULL",
        [],
        |row| row.get(0),
    )?;

    match max {
        None => Ok(0),
        Some(value) => u32::try_from(value + 1)
            .map_err(|_| DatabaseError::ValueOutOfRange { column: "batch_id", value }),
    }
}

pub fn select_batch(conn: &mut Connection, batch_id: u32) -> Result<Option<BatchRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {BATCH_COLUMNS} FROM batches
         JOIN batch_proofs ON batch_proofs.batch_hash = batches.batch_hash
         WHERE batches.batch_id = ?1"
    ))?;
    let mut rows = stmt.query(params![batch_id])?;

    match rows.next()? {
        Some(row) => Ok(Some(batch_from_row(conn, row)?)),
        None => Ok(None),
    }
}

/// Returns settled batches ordered by id.
pub fn select_settled_batches(
    conn: &mut Connection,
    offset: u32,
    descending: bool,
    limit: u32,
) -> Result<Vec<BatchRecord>> {
    let order = if descending { "DESC" } else { "ASC" };
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {BATCH_COLUMNS} FROM batches
         JOIN batch_proofs ON batch_proofs.batch_hash = batches.batch_hash
         WHERE batches.mined_at IS NOT NULL
         ORDER BY batches.batch_id {order}
         LIMIT ?1 OFFSET ?2"
    ))?;
    let mut rows = stmt.query(params![limit, offset])?;

    let mut batches = Vec::new();
    while let Some(row) = rows.next()? {
        batches.push(batch_from_row(conn, row)?);
    }

    Ok(batches)
}

fn batch_from_row(conn: &Connection, row: &Row<'_>) -> Result<BatchRecord> {
    let batch_hash = BatchHash::from_slice(&row.get::<_, Vec<u8>>("batch_hash")?)?;
    let chain_tx_hash = row
        .get::<_, Option<Vec<u8>>>("chain_tx_hash")?
        .map(|bytes| ChainTxHash::from_slice(&bytes))
        .transpose()?;

    Ok(BatchRecord {
        id: column_value_as_u32(row, "batch_id")?,
        data_root: Root::from_slice(&row.get::<_, Vec<u8>>("data_root")?)?,
        proof: ProofRecord {
            id: batch_hash,
            batch_size: column_value_as_u32(row, "batch_size")?,
            data_start_index: column_value_as_u32(row, "data_start_index")?,
            proof_data: row.get("proof_data")?,
            txs: select_proof_transactions(conn, &batch_hash)?,
            created: Timestamp::from_millis(column_value_as_u64(row, "proof_created_at")?),
        },
        viewing_keys: row.get("viewing_keys")?,
        chain_tx_hash,
        gas_used: column_value_as_opt_u64(row, "gas_used")?,
        gas_price: column_value_as_opt_u64(row, "gas_price")?,
        mined: column_value_as_opt_u64(row, "mined_at")?.map(Timestamp::from_millis),
        created: Timestamp::from_millis(column_value_as_u64(row, "created_at")?),
    })
}

/// Inserts a batch together with its proof and transactions, replacing existing records with
/// the same batch id, batch hash or transaction ids.
///
/// Transactions of the batch which were pending before are claimed by its proof.
pub fn upsert_batch(transaction: &Transaction, batch: &BatchRecord) -> Result<()> {
    let proof = &batch.proof;

    transaction
        .prepare_cached(
            "INSERT INTO batch_proofs (batch_hash, batch_size, data_start_index, proof_data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (batch_hash) DO UPDATE SET
                batch_size = excluded.batch_size,
                data_start_index = excluded.data_start_index,
                proof_data = excluded.proof_data,
                created_at = excluded.created_at",
        )?
        .execute(params![
            proof.id.as_bytes(),
            proof.batch_size,
            proof.data_start_index,
            proof.proof_data,
            timestamp_to_value(proof.created),
        ])?;

    for (position, tx) in (0u32..).zip(&proof.txs) {
        upsert_transaction(transaction, tx, Some((&proof.id, position)))?;
    }

    transaction
        .prepare_cached(
            "INSERT INTO batches (
                batch_id, batch_hash, data_root, viewing_keys, chain_tx_hash, gas_used,
                gas_price, mined_at, created_at
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (batch_id) DO UPDATE SET
                batch_hash = excluded.batch_hash,
                data_root = excluded.data_root,
                viewing_keys = excluded.viewing_keys,
                chain_tx_hash = excluded.chain_tx_hash,
                gas_used = excluded.gas_used,
                gas_price = excluded.gas_price,
                mined_at = excluded.mined_at,
                created_at = excluded.created_at",
        )?
        .execute(params![
            batch.id,
            proof.id.as_bytes(),
            batch.data_root.as_bytes(),
            batch.viewing_keys,
            batch.chain_tx_hash.as_ref().map(ChainTxHash::as_bytes),
            batch.gas_used.map(u64_to_value),
            batch.gas_price.map(u64_to_value),
            batch.mined.map(timestamp_to_value),
            timestamp_to_value(batch.created),
        ])?;

    Ok(())
}

/// Records the chain transaction which carries the batch. Returns whether the batch exists.
pub fn update_batch_sent(
    conn: &mut Connection,
    batch_id: u32,
    tx_hash: &ChainTxHash,
) -> Result<bool> {
    let updated = conn
        .prepare_cached("UPDATE batches SET chain_tx_hash = ?1 WHERE batch_id = ?2")?
        .execute(params![tx_hash.as_bytes(), batch_id])?;

    Ok(updated > 0)
}

/// Marks the batch as settled. Returns whether the batch exists.
pub fn update_batch_mined(
    conn: &mut Connection,
    batch_id: u32,
    gas_used: u64,
    gas_price: u64,
    mined_at: Timestamp,
    tx_hash: &ChainTxHash,
) -> Result<bool> {
    let updated = conn
        .prepare_cached(
            "UPDATE batches
             SET gas_used = ?1, gas_price = ?2, mined_at = ?3, chain_tx_hash = ?4
             WHERE batch_id = ?5",
        )?
        .execute(params![
            u64_to_value(gas_used),
            u64_to_value(gas_price),
            timestamp_to_value(mined_at),
            tx_hash.as_bytes(),
            batch_id,
        ])?;

    Ok(updated > 0)
}

pub fn delete_unsettled_batches(conn: &mut Connection) -> Result<usize> {
    conn.execute("DELETE FROM batches WHERE mined_at IS NULL", []).map_err(Into::into)
}

/// Deletes proofs which no batch refers to. Their transactions become pending again.
pub fn delete_orphaned_proofs(transaction: &Transaction) -> Result<usize> {
    const ORPHANS: &str =
        "SELECT batch_hash FROM batch_proofs WHERE batch_hash NOT IN (SELECT batch_hash FROM batches)";

    transaction.execute(
        &format!(
            "UPDATE transactions SET batch_hash = NULL, position = NULL WHERE batch_hash IN ({ORPHANS})"
        ),
        [],
    )?;

    transaction
        .execute(&format!("DELETE FROM batch_proofs WHERE batch_hash IN ({ORPHANS})"), [])
        .map_err(Into::into)
}

// PROOFS
// ================================================================================================

pub fn select_proof(conn: &mut Connection, batch_hash: &BatchHash) -> Result<Option<ProofRecord>> {
    let mut stmt = conn.prepare_cached(
        "SELECT batch_size, data_start_index, proof_data, created_at
         FROM batch_proofs WHERE batch_hash = ?1",
    )?;
    let mut rows = stmt.query(params![batch_hash.as_bytes()])?;

    let Some(row) = rows.next()? else {
        return Ok(None);
    };

    Ok(Some(ProofRecord {
        id: *batch_hash,
        batch_size: column_value_as_u32(row, "batch_size")?,
        data_start_index: column_value_as_u32(row, "data_start_index")?,
        proof_data: row.get("proof_data")?,
        txs: select_proof_transactions(conn, batch_hash)?,
        created: Timestamp::from_millis(column_value_as_u64(row, "created_at")?),
    }))
}

// TRANSACTIONS
// ================================================================================================

const TRANSACTION_COLUMNS: &str = "tx_id, proof_data, viewing_key_1, viewing_key_2, nullifier_1, \
                                   nullifier_2, signature, created_at";

fn transaction_from_row(row: &Row<'_>) -> Result<TransactionRecord> {
    Ok(TransactionRecord {
        id: TransactionId::from_slice(&row.get::<_, Vec<u8>>("tx_id")?)?,
        proof_data: row.get("proof_data")?,
        viewing_key_1: ViewingKey::from_slice(&row.get::<_, Vec<u8>>("viewing_key_1")?)?,
        viewing_key_2: ViewingKey::from_slice(&row.get::<_, Vec<u8>>("viewing_key_2")?)?,
        nullifier_1: Nullifier::from_slice(&row.get::<_, Vec<u8>>("nullifier_1")?)?,
        nullifier_2: Nullifier::from_slice(&row.get::<_, Vec<u8>>("nullifier_2")?)?,
        signature: row.get("signature")?,
        created: Timestamp::from_millis(column_value_as_u64(row, "created_at")?),
    })
}

fn select_proof_transactions(
    conn: &Connection,
    batch_hash: &BatchHash,
) -> Result<Vec<TransactionRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE batch_hash = ?1 ORDER BY position"
    ))?;
    let mut rows = stmt.query(params![batch_hash.as_bytes()])?;

    let mut txs = Vec::new();
    while let Some(row) = rows.next()? {
        txs.push(transaction_from_row(row)?);
    }

    Ok(txs)
}

fn upsert_transaction(
    transaction: &Transaction,
    tx: &TransactionRecord,
    proof: Option<(&BatchHash, u32)>,
) -> Result<()> {
    transaction
        .prepare_cached(&format!(
            "INSERT INTO transactions ({TRANSACTION_COLUMNS}, batch_hash, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (tx_id) DO UPDATE SET
                batch_hash = excluded.batch_hash,
                position = excluded.position"
        ))?
        .execute(params![
            tx.id.as_bytes(),
            tx.proof_data,
            tx.viewing_key_1.as_bytes().as_slice(),
            tx.viewing_key_2.as_bytes().as_slice(),
            tx.nullifier_1.as_bytes(),
            tx.nullifier_2.as_bytes(),
            tx.signature,
            timestamp_to_value(tx.created),
            proof.map(|(batch_hash, _)| batch_hash.as_bytes()),
            proof.map(|(_, position)| position),
        ])?;

    Ok(())
}

/// Adds a transaction to the pending pool. Returns `false` if the transaction is already known.
pub fn insert_pending_transaction(conn: &mut Connection, tx: &TransactionRecord) -> Result<bool> {
    let inserted = conn
        .prepare_cached(&format!(
            "INSERT INTO transactions ({TRANSACTION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (tx_id) DO NOTHING"
        ))?
        .execute(params![
            tx.id.as_bytes(),
            tx.proof_data,
            tx.viewing_key_1.as_bytes().as_slice(),
            tx.viewing_key_2.as_bytes().as_slice(),
            tx.nullifier_1.as_bytes(),
            tx.nullifier_2.as_bytes(),
            tx.signature,
            timestamp_to_value(tx.created),
        ])?;

    Ok(inserted > 0)
}

/// Returns up to `limit` pending transactions, oldest first.
pub fn select_pending_transactions(
    conn: &mut Connection,
    limit: u32,
) -> Result<Vec<TransactionRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions
         WHERE batch_hash IS NULL
         ORDER BY created_at, tx_id
         LIMIT ?1"
    ))?;
    let mut rows = stmt.query(params![limit])?;

    let mut txs = Vec::new();
    while let Some(row) = rows.next()? {
        txs.push(transaction_from_row(row)?);
    }

    Ok(txs)
}

pub fn delete_pending_transactions(conn: &mut Connection) -> Result<usize> {
    conn.execute("DELETE FROM transactions WHERE batch_hash IS NULL", [])
        .map_err(Into::into)
}

/// Deletes the given transactions if they are still pending.
pub fn delete_pending_transactions_by_id(
    transaction: &Transaction,
    ids: &[TransactionId],
) -> Result<usize> {
    let mut stmt = transaction
        .prepare_cached("DELETE FROM transactions WHERE tx_id = ?1 AND batch_hash IS NULL")?;

    let mut deleted = 0;
    for id in ids {
        deleted += stmt.execute(params![id.as_bytes()])?;
    }

    Ok(deleted)
}

// WORLD STATE LEAVES
// ================================================================================================

pub fn upsert_tree_leaves(
    transaction: &Transaction,
    leaves: &[(TreeId, LeafKey, LeafValue)],
) -> Result<()> {
    let mut stmt = transaction.prepare_cached(
        "INSERT INTO tree_leaves (tree_id, leaf_key, value) VALUES (?1, ?2, ?3)
         ON CONFLICT (tree_id, leaf_key) DO UPDATE SET value = excluded.value",
    )?;

    for (tree, key, value) in leaves {
        stmt.execute(params![tree.as_u8(), key.as_bytes(), value.as_bytes()])?;
    }

    Ok(())
}

pub fn select_tree_leaves(conn: &mut Connection) -> Result<Vec<(TreeId, LeafKey, LeafValue)>> {
    let mut stmt =
        conn.prepare_cached("SELECT tree_id, leaf_key, value FROM tree_leaves ORDER BY tree_id")?;
    let mut rows = stmt.query([])?;

    let mut leaves = Vec::new();
    while let Some(row) = rows.next()? {
        let tree_id: i64 = row.get(0)?;
        let tree = u8::try_from(tree_id)
            .ok()
            .and_then(TreeId::from_u8)
            .ok_or(DatabaseError::InvalidTreeId(tree_id))?;
        let key: [u8; 32] = row.get(1)?;
        let value: [u8; 32] = row.get(2)?;

        leaves.push((tree, LeafKey::new(key), LeafValue::new(value)));
    }

    Ok(leaves)
}

