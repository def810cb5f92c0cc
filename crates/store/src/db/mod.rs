use std::{fs::create_dir_all, path::PathBuf};

use deadpool_sqlite::{Config as SqliteConfig, Hook, HookError, Pool, Runtime};
use rollup_node_objects::{
    BatchHash, BatchRecord, ChainTxHash, ProofRecord, Timestamp, TransactionId,
    TransactionRecord,
};
use tracing::{info, info_span, instrument};

use crate::{
    config::StoreConfig,
    db::migrations::apply_migrations,
    errors::{DatabaseError, DatabaseSetupError},
    world_state::{LeafKey, LeafValue, TreeId},
    COMPONENT, SQL_STATEMENT_CACHE_CAPACITY,
};

mod migrations;
mod sql;

#[cfg(test)]
mod tests;

pub type Result<T, E = DatabaseError> = std::result::Result<T, E>;

/// Connection pool over the node's SQLite database.
pub struct Db {
    pool: Pool,
}

impl Db {
    /// Open a connection to the DB and apply any pending migrations.
    #[instrument(target = COMPONENT, skip_all)]
    pub async fn setup(config: StoreConfig) -> Result<Self, DatabaseSetupError> {
        info!(target: COMPONENT, %config, "Connecting to the database");

        if let Some(p) = config.database_filepath.parent() {
            create_dir_all(p).map_err(DatabaseError::IoError)?;
        }

        let pool = Self::build_pool(config.database_filepath.clone(), None)?;

        info!(
            target: COMPONENT,
            sqlite = format!("{}", config.database_filepath.display()),
            "Connected to the database"
        );

        Self::migrate(pool).await
    }

    /// Database which only lives as long as the returned instance.
    ///
    /// Every SQLite connection to `:memory:` opens a distinct database, so the pool is limited
    /// to a single connection.
    pub async fn open_in_memory() -> Result<Self, DatabaseSetupError> {
        let pool = Self::build_pool(PathBuf::from(":memory:"), Some(1))?;
        Self::migrate(pool).await
    }

    fn build_pool(path: PathBuf, max_size: Option<usize>) -> Result<Pool, DatabaseSetupError> {
        let mut builder = SqliteConfig::new(path)
            .builder(Runtime::Tokio1)
            .map_err(|err| DatabaseSetupError::PoolConfigError(err.to_string()))?;

        if let Some(max_size) = max_size {
            builder = builder.max_size(max_size);
        }

        let pool = builder
            .post_create(Hook::async_fn(move |conn, _| {
                Box::pin(async move {
                    conn.interact(|conn| {
                        // Increase the statement cache size.
                        conn.set_prepared_statement_cache_capacity(SQL_STATEMENT_CACHE_CAPACITY);

                        // Enable the WAL mode. This allows concurrent reads while a batch is
                        // being written.
                        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                            row.get::<_, String>(0)
                        })?;

                        // Enable foreign key checks.
                        conn.pragma_update(None, "foreign_keys", "ON")
                    })
                    .await
                    .map_err(|e| {
                        HookError::Message(format!("Connection setup task failed: {e}").into())
                    })?
                    .map_err(HookError::Backend)?;

                    Ok(())
                })
            }))
            .build()?;

        Ok(pool)
    }

    async fn migrate(pool: Pool) -> Result<Self, DatabaseSetupError> {
        let conn = pool.get().await.map_err(DatabaseError::MissingDbConnection)?;

        conn.interact(apply_migrations).await.map_err(|err| {
            DatabaseError::InteractError(format!("Migration task failed: {err}"))
        })??;

        Ok(Db { pool })
    }

    // BATCHES
    // ---------------------------------------------------------------------------------------------

    /// Returns the id following the highest settled batch.
    #[instrument(target = COMPONENT, skip_all, ret(level = "debug"), err)]
    pub async fn next_batch_id(&self) -> Result<u32> {
        self.pool
            .get()
            .await?
            .interact(sql::select_next_batch_id)
            .await
            .map_err(|err| {
                DatabaseError::InteractError(format!("Select next batch id task failed: {err}"))
            })?
    }

    /// Loads settled batches, ordered by id.
    #[instrument(target = COMPONENT, skip_all, err)]
    pub async fn settled_batches(
        &self,
        offset: u32,
        descending: bool,
        limit: u32,
    ) -> Result<Vec<BatchRecord>> {
        self.pool
            .get()
            .await?
            .interact(move |conn| sql::select_settled_batches(conn, offset, descending, limit))
            .await
            .map_err(|err| {
                DatabaseError::InteractError(format!("Select settled batches task failed: {err}"))
            })?
    }

    /// Loads a batch, settled or not.
    #[instrument(target = COMPONENT, skip_all, err)]
    pub async fn get_batch(&self, batch_id: u32) -> Result<Option<BatchRecord>> {
        self.pool
            .get()
            .await?
            .interact(move |conn| sql::select_batch(conn, batch_id))
            .await
            .map_err(|err| {
                DatabaseError::InteractError(format!("Select batch task failed: {err}"))
            })?
    }

    /// Loads a proof record with its transactions in batch order.
    #[instrument(target = COMPONENT, skip_all, err)]
    pub async fn get_proof_record(&self, batch_hash: BatchHash) -> Result<Option<ProofRecord>> {
        self.pool
            .get()
            .await?
            .interact(move |conn| sql::select_proof(conn, &batch_hash))
            .await
            .map_err(|err| {
                DatabaseError::InteractError(format!("Select proof record task failed: {err}"))
            })?
    }

    /// Inserts or replaces a batch together with its proof record and transactions.
    #[instrument(target = COMPONENT, skip_all, err)]
    pub async fn add_batch(&self, batch: BatchRecord) -> Result<()> {
        self.pool
            .get()
            .await?
            .interact(move |conn| -> Result<()> {
                let _span = info_span!(target: COMPONENT, "write_batch_to_db").entered();

                let transaction = conn.transaction()?;
                sql::upsert_batch(&transaction, &batch)?;
                transaction.commit()?;

                Ok(())
            })
            .await
            .map_err(|err| DatabaseError::InteractError(format!("Add batch task failed: {err}")))?
    }

    /// Records the chain transaction which carries the batch.
    ///
    /// Returns `false` if no such batch exists.
    #[instrument(target = COMPONENT, skip_all, err)]
    pub async fn confirm_sent(&self, batch_id: u32, tx_hash: ChainTxHash) -> Result<bool> {
        self.pool
            .get()
            .await?
            .interact(move |conn| sql::update_batch_sent(conn, batch_id, &tx_hash))
            .await
            .map_err(|err| {
                DatabaseError::InteractError(format!("Confirm sent task failed: {err}"))
            })?
    }

    /// Marks the batch as settled.
    ///
    /// Returns `false` if no such batch exists.
    #[instrument(target = COMPONENT, skip_all, err)]
    pub async fn confirm_mined(
        &self,
        batch_id: u32,
        gas_used: u64,
        gas_price: u64,
        mined_at: Timestamp,
        tx_hash: ChainTxHash,
    ) -> Result<bool> {
        self.pool
            .get()
            .await?
            .interact(move |conn| {
                sql::update_batch_mined(conn, batch_id, gas_used, gas_price, mined_at, &tx_hash)
            })
            .await
            .map_err(|err| {
                DatabaseError::InteractError(format!("Confirm mined task failed: {err}"))
            })?
    }

    /// Deletes all batches which are not settled yet. Their proofs are kept.
    #[instrument(target = COMPONENT, skip_all, ret(level = "debug"), err)]
    pub async fn delete_unsettled_batches(&self) -> Result<usize> {
        self.pool
            .get()
            .await?
            .interact(sql::delete_unsettled_batches)
            .await
            .map_err(|err| {
                DatabaseError::InteractError(format!("Delete unsettled batches task failed: {err}"))
            })?
    }

    /// Deletes proof records which no batch refers to, returning their transactions to the
    /// pending pool.
    #[instrument(target = COMPONENT, skip_all, ret(level = "debug"), err)]
    pub async fn delete_orphaned_proof_records(&self) -> Result<usize> {
        self.pool
            .get()
            .await?
            .interact(move |conn| -> Result<usize> {
                let transaction = conn.transaction()?;
                let deleted = sql::delete_orphaned_proofs(&transaction)?;
                transaction.commit()?;

                Ok(deleted)
            })
            .await
            .map_err(|err| {
                DatabaseError::InteractError(format!(
                    "Delete orphaned proof records task failed: {err}"
                ))
            })?
    }

    // TRANSACTIONS
    // ---------------------------------------------------------------------------------------------

    /// Adds a transaction to the pending pool. Returns `false` if it is already known.
    #[instrument(target = COMPONENT, skip_all, err)]
    pub async fn add_pending_transaction(&self, tx: TransactionRecord) -> Result<bool> {
        self.pool
            .get()
            .await?
            .interact(move |conn| sql::insert_pending_transaction(conn, &tx))
            .await
            .map_err(|err| {
                DatabaseError::InteractError(format!("Add pending transaction task failed: {err}"))
            })?
    }

    /// Loads up to `limit` pending transactions, oldest first.
    #[instrument(target = COMPONENT, skip_all, err)]
    pub async fn pending_transactions(&self, limit: u32) -> Result<Vec<TransactionRecord>> {
        self.pool
            .get()
            .await?
            .interact(move |conn| sql::select_pending_transactions(conn, limit))
            .await
            .map_err(|err| {
                DatabaseError::InteractError(format!(
                    "Select pending transactions task failed: {err}"
                ))
            })?
    }

    #[instrument(target = COMPONENT, skip_all, ret(level = "debug"), err)]
    pub async fn delete_pending_transactions(&self) -> Result<usize> {
        self.pool
            .get()
            .await?
            .interact(sql::delete_pending_transactions)
            .await
            .map_err(|err| {
                DatabaseError::InteractError(format!(
                    "Delete pending transactions task failed: {err}"
                ))
            })?
    }

    /// Deletes the given transactions from the pending pool.
    #[instrument(target = COMPONENT, skip_all, ret(level = "debug"), err)]
    pub async fn delete_transactions(&self, ids: Vec<TransactionId>) -> Result<usize> {
        self.pool
            .get()
            .await?
            .interact(move |conn| -> Result<usize> {
                let transaction = conn.transaction()?;
                let deleted = sql::delete_pending_transactions_by_id(&transaction, &ids)?;
                transaction.commit()?;

                Ok(deleted)
            })
            .await
            .map_err(|err| {
                DatabaseError::InteractError(format!("Delete transactions task failed: {err}"))
            })?
    }

    // WORLD STATE LEAVES
    // ---------------------------------------------------------------------------------------------

    /// Loads all committed world-state leaves.
    #[instrument(target = COMPONENT, skip_all, err)]
    pub async fn select_tree_leaves(&self) -> Result<Vec<(TreeId, LeafKey, LeafValue)>> {
        self.pool
            .get()
            .await?
            .interact(sql::select_tree_leaves)
            .await
            .map_err(|err| {
                DatabaseError::InteractError(format!("Select tree leaves task failed: {err}"))
            })?
    }

    /// Writes world-state leaves in a single transaction, replacing existing values.
    #[instrument(target = COMPONENT, skip_all, err)]
    pub async fn insert_tree_leaves(&self, leaves: Vec<(TreeId, LeafKey, LeafValue)>) -> Result<()> {
        self.pool
            .get()
            .await?
            .interact(move |conn| -> Result<()> {
                let _span = info_span!(target: COMPONENT, "write_tree_leaves_to_db").entered();

                let transaction = conn.transaction()?;
                sql::upsert_tree_leaves(&transaction, &leaves)?;
                transaction.commit()?;

                Ok(())
            })
            .await
            .map_err(|err| {
                DatabaseError::InteractError(format!("Insert tree leaves task failed: {err}"))
            })?
    }
}
