use std::io;

use deadpool_sqlite::PoolError;
use miden_crypto::merkle::MerkleError;
use rollup_node_objects::errors::ConversionError;
use rusqlite::types::FromSqlError;
use thiserror::Error;

use crate::world_state::{LeafKey, TreeId};

// DATABASE ERRORS
// =================================================================================================

#[derive(Debug, Error)]
pub enum DatabaseError {
    // ERRORS WITH AUTOMATIC CONVERSIONS FROM NESTED ERROR TYPES
    // ---------------------------------------------------------------------------------------------
    #[error("Conversion of BLOB data from database failed: {0}")]
    ConversionError(#[from] ConversionError),
    #[error("SQLite error: {0}")]
    FromSqlError(#[from] FromSqlError),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Migration error: {0}")]
    MigrationError(#[from] rusqlite_migration::Error),
    #[error("Missing database connection: {0}")]
    MissingDbConnection(#[from] PoolError),
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    // OTHER ERRORS
    // ---------------------------------------------------------------------------------------------
    #[error("SQLite pool interaction task failed: {0}")]
    InteractError(String),
    #[error("Unknown tree id {0} found in the database")]
    InvalidTreeId(i64),
    #[error("Value {value} of column `{column}` is out of range")]
    ValueOutOfRange { column: &'static str, value: i64 },
}

// INITIALIZATION ERRORS
// =================================================================================================

#[derive(Debug, Error)]
pub enum DatabaseSetupError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),
    #[error("Pool configuration error: {0}")]
    PoolConfigError(String),
    #[error("Pool build error: {0}")]
    PoolBuildError(#[from] deadpool_sqlite::BuildError),
}

// WORLD STATE ERRORS
// =================================================================================================

#[derive(Debug, Error)]
pub enum WorldStateError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),
    #[error("Merkle error: {0}")]
    MerkleError(#[from] MerkleError),
    #[error("Key {key} is out of range for the {tree} tree")]
    IndexOutOfRange { tree: TreeId, key: LeafKey },
    #[error("Nullifier {0} has already been spent")]
    NullifierAlreadySpent(LeafKey),
    #[error("World state has not been started")]
    NotStarted,
}
