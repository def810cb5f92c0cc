pub mod config;
pub mod db;
pub mod errors;
pub mod world_state;

pub use db::Db;
pub use world_state::{LeafKey, LeafValue, TreeId, WorldStateDb};

// CONSTANTS
// =================================================================================================

pub const COMPONENT: &str = "rollup-node-store";

/// Number of sql statements that each connection will cache.
const SQL_STATEMENT_CACHE_CAPACITY: usize = 32;
