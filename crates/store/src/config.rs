use std::{
    fmt::{Display, Formatter},
    path::PathBuf,
};

use serde::{Deserialize, Serialize};

// Main config
// ================================================================================================

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// SQLite database file holding batch records and world-state leaves.
    pub database_filepath: PathBuf,
}

impl Display for StoreConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{{ database_filepath: {:?} }}", self.database_filepath))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        const STORAGE_DIR: &str = "./storage";
        Self {
            database_filepath: PathBuf::from(format!("{STORAGE_DIR}/rollup-node.sqlite3")),
        }
    }
}
