use std::{fs::File, io::Write, path::Path};

use anyhow::{Context, Result};

use crate::config::NodeConfig;

// INIT
// ================================================================================================

pub fn init_config_file(config_file_path: &Path) -> Result<()> {
    let config = NodeConfig::default();
    let config_as_toml_string =
        toml::to_string(&config).context("Failed to serialize default config")?;

    let mut file_handle = File::options()
        .write(true)
        .create_new(true)
        .open(config_file_path)
        .with_context(|| format!("Error opening `{}`", config_file_path.display()))?;

    file_handle
        .write_all(config_as_toml_string.as_bytes())
        .context("Error writing to file")?;

    println!("Config file successfully created at: {}", config_file_path.display());

    Ok(())
}
