use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

/// Prefix of the environment variables which override values of the configuration file.
///
/// Nested keys are separated by a double underscore, e.g. `ROLLUP_NODE_SEQUENCER__BATCH_SIZE`.
pub const ENV_CONFIG_PREFIX: &str = "ROLLUP_NODE_";

/// Loads the user configuration.
///
/// Values are read from the TOML file at the provided path and then overridden by any
/// environment variable carrying the [`ENV_CONFIG_PREFIX`].
pub fn load_config<T: for<'a> Deserialize<'a>>(
    config_file: impl AsRef<Path>,
) -> figment::Result<T> {
    Figment::from(Toml::file(config_file.as_ref()))
        .merge(Env::prefixed(ENV_CONFIG_PREFIX).split("__"))
        .extract()
}
