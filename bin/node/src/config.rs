use std::fmt::{Display, Formatter};

use rollup_node_sequencer::config::SequencerConfig;
use rollup_node_store::config::StoreConfig;
use serde::{Deserialize, Serialize};

/// Node top-level configuration.
#[derive(Clone, Default, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sequencer: SequencerConfig,
}

impl Display for NodeConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{{ store: {}, sequencer: {} }}", self.store, self.sequencer))
    }
}
