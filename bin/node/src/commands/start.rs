use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::Registry;
use rollup_node_objects::Address;
use rollup_node_sequencer::{
    chain::{ChainClient, LocalChain},
    config::{MetricsSink, SequencerConfig},
    metrics::{encode_metrics, Metrics, PrometheusMetrics, TracingMetrics},
    pipeline::DefaultPipelineFactory,
    publisher::{signer::ProviderSigner, BatchPublisher},
    world_state::WorldState,
};
use rollup_node_store::{Db, WorldStateDb};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::NodeConfig;

const COMPONENT: &str = "rollup-node";

// START
// ================================================================================================

/// Wires the store, a local development chain and the sequencer together and runs them until
/// Ctrl-C.
pub async fn start_node(config: NodeConfig) -> Result<()> {
    info!(target: COMPONENT, %config, "Starting rollup node");

    let db = Arc::new(Db::setup(config.store.clone()).await.context("Setting up the database")?);
    let state = WorldStateDb::new(Arc::clone(&db)).context("Creating the world state")?;
    let state = Arc::new(Mutex::new(state));

    let sequencer = &config.sequencer;
    let fee_distributor = parse_address(&sequencer.fee_distributor)?;
    let chain: Arc<dyn ChainClient> = Arc::new(LocalChain::new(fee_distributor, sequencer.gas_price));
    let (metrics, registry) = build_metrics(sequencer.metrics)?;

    let signer = provider_signer(sequencer)?;
    info!(target: COMPONENT, provider = %signer.address(), "Signing batches");

    let publisher = Arc::new(BatchPublisher::new(
        Arc::clone(&db),
        Arc::clone(&chain),
        signer,
        Arc::clone(&metrics),
        sequencer.publisher_options(),
    ));
    let factory = Arc::new(DefaultPipelineFactory::new(
        Arc::clone(&db),
        Arc::clone(&state),
        publisher,
        sequencer.pipeline_options(),
    ));

    let mut world_state =
        WorldState::new(db, state, chain, factory, metrics, sequencer.retry_backoff());
    world_state.start().await.context("Starting the world-state synchronizer")?;

    tokio::signal::ctrl_c().await.context("Waiting for the shutdown signal")?;
    info!(target: COMPONENT, "Shutting down");

    let stopped = world_state.stop().await.context("Stopping the world-state synchronizer");

    if let Some(registry) = registry {
        match encode_metrics(&registry) {
            Ok(metrics) => info!(target: COMPONENT, %metrics, "Final metrics"),
            Err(err) => warn!(target: COMPONENT, %err, "Encoding the metrics failed"),
        }
    }

    stopped
}

/// Creates the configured metrics sink, along with the registry it records into, if any.
fn build_metrics(sink: MetricsSink) -> Result<(Arc<dyn Metrics>, Option<Registry>)> {
    match sink {
        MetricsSink::Tracing => Ok((Arc::new(TracingMetrics), None)),
        MetricsSink::Prometheus => {
            let registry = Registry::new();
            let metrics =
                PrometheusMetrics::new(&registry).context("Registering the Prometheus metrics")?;
            Ok((Arc::new(metrics), Some(registry)))
        },
    }
}

fn provider_signer(config: &SequencerConfig) -> Result<ProviderSigner> {
    match &config.provider_private_key {
        Some(key) => ProviderSigner::from_hex(key).context("Invalid provider private key"),
        None => {
            warn!(target: COMPONENT, "No provider private key configured, using a random one");
            Ok(ProviderSigner::random())
        },
    }
}

fn parse_address(address: &str) -> Result<Address> {
    let bytes = hex::decode(address.trim_start_matches("0x"))
        .with_context(|| format!("Address `{address}` is not valid hex"))?;
    Address::from_slice(&bytes).with_context(|| format!("Invalid address `{address}`"))
}
