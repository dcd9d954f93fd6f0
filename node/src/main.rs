//! Beacon node command line.
#![warn(missing_docs)]

mod cli;
mod service;

use anyhow::{bail, Context};
use bc_analytics::Analytics;
use bc_db::InMemoryBackend;
use bc_p2p::LocalNetwork;
use bc_sync::InitialSyncService;
use bp_utils::service::{BeaconServiceId, ServiceMonitor};
use clap::Parser;
use cli::RunCmd;
use figment::{
    providers::{Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use service::{DevnetChain, DevnetPeer, DevnetSyncStatus, LoggingRegularSync};
use std::sync::Arc;

const GREET_IMPL_NAME: &str = "Beacon";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Command line arguments, unless they point to a configuration file.
    let cli_args = RunCmd::parse();
    let config = match cli_args.config_file.clone() {
        Some(config_path) => match config_path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Figment::new().merge(Toml::file(config_path)),
            Some("json") => Figment::new().merge(Json::file(config_path)),
            Some("yaml") => Figment::new().merge(Yaml::file(config_path)),
            _ => bail!("Unsupported file type for config file."),
        },
        None => Figment::new().merge(Serialized::defaults(cli_args)),
    };

    let run_cmd: RunCmd = config.extract().context("Loading node configuration")?;
    run_cmd.check_mode()?;

    // Setting up analytics

    let analytics = Analytics::new(run_cmd.analytics_params.as_analytics_config());
    analytics.setup().context("Setting up analytics")?;

    tracing::info!("🥷 {} Node", GREET_IMPL_NAME);
    tracing::info!("✌️  Version {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("🏷  Node Name: {}", run_cmd.node_name());
    tracing::info!("📊 Analytics service: {}", analytics.service_name());

    // ===================================================================== //
    //                             SERVICES (SETUP)                          //
    // ===================================================================== //

    let network = LocalNetwork::new();
    let backend = Arc::new(InMemoryBackend::new());

    // Devnet

    let chain = Arc::new(DevnetChain::generate(&run_cmd.devnet_params).context("Generating devnet chain")?);
    let service_devnet = DevnetPeer::new(network.clone(), Arc::clone(&chain), &run_cmd.devnet_params);

    // Initial sync

    let service_initial_sync = InitialSyncService::new(
        Arc::new(network.clone()),
        Arc::clone(&backend) as _,
        Arc::new(DevnetSyncStatus::new(Arc::clone(&backend), chain.head_slot())),
        Arc::new(LoggingRegularSync),
        run_cmd.initial_sync_params.as_initial_sync_config(),
    );

    // ===================================================================== //
    //                             SERVICES (START)                          //
    // ===================================================================== //

    let app = ServiceMonitor::default().with(service_devnet)?.with(service_initial_sync)?;

    app.activate(BeaconServiceId::P2p);
    if !run_cmd.initial_sync_params.initial_sync_disabled {
        app.activate(BeaconServiceId::InitialSync);
    }

    app.start().await
}
