pub mod analytics;
pub mod devnet;
pub mod initial_sync;

pub use analytics::*;
pub use devnet::*;
pub use initial_sync::*;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Beacon node: syncs the beacon chain from its peers.
#[derive(Clone, Debug, clap::Parser, Deserialize, Serialize)]
pub struct RunCmd {
    /// The human-readable name for this node.
    #[arg(env = "BEACON_NAME", long, value_name = "NAME")]
    pub name: Option<String>,

    /// Load the node configuration from a TOML, JSON or YAML file instead of the command line.
    #[arg(env = "BEACON_CONFIG", long, value_name = "PATH")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    #[allow(missing_docs)]
    #[clap(flatten)]
    pub initial_sync_params: InitialSyncParams,

    #[allow(missing_docs)]
    #[clap(flatten)]
    pub analytics_params: AnalyticsParams,

    #[allow(missing_docs)]
    #[clap(flatten)]
    pub devnet_params: DevnetParams,

    /// Sync from a simulated peer serving a generated chain over the in-process network.
    #[arg(env = "BEACON_DEVNET", long)]
    pub devnet: bool,
}

impl RunCmd {
    pub fn check_mode(&self) -> anyhow::Result<()> {
        if !self.devnet {
            anyhow::bail!("No network transport is available. Run the node against a simulated peer with `--devnet`.");
        }
        if self.devnet_params.devnet_chain_length == 0 {
            anyhow::bail!("The devnet chain must contain at least one block");
        }
        if self.devnet_params.devnet_finalized_slot > self.devnet_params.devnet_chain_length {
            anyhow::bail!(
                "The devnet finalized slot ({}) cannot be past the end of the chain ({})",
                self.devnet_params.devnet_finalized_slot,
                self.devnet_params.devnet_chain_length
            );
        }
        Ok(())
    }

    pub fn node_name(&self) -> &str {
        self.name.as_deref().unwrap_or("beacon")
    }
}
