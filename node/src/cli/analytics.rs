use bc_analytics::AnalyticsConfig;
use clap::Args;
use serde::{Deserialize, Serialize};

/// Parameters used to config analytics.
#[derive(Debug, Clone, Args, Deserialize, Serialize)]
pub struct AnalyticsParams {
    /// Name of the service.
    #[arg(env = "BEACON_ANALYTICS_SERVICE_NAME", long, default_value = "beacon-node")]
    pub analytics_service_name: String,

    /// Log filter directives, such as `info,bc_sync=debug`. Overrides `RUST_LOG`.
    #[arg(env = "BEACON_LOG", long, value_name = "DIRECTIVES")]
    pub log_filter: Option<String>,
}

impl AnalyticsParams {
    pub fn as_analytics_config(&self) -> AnalyticsConfig {
        AnalyticsConfig { service_name: self.analytics_service_name.clone(), log_filter: self.log_filter.clone() }
    }
}
