//! Logging and metrics setup for the beacon node.
//!
//! [Analytics::setup] installs the global tracing subscriber. Crates register their own OpenTelemetry
//! instruments against the global meter with [register_gauge_metric_instrument] and
//! [register_counter_metric_instrument].

use formatter::CustomFormatter;
use opentelemetry::metrics::{Counter, Gauge, Meter};
use std::fmt::Display;
use tracing_core::LevelFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

mod formatter;

#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    pub service_name: String,
    /// Overrides `RUST_LOG` when set.
    pub log_filter: Option<String>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self { service_name: "beacon-node".into(), log_filter: None }
    }
}

pub struct Analytics {
    config: AnalyticsConfig,
}

impl Analytics {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self { config }
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    /// Installs the global subscriber. Fails if one is already set.
    pub fn setup(&self) -> anyhow::Result<()> {
        let filter = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
        let filter = match &self.config.log_filter {
            Some(directives) => filter.parse(directives)?,
            None => filter.from_env()?,
        };

        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().event_format(CustomFormatter::new()))
            .with(filter)
            .try_init()?;
        Ok(())
    }
}

pub trait GaugeType<T> {
    fn register_gauge(meter: &Meter, name: String, description: String, unit: String) -> Gauge<T>;
}

impl GaugeType<f64> for f64 {
    fn register_gauge(meter: &Meter, name: String, description: String, unit: String) -> Gauge<f64> {
        meter.f64_gauge(name).with_description(description).with_unit(unit).build()
    }
}
impl GaugeType<u64> for u64 {
    fn register_gauge(meter: &Meter, name: String, description: String, unit: String) -> Gauge<u64> {
        meter.u64_gauge(name).with_description(description).with_unit(unit).build()
    }
}

pub fn register_gauge_metric_instrument<T: GaugeType<T> + Display>(
    crate_meter: &Meter,
    instrument_name: String,
    desc: String,
    unit: String,
) -> Gauge<T> {
    T::register_gauge(crate_meter, instrument_name, desc, unit)
}

pub trait CounterType<T> {
    fn register_counter(meter: &Meter, name: String, description: String, unit: String) -> Counter<T>;
}

impl CounterType<u64> for u64 {
    fn register_counter(meter: &Meter, name: String, description: String, unit: String) -> Counter<u64> {
        meter.u64_counter(name).with_description(description).with_unit(unit).build()
    }
}
impl CounterType<f64> for f64 {
    fn register_counter(meter: &Meter, name: String, description: String, unit: String) -> Counter<f64> {
        meter.f64_counter(name).with_description(description).with_unit(unit).build()
    }
}

pub fn register_counter_metric_instrument<T: CounterType<T> + Display>(
    crate_meter: &Meter,
    instrument_name: String,
    desc: String,
    unit: String,
) -> Counter<T> {
    T::register_counter(crate_meter, instrument_name, desc, unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::global;

    #[test]
    fn instruments_register_against_noop_meter() {
        let meter = global::meter("bc-analytics-test");
        let gauge = register_gauge_metric_instrument::<u64>(&meter, "slot".into(), "Slot".into(), "".into());
        let counter = register_counter_metric_instrument::<u64>(&meter, "blocks".into(), "Blocks".into(), "".into());
        gauge.record(3, &[]);
        counter.add(1, &[]);
    }

    #[test]
    fn invalid_filter_is_rejected() {
        let analytics =
            Analytics::new(AnalyticsConfig { log_filter: Some("bc_sync=notalevel".into()), ..Default::default() });
        assert_eq!(analytics.service_name(), "beacon-node");
        assert!(analytics.setup().is_err());
    }
}
