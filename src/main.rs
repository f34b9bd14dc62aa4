use std::sync::Arc;
use std::time::Duration;

use bridge_core::config::{
    degraded_error_rate_from_env_value, failure_threshold_from_env_value,
    optional_path_from_env_value, path_from_env_value, poll_interval_from_env_value,
    status_window_from_env_value, terminology_timeout_from_env_value,
};
use bridge_core::{
    BridgeConfig, EndpointDefinition, HealthPoller, IntegrationMonitor, MemoryStore,
    MonitorConfig, TcpProbe,
};
use bridge_mapping::{MappingStore, RuleSet};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Upper bound for one TCP health probe.
const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Resolve configuration from the process environment, once.
fn load_config() -> anyhow::Result<BridgeConfig> {
    let monitor = MonitorConfig::new(
        status_window_from_env_value(env("BRIDGE_STATUS_WINDOW"))?,
        failure_threshold_from_env_value(env("BRIDGE_FAILURE_THRESHOLD"))?,
        degraded_error_rate_from_env_value(env("BRIDGE_DEGRADED_ERROR_RATE"))?,
    )?;

    Ok(BridgeConfig::new(
        path_from_env_value("BRIDGE_RULES_PATH", env("BRIDGE_RULES_PATH"))?,
        optional_path_from_env_value(env("BRIDGE_ENDPOINTS_PATH")),
        monitor,
        terminology_timeout_from_env_value(env("BRIDGE_TERMINOLOGY_TIMEOUT_MS"))?,
        poll_interval_from_env_value(env("BRIDGE_POLL_INTERVAL_SECS"))?,
    )?)
}

/// Monitor daemon for the HL7 / FHIR bridge
///
/// Validates the rule set, registers the configured integration endpoints and probes them
/// on a fixed interval until Ctrl-C. Endpoint status transitions and alerts are logged by
/// the monitor.
///
/// # Environment Variables
/// - `BRIDGE_RULES_PATH`: YAML rule set (required)
/// - `BRIDGE_ENDPOINTS_PATH`: YAML endpoint definitions (optional)
/// - `BRIDGE_STATUS_WINDOW`: event count (`50`) or duration (`15m`) (required)
/// - `BRIDGE_FAILURE_THRESHOLD`: consecutive failures that mark an endpoint down (required)
/// - `BRIDGE_DEGRADED_ERROR_RATE`: error-rate fraction above which an endpoint is degraded (required)
/// - `BRIDGE_POLL_INTERVAL_SECS`: seconds between health polls (default: 30)
/// - `BRIDGE_TERMINOLOGY_TIMEOUT_MS`: bound for remote terminology lookups (default: 2000)
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bridge_run=info".parse()?)
                .add_directive("bridge_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;
    tracing::info!(
        rules = %config.rules_path().display(),
        window = %config.monitor().window(),
        failure_threshold = config.monitor().failure_threshold(),
        degraded_error_rate = config.monitor().degraded_error_rate(),
        terminology_timeout_ms = config.terminology_timeout().as_millis() as u64,
        "++ Starting bridge monitor"
    );

    let rule_set = Arc::new(RuleSet::from_path(config.rules_path())?);
    let mapping = MappingStore::new(rule_set).await?;
    let invalid = mapping.validate_all().await?;
    for error in &invalid {
        tracing::warn!(rule = %error.rule, error = %error, "rule failed validation and is disabled");
    }
    tracing::info!(invalid = invalid.len(), "rule set validated");

    let store = Arc::new(MemoryStore::new());
    let monitor = Arc::new(IntegrationMonitor::new(store, *config.monitor()));

    if let Some(path) = config.endpoints_path() {
        for definition in EndpointDefinition::load(path)? {
            monitor.register_endpoint(definition).await?;
        }
    } else {
        tracing::warn!("BRIDGE_ENDPOINTS_PATH not set; no endpoints to monitor");
    }

    let probe_timeout = (config.poll_interval() / 2).min(MAX_PROBE_TIMEOUT);
    let poller = HealthPoller::new(
        Arc::clone(&monitor),
        Arc::new(TcpProbe),
        config.poll_interval(),
        probe_timeout,
    )
    .spawn();

    tokio::signal::ctrl_c().await?;
    tracing::info!("-- Shutting down bridge monitor");
    poller.stop().await?;

    for endpoint in monitor.endpoints().await? {
        tracing::info!(endpoint = %endpoint.id, status = %endpoint.status, "final endpoint status");
    }
    Ok(())
}
