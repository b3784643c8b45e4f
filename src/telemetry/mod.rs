//! Telemetry initialization: structured logging and Prometheus metrics

pub mod metrics;

use crate::config::{AppEnv, Config};
use anyhow::Result;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "identity_core=info,tower_http=info";

/// Directive applied when `RUST_LOG` is unset
fn default_filter(env: AppEnv) -> String {
    match env {
        AppEnv::Local | AppEnv::Dev => "identity_core=debug,tower_http=debug".to_string(),
        AppEnv::Prod => DEFAULT_FILTER.to_string(),
    }
}

/// Install the global subscriber and, when enabled, the Prometheus recorder.
///
/// Returns the handle the server renders `/metrics` from.
pub fn init(config: &Config) -> Result<Option<PrometheusHandle>> {
    init_logging(config.env);

    if !config.metrics_enabled {
        return Ok(None);
    }
    let handle = metrics::install_prometheus_recorder()?;
    metrics::describe_metrics();
    Ok(Some(handle))
}

/// Human-readable for `local`, JSON otherwise.
fn init_logging(env: AppEnv) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(env).into());

    let registry = tracing_subscriber::registry().with(env_filter);

    match env {
        AppEnv::Local => {
            registry.with(tracing_subscriber::fmt::layer().pretty()).init();
        }
        AppEnv::Dev | AppEnv::Prod => {
            // Flatten event fields so `message` and our fields are top-level
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true);
            registry.with(fmt_layer).init();
        }
    }
}
