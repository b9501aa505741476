use anyhow::{anyhow, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::TelemetryConfig;

/// Initialize the tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured log level. JSON output
/// carries the active span list so every event shows which component emitted it.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_list(true)
            .with_current_span(true);
        registry.with(fmt_layer).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))?;

    tracing::info!(service = %config.service_name, "telemetry initialized");
    Ok(())
}
