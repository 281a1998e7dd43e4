mod alerts;
mod config;

use alerts::{AlertLayer, AlertProvider, AlertQueue, DiscordWebhookProvider};
use anyhow::Result;
use config::ObservabilityConfig;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Installs the global subscriber: RUST_LOG filtered console output (default
/// `info`) plus the optional Discord alert sink. Must run inside a tokio runtime.
pub fn init_observability(component: &str) -> Result<()> {
    let config = ObservabilityConfig::from_env(component);
    let mut warnings = config.warnings.clone();

    let alert_layer = match config.alerts.as_ref() {
        Some(alerts) => match DiscordWebhookProvider::new(alerts.webhook_url.clone()) {
            Ok(provider) => {
                let providers: Vec<Arc<dyn AlertProvider>> = vec![Arc::new(provider)];
                Some(
                    AlertLayer::new(
                        AlertQueue::spawn(providers),
                        config.service_context.clone(),
                        alerts.min_level,
                    )
                    .with_filter(LevelFilter::from_level(alerts.min_level)),
                )
            }
            Err(err) => {
                warnings.push(format!("Discord alert client could not be built: {err}"));
                None
            }
        },
        None => None,
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Local time so TZ shows its offset in the console.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(alert_layer)
        .with(env_filter)
        .try_init()?;

    let context = &config.service_context;
    for warning in &warnings {
        warn!(
            service = %context.service_name,
            environment = %context.environment,
            component = %context.component,
            warning = %warning,
            "observability: config warning"
        );
    }

    info!(
        service = %context.service_name,
        environment = %context.environment,
        component = %context.component,
        alerts_enabled = config.alerts.is_some() && warnings.len() == config.warnings.len(),
        "observability: tracing initialised"
    );

    Ok(())
}
