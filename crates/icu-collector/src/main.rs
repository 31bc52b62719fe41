//! # ICU Collector
//!
//! Bridges Smart ICU bedside monitors speaking MQTT or CoAP to the registry,
//! archive, and alarm pipeline.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! icu-collector
//!
//! # Point at another broker
//! ICU__MQTT__HOST=broker.ward4 ICU__MQTT__PORT=8883 icu-collector
//!
//! # More logging
//! RUST_LOG=icu_transport=debug icu-collector
//! ```

mod config;
mod metrics;
mod service;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "icu_collector=info,icu_transport=info,icu_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        broker = %config.mqtt.host,
        broker_port = config.mqtt.port,
        coap_port = config.coap.port,
        "Starting ICU collector"
    );

    // Initialize metrics
    metrics::init_metrics();

    service::run(config).await?;

    Ok(())
}
