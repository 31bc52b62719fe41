//! Service wiring: collectors, health check, shutdown.

use crate::config::Config;
use crate::metrics;
use anyhow::{Context, Result};
use icu_core::{ArchiveSink, Collector, HealthCheck, NoDeterioration, TracingArchive};
use icu_transport::{CoapCollector, MqttCollector};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Run the collector until Ctrl-C.
///
/// The MQTT collector is started first; a broker that cannot be reached is
/// logged and the service carries on. The CoAP endpoint must bind.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the CoAP endpoint
/// cannot be bound.
pub async fn run(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!(error = %e, "Failed to start metrics server");
        }
    }

    let archive: Arc<dyn ArchiveSink> = Arc::new(TracingArchive);
    let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();
    let mut coap_relations = None;

    if config.mqtt.enabled {
        let mqtt = Arc::new(MqttCollector::new(config.mqtt_config(), Arc::clone(&archive)));
        if let Err(e) = mqtt.start().await {
            warn!(error = %e, "MQTT collector not started");
        }
        collectors.push(mqtt);
    }

    if config.coap.enabled {
        let coap = Arc::new(CoapCollector::new(config.coap_config()?, Arc::clone(&archive)));
        coap.start()
            .await
            .context("Failed to start the CoAP collector")?;
        coap_relations = Some(Arc::clone(&coap));
        collectors.push(coap);
    }

    let check = collectors
        .iter()
        .fold(HealthCheck::new(Arc::new(NoDeterioration)), |check, c| {
            check.with_collector(Arc::clone(c))
        });

    let gauged = collectors.clone();
    let interval = config.health_interval();
    let scheduler = Arc::new(check).spawn(interval, move |report| {
        metrics::record_health_check(report);
        for collector in &gauged {
            metrics::set_registered_monitors(collector.name(), collector.registry().len());
        }
        if let Some(coap) = &coap_relations {
            metrics::set_observe_relations(coap.relations().len());
        }
    });
    info!(interval_secs = interval.as_secs(), "Health check scheduled");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    scheduler.abort();
    for collector in &collectors {
        collector.stop().await;
    }
    Ok(())
}
