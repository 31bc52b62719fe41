//! Collector configuration.
//!
//! Configuration is layered from:
//! - Built-in defaults
//! - The first TOML file found on the search path
//! - Environment variables (`ICU__<SECTION>__<KEY>`, e.g. `ICU__MQTT__PORT=8883`)

use anyhow::{Context, Result};
use icu_transport::{CoapConfig, MqttConfig};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Files searched by [`Config::load`], first match wins.
const CONFIG_PATHS: [&str; 3] = [
    "icu-collector.toml",
    "/etc/icu-collector/collector.toml",
    "~/.config/icu-collector/collector.toml",
];

/// Collector configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// MQTT broker connection.
    #[serde(default)]
    pub mqtt: BrokerConfig,

    /// CoAP registration endpoint.
    #[serde(default)]
    pub coap: CoapServerConfig,

    /// Health check scheduling.
    #[serde(default)]
    pub health: HealthConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// MQTT broker connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Run the MQTT collector.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Broker host name or address.
    #[serde(default = "default_broker_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// Client identifier.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Topic namespace.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// CONNACK timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// CoAP registration endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoapServerConfig {
    /// Run the CoAP collector.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address to bind to.
    #[serde(default = "default_coap_host")]
    pub host: String,

    /// Port to bind to.
    #[serde(default = "default_coap_port")]
    pub port: u16,

    /// Time allowed for a monitor to answer an observe request, in seconds.
    #[serde(default = "default_observe_timeout")]
    pub observe_timeout_secs: u64,
}

/// Health check scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Seconds between two runs.
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_true() -> bool {
    true
}

fn default_broker_host() -> String {
    "127.0.0.1".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "collector".to_string()
}

fn default_namespace() -> String {
    "smartICU".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_coap_host() -> String {
    "::".to_string()
}

fn default_coap_port() -> u16 {
    5683
}

fn default_observe_timeout() -> u64 {
    5
}

fn default_health_interval() -> u64 {
    60
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_broker_host(),
            port: default_broker_port(),
            client_id: default_client_id(),
            namespace: default_namespace(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for CoapServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_coap_host(),
            port: default_coap_port(),
            observe_timeout_secs: default_observe_timeout(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the search path and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let mut file = Self::default();
        for path in &CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            let path = Path::new(expanded.as_ref());
            if path.exists() {
                tracing::info!(path = %path.display(), "Loading configuration file");
                file = Self::from_file(path)?;
                break;
            }
        }
        file.with_env_overrides()
    }

    /// Apply `ICU__*` environment overrides on top of this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an override has the wrong type.
    pub fn with_env_overrides(&self) -> Result<Self> {
        ::config::Config::builder()
            .add_source(::config::Config::try_from(self).context("Failed to layer configuration")?)
            .add_source(
                ::config::Environment::with_prefix("ICU")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Settings for the MQTT collector.
    #[must_use]
    pub fn mqtt_config(&self) -> MqttConfig {
        MqttConfig {
            host: self.mqtt.host.clone(),
            port: self.mqtt.port,
            client_id: self.mqtt.client_id.clone(),
            namespace: self.mqtt.namespace.clone(),
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
            connect_timeout: Duration::from_secs(self.mqtt.connect_timeout_secs),
            ..MqttConfig::default()
        }
    }

    /// Settings for the CoAP collector.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind host is not an IP address.
    pub fn coap_config(&self) -> Result<CoapConfig> {
        let host = self.coap.host.trim_start_matches('[').trim_end_matches(']');
        let ip: IpAddr = host
            .parse()
            .with_context(|| format!("Invalid CoAP bind address: {}", self.coap.host))?;

        Ok(CoapConfig {
            bind_addr: SocketAddr::new(ip, self.coap.port),
            observe_timeout: Duration::from_secs(self.coap.observe_timeout_secs),
            ..CoapConfig::default()
        })
    }

    /// Time between two health check runs.
    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health.interval_secs.max(1))
    }
}
