//! # icu-transport
//!
//! Transport adapters feeding the Smart ICU registry.
//!
//! Two collectors implement [`icu_core::Collector`]:
//!
//! - **MQTT** - One broker connection subscribed to telemetry and collector commands
//! - **CoAP** - A registration endpoint plus one observe relation per monitor resource
//!
//! Both decode payloads with `icu-protocol` and apply them through the same
//! router, so the health check drives either without knowing which it has.
//!
//! ```rust,ignore
//! use icu_core::{Collector, TracingArchive};
//! use icu_transport::{CoapCollector, CoapConfig};
//! use std::sync::Arc;
//!
//! let coap = CoapCollector::new(CoapConfig::default(), Arc::new(TracingArchive));
//! coap.start().await?;
//! coap.turn_on_alarm("monitor-7").await?;
//! ```

pub mod coap;
pub mod endpoint;
pub mod error;
pub mod exchange;
pub mod message;
pub mod mqtt;
pub mod observe;

pub use coap::{CoapCollector, CoapConfig};
pub use endpoint::ConnectionState;
pub use error::TransportError;
pub use mqtt::{MqttCollector, MqttConfig};
