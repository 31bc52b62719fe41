//! # icu-protocol
//!
//! Wire vocabulary shared by the Smart ICU collector and its monitors.
//!
//! Monitors speak one of two transports. MQTT monitors publish on a fixed topic
//! tree, CoAP monitors expose observable resources. Both carry the same small
//! JSON objects.
//!
//! - [`topic`] - MQTT topic grammar and subscription filters
//! - [`resource`] - CoAP resource paths
//! - [`sensor`] - The five sensor kinds and their spellings
//! - [`codec`] - JSON payload decoding and outbound bodies
//!
//! ## Example
//!
//! ```rust
//! use icu_protocol::{codec, topic, SensorKind, TopicClass};
//!
//! let class = topic::classify("telemetry/icu/m7/patient-state/heart-rate");
//! assert_eq!(class, TopicClass::Sample { monitor_id: "m7", kind: SensorKind::HeartRate });
//!
//! let payload = codec::decode(br#"{"heartRate": 72, "unit": "bpm", "timestamp": 10}"#).unwrap();
//! assert!(payload.contains_key("heartRate"));
//! ```

pub mod codec;
pub mod resource;
pub mod sensor;
pub mod topic;

pub use codec::{decode, Payload, ProtocolError};
pub use resource::ObservedResource;
pub use sensor::SensorKind;
pub use topic::TopicClass;
