//! # icu-core
//!
//! Registry, routing, and alarm dispatch for the Smart ICU monitor collectors.
//!
//! This crate provides the transport-independent building blocks:
//!
//! - **Registry** - Concurrent per-collector set of monitors
//! - **Router** - Validates decoded messages and applies them to a registry
//! - **Collector** - Trait implemented by each transport adapter
//! - **HealthCheck** - Periodic scan that turns on alarms for deteriorating patients
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│   Router    │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │                   │
//!        │                   ▼                   ▼
//!        │            ┌─────────────┐     ┌─────────────┐
//!        │            │   Archive   │     │ HealthCheck │
//!        │            └─────────────┘     └─────────────┘
//!        └──────────── turn_on_alarm ────────────┘
//! ```

pub mod archive;
pub mod collector;
pub mod health;
pub mod monitor;
pub mod policy;
pub mod registry;
pub mod router;

pub use archive::{ArchiveError, ArchiveSink, TelemetrySample, TracingArchive};
pub use collector::{AlarmDispatch, Collector, CollectorError};
pub use health::{HealthCheck, HealthCheckReport};
pub use monitor::{Monitor, MonitorId};
pub use policy::{DeteriorationPolicy, NoDeterioration, PolicyError};
pub use registry::{Registry, Update};
pub use router::{Applied, Rejection};
