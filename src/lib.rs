// src/lib.rs
// Public library surface for integration tests and the binary.

pub mod api;
pub mod config;
pub mod ingest;
pub mod metrics;
pub mod publish;
pub mod reading;
pub mod source;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::config::{CityList, Config, ConfigError};
pub use crate::ingest::scheduler::{shutdown_channel, Backoff, IngestLoop, LoopCfg, RunSummary};
pub use crate::ingest::{CycleReport, DeliveryOutcome};
pub use crate::publish::{Ack, Broker, BrokerError, PublishError, Publisher};
pub use crate::reading::{Payload, Reading};
pub use crate::source::{FetchError, HttpSource, WeatherSource};
