// src/config/mod.rs
//! Process configuration, read once at startup from the environment.
//!
//! Every component receives the pieces it needs by reference; nothing here is
//! global. A `ConfigError` is fatal and stops the process before the first cycle.

pub mod cities;

pub use cities::CityList;

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::ingest::scheduler::{Backoff, LoopCfg};

pub const DEFAULT_TOPIC: &str = "weather";
pub const DEFAULT_BROKER: &str = "localhost:9092";
pub const DEFAULT_CITIES: &str = "Paris,London,New York,Tokyo,Sydney";
pub const DEFAULT_STORE_ROWS_PER_CITY: usize = 10_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("city list is empty")]
    EmptyCityList,

    #[error("city '{0}' is listed more than once")]
    DuplicateCity(String),
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub api_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub brokers: String,
    pub topic: String,
    pub publish_timeout: Duration,
}

/// Extra wait on top of the producer's own delivery timeout, so a record the
/// client library is still delivering is not reported as failed.
pub const ACK_MARGIN: Duration = Duration::from_secs(1);

impl BrokerConfig {
    /// How long the publisher waits for an ack. Always outlasts `publish_timeout`.
    pub fn ack_timeout(&self) -> Duration {
        self.publish_timeout + ACK_MARGIN.max(self.publish_timeout / 4)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub provider: ProviderConfig,
    pub broker: BrokerConfig,
    pub cities: CityList,
    pub scheduler: LoopCfg,
    pub http_addr: SocketAddr,
    /// Rows kept per city in the query store; oldest observations go first.
    pub store_rows_per_city: usize,
}

impl Config {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build a config from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| {
            lookup(k)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = get("WEATHER_API_KEY").ok_or(ConfigError::Missing("WEATHER_API_KEY"))?;
        let api_url = get("WEATHER_API_URL").ok_or(ConfigError::Missing("WEATHER_API_URL"))?;
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                var: "WEATHER_API_URL",
                reason: format!("expected an http(s) URL, got '{api_url}'"),
            });
        }

        let cities = CityList::parse(
            get("WEATHER_CITIES")
                .as_deref()
                .unwrap_or(DEFAULT_CITIES),
        )?;

        let millis = |var: &'static str, default: u64| -> Result<u64, ConfigError> {
            match get(var) {
                None => Ok(default),
                Some(v) => v.parse::<u64>().map_err(|e| ConfigError::Invalid {
                    var,
                    reason: e.to_string(),
                }),
            }
        };

        let nonzero = |var: &'static str, default: u64| -> Result<u64, ConfigError> {
            match millis(var, default)? {
                0 => Err(ConfigError::Invalid {
                    var,
                    reason: "must be greater than zero".into(),
                }),
                n => Ok(n),
            }
        };

        let interval_ms = millis("INGEST_INTERVAL_MS", 0)?;
        let concurrent = match get("INGEST_CONCURRENT").as_deref() {
            None => false,
            Some(v) => parse_bool(v).ok_or_else(|| ConfigError::Invalid {
                var: "INGEST_CONCURRENT",
                reason: format!("expected a boolean, got '{v}'"),
            })?,
        };
        let backoff_min = millis("FAILURE_BACKOFF_MS", 1_000)?;
        let backoff_max = millis("FAILURE_BACKOFF_MAX_MS", 30_000)?;
        if backoff_max < backoff_min {
            return Err(ConfigError::Invalid {
                var: "FAILURE_BACKOFF_MAX_MS",
                reason: "must be >= FAILURE_BACKOFF_MS".into(),
            });
        }

        let http_addr = get("HTTP_ADDR")
            .as_deref()
            .unwrap_or("0.0.0.0:9000")
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                var: "HTTP_ADDR",
                reason: e.to_string(),
            })?;

        Ok(Config {
            provider: ProviderConfig {
                api_key,
                api_url,
                timeout: Duration::from_millis(nonzero("HTTP_TIMEOUT_MS", 10_000)?),
            },
            broker: BrokerConfig {
                brokers: get("KAFKA_BROKER").unwrap_or_else(|| DEFAULT_BROKER.to_string()),
                topic: get("KAFKA_TOPIC").unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
                publish_timeout: Duration::from_millis(nonzero("PUBLISH_TIMEOUT_MS", 5_000)?),
            },
            cities,
            scheduler: LoopCfg {
                interval: (interval_ms > 0).then(|| Duration::from_millis(interval_ms)),
                concurrent,
                grace: Duration::from_millis(millis("SHUTDOWN_GRACE_MS", 5_000)?),
                backoff: Backoff::new(
                    Duration::from_millis(backoff_min),
                    Duration::from_millis(backoff_max),
                ),
                max_cycles: None,
            },
            http_addr,
            store_rows_per_city: nonzero(
                "STORE_MAX_ROWS_PER_CITY",
                DEFAULT_STORE_ROWS_PER_CITY as u64,
            )? as usize,
        })
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
