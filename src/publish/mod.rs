// src/publish/mod.rs
//! Publisher: encode a reading and wait for the broker to acknowledge it.

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::histogram;
use serde::Serialize;
use thiserror::Error;

use crate::reading::Reading;

/// Broker confirmation that a message is durably queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("broker rejected message: {0}")]
    Rejected(String),
}

/// Keyed send on a named topic. Implementations must be all-or-nothing per
/// message and keep per-key ordering.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn send(&self, topic: &str, key: &str, value: Vec<u8>) -> Result<Ack, BrokerError>;

    /// Wait for outstanding messages before shutdown.
    async fn flush(&self, _timeout: Duration) -> Result<(), BrokerError> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum PublishCause {
    #[error("serialization: {0}")]
    Serialize(String),

    #[error("no ack after {0}ms")]
    Timeout(u64),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Error)]
#[error("publish failed for {city}: {cause}")]
pub struct PublishError {
    pub city: String,
    #[source]
    pub cause: PublishCause,
}

/// Shared, thread-safe handle used by every city and every cycle.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
    topic: String,
    ack_timeout: Duration,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>, topic: impl Into<String>, ack_timeout: Duration) -> Self {
        Self {
            broker,
            topic: topic.into(),
            ack_timeout,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Encode the reading fully, then send it keyed by city and await the ack.
    pub async fn publish(&self, reading: &Reading) -> Result<Ack, PublishError> {
        let fail = |cause: PublishCause| PublishError {
            city: reading.city().to_string(),
            cause,
        };

        let value = reading
            .to_wire()
            .map_err(|e| fail(PublishCause::Serialize(e.to_string())))?;

        let t0 = Instant::now();
        let sent = tokio::time::timeout(
            self.ack_timeout,
            self.broker.send(&self.topic, reading.city(), value),
        )
        .await;
        histogram!("ingest_publish_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        match sent {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(e)) => Err(fail(e.into())),
            Err(_) => Err(fail(PublishCause::Timeout(
                self.ack_timeout.as_millis() as u64,
            ))),
        }
    }

    pub async fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        self.broker.flush(timeout).await
    }
}
