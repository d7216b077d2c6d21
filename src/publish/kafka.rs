// src/publish/kafka.rs
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;

use super::{Ack, Broker, BrokerError};
use crate::config::BrokerConfig;

/// Kafka producer with `acks=all` and idempotence, so an ack means the record
/// is replicated and per-key (per-city) order is kept within its partition.
#[derive(Clone)]
pub struct KafkaBroker {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaBroker {
    pub fn connect(cfg: &BrokerConfig) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set(
                "message.timeout.ms",
                cfg.publish_timeout.as_millis().to_string(),
            )
            .create()
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        Ok(Self {
            producer,
            send_timeout: cfg.publish_timeout,
        })
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn send(&self, topic: &str, key: &str, value: Vec<u8>) -> Result<Ack, BrokerError> {
        let record = FutureRecord::to(topic).key(key).payload(&value);
        match self
            .producer
            .send(record, Timeout::After(self.send_timeout))
            .await
        {
            Ok((partition, offset)) => Ok(Ack {
                topic: topic.to_string(),
                partition,
                offset,
            }),
            Err((e, _msg)) => Err(map_kafka_error(e)),
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?
            .map_err(map_kafka_error)
    }
}

fn map_kafka_error(e: KafkaError) -> BrokerError {
    match e.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::QueueFull,
        ) => BrokerError::Unavailable(e.to_string()),
        _ => BrokerError::Rejected(e.to_string()),
    }
}
