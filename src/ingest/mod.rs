// src/ingest/mod.rs
pub mod scheduler;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

use crate::publish::{Ack, PublishError, Publisher};
use crate::source::{FetchError, WeatherSource};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_cycles_total", "Completed passes over the city list.");
        describe_counter!(
            "ingest_delivered_total",
            "Readings acknowledged by the broker."
        );
        describe_counter!(
            "ingest_fetch_errors_total",
            "Provider fetch failures (transport, status, decode)."
        );
        describe_counter!(
            "ingest_publish_errors_total",
            "Broker publish failures (unavailable, timeout, serialization)."
        );
        describe_counter!(
            "ingest_lost_total",
            "City pipelines that panicked or were abandoned at shutdown."
        );
        describe_histogram!("ingest_fetch_ms", "Provider fetch time in milliseconds.");
        describe_histogram!("ingest_publish_ms", "Publish-to-ack time in milliseconds.");
        describe_gauge!("ingest_last_cycle_ts", "Unix ts when the last cycle finished.");
    });
}

/// Result of one city's pipeline within a cycle.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered(Ack),
    FetchFailed(FetchError),
    PublishFailed(PublishError),
    /// The pipeline task panicked; the message is the panic payload when it is a string.
    Panicked(String),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered(_) => "delivered",
            DeliveryOutcome::FetchFailed(_) => "fetch-failed",
            DeliveryOutcome::PublishFailed(_) => "publish-failed",
            DeliveryOutcome::Panicked(_) => "panicked",
        }
    }
}

/// Outcomes of one pass over the city list, in city-list order.
#[derive(Debug)]
pub struct CycleReport {
    pub cycle: u64,
    pub outcomes: Vec<(String, DeliveryOutcome)>,
    /// True when shutdown cut the cycle short. Cities that never started are absent.
    pub interrupted: bool,
    /// Cities still in flight when the grace period ran out, in city-list order.
    pub abandoned: Vec<String>,
}

impl CycleReport {
    pub fn delivered(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::Delivered(_)))
    }

    pub fn fetch_failed(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::FetchFailed(_)))
    }

    pub fn publish_failed(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::PublishFailed(_)))
    }

    pub fn panicked(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::Panicked(_)))
    }

    pub fn outcome_for(&self, city: &str) -> Option<&DeliveryOutcome> {
        self.outcomes
            .iter()
            .find(|(c, _)| c == city)
            .map(|(_, o)| o)
    }

    fn count(&self, f: impl Fn(&DeliveryOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| f(o)).count()
    }
}

/// Fetch one city and, only on success, publish it once.
/// Failures are reported here and returned as an outcome; nothing propagates.
pub async fn run_city(
    source: &dyn WeatherSource,
    publisher: &Publisher,
    city: &str,
) -> DeliveryOutcome {
    let reading = match source.fetch(city).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(city, provider = source.name(), error = %e, "fetch failed");
            counter!("ingest_fetch_errors_total", "city" => city.to_string()).increment(1);
            return DeliveryOutcome::FetchFailed(e);
        }
    };

    match publisher.publish(&reading).await {
        Ok(ack) => {
            tracing::debug!(
                city,
                topic = %ack.topic,
                partition = ack.partition,
                offset = ack.offset,
                "reading delivered"
            );
            counter!("ingest_delivered_total", "city" => city.to_string()).increment(1);
            DeliveryOutcome::Delivered(ack)
        }
        Err(e) => {
            // Dropped here; the next cycle fetches a fresh reading.
            tracing::warn!(city, error = %e, "publish failed");
            counter!("ingest_publish_errors_total", "city" => city.to_string()).increment(1);
            DeliveryOutcome::PublishFailed(e)
        }
    }
}
