// src/store.rs
//! Time-series rows keyed by `(city, observedAt)`, built from published messages.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::DEFAULT_STORE_ROWS_PER_CITY;
use crate::publish::{Ack, Broker, BrokerError};
use crate::reading::{Payload, Reading};

#[derive(Debug, Error)]
#[error("malformed message: {0}")]
pub struct StoreError(String);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    #[serde(rename = "observedAt")]
    pub observed_at: DateTime<Utc>,
    pub value: f64,
}

type Series = BTreeMap<DateTime<Utc>, Payload>;

/// In-memory column-store stand-in. Rows for the same key overwrite each other,
/// and each city keeps at most `cap` rows, dropping the oldest observations.
#[derive(Debug, Clone)]
pub struct TimeSeriesStore {
    rows: Arc<RwLock<HashMap<String, Series>>>,
    cap: usize,
}

impl Default for TimeSeriesStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_STORE_ROWS_PER_CITY)
    }
}

impl TimeSeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            rows: Arc::default(),
            cap: cap.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn insert(&self, reading: &Reading) {
        let mut rows = self.rows.write().expect("store rwlock poisoned");
        let series = rows.entry(reading.city().to_string()).or_default();
        series.insert(reading.observed_at(), reading.payload().clone());
        while series.len() > self.cap {
            series.pop_first();
        }
    }

    /// Raw rows for one city, oldest first; `last` keeps only the newest n.
    pub fn rows(&self, city: &str, last: Option<usize>) -> Vec<Reading> {
        let rows = self.rows.read().expect("store rwlock poisoned");
        let Some(series) = rows.get(city) else {
            return Vec::new();
        };
        let skip = last.map_or(0, |n| series.len().saturating_sub(n));
        series
            .iter()
            .skip(skip)
            .map(|(at, payload)| Reading::new(city, *at, payload.clone()))
            .collect()
    }

    /// Distinct cities, sorted.
    pub fn cities(&self) -> Vec<String> {
        let rows = self.rows.read().expect("store rwlock poisoned");
        let mut out: Vec<String> = rows.keys().cloned().collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        let rows = self.rows.read().expect("store rwlock poisoned");
        rows.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric series for one metric, ordered by observation time.
    /// Rows where the metric is absent or non-numeric are skipped.
    pub fn series(&self, city: &str, metric: &str) -> Vec<Point> {
        let rows = self.rows.read().expect("store rwlock poisoned");
        let Some(series) = rows.get(city) else {
            return Vec::new();
        };
        let paths = metric_paths(metric);
        series
            .iter()
            .filter_map(|(at, payload)| {
                paths
                    .iter()
                    .find_map(|p| lookup_number(payload, p))
                    .map(|value| Point {
                        observed_at: *at,
                        value,
                    })
            })
            .collect()
    }
}

/// Candidate payload paths for a metric name. Unknown names are taken as a
/// dotted path into the payload.
fn metric_paths(metric: &str) -> Vec<String> {
    let aliases: &[&str] = match metric.to_ascii_lowercase().as_str() {
        "temperature" | "temp" => &["temperature", "temp", "temp_c", "current.temp_c", "main.temp"],
        "humidity" => &["humidity", "current.humidity", "main.humidity"],
        _ => &[],
    };
    if aliases.is_empty() {
        vec![metric.to_string()]
    } else {
        aliases.iter().map(|s| s.to_string()).collect()
    }
}

fn lookup_number(payload: &Payload, path: &str) -> Option<f64> {
    let mut parts = path.split('.');
    let mut cur = payload.get(parts.next()?)?;
    for p in parts {
        cur = cur.get(p)?;
    }
    match cur {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Consumer-side writer: decodes a whole message, then inserts one row.
#[derive(Debug, Clone)]
pub struct StoreWriter {
    store: TimeSeriesStore,
}

impl StoreWriter {
    pub fn new(store: TimeSeriesStore) -> Self {
        Self { store }
    }

    pub fn apply(&self, value: &[u8]) -> Result<(), StoreError> {
        let reading = Reading::from_wire(value).map_err(|e| StoreError(e.to_string()))?;
        self.store.insert(&reading);
        Ok(())
    }
}

/// Broker wrapper that mirrors every acknowledged message into a local store.
pub struct MirroredBroker<B> {
    inner: B,
    writer: StoreWriter,
}

impl<B: Broker> MirroredBroker<B> {
    pub fn new(inner: B, writer: StoreWriter) -> Self {
        Self { inner, writer }
    }
}

#[async_trait]
impl<B: Broker> Broker for MirroredBroker<B> {
    async fn send(&self, topic: &str, key: &str, value: Vec<u8>) -> Result<Ack, BrokerError> {
        let mirror = value.clone();
        let ack = self.inner.send(topic, key, value).await?;
        if let Err(e) = self.writer.apply(&mirror) {
            tracing::warn!(key, error = %e, "local mirror rejected message");
        }
        Ok(ack)
    }

    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        self.inner.flush(timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn reading(city: &str, ts: &str, payload: serde_json::Value) -> Reading {
        Reading::new(city, at(ts), payload.as_object().cloned().unwrap())
    }

    #[test]
    fn series_is_time_ordered_and_resolves_aliases() {
        let store = TimeSeriesStore::new();
        store.insert(&reading("Paris", "2024-01-01T02:00:00Z", json!({"current": {"temp_c": 21.0}})));
        store.insert(&reading("Paris", "2024-01-01T01:00:00Z", json!({"current": {"temp_c": 19.5}})));
        store.insert(&reading("Paris", "2024-01-01T03:00:00Z", json!({"note": "no temp"})));

        let s = store.series("Paris", "temperature");
        assert_eq!(
            s.iter().map(|p| p.value).collect::<Vec<_>>(),
            vec![19.5, 21.0]
        );
        assert!(s[0].observed_at < s[1].observed_at);
        assert!(store.series("Lima", "temperature").is_empty());
    }

    #[test]
    fn dotted_paths_and_numeric_strings() {
        let store = TimeSeriesStore::new();
        store.insert(&reading("Oslo", "2024-01-01T00:00:00Z", json!({"wind": {"kph": "12.5"}})));
        assert_eq!(store.series("Oslo", "wind.kph")[0].value, 12.5);
    }

    #[test]
    fn per_city_cap_evicts_oldest_observations() {
        let store = TimeSeriesStore::with_capacity(3);
        for minute in 0..10 {
            let ts = format!("2024-01-01T00:{minute:02}:00Z");
            store.insert(&reading("Paris", &ts, json!({"temp": minute})));
        }
        store.insert(&reading("Lima", "2024-01-01T00:00:00Z", json!({"temp": 18})));

        assert_eq!(store.len(), 4);
        let temps: Vec<f64> = store.series("Paris", "temp").iter().map(|p| p.value).collect();
        assert_eq!(temps, vec![7.0, 8.0, 9.0]);
        assert_eq!(store.rows("Lima", None).len(), 1);
    }

    #[test]
    fn rows_returns_newest_tail_in_time_order() {
        let store = TimeSeriesStore::new();
        store.insert(&reading("Oslo", "2024-01-01T02:00:00Z", json!({"temp": 2})));
        store.insert(&reading("Oslo", "2024-01-01T01:00:00Z", json!({"temp": 1})));
        store.insert(&reading("Oslo", "2024-01-01T03:00:00Z", json!({"temp": 3})));

        let all = store.rows("Oslo", None);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].observed_at(), at("2024-01-01T01:00:00Z"));

        let tail = store.rows("Oslo", Some(2));
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].payload()["temp"], 2);
        assert_eq!(tail[1].city(), "Oslo");
        assert!(store.rows("Lima", None).is_empty());
    }

    #[test]
    fn writer_rejects_partial_messages() {
        let store = TimeSeriesStore::new();
        let w = StoreWriter::new(store.clone());
        assert!(w.apply(br#"{"city":"Paris","observedAt":"2024-01-01T00:00:00Z""#).is_err());
        assert!(store.is_empty());
    }
}
