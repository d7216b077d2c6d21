// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use weather_ingest::source::FetchCause;
use weather_ingest::{
    Backoff, CityList, FetchError, LoopCfg, Payload, Publisher, Reading, WeatherSource,
};
use weather_ingest::publish::memory::MemoryBroker;

pub enum Behavior {
    /// Return this payload verbatim.
    Payload(Value),
    /// Return `{"seq": n}` with a per-source increasing counter.
    Counter,
    Timeout,
    Sleep(Duration),
    Panic,
}

pub struct ScriptedSource {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<Vec<String>>,
    seq: AtomicU64,
}

impl ScriptedSource {
    pub fn new(behaviors: Vec<(&str, Behavior)>) -> Self {
        Self {
            behaviors: behaviors
                .into_iter()
                .map(|(c, b)| (c.to_string(), b))
                .collect(),
            calls: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn object(v: &Value) -> Payload {
    v.as_object().cloned().expect("payload fixture must be an object")
}

#[async_trait]
impl WeatherSource for ScriptedSource {
    async fn fetch(&self, city: &str) -> Result<Reading, FetchError> {
        self.calls.lock().unwrap().push(city.to_string());
        match self.behaviors.get(city) {
            Some(Behavior::Payload(v)) => Ok(Reading::new(city, Utc::now(), object(v))),
            Some(Behavior::Counter) | None => {
                let n = self.seq.fetch_add(1, Ordering::SeqCst);
                Ok(Reading::new(
                    city,
                    Utc::now(),
                    object(&serde_json::json!({ "seq": n })),
                ))
            }
            Some(Behavior::Timeout) => Err(FetchError::new(city, FetchCause::Timeout)),
            Some(Behavior::Sleep(d)) => {
                tokio::time::sleep(*d).await;
                Ok(Reading::new(city, Utc::now(), Payload::new()))
            }
            Some(Behavior::Panic) => panic!("scripted panic for {city}"),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn cities(list: &[&str]) -> CityList {
    CityList::new(list.iter().copied()).unwrap()
}

pub fn publisher(broker: &Arc<MemoryBroker>, ack_timeout: Duration) -> Publisher {
    Publisher::new(broker.clone(), "weather", ack_timeout)
}

/// Back-to-back cycles, no failure backoff, bounded run.
pub fn bounded(max_cycles: u64) -> LoopCfg {
    LoopCfg {
        backoff: Backoff::disabled(),
        max_cycles: Some(max_cycles),
        ..LoopCfg::default()
    }
}
