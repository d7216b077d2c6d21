// src/publish/memory.rs
//! In-process broker: one ordered log per topic, scriptable faults.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Ack, Broker, BrokerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: Vec<u8>,
    pub offset: i64,
}

#[derive(Debug, Clone)]
enum Fault {
    Fail(BrokerError),
    Stall(Duration),
}

#[derive(Debug, Default)]
pub struct MemoryBroker {
    topics: Mutex<HashMap<String, Vec<Record>>>,
    faults: Mutex<HashMap<usize, Fault>>,
    sends: AtomicUsize,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `n`th send (0-based, across all topics) fail with `err`.
    pub fn fail_nth(&self, n: usize, err: BrokerError) {
        self.faults
            .lock()
            .expect("faults mutex poisoned")
            .insert(n, Fault::Fail(err));
    }

    /// Delay the `n`th send before it is appended.
    pub fn stall_nth(&self, n: usize, delay: Duration) {
        self.faults
            .lock()
            .expect("faults mutex poisoned")
            .insert(n, Fault::Stall(delay));
    }

    /// Snapshot of a topic's log in offset order.
    pub fn messages(&self, topic: &str) -> Vec<Record> {
        self.topics
            .lock()
            .expect("topics mutex poisoned")
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    pub fn topics(&self) -> Vec<String> {
        let mut t: Vec<String> = self
            .topics
            .lock()
            .expect("topics mutex poisoned")
            .keys()
            .cloned()
            .collect();
        t.sort();
        t
    }

    pub fn send_attempts(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn send(&self, topic: &str, key: &str, value: Vec<u8>) -> Result<Ack, BrokerError> {
        let n = self.sends.fetch_add(1, Ordering::SeqCst);
        let fault = self
            .faults
            .lock()
            .expect("faults mutex poisoned")
            .remove(&n);

        match fault {
            Some(Fault::Fail(e)) => return Err(e),
            // Dropping the future while stalled leaves the log untouched.
            Some(Fault::Stall(d)) => tokio::time::sleep(d).await,
            None => {}
        }

        let mut topics = self.topics.lock().expect("topics mutex poisoned");
        let log = topics.entry(topic.to_string()).or_default();
        let offset = log.len() as i64;
        log.push(Record {
            key: key.to_string(),
            value,
            offset,
        });
        Ok(Ack {
            topic: topic.to_string(),
            partition: 0,
            offset,
        })
    }
}
