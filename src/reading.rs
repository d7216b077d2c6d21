// src/reading.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider attributes (temperature, humidity, ...) passed through verbatim.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// One observation for one city at one fetch instant.
///
/// Fields are private so a reading cannot be changed after the fetch that
/// produced it. The serialized form is the broker wire format:
/// `{"city": .., "observedAt": RFC 3339, "payload": {..}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    city: String,
    #[serde(rename = "observedAt")]
    observed_at: DateTime<Utc>,
    payload: Payload,
}

impl Reading {
    pub fn new(city: impl Into<String>, observed_at: DateTime<Utc>, payload: Payload) -> Self {
        Self {
            city: city.into(),
            observed_at,
            payload,
        }
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Encode to the broker wire format.
    pub fn to_wire(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decode a message value produced by [`Reading::to_wire`].
    pub fn from_wire(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
