// src/source.rs
//! Source client: one provider request per city, no retries.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use metrics::histogram;
use reqwest::Client;
use thiserror::Error;

use crate::config::ProviderConfig;
use crate::reading::{Payload, Reading};

pub const API_KEY_HEADER: &str = "X-RapidAPI-Key";

#[derive(Debug, Error)]
pub enum FetchCause {
    #[error("transport: {0}")]
    Transport(String),

    #[error("timed out")]
    Timeout,

    #[error("provider returned HTTP {0}")]
    Status(u16),

    #[error("undecodable body: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
#[error("fetch failed for {city}: {cause}")]
pub struct FetchError {
    pub city: String,
    #[source]
    pub cause: FetchCause,
}

impl FetchError {
    pub fn new(city: impl Into<String>, cause: FetchCause) -> Self {
        Self {
            city: city.into(),
            cause,
        }
    }
}

#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch(&self, city: &str) -> Result<Reading, FetchError>;
    fn name(&self) -> &'static str;
}

/// Weather provider reached over HTTP: `GET {url}?q={city}` with the API key header.
#[derive(Clone)]
pub struct HttpSource {
    client: Client,
    url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpSource {
    pub fn new(cfg: &ProviderConfig) -> Self {
        Self {
            client: Client::new(),
            url: cfg.api_url.clone(),
            api_key: cfg.api_key.clone(),
            timeout: cfg.timeout,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl WeatherSource for HttpSource {
    async fn fetch(&self, city: &str) -> Result<Reading, FetchError> {
        let t0 = Instant::now();
        let fail = |cause: FetchCause| FetchError::new(city, cause);

        let resp = self
            .client
            .get(&self.url)
            .query(&[("q", city)])
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| fail(transport_cause(&e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(fail(FetchCause::Status(status.as_u16())));
        }

        let body = resp.bytes().await.map_err(|e| fail(transport_cause(&e)))?;
        let payload = decode_payload(&body).map_err(fail)?;

        histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(Reading::new(city, Utc::now(), payload))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn transport_cause(e: &reqwest::Error) -> FetchCause {
    if e.is_timeout() {
        FetchCause::Timeout
    } else {
        FetchCause::Transport(e.to_string())
    }
}

/// The provider body must be a JSON object; anything else is a decode failure.
pub fn decode_payload(body: &[u8]) -> Result<Payload, FetchCause> {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(FetchCause::Decode(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(FetchCause::Decode(e.to_string())),
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_accepts_objects_only() {
        let p = decode_payload(br#"{"current":{"temp_c":20.5}}"#).unwrap();
        assert_eq!(p["current"]["temp_c"], 20.5);

        assert!(matches!(decode_payload(b"[1,2]"), Err(FetchCause::Decode(m)) if m.contains("array")));
        assert!(matches!(decode_payload(b"<html>"), Err(FetchCause::Decode(_))));
    }

    #[test]
    fn error_names_the_city() {
        let e = FetchError::new("London", FetchCause::Timeout);
        assert_eq!(e.to_string(), "fetch failed for London: timed out");
    }
}
