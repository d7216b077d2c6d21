// src/config/cities.rs
use std::collections::HashSet;
use std::sync::Arc;

use super::ConfigError;

/// Ordered, non-empty, duplicate-free list of city identifiers.
///
/// Cheap to clone; the entries are shared and never mutated after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityList(Arc<[String]>);

impl CityList {
    pub fn new<I, S>(items: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for it in items {
            let city = it.as_ref().trim();
            if city.is_empty() {
                continue;
            }
            if !seen.insert(city.to_ascii_lowercase()) {
                return Err(ConfigError::DuplicateCity(city.to_string()));
            }
            out.push(city.to_string());
        }
        if out.is_empty() {
            return Err(ConfigError::EmptyCityList);
        }
        Ok(Self(out.into()))
    }

    /// Parse a comma-separated list, e.g. `"Paris, London"`.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        Self::new(s.split(','))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
