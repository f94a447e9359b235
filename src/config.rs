//! Engine configuration.
//!
//! Every knob has a compiled-in default. Hosts override them either through
//! [`EngineConfig::builder`] or by handing a JSON object to [`EngineConfig::from_json`];
//! durations in that document are milliseconds.
//!
//! ```rust
//! use lastmile::EngineConfig;
//! use std::time::Duration;
//!
//! let config = EngineConfig::builder()
//!     .max_records(200)
//!     .flush_interval(Duration::from_secs(10))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.max_retries, 5);
//!
//! let from_host = EngineConfig::from_json(r#"{ "maxRecords": 50, "debounceMs": 250 }"#).unwrap();
//! assert_eq!(from_host.max_records, 50);
//! assert_eq!(from_host.debounce, Duration::from_millis(250));
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attempts after which a stored record is only eligible for eviction.
pub const MAX_RETRIES: u32 = 5;
/// Upper bound on records held by the durable queue.
pub const MAX_RECORDS: usize = 1000;
/// Period of the background retry sweep.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(30);
/// Records pulled from the durable queue per flush pass.
pub const RETRY_BATCH_LIMIT: usize = 50;
/// Pause between records within a flush pass.
pub const RETRY_PAUSE: Duration = Duration::from_millis(100);
/// Events forwarded per intake batch.
pub const BATCH_SIZE: usize = 5;
/// Pause between intake batches.
pub const BATCH_PAUSE: Duration = Duration::from_millis(50);
/// Quiet period that coalesces bursts of `submit` calls.
pub const DEBOUNCE: Duration = Duration::from_millis(100);
/// Window in which repeats of the same source key are suppressed.
pub const THROTTLE_WINDOW: Duration = Duration::from_secs(1);
/// Throttle keys retained before the oldest half is dropped.
pub const THROTTLE_MAX_KEYS: usize = 100;
/// Lifetime of a cached blocker verdict.
pub const PROBE_TTL: Duration = Duration::from_secs(5 * 60);
/// Upper bound on a single reachability check.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
/// Upper bound on a single transport attempt; expiry counts as a blocked connection.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Payloads the beacon worker may hold before refusing new ones.
pub const BEACON_CAPACITY: usize = 64;

/// Collector URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Endpoints {
    /// Scheme and authority, e.g. `https://shop.example`.
    pub base_url: String,
    /// Less conventionally named path tried first.
    pub alternate_path: String,
    /// Historical path kept for collectors that only listen there.
    pub canonical_path: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".into(),
            alternate_path: "/api/track/events".into(),
            canonical_path: "/api/analytics/events".into(),
        }
    }
}

impl Endpoints {
    pub fn alternate_url(&self) -> String {
        join(&self.base_url, &self.alternate_path)
    }

    pub fn canonical_url(&self) -> String {
        join(&self.base_url, &self.canonical_path)
    }

    /// The unload-safe transmission shares the alternate path.
    pub fn beacon_url(&self) -> String {
        self.alternate_url()
    }
}

fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// All tunables of the delivery engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub max_retries: u32,
    pub max_records: usize,
    #[serde(rename = "flushIntervalMs", with = "millis")]
    pub flush_interval: Duration,
    pub retry_batch_limit: usize,
    #[serde(rename = "retryPauseMs", with = "millis")]
    pub retry_pause: Duration,
    pub batch_size: usize,
    #[serde(rename = "batchPauseMs", with = "millis")]
    pub batch_pause: Duration,
    #[serde(rename = "debounceMs", with = "millis")]
    pub debounce: Duration,
    #[serde(rename = "throttleWindowMs", with = "millis")]
    pub throttle_window: Duration,
    pub throttle_max_keys: usize,
    #[serde(rename = "probeTtlMs", with = "millis")]
    pub probe_ttl: Duration,
    #[serde(rename = "probeTimeoutMs", with = "millis")]
    pub probe_timeout: Duration,
    #[serde(rename = "requestTimeoutMs", with = "millis")]
    pub request_timeout: Duration,
    pub beacon_capacity: usize,
    pub endpoints: Endpoints,
    /// Promote delivery diagnostics from debug to warn.
    pub dev_mode: bool,
    /// Initial state of the intake switch.
    pub enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            max_records: MAX_RECORDS,
            flush_interval: FLUSH_INTERVAL,
            retry_batch_limit: RETRY_BATCH_LIMIT,
            retry_pause: RETRY_PAUSE,
            batch_size: BATCH_SIZE,
            batch_pause: BATCH_PAUSE,
            debounce: DEBOUNCE,
            throttle_window: THROTTLE_WINDOW,
            throttle_max_keys: THROTTLE_MAX_KEYS,
            probe_ttl: PROBE_TTL,
            probe_timeout: PROBE_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            beacon_capacity: BEACON_CAPACITY,
            endpoints: Endpoints::default(),
            dev_mode: false,
            enabled: true,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Parse a host-supplied JSON object; missing keys keep their defaults.
    pub fn from_json(doc: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(doc).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or disable the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive: [(&'static str, bool); 11] = [
            ("max_retries", self.max_retries > 0),
            ("max_records", self.max_records > 0),
            ("flush_interval", !self.flush_interval.is_zero()),
            ("retry_batch_limit", self.retry_batch_limit > 0),
            ("batch_size", self.batch_size > 0),
            ("throttle_max_keys", self.throttle_max_keys > 0),
            ("probe_ttl", !self.probe_ttl.is_zero()),
            ("probe_timeout", !self.probe_timeout.is_zero()),
            ("request_timeout", !self.request_timeout.is_zero()),
            ("beacon_capacity", self.beacon_capacity > 0),
            ("throttle_window", !self.throttle_window.is_zero()),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, ok)| !ok) {
            return Err(ConfigError::Zero { field });
        }
        let endpoints = [
            ("base_url", &self.endpoints.base_url),
            ("alternate_path", &self.endpoints.alternate_path),
            ("canonical_path", &self.endpoints.canonical_path),
        ];
        if let Some((field, _)) = endpoints.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(ConfigError::EmptyEndpoint { field });
        }
        Ok(())
    }
}

/// Builder for [`EngineConfig`]; `build` validates.
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

macro_rules! setter {
    ($(#[$doc:meta])* $name:ident: $ty:ty) => {
        $(#[$doc])*
        pub fn $name(mut self, value: $ty) -> Self {
            self.config.$name = value;
            self
        }
    };
}

impl EngineConfigBuilder {
    setter!(max_retries: u32);
    setter!(max_records: usize);
    setter!(flush_interval: Duration);
    setter!(retry_batch_limit: usize);
    setter!(retry_pause: Duration);
    setter!(batch_size: usize);
    setter!(batch_pause: Duration);
    setter!(debounce: Duration);
    setter!(throttle_window: Duration);
    setter!(throttle_max_keys: usize);
    setter!(probe_ttl: Duration);
    setter!(probe_timeout: Duration);
    setter!(request_timeout: Duration);
    setter!(beacon_capacity: usize);
    setter!(endpoints: Endpoints);
    setter!(dev_mode: bool);
    setter!(enabled: bool);

    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_knobs() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_records, 1000);
        assert_eq!(config.flush_interval, Duration::from_secs(30));
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.debounce, Duration::from_millis(100));
        assert_eq!(config.probe_ttl, Duration::from_secs(300));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_rejects_zero_batch_size() {
        let err = EngineConfig::builder().batch_size(0).build().unwrap_err();
        assert_eq!(err, ConfigError::Zero { field: "batch_size" });
    }

    #[test]
    fn builder_rejects_empty_endpoint() {
        let endpoints = Endpoints { base_url: " ".into(), ..Endpoints::default() };
        let err = EngineConfig::builder().endpoints(endpoints).build().unwrap_err();
        assert_eq!(err, ConfigError::EmptyEndpoint { field: "base_url" });
    }

    #[test]
    fn json_overrides_keep_other_defaults() {
        let config = EngineConfig::from_json(
            r#"{ "maxRetries": 3, "flushIntervalMs": 5000, "endpoints": { "baseUrl": "https://shop.example/" } }"#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.flush_interval, Duration::from_secs(5));
        assert_eq!(config.max_records, MAX_RECORDS);
        assert_eq!(config.endpoints.canonical_url(), "https://shop.example/api/analytics/events");
    }

    #[test]
    fn zero_request_timeout_is_rejected() {
        let err = EngineConfig::from_json(r#"{ "requestTimeoutMs": 0 }"#).unwrap_err();
        assert_eq!(err, ConfigError::Zero { field: "request_timeout" });
    }

    #[test]
    fn json_with_invalid_values_is_rejected() {
        assert!(matches!(
            EngineConfig::from_json(r#"{ "maxRecords": 0 }"#),
            Err(ConfigError::Zero { field: "max_records" })
        ));
        assert!(matches!(EngineConfig::from_json("not json"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn beacon_shares_the_alternate_path() {
        let endpoints = Endpoints::default();
        assert_eq!(endpoints.beacon_url(), endpoints.alternate_url());
        assert_ne!(endpoints.alternate_url(), endpoints.canonical_url());
    }
}
