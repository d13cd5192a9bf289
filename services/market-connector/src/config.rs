//! Service configuration
//!
//! Loaded from an optional JSON file named by `MARKET_CONNECTOR_CONFIG`, then
//! individual keys are overridden from the environment (`.env` included).

use crate::connectors::transport::DEFAULT_INBOUND_QUEUE_SIZE;
use crate::exchanges::BROKERS;
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use services_common::{
    BackoffPolicy, DEFAULT_AUTH_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS, FeedError, FeedResult,
    TickBusConfig,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Variable naming the JSON config file
pub const CONFIG_PATH_VAR: &str = "MARKET_CONNECTOR_CONFIG";

const PREFIX: &str = "MARKET_CONNECTOR";

/// Per-broker adapter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Feed URL, the broker default when unset
    pub url: Option<String>,
    /// Heartbeat interval, the broker default when unset
    pub heartbeat_interval_ms: Option<u64>,
    /// Upper bound for opening the transport
    pub connect_timeout_ms: u64,
    /// Upper bound for the broker to accept the session
    pub auth_timeout_ms: u64,
    /// Reconnect policy
    pub backoff: BackoffPolicy,
    /// Instrument master CSV for this broker
    pub instrument_master: Option<PathBuf>,
}

impl AdapterConfig {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub const fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    /// Configured heartbeat interval, else `broker_default`
    #[must_use]
    pub fn heartbeat_interval(&self, broker_default: Duration) -> Duration {
        self.heartbeat_interval_ms
            .filter(|ms| *ms > 0)
            .map_or(broker_default, Duration::from_millis)
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            url: None,
            heartbeat_interval_ms: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            auth_timeout_ms: DEFAULT_AUTH_TIMEOUT_MS,
            backoff: BackoffPolicy::default(),
            instrument_master: None,
        }
    }
}

/// Market connector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Tick bus settings
    pub bus: TickBusConfig,
    /// Inbound frame queue per connection
    pub inbound_queue_size: usize,
    /// Instrument master used by brokers without their own
    pub instrument_master: Option<PathBuf>,
    /// Adapter settings keyed by lower-case broker name
    pub brokers: FxHashMap<String, AdapterConfig>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            bus: TickBusConfig::default(),
            inbound_queue_size: DEFAULT_INBOUND_QUEUE_SIZE,
            instrument_master: None,
            brokers: FxHashMap::default(),
        }
    }
}

impl ConnectorConfig {
    /// Load from the config file and environment
    pub fn load() -> Result<Self> {
        if let Err(e) = dotenv::dotenv() {
            debug!("No .env file loaded: {}", e);
        }

        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_json_file(&path)?,
            Err(_) => Self::default(),
        };
        config
            .apply_overrides(|name| std::env::var(name).ok())
            .context("Invalid environment override")?;
        Ok(config)
    }

    /// Parse a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        info!(path = %path.display(), "Loaded connector config");
        Ok(config)
    }

    /// Override keys from variables looked up through `var`
    ///
    /// `MARKET_CONNECTOR_BUS_CAPACITY`, `MARKET_CONNECTOR_INBOUND_QUEUE_SIZE`,
    /// `MARKET_CONNECTOR_INSTRUMENTS`, and per broker `{BROKER}_WS_URL`,
    /// `{BROKER}_HEARTBEAT_MS`, `{BROKER}_MAX_RECONNECT_ATTEMPTS`,
    /// `{BROKER}_INSTRUMENTS`.
    pub fn apply_overrides<F>(&mut self, var: F) -> FeedResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| var(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(value) = lookup(&format!("{PREFIX}_BUS_CAPACITY")) {
            self.bus.capacity = parse(&format!("{PREFIX}_BUS_CAPACITY"), &value)?;
        }
        if let Some(value) = lookup(&format!("{PREFIX}_INBOUND_QUEUE_SIZE")) {
            self.inbound_queue_size = parse(&format!("{PREFIX}_INBOUND_QUEUE_SIZE"), &value)?;
        }
        if let Some(value) = lookup(&format!("{PREFIX}_INSTRUMENTS")) {
            self.instrument_master = Some(PathBuf::from(value));
        }

        for broker in BROKERS {
            let upper = broker.to_uppercase();
            let url = lookup(&format!("{upper}_WS_URL"));
            let heartbeat = lookup(&format!("{upper}_HEARTBEAT_MS"));
            let attempts = lookup(&format!("{upper}_MAX_RECONNECT_ATTEMPTS"));
            let instruments = lookup(&format!("{upper}_INSTRUMENTS"));
            if url.is_none() && heartbeat.is_none() && attempts.is_none() && instruments.is_none() {
                continue;
            }

            let adapter = self.brokers.entry(broker.to_string()).or_default();
            if url.is_some() {
                adapter.url = url;
            }
            if let Some(value) = heartbeat {
                adapter.heartbeat_interval_ms = Some(parse(&format!("{upper}_HEARTBEAT_MS"), &value)?);
            }
            if let Some(value) = attempts {
                adapter.backoff.max_attempts =
                    parse(&format!("{upper}_MAX_RECONNECT_ATTEMPTS"), &value)?;
            }
            if let Some(value) = instruments {
                adapter.instrument_master = Some(PathBuf::from(value));
            }
        }
        Ok(())
    }

    /// Settings for `broker`, defaults when not configured
    #[must_use]
    pub fn adapter(&self, broker: &str) -> AdapterConfig {
        self.brokers
            .get(&broker.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Instrument master for `broker`
    #[must_use]
    pub fn instrument_master(&self, broker: &str) -> Option<&Path> {
        self.brokers
            .get(&broker.to_ascii_lowercase())
            .and_then(|adapter| adapter.instrument_master.as_deref())
            .or(self.instrument_master.as_deref())
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> FeedResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| FeedError::Config(format!("{name}={value}: {e}")))
}
