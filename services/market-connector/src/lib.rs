//! Market Connector Service
//!
//! Manages one upstream feed connection per broker session, multiplexes
//! downstream subscriptions onto them and republishes normalized ticks on
//! the shared tick bus.

pub mod cache;
pub mod capabilities;
pub mod codec;
pub mod config;
pub mod connectors;
pub mod exchanges;
pub mod instruments;
pub mod registry;

pub use config::{AdapterConfig, ConnectorConfig};
pub use connectors::{
    AdapterState, BrokerAdapter, SubscriptionOutcome, Transport, WebSocketAdapter,
    WebSocketTransport,
};

use anyhow::Result;
use auth::CredentialStore;
use instruments::{InstrumentStore, SymbolResolver};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use services_common::{
    ApiResult, ErrorResult, FeedError, FeedResult, InstrumentKey, SubscriptionMode, TickBus,
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Status reported by successful operations
pub const STATUS_SUCCESS: &str = "success";

/// Result of a subscribe request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeResponse {
    pub status: String,
    /// Requested depth was unsupported and `actual_depth` was substituted
    pub is_fallback: bool,
    /// Depth levels that will be published
    pub actual_depth: u8,
    /// Id of the logical subscription
    pub correlation_id: Uuid,
}

/// Result of an unsubscribe request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsubscribeResponse {
    pub status: String,
    /// Id of the removed logical subscription
    pub correlation_id: Uuid,
}

/// Adapter status for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterStatus {
    pub broker: String,
    pub session_id: String,
    pub state: AdapterState,
    /// Active logical subscriptions
    pub subscriptions: usize,
    /// Why the adapter stopped, when it stopped on an error
    pub last_error: Option<ErrorResult>,
}

type AdapterKey = (String, String);

fn adapter_key(broker: &str, session_id: &str) -> AdapterKey {
    (broker.trim().to_ascii_lowercase(), session_id.to_string())
}

/// Market connector service that manages broker sessions
///
/// Every operation returns an [`ApiResult`]; errors never escape as panics.
/// Adapters are keyed by `(broker, session_id)` and share one tick bus.
pub struct MarketConnectorService {
    config: ConnectorConfig,
    bus: Arc<TickBus>,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    resolvers: RwLock<FxHashMap<String, Arc<dyn SymbolResolver>>>,
    adapters: RwLock<FxHashMap<AdapterKey, Arc<dyn BrokerAdapter>>>,
}

impl std::fmt::Debug for MarketConnectorService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketConnectorService")
            .field("adapters", &self.adapters.read().keys().collect::<Vec<_>>())
            .field("resolvers", &self.resolvers.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl MarketConnectorService {
    /// Create a service with no adapters
    pub fn new(
        config: ConnectorConfig,
        bus: Arc<TickBus>,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            config,
            bus,
            transport,
            credentials,
            resolvers: RwLock::new(FxHashMap::default()),
            adapters: RwLock::new(FxHashMap::default()),
        }
    }

    /// Tick bus the adapters publish to
    #[must_use]
    pub fn bus(&self) -> Arc<TickBus> {
        Arc::clone(&self.bus)
    }

    /// Use `resolver` for every session of `broker`
    pub fn register_resolver(&self, broker: &str, resolver: Arc<dyn SymbolResolver>) {
        self.resolvers
            .write()
            .insert(broker.trim().to_ascii_lowercase(), resolver);
    }

    /// Load the configured instrument master of every known broker
    ///
    /// Returns how many brokers got a resolver.
    pub fn load_instruments(&self) -> Result<usize> {
        let mut loaded = 0;
        for broker in exchanges::BROKERS {
            let Some(path) = self.config.instrument_master(broker) else {
                continue;
            };
            let store = InstrumentStore::from_csv_path(path)?;
            self.register_resolver(broker, Arc::new(store));
            loaded += 1;
        }
        if loaded == 0 {
            warn!("No instrument master configured");
        }
        Ok(loaded)
    }

    /// Create the adapter for a broker session
    ///
    /// Validates credentials and builds the broker protocol; opens nothing.
    /// Initializing an existing session is a no-op.
    pub fn initialize(&self, broker: &str, session_id: &str) -> ApiResult<()> {
        let key = adapter_key(broker, session_id);
        if self.adapters.read().contains_key(&key) {
            return Ok(());
        }

        let resolver = self
            .resolvers
            .read()
            .get(&key.0)
            .cloned()
            .ok_or_else(|| FeedError::Config(format!("no instrument master for {}", key.0)))?;
        let adapter = WebSocketAdapter::initialize(
            &key.0,
            session_id,
            self.credentials.as_ref(),
            resolver,
            Arc::clone(&self.transport),
            Arc::clone(&self.bus),
            self.config.adapter(&key.0),
        )?;

        info!(broker = %key.0, session_id, "Session initialized");
        self.adapters.write().entry(key).or_insert_with(|| Arc::new(adapter));
        Ok(())
    }

    /// Adapter of a broker session
    pub fn adapter(&self, broker: &str, session_id: &str) -> ApiResult<Arc<dyn BrokerAdapter>> {
        Ok(self.find(broker, session_id)?)
    }

    fn find(&self, broker: &str, session_id: &str) -> FeedResult<Arc<dyn BrokerAdapter>> {
        let key = adapter_key(broker, session_id);
        self.adapters.read().get(&key).cloned().ok_or_else(|| {
            FeedError::InvalidRequest(format!("session {} of {} is not initialized", key.1, key.0))
        })
    }

    /// Start streaming for a session
    pub async fn connect(&self, broker: &str, session_id: &str) -> ApiResult<()> {
        let adapter = self.find(broker, session_id)?;
        Ok(adapter.connect().await?)
    }

    /// Stop streaming for a session and drop its subscriptions
    pub async fn disconnect(&self, broker: &str, session_id: &str) -> ApiResult<()> {
        let adapter = self.find(broker, session_id)?;
        Ok(adapter.disconnect().await?)
    }

    /// Subscribe to `symbol` on `exchange`
    ///
    /// `mode` is 1 (LTP), 2 (Quote) or 3 (Depth). `depth_level` only matters
    /// for depth and falls back to a supported level when needed.
    pub fn subscribe(
        &self,
        broker: &str,
        session_id: &str,
        symbol: &str,
        exchange: &str,
        mode: u8,
        depth_level: u8,
    ) -> ApiResult<SubscribeResponse> {
        let mode = SubscriptionMode::try_from(mode)?;
        let key = parse_key(symbol, exchange)?;
        let adapter = self.find(broker, session_id)?;
        let outcome = adapter.subscribe(key, mode, depth_level)?;
        Ok(SubscribeResponse {
            status: STATUS_SUCCESS.to_string(),
            is_fallback: outcome.is_fallback,
            actual_depth: outcome.actual_depth,
            correlation_id: outcome.correlation_id,
        })
    }

    /// Remove the oldest subscription to `symbol` on `exchange` in `mode`
    pub fn unsubscribe(
        &self,
        broker: &str,
        session_id: &str,
        symbol: &str,
        exchange: &str,
        mode: u8,
    ) -> ApiResult<UnsubscribeResponse> {
        let mode = SubscriptionMode::try_from(mode)?;
        let key = parse_key(symbol, exchange)?;
        let adapter = self.find(broker, session_id)?;
        let removed = adapter.unsubscribe(&key, mode)?;
        Ok(UnsubscribeResponse {
            status: STATUS_SUCCESS.to_string(),
            correlation_id: removed.subscription.correlation_id,
        })
    }

    /// Remove one subscription by id
    pub fn unsubscribe_id(
        &self,
        broker: &str,
        session_id: &str,
        correlation_id: &Uuid,
    ) -> ApiResult<UnsubscribeResponse> {
        let adapter = self.find(broker, session_id)?;
        let removed = adapter.unsubscribe_id(correlation_id)?;
        Ok(UnsubscribeResponse {
            status: STATUS_SUCCESS.to_string(),
            correlation_id: removed.subscription.correlation_id,
        })
    }

    /// Remove every subscription of a session, returning how many
    pub fn unsubscribe_all(&self, broker: &str, session_id: &str) -> ApiResult<usize> {
        let adapter = self.find(broker, session_id)?;
        Ok(adapter.unsubscribe_all())
    }

    /// State and subscription count of a session
    pub fn status(&self, broker: &str, session_id: &str) -> ApiResult<AdapterStatus> {
        let adapter = self.find(broker, session_id)?;
        Ok(AdapterStatus {
            broker: adapter.broker().to_string(),
            session_id: adapter.session_id().to_string(),
            state: adapter.state(),
            subscriptions: adapter.subscriptions().len(),
            last_error: adapter.last_error().map(ErrorResult::from),
        })
    }

    /// Disconnect every session
    pub async fn shutdown(&self) {
        let adapters: Vec<Arc<dyn BrokerAdapter>> =
            self.adapters.read().values().cloned().collect();
        for adapter in adapters {
            if let Err(e) = adapter.disconnect().await {
                warn!(broker = adapter.broker(), error = %e, "Disconnect failed");
            }
        }
        info!("All sessions stopped");
    }
}

fn parse_key(symbol: &str, exchange: &str) -> FeedResult<InstrumentKey> {
    if symbol.trim().is_empty() || exchange.trim().is_empty() {
        return Err(FeedError::InvalidRequest(
            "symbol and exchange are required".to_string(),
        ));
    }
    Ok(InstrumentKey::new(exchange, symbol))
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth::{InMemoryCredentialStore, SessionCredentials};
    use services_common::ErrorCode;

    fn service() -> MarketConnectorService {
        let credentials = InMemoryCredentialStore::new();
        credentials.insert("s1", SessionCredentials::new("token").with_api_key("key"));
        let service = MarketConnectorService::new(
            ConnectorConfig::default(),
            Arc::new(TickBus::default()),
            Arc::new(WebSocketTransport::default()),
            Arc::new(credentials),
        );
        service.register_resolver("zerodha", Arc::new(InstrumentStore::new()));
        service
    }

    #[test]
    fn test_errors_are_structured() {
        let service = service();
        let err = service.subscribe("zerodha", "s1", "RELIANCE", "NSE", 1, 0).unwrap_err();
        assert_eq!(err.error_code, ErrorCode::InvalidRequest);

        service.initialize("Zerodha", "s1").unwrap();
        let err = service.subscribe("zerodha", "s1", "RELIANCE", "NSE", 9, 0).unwrap_err();
        assert_eq!(err.error_code, ErrorCode::InvalidRequest);
        let err = service.subscribe("zerodha", "s1", "RELIANCE", "NSE", 1, 0).unwrap_err();
        assert_eq!(err.error_code, ErrorCode::SymbolNotFound);
        let err = service.unsubscribe("zerodha", "s1", "RELIANCE", "NSE", 1).unwrap_err();
        assert_eq!(err.error_code, ErrorCode::NotSubscribed);
    }

    #[test]
    fn test_initialize_requires_credentials_and_master() {
        let service = service();
        let err = service.initialize("zerodha", "unknown-session").unwrap_err();
        assert_eq!(err.error_code, ErrorCode::AuthError);
        let err = service.initialize("angel", "s1").unwrap_err();
        assert_eq!(err.error_code, ErrorCode::ConfigError);
    }

    #[test]
    fn test_status_of_idle_session() {
        let service = service();
        service.initialize("zerodha", "s1").unwrap();
        let status = service.status("ZERODHA", "s1").unwrap();
        assert_eq!(status.state, AdapterState::Idle);
        assert_eq!(status.subscriptions, 0);
        assert!(status.last_error.is_none());
    }
}
