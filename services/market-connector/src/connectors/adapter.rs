//! Broker adapter contract

use crate::registry::{LogicalSubscription, Unregistered};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use services_common::{CanonicalTick, FeedError, FeedResult, InstrumentKey, SubscriptionMode};
use std::fmt;
use tokio::sync::watch;
use uuid::Uuid;

/// Connection lifecycle of an adapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterState {
    /// Initialized, never connected or disconnected
    #[default]
    Idle,
    /// Opening the first connection
    Connecting,
    /// Transport open, waiting for the broker to accept the session
    Authenticating,
    /// Streaming
    Connected,
    /// Connection lost, backing off before the next attempt
    Reconnecting,
    /// Disconnected or given up; see `last_error`
    Stopped,
}

impl AdapterState {
    /// Whether the supervisor is still trying to stream
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Authenticating | Self::Connected | Self::Reconnecting
        )
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Authenticating => "AUTHENTICATING",
            Self::Connected => "CONNECTED",
            Self::Reconnecting => "RECONNECTING",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Result of a successful subscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubscriptionOutcome {
    /// Id of the new logical subscription
    pub correlation_id: Uuid,
    /// Depth levels that will be published, zero for non-depth modes
    pub actual_depth: u8,
    /// Requested depth was unsupported and `actual_depth` was substituted
    pub is_fallback: bool,
}

/// One broker session feeding the tick bus
///
/// `connect` only starts the supervisor; progress is observed through
/// `state` and `watch_state`. Subscriptions may be added in any state and are
/// sent upstream once the adapter is connected.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Broker name
    fn broker(&self) -> &str;

    /// Session the adapter streams for
    fn session_id(&self) -> &str;

    /// Current state
    fn state(&self) -> AdapterState;

    /// Receiver of state transitions
    fn watch_state(&self) -> watch::Receiver<AdapterState>;

    /// Error that stopped the adapter, if any
    fn last_error(&self) -> Option<FeedError>;

    /// Start the supervised connection loop
    async fn connect(&self) -> FeedResult<()>;

    /// Stop streaming and drop every subscription; idempotent
    async fn disconnect(&self) -> FeedResult<()>;

    /// Add a logical subscription
    fn subscribe(
        &self,
        key: InstrumentKey,
        mode: SubscriptionMode,
        depth_level: u8,
    ) -> FeedResult<SubscriptionOutcome>;

    /// Remove the oldest logical subscription for `(key, mode)`
    fn unsubscribe(&self, key: &InstrumentKey, mode: SubscriptionMode)
    -> FeedResult<Unregistered>;

    /// Remove a logical subscription by id
    fn unsubscribe_id(&self, correlation_id: &Uuid) -> FeedResult<Unregistered>;

    /// Remove every logical subscription, returning how many were removed
    fn unsubscribe_all(&self) -> usize;

    /// Active logical subscriptions, oldest first
    fn subscriptions(&self) -> Vec<LogicalSubscription>;

    /// Last merged tick for a subscribed instrument
    fn snapshot(&self, key: &InstrumentKey, mode: SubscriptionMode) -> Option<CanonicalTick>;
}
