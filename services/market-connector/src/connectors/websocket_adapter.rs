//! Supervised WebSocket broker adapter
//!
//! A supervisor task owns the upstream connection: it connects, waits for
//! the broker to accept the session when the protocol requires it, replays
//! every active upstream subscription once, then pumps frames until the
//! connection drops. Lost connections are retried with exponential backoff
//! until the policy gives up or `disconnect` interrupts it. The failure count
//! only resets once a session has carried data or stayed up for
//! `STABLE_SESSION_MS`, so a server that accepts and drops at once still
//! exhausts the policy.
//!
//! Registry, cache and the outbound sender sit behind one lock so that a
//! concurrent `subscribe` is either part of the replay or sent on its own,
//! never both.

use super::adapter::{AdapterState, BrokerAdapter, SubscriptionOutcome};
use super::backoff::Backoff;
use super::transport::{Connection, Transport, TransportError, TransportEvent};
use crate::cache::MarketDataCache;
use crate::capabilities::{self, BrokerCapabilities};
use crate::codec::{BrokerProtocol, DecodedMessage, MessageKind, ModeScope, PriceHints, WireFrame};
use crate::config::AdapterConfig;
use crate::exchanges;
use crate::instruments::SymbolResolver;
use crate::registry::{LogicalSubscription, SubscriptionRegistry, Unregistered};
use async_trait::async_trait;
use auth::{CredentialStore, SessionCredentials};
use parking_lot::Mutex;
use services_common::{
    CanonicalTick, FeedError, FeedResult, InstrumentKey, RAW_FRAME_LOG_LIMIT, STABLE_SESSION_MS,
    Scrip, SubscriptionMode, TickBus,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, timeout};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// How long `disconnect` waits for the supervisor before aborting it
const SUPERVISOR_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether a tick decoded for `level` is published on a route of `route_mode`
///
/// Per-mode brokers deliver each mode separately. Per-scrip brokers deliver
/// the scrip's highest mode, which also serves every lower one.
fn publishes(scope: ModeScope, route_mode: SubscriptionMode, level: SubscriptionMode) -> bool {
    match scope {
        ModeScope::PerMode => route_mode == level,
        ModeScope::PerScrip => route_mode <= level,
    }
}

/// OHLC bands of subscribed scrips, for codecs that locate prices heuristically
struct CachedBands<'a> {
    registry: &'a SubscriptionRegistry,
    cache: &'a MarketDataCache,
}

impl PriceHints for CachedBands<'_> {
    fn ohlc_band(&self, token: &str, exchange_code: Option<&str>) -> Option<(f64, f64)> {
        self.registry
            .scrips_for_token(token)
            .iter()
            .filter(|scrip| {
                exchange_code.is_none_or(|code| scrip.exchange_code.eq_ignore_ascii_case(code))
            })
            .find_map(|scrip| self.cache.get(scrip)?.price_band())
    }
}

struct Inner {
    registry: SubscriptionRegistry,
    cache: MarketDataCache,
    /// Present only while connected
    outbound: Option<mpsc::UnboundedSender<WireFrame>>,
}

impl Inner {
    fn send(&mut self, frames: Vec<WireFrame>) {
        let Some(outbound) = &self.outbound else {
            return;
        };
        let delivered = frames.into_iter().all(|frame| outbound.send(frame).is_ok());
        if !delivered {
            // Replayed on the next connection.
            self.outbound = None;
        }
    }
}

enum SessionEnd {
    Stopped,
    Closed(Option<String>),
    Failed(FeedError),
}

struct Shared {
    broker: &'static str,
    session_id: String,
    protocol: BrokerProtocol,
    capabilities: &'static BrokerCapabilities,
    resolver: Arc<dyn SymbolResolver>,
    transport: Arc<dyn Transport>,
    bus: Arc<TickBus>,
    credentials: SessionCredentials,
    config: AdapterConfig,
    heartbeat_interval: Duration,
    inner: Mutex<Inner>,
    state: watch::Sender<AdapterState>,
    stop: watch::Sender<bool>,
    last_error: Mutex<Option<FeedError>>,
}

impl Shared {
    fn set_state(&self, state: AdapterState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(
                broker = self.broker,
                session_id = %self.session_id,
                from = %previous,
                to = %state,
                "Adapter state changed"
            );
        }
    }

    fn fail(&self, err: FeedError) {
        error!(
            broker = self.broker,
            session_id = %self.session_id,
            code = %err.code(),
            error = %err,
            "Adapter stopped"
        );
        self.deactivate();
        *self.last_error.lock() = Some(err);
        self.set_state(AdapterState::Stopped);
    }

    fn frames_on_add(
        &self,
        scrip: &Scrip,
        mode: SubscriptionMode,
        previous: Option<SubscriptionMode>,
    ) -> Vec<WireFrame> {
        let codec = &self.protocol.codec;
        match codec.mode_scope() {
            ModeScope::PerMode => codec.encode_subscribe(scrip, mode),
            ModeScope::PerScrip => match previous {
                None => codec.encode_subscribe(scrip, mode),
                Some(previous) if mode > previous => {
                    codec.encode_mode_change(scrip, previous, mode)
                }
                Some(_) => Vec::new(),
            },
        }
    }

    fn frames_on_remove(
        &self,
        scrip: &Scrip,
        mode: SubscriptionMode,
        remaining: Option<SubscriptionMode>,
    ) -> Vec<WireFrame> {
        let codec = &self.protocol.codec;
        match codec.mode_scope() {
            ModeScope::PerMode => codec.encode_unsubscribe(scrip, mode),
            ModeScope::PerScrip => match remaining {
                None => codec.encode_unsubscribe(scrip, mode),
                Some(remaining) if remaining < mode => {
                    codec.encode_mode_change(scrip, mode, remaining)
                }
                Some(_) => Vec::new(),
            },
        }
    }

    fn resubscribe_frames(&self, registry: &SubscriptionRegistry) -> Vec<WireFrame> {
        let codec = &self.protocol.codec;
        let upstream = match codec.mode_scope() {
            ModeScope::PerMode => registry.active_pairs(),
            ModeScope::PerScrip => registry.active_scrips(),
        };
        upstream
            .iter()
            .flat_map(|(scrip, mode)| codec.encode_subscribe(scrip, *mode))
            .collect()
    }

    /// Send the upstream consequence of a removed subscription
    fn release(&self, inner: &mut Inner, removed: &Unregistered) {
        let subscription = &removed.subscription;
        if removed.last_ref {
            let remaining = inner.registry.effective_mode(&subscription.scrip);
            let frames = self.frames_on_remove(&subscription.scrip, subscription.mode, remaining);
            inner.send(frames);
        }
        if removed.scrip_released {
            inner.cache.clear(&subscription.scrip);
        }
        debug!(
            broker = self.broker,
            correlation_id = %subscription.correlation_id,
            key = %subscription.key,
            mode = %subscription.mode,
            last_ref = removed.last_ref,
            "Unsubscribed"
        );
    }

    fn activate(&self, connection: &Connection) {
        let mut inner = self.inner.lock();
        let frames = self.resubscribe_frames(&inner.registry);
        let replayed = frames.len();
        inner.outbound = Some(connection.outbound.clone());
        inner.send(frames);
        self.set_state(AdapterState::Connected);
        info!(
            broker = self.broker,
            session_id = %self.session_id,
            replayed,
            "Streaming"
        );
    }

    fn deactivate(&self) {
        self.inner.lock().outbound = None;
    }

    async fn establish(&self) -> FeedResult<Connection> {
        let codec = &self.protocol.codec;
        let endpoint = codec.endpoint(self.config.url.as_deref(), &self.credentials)?;
        debug!(broker = self.broker, "Opening upstream connection");

        let connect_timeout = self.config.connect_timeout();
        let mut connection =
            match timeout(connect_timeout, self.transport.connect(&endpoint)).await {
                Ok(Ok(connection)) => connection,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(TransportError::Timeout(connect_timeout).into()),
            };

        self.set_state(AdapterState::Authenticating);
        if let Some(handshake) = codec.handshake(&self.credentials) {
            connection.send(handshake)?;
        }
        if codec.awaits_auth_ack() {
            let auth_timeout = self.config.auth_timeout();
            match timeout(auth_timeout, self.await_auth_ack(&mut connection)).await {
                Ok(result) => result?,
                Err(_) => return Err(TransportError::Timeout(auth_timeout).into()),
            }
        }
        Ok(connection)
    }

    async fn await_auth_ack(&self, connection: &mut Connection) -> FeedResult<()> {
        loop {
            let frame = match connection.inbound.recv().await {
                Some(TransportEvent::Frame(frame)) => frame,
                Some(TransportEvent::Closed(reason)) => {
                    return Err(FeedError::Transport(format!(
                        "closed during authentication: {}",
                        reason.unwrap_or_default()
                    )));
                }
                None => return Err(TransportError::Closed.into()),
            };
            for message in self.decode(&frame) {
                match message.kind {
                    MessageKind::AuthAck => {
                        debug!(broker = self.broker, "Session accepted");
                        return Ok(());
                    }
                    MessageKind::AuthRejected(reason) => return Err(FeedError::Auth(reason)),
                    other => trace!(broker = self.broker, kind = ?other, "Ignored before auth"),
                }
            }
        }
    }

    /// Pump frames until the connection ends, setting `received` on the first frame
    async fn run_session(
        &self,
        connection: &mut Connection,
        stop: &mut watch::Receiver<bool>,
        received: &mut bool,
    ) -> SessionEnd {
        let period = self.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.changed() => return SessionEnd::Stopped,
                _ = heartbeat.tick() => {
                    trace!(broker = self.broker, "Heartbeat");
                    if connection.send(self.protocol.codec.heartbeat()).is_err() {
                        return SessionEnd::Closed(Some("outbound closed".to_string()));
                    }
                }
                event = connection.inbound.recv() => match event {
                    Some(TransportEvent::Frame(frame)) => {
                        *received = true;
                        if let Err(err) = self.handle_frame(&frame) {
                            return SessionEnd::Failed(err);
                        }
                    }
                    Some(TransportEvent::Closed(reason)) => return SessionEnd::Closed(reason),
                    None => return SessionEnd::Closed(None),
                },
            }
        }
    }

    fn decode(&self, frame: &WireFrame) -> Vec<DecodedMessage> {
        let result = {
            let inner = self.inner.lock();
            let hints = CachedBands {
                registry: &inner.registry,
                cache: &inner.cache,
            };
            self.protocol.codec.decode(frame, &hints)
        };

        match result {
            Ok(messages) => messages,
            Err(err) => {
                let raw = frame.as_bytes();
                warn!(
                    broker = self.broker,
                    code = err.code(),
                    len = raw.len(),
                    raw = %hex::encode(&raw[..raw.len().min(RAW_FRAME_LOG_LIMIT)]),
                    error = %err,
                    "Dropping undecodable frame"
                );
                Vec::new()
            }
        }
    }

    fn handle_frame(&self, frame: &WireFrame) -> FeedResult<()> {
        let mut ticks = Vec::new();
        for message in self.decode(frame) {
            match &message.kind {
                MessageKind::Tick(level) => self.apply_tick(*level, &message, &mut ticks),
                MessageKind::AuthRejected(reason) => return Err(FeedError::Auth(reason.clone())),
                MessageKind::Error(reason) => {
                    warn!(broker = self.broker, reason = %reason, "Broker reported an error");
                }
                MessageKind::Unknown(code) => {
                    debug!(broker = self.broker, code = %code, "Ignoring unknown message");
                }
                MessageKind::AuthAck
                | MessageKind::SubscriptionAck
                | MessageKind::UnsubscriptionAck
                | MessageKind::Heartbeat => {
                    trace!(broker = self.broker, kind = ?message.kind, "Control message");
                }
            }
        }

        for tick in ticks {
            self.bus.publish(tick);
        }
        Ok(())
    }

    fn apply_tick(
        &self,
        level: SubscriptionMode,
        message: &DecodedMessage,
        out: &mut Vec<CanonicalTick>,
    ) {
        let Some(token) = message.token.as_deref() else {
            debug!(broker = self.broker, "Tick without token");
            return;
        };
        let fields = self.protocol.normalizer.normalize(message);
        if fields.is_empty() {
            trace!(broker = self.broker, token, "Tick carried no usable fields");
            return;
        }

        let mut inner = self.inner.lock();
        let routes = inner
            .registry
            .routes_for(token, message.exchange_code.as_deref());
        if routes.is_empty() {
            trace!(broker = self.broker, token, "Tick for unsubscribed token");
            return;
        }

        let mut merged: Vec<&Scrip> = Vec::with_capacity(1);
        for route in &routes {
            if !merged.contains(&&route.scrip) {
                inner.cache.merge(&route.scrip, fields.clone());
                merged.push(&route.scrip);
            }
        }

        let scope = self.protocol.codec.mode_scope();
        for route in routes.iter().filter(|route| publishes(scope, route.mode, level)) {
            if let Some(entry) = inner.cache.get(&route.scrip) {
                out.push(entry.project(
                    self.broker,
                    &route.key,
                    &route.scrip,
                    route.mode,
                    route.depth_level,
                ));
            }
        }
    }
}

async fn supervise(shared: Arc<Shared>, mut stop: watch::Receiver<bool>) {
    let mut backoff = Backoff::new(shared.config.backoff);
    loop {
        if *stop.borrow() {
            return;
        }

        let established = tokio::select! {
            result = shared.establish() => result,
            _ = stop.changed() => return,
        };

        let failure = match established {
            Ok(mut connection) => {
                shared.activate(&connection);
                let started = Instant::now();
                let mut received = false;
                let end = shared
                    .run_session(&mut connection, &mut stop, &mut received)
                    .await;
                shared.deactivate();
                if received || started.elapsed() >= Duration::from_millis(STABLE_SESSION_MS) {
                    backoff.reset();
                }
                match end {
                    SessionEnd::Stopped => return,
                    SessionEnd::Failed(err) => err,
                    SessionEnd::Closed(reason) => FeedError::Transport(
                        reason.unwrap_or_else(|| "connection closed".to_string()),
                    ),
                }
            }
            Err(err) => err,
        };

        if failure.is_fatal() {
            shared.fail(failure);
            return;
        }
        warn!(broker = shared.broker, error = %failure, "Upstream connection lost");
        shared.set_state(AdapterState::Reconnecting);

        let Some(delay) = backoff.next_delay() else {
            shared.fail(FeedError::MaxReconnectAttemptsExceeded {
                attempts: backoff.attempts(),
            });
            return;
        };
        info!(
            broker = shared.broker,
            attempt = backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting after backoff"
        );
        tokio::select! {
            () = sleep(delay) => {}
            _ = stop.changed() => return,
        }
    }
}

/// WebSocket adapter for any broker with a protocol implementation
pub struct WebSocketAdapter {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketAdapter {
    /// Build an adapter for `broker` without connecting
    ///
    /// Fails with `Auth` when the session lacks a credential the broker
    /// needs, and with `UnsupportedCapability` for an unknown broker.
    pub fn initialize(
        broker: &str,
        session_id: impl Into<String>,
        credentials: &dyn CredentialStore,
        resolver: Arc<dyn SymbolResolver>,
        transport: Arc<dyn Transport>,
        bus: Arc<TickBus>,
        config: AdapterConfig,
    ) -> FeedResult<Self> {
        let unsupported = || FeedError::UnsupportedCapability(format!("unknown broker {broker}"));
        let protocol = exchanges::protocol_for(broker).ok_or_else(unsupported)?;
        let capabilities = capabilities::for_broker(broker).ok_or_else(unsupported)?;

        let session_id = session_id.into();
        let credentials = credentials
            .credentials(&session_id)
            .map_err(|e| FeedError::Auth(e.to_string()))?;
        credentials
            .require(&session_id, protocol.codec.required_credentials())
            .map_err(|e| FeedError::Auth(e.to_string()))?;
        protocol
            .codec
            .endpoint(config.url.as_deref(), &credentials)?;

        let heartbeat_interval = config.heartbeat_interval(protocol.codec.heartbeat_interval());
        let broker = protocol.codec.broker();
        info!(broker, session_id = %session_id, ?heartbeat_interval, "Adapter initialized");

        Ok(Self {
            shared: Arc::new(Shared {
                broker,
                session_id,
                protocol,
                capabilities,
                resolver,
                transport,
                bus,
                credentials,
                config,
                heartbeat_interval,
                inner: Mutex::new(Inner {
                    registry: SubscriptionRegistry::new(),
                    cache: MarketDataCache::new(),
                    outbound: None,
                }),
                state: watch::channel(AdapterState::Idle).0,
                stop: watch::channel(false).0,
                last_error: Mutex::new(None),
            }),
            supervisor: Mutex::new(None),
        })
    }
}

impl fmt::Debug for WebSocketAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketAdapter")
            .field("broker", &self.shared.broker)
            .field("session_id", &self.shared.session_id)
            .field("state", &*self.shared.state.borrow())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BrokerAdapter for WebSocketAdapter {
    fn broker(&self) -> &str {
        self.shared.broker
    }

    fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    fn state(&self) -> AdapterState {
        *self.shared.state.borrow()
    }

    fn watch_state(&self) -> watch::Receiver<AdapterState> {
        self.shared.state.subscribe()
    }

    fn last_error(&self) -> Option<FeedError> {
        self.shared.last_error.lock().clone()
    }

    async fn connect(&self) -> FeedResult<()> {
        let mut supervisor = self.supervisor.lock();
        if supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!(broker = self.shared.broker, "Supervisor already running");
            return Ok(());
        }

        self.shared.stop.send_replace(false);
        *self.shared.last_error.lock() = None;
        self.shared.set_state(AdapterState::Connecting);
        let stop = self.shared.stop.subscribe();
        *supervisor = Some(tokio::spawn(supervise(Arc::clone(&self.shared), stop)));
        Ok(())
    }

    async fn disconnect(&self) -> FeedResult<()> {
        self.shared.stop.send_replace(true);
        let task = self.supervisor.lock().take();
        if let Some(mut task) = task {
            if timeout(SUPERVISOR_JOIN_TIMEOUT, &mut task).await.is_err() {
                warn!(broker = self.shared.broker, "Supervisor did not stop in time, aborting");
                task.abort();
            }
        }

        let dropped = {
            let mut inner = self.shared.inner.lock();
            inner.outbound = None;
            let dropped = inner.registry.len();
            inner.registry.clear();
            inner.cache.clear_all();
            dropped
        };
        self.shared.set_state(AdapterState::Stopped);
        info!(
            broker = self.shared.broker,
            session_id = %self.shared.session_id,
            dropped,
            "Disconnected"
        );
        Ok(())
    }

    fn subscribe(
        &self,
        key: InstrumentKey,
        mode: SubscriptionMode,
        depth_level: u8,
    ) -> FeedResult<SubscriptionOutcome> {
        let shared = &self.shared;
        let (actual_depth, is_fallback) =
            shared.capabilities.resolve(&key.exchange, mode, depth_level)?;
        let scrip = shared
            .resolver
            .lookup(&key.symbol, &key.exchange)
            .ok_or_else(|| FeedError::symbol_not_found(&key.symbol, &key.exchange))?;

        if is_fallback {
            info!(
                broker = shared.broker,
                key = %key,
                requested = depth_level,
                actual = actual_depth,
                "Depth not supported, falling back"
            );
        }
        debug!(broker = shared.broker, key = %key, scrip = %scrip, mode = %mode, "Subscribing");

        let subscription = LogicalSubscription::new(key, scrip.clone(), mode, actual_depth);
        let correlation_id = subscription.correlation_id;

        let mut inner = shared.inner.lock();
        let previous = inner.registry.effective_mode(&scrip);
        if inner.registry.register(subscription).first_ref {
            let frames = shared.frames_on_add(&scrip, mode, previous);
            inner.send(frames);
        }

        Ok(SubscriptionOutcome {
            correlation_id,
            actual_depth,
            is_fallback,
        })
    }

    fn unsubscribe(
        &self,
        key: &InstrumentKey,
        mode: SubscriptionMode,
    ) -> FeedResult<Unregistered> {
        let mut inner = self.shared.inner.lock();
        let removed = inner
            .registry
            .unregister(key, mode)
            .ok_or_else(|| FeedError::NotSubscribed(format!("{key} {mode}")))?;
        self.shared.release(&mut inner, &removed);
        Ok(removed)
    }

    fn unsubscribe_id(&self, correlation_id: &Uuid) -> FeedResult<Unregistered> {
        let mut inner = self.shared.inner.lock();
        let removed = inner
            .registry
            .unregister_id(correlation_id)
            .ok_or_else(|| FeedError::NotSubscribed(correlation_id.to_string()))?;
        self.shared.release(&mut inner, &removed);
        Ok(removed)
    }

    fn unsubscribe_all(&self) -> usize {
        let mut inner = self.shared.inner.lock();
        let ids: Vec<Uuid> = inner
            .registry
            .subscriptions()
            .iter()
            .map(|subscription| subscription.correlation_id)
            .collect();
        for id in &ids {
            if let Some(removed) = inner.registry.unregister_id(id) {
                self.shared.release(&mut inner, &removed);
            }
        }
        ids.len()
    }

    fn subscriptions(&self) -> Vec<LogicalSubscription> {
        self.shared.inner.lock().registry.subscriptions()
    }

    fn snapshot(&self, key: &InstrumentKey, mode: SubscriptionMode) -> Option<CanonicalTick> {
        let inner = self.shared.inner.lock();
        let subscription = inner
            .registry
            .subscriptions()
            .into_iter()
            .filter(|subscription| subscription.key == *key && subscription.mode == mode)
            .max_by_key(|subscription| subscription.depth_level)?;
        let entry = inner
            .cache
            .get(&subscription.scrip)
            .filter(|entry| entry.is_initialized())?;
        Some(entry.project(
            self.shared.broker,
            key,
            &subscription.scrip,
            mode,
            subscription.depth_level,
        ))
    }
}
