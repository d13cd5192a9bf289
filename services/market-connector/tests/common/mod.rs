//! In-memory transport and fixtures shared by the adapter tests

#![allow(dead_code)]

use async_trait::async_trait;
use auth::{InMemoryCredentialStore, SessionCredentials};
use market_connector::codec::{Endpoint, WireFrame};
use market_connector::connectors::{Connection, Transport, TransportError, TransportEvent};
use market_connector::instruments::InstrumentStore;
use market_connector::{AdapterConfig, AdapterState, BrokerAdapter, WebSocketAdapter};
use parking_lot::Mutex;
use serde_json::Value;
use services_common::{BackoffPolicy, TickBus};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};

pub const SESSION: &str = "session-1";
pub const WAIT: Duration = Duration::from_secs(5);

/// What the next connect attempt does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Refuse,
    Unauthorized,
}

/// Broker side of one accepted connection
pub struct MockSession {
    pub endpoint: Endpoint,
    sent: mpsc::UnboundedReceiver<WireFrame>,
    events: mpsc::Sender<TransportEvent>,
}

impl MockSession {
    pub async fn push(&self, frame: WireFrame) {
        self.events
            .send(TransportEvent::Frame(frame))
            .await
            .expect("adapter dropped the connection");
    }

    pub async fn push_text(&self, text: &str) {
        self.push(WireFrame::Text(text.to_string())).await;
    }

    pub async fn close(&self, reason: &str) {
        let _ = self
            .events
            .send(TransportEvent::Closed(Some(reason.to_string())))
            .await;
    }

    /// Everything the adapter has written so far
    pub fn sent(&mut self) -> Vec<WireFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// JSON requests written so far, heartbeats excluded
    pub fn requests(&mut self) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter_map(|frame| match frame {
                WireFrame::Text(text) => serde_json::from_str::<Value>(&text).ok(),
                _ => None,
            })
            .filter(|value| value["t"] != "h")
            .collect()
    }
}

/// Transport that scripts connect outcomes and hands accepted sessions to the test
pub struct MockTransport {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    attempts: Mutex<Vec<Instant>>,
    sessions: mpsc::UnboundedSender<MockSession>,
}

impl MockTransport {
    pub fn new(fallback: Outcome) -> (Arc<Self>, mpsc::UnboundedReceiver<MockSession>) {
        let (sessions, accepted) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            attempts: Mutex::new(Vec::new()),
            sessions,
        });
        (transport, accepted)
    }

    /// Queue outcomes consumed before the fallback applies
    pub fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.script.lock().extend(outcomes);
    }

    pub fn connects(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, TransportError> {
        self.attempts.lock().push(Instant::now());
        let outcome = self.script.lock().pop_front().unwrap_or(self.fallback);
        match outcome {
            Outcome::Refuse => Err(TransportError::Connect("connection refused".to_string())),
            Outcome::Unauthorized => Err(TransportError::Auth("HTTP 401".to_string())),
            Outcome::Accept => {
                let (outbound, sent) = mpsc::unbounded_channel();
                let (events, inbound) = mpsc::channel(64);
                let _ = self.sessions.send(MockSession {
                    endpoint: endpoint.clone(),
                    sent,
                    events,
                });
                Ok(Connection::new(outbound, inbound))
            }
        }
    }
}

/// Instrument master with RELIANCE, INFY and TCS under `broker_exchange`
pub fn instruments(broker_exchange: &str) -> Arc<InstrumentStore> {
    let csv = format!(
        "symbol,exchange,token,broker_exchange,name,lot_size,tick_size,instrument_type\n\
         RELIANCE,NSE,2885,{broker_exchange},Reliance Industries,1,0.05,EQ\n\
         INFY,NSE,1594,{broker_exchange},Infosys,1,0.05,EQ\n\
         TCS,NSE,11536,{broker_exchange},Tata Consultancy Services,1,0.05,EQ\n"
    );
    Arc::new(InstrumentStore::from_csv_reader(csv.as_bytes()).expect("valid instrument master"))
}

pub fn credentials() -> InMemoryCredentialStore {
    let store = InMemoryCredentialStore::new();
    store.insert(
        SESSION,
        SessionCredentials::new("auth-token")
            .with_api_key("api-key")
            .with_client_code("FA1234")
            .with_feed_token("feed-token"),
    );
    store
}

/// Adapter config with fast reconnects
pub fn config(base_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> AdapterConfig {
    AdapterConfig {
        url: Some("wss://feed.example.test/ws".to_string()),
        backoff: BackoffPolicy {
            base_delay_ms,
            max_delay_ms,
            max_attempts,
        },
        ..AdapterConfig::default()
    }
}

/// Adapter for `broker` whose instruments are listed under `broker_exchange`
pub fn adapter(
    broker: &str,
    broker_exchange: &str,
    transport: Arc<MockTransport>,
    bus: Arc<TickBus>,
    config: AdapterConfig,
) -> WebSocketAdapter {
    WebSocketAdapter::initialize(
        broker,
        SESSION,
        &credentials(),
        instruments(broker_exchange),
        transport,
        bus,
        config,
    )
    .expect("adapter initializes")
}

/// Wait until the adapter reports `state`
pub async fn wait_for_state(adapter: &dyn BrokerAdapter, state: AdapterState) {
    let mut states = adapter.watch_state();
    let reached = matches!(
        timeout(WAIT, states.wait_for(|current| *current == state)).await,
        Ok(Ok(_))
    );
    assert!(reached, "adapter never reached {state}, stuck in {}", adapter.state());
}

pub async fn next_session(sessions: &mut mpsc::UnboundedReceiver<MockSession>) -> MockSession {
    timeout(WAIT, sessions.recv())
        .await
        .expect("no connection within the wait")
        .expect("transport dropped")
}

/// SmartAPI LTP (mode 1) or Quote (mode 2) packet for an `nse_cm` token
pub fn angel_packet(mode: u8, token: &str, ltp_paise: i64) -> Vec<u8> {
    let len = if mode == 1 { 51 } else { 123 };
    let mut packet = vec![0u8; len];
    packet[0] = mode;
    packet[1] = 1;
    packet[2..2 + token.len()].copy_from_slice(token.as_bytes());
    packet[27..35].copy_from_slice(&1i64.to_le_bytes());
    packet[35..43].copy_from_slice(&1_700_000_000_000i64.to_le_bytes());
    packet[43..51].copy_from_slice(&ltp_paise.to_le_bytes());
    if mode == 2 {
        packet[51..59].copy_from_slice(&25i64.to_le_bytes());
        packet[59..67].copy_from_slice(&(ltp_paise - 5).to_le_bytes());
        packet[67..75].copy_from_slice(&1_250_000i64.to_le_bytes());
        packet[75..83].copy_from_slice(&5000f64.to_le_bytes());
        packet[83..91].copy_from_slice(&4000f64.to_le_bytes());
        packet[91..99].copy_from_slice(&243_000i64.to_le_bytes());
        packet[99..107].copy_from_slice(&246_500i64.to_le_bytes());
        packet[107..115].copy_from_slice(&242_010i64.to_le_bytes());
        packet[115..123].copy_from_slice(&242_500i64.to_le_bytes());
    }
    packet
}
