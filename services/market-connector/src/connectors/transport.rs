//! Upstream WebSocket transport
//!
//! A [`Transport`] opens one connection and hands back a [`Connection`]: an
//! outbound frame sender plus an inbound event receiver. The adapter never
//! touches the socket directly, which lets tests drive it with an in-memory
//! transport.

use crate::codec::{Endpoint, WireFrame};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use services_common::FeedError;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, trace, warn};

/// Default capacity of the inbound event queue
pub const DEFAULT_INBOUND_QUEUE_SIZE: usize = 1024;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Upgrade rejected with 401 or 403
    #[error("Upgrade rejected: {0}")]
    Auth(String),

    /// No answer within the allotted time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Connection already closed
    #[error("Connection closed")]
    Closed,
}

impl From<TransportError> for FeedError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Auth(reason) => Self::Auth(reason),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Something that happened on a live connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Frame received from the broker
    Frame(WireFrame),
    /// Connection ended, with the reason when one is known
    Closed(Option<String>),
}

/// One live upstream connection
///
/// Dropping the connection stops its I/O tasks and closes the socket.
#[derive(Debug)]
pub struct Connection {
    /// Frames to send to the broker
    pub outbound: mpsc::UnboundedSender<WireFrame>,
    /// Frames and close events from the broker
    pub inbound: mpsc::Receiver<TransportEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    /// Wrap a channel pair
    #[must_use]
    pub fn new(
        outbound: mpsc::UnboundedSender<WireFrame>,
        inbound: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            tasks: Vec::new(),
        }
    }

    /// Tie a background task to the lifetime of this connection
    #[must_use]
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Queue a frame, failing when the connection is gone
    pub fn send(&self, frame: WireFrame) -> Result<(), TransportError> {
        self.outbound.send(frame).map_err(|_| TransportError::Closed)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Opens upstream connections
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to `endpoint`
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, TransportError>;
}

/// `tokio-tungstenite` transport
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    inbound_queue_size: usize,
}

impl WebSocketTransport {
    /// Transport buffering up to `inbound_queue_size` events per connection
    #[must_use]
    pub fn new(inbound_queue_size: usize) -> Self {
        Self {
            inbound_queue_size: inbound_queue_size.max(1),
        }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(DEFAULT_INBOUND_QUEUE_SIZE)
    }
}

fn to_message(frame: WireFrame) -> Message {
    match frame {
        WireFrame::Text(text) => Message::Text(text),
        WireFrame::Binary(data) => Message::Binary(data),
        WireFrame::Ping(data) => Message::Ping(data),
        WireFrame::Pong(data) => Message::Pong(data),
    }
}

fn connect_error(err: WsError) -> TransportError {
    if let WsError::Http(response) = &err {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return TransportError::Auth(format!("HTTP {status}"));
        }
    }
    TransportError::Connect(err.to_string())
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, TransportError> {
        let mut request = endpoint
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        for (name, value) in &endpoint.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Connect(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Connect(format!("header {name}: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (stream, response) = connect_async(request).await.map_err(|e| {
            error!("WebSocket connection failed: {}", e);
            connect_error(e)
        })?;
        info!(status = %response.status(), "WebSocket connected");

        let (mut write, mut read) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WireFrame>();
        let (inbound_tx, inbound_rx) = mpsc::channel(self.inbound_queue_size);

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = write.send(to_message(frame)).await {
                    warn!("WebSocket write failed: {}", e);
                    return;
                }
            }
            let _ = write.send(Message::Close(None)).await;
        });

        let pong_tx = outbound_tx.clone();
        let reader = tokio::spawn(async move {
            let reason = loop {
                let event = match read.next().await {
                    Some(Ok(Message::Text(text))) => TransportEvent::Frame(WireFrame::Text(text)),
                    Some(Ok(Message::Binary(data))) => {
                        TransportEvent::Frame(WireFrame::Binary(data))
                    }
                    Some(Ok(Message::Ping(data))) => {
                        trace!("Received ping, sending pong");
                        let _ = pong_tx.send(WireFrame::Pong(data.clone()));
                        TransportEvent::Frame(WireFrame::Ping(data))
                    }
                    Some(Ok(Message::Pong(data))) => TransportEvent::Frame(WireFrame::Pong(data)),
                    Some(Ok(Message::Close(frame))) => {
                        debug!("WebSocket closed by server");
                        break frame.map(|f| format!("{} {}", u16::from(f.code), f.reason));
                    }
                    Some(Ok(Message::Frame(_))) => continue,
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break None,
                };
                if inbound_tx.send(event).await.is_err() {
                    return;
                }
            };
            let _ = inbound_tx.send(TransportEvent::Closed(reason)).await;
        });

        Ok(Connection::new(outbound_tx, inbound_rx)
            .with_task(writer)
            .with_task(reader))
    }
}
