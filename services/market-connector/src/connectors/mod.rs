//! Broker connections
//!
//! [`WebSocketAdapter`] drives any broker with a protocol implementation over
//! a [`Transport`]. Production uses [`WebSocketTransport`]; tests substitute
//! an in-memory transport.

pub mod adapter;
pub mod backoff;
pub mod transport;
pub mod websocket_adapter;

pub use adapter::{AdapterState, BrokerAdapter, SubscriptionOutcome};
pub use backoff::Backoff;
pub use transport::{Connection, Transport, TransportError, TransportEvent, WebSocketTransport};
pub use websocket_adapter::WebSocketAdapter;
