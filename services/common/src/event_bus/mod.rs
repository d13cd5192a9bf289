//! Topic-keyed publish/subscribe bus for normalized ticks
//!
//! Process-local fan-out with support for:
//! - Exact topic and wildcard pattern subscriptions
//! - Fire-and-forget publishing that never waits on consumers
//! - Per-topic metrics
//! - Length-prefixed wire encoding of published records

pub mod bus;
pub mod codec;
pub mod metrics;
pub mod router;

use crate::types::CanonicalTick;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

// Re-export main types
pub use bus::{EventBus, Subscription, TickBus};
pub use codec::{FrameDecoder, decode_frame, encode_frame};
pub use metrics::{BusMetrics, EventBusMetrics, TopicMetrics};
pub use router::TopicPattern;

/// Core message trait for all bus messages
pub trait BusMessage: Send + Sync + Clone + Debug + 'static {
    /// Topic the message is published on
    fn topic(&self) -> String;
}

impl BusMessage for CanonicalTick {
    fn topic(&self) -> String {
        CanonicalTick::topic(self)
    }
}

/// Message as seen by subscribers
#[derive(Debug, Clone)]
pub struct MessageEnvelope<T> {
    /// Concrete topic the message was published on
    pub topic: Arc<str>,
    /// Bus-wide publish sequence number
    pub sequence: u64,
    /// Publish time, nanoseconds since epoch
    pub published_at: u64,
    /// Payload
    pub message: T,
}

/// Event bus errors
#[derive(Debug, Error)]
pub enum EventBusError {
    /// Pattern is not exact, `*`, `prefix*` or `*suffix`
    #[error("Invalid topic pattern: {0}")]
    InvalidPattern(String),

    /// Receiver fell behind and missed messages
    #[error("Subscriber lagged behind by {0} messages")]
    Lagged(u64),

    /// Bus has been dropped
    #[error("Bus closed")]
    Closed,

    /// Frame encoding failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Frame shorter than its length prefix announces
    #[error("Incomplete frame: need {needed} bytes, have {available}")]
    Incomplete {
        /// Bytes required
        needed: usize,
        /// Bytes available
        available: usize,
    },

    /// Length prefix exceeds the frame limit
    #[error("Frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, EventBusError>;
