//! Instrument identities and subscription modes

use crate::constants::TOPIC_SEPARATOR;
use crate::errors::FeedError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Subscription mode
///
/// Modes are ordered by how much data they carry, so `Depth > Quote > Ltp`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum SubscriptionMode {
    /// Last traded price only
    #[default]
    Ltp = 1,
    /// OHLC, volume and best bid/ask aggregates
    Quote = 2,
    /// Quote plus per-level market depth
    Depth = 3,
}

impl SubscriptionMode {
    /// All modes, lowest first
    pub const ALL: [Self; 3] = [Self::Ltp, Self::Quote, Self::Depth];

    /// Name used in bus topics
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ltp => "LTP",
            Self::Quote => "QUOTE",
            Self::Depth => "DEPTH",
        }
    }

    /// Numeric code used at the API boundary
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for SubscriptionMode {
    type Error = FeedError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Ltp),
            2 => Ok(Self::Quote),
            3 => Ok(Self::Depth),
            other => Err(FeedError::InvalidRequest(format!(
                "mode must be 1 (LTP), 2 (Quote) or 3 (Depth), got {other}"
            ))),
        }
    }
}

impl fmt::Display for SubscriptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Downstream identity of an instrument
///
/// Exchange and symbol are stored upper-cased so lookups and topics do not
/// depend on caller casing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentKey {
    /// Exchange, e.g. `NSE`
    pub exchange: String,
    /// Trading symbol, e.g. `RELIANCE`
    pub symbol: String,
}

impl InstrumentKey {
    /// Create a key, normalizing case and surrounding whitespace
    pub fn new(exchange: impl AsRef<str>, symbol: impl AsRef<str>) -> Self {
        Self {
            exchange: exchange.as_ref().trim().to_uppercase(),
            symbol: symbol.as_ref().trim().to_uppercase(),
        }
    }

    /// Bus topic for this instrument in `mode`
    #[must_use]
    pub fn topic(&self, mode: SubscriptionMode) -> String {
        topic_for(&self.exchange, &self.symbol, mode)
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}

/// Broker-native identity of an instrument
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scrip {
    /// Broker exchange code, e.g. `nse_cm` or `NSE`
    pub exchange_code: String,
    /// Broker instrument token
    pub token: String,
}

impl Scrip {
    /// Create a scrip
    pub fn new(exchange_code: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            exchange_code: exchange_code.into(),
            token: token.into(),
        }
    }
}

impl fmt::Display for Scrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.exchange_code, self.token)
    }
}

/// Topic `"{exchange}_{symbol}_{mode}"`
#[must_use]
pub fn topic_for(exchange: &str, symbol: &str, mode: SubscriptionMode) -> String {
    let mut topic = String::with_capacity(exchange.len() + symbol.len() + 8);
    topic.push_str(exchange);
    topic.push(TOPIC_SEPARATOR);
    topic.push_str(symbol);
    topic.push(TOPIC_SEPARATOR);
    topic.push_str(mode.name());
    topic
}
