//! Broker wire protocols
//!
//! A [`ProtocolCodec`] turns raw upstream frames into native field maps and
//! builds the frames the broker expects for subscriptions. A
//! [`FieldNormalizer`] maps those native fields onto canonical names and
//! units. Codecs never scale prices; normalizers never look at bytes.

pub mod scan;

pub use scan::{ScannedPrice, scan_for_plausible_price};

use crate::cache::FieldMap;
use auth::{CredentialField, SessionCredentials};
use rustc_hash::FxHashMap;
use services_common::{FeedResult, Scrip, SubscriptionMode};
use std::time::Duration;
use thiserror::Error;

/// One WebSocket frame, independent of the transport library
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
}

impl WireFrame {
    /// Frame payload as bytes, for logging
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) | Self::Ping(bytes) | Self::Pong(bytes) => bytes,
        }
    }
}

/// Upstream connection parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// WebSocket URL including any query credentials
    pub url: String,
    /// Extra upgrade request headers
    pub headers: Vec<(String, String)>,
}

/// What a decoded upstream message means
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Session handshake accepted
    AuthAck,
    /// Session handshake rejected by the broker
    AuthRejected(String),
    /// Market data carrying everything up to the given mode
    Tick(SubscriptionMode),
    SubscriptionAck,
    UnsubscriptionAck,
    Heartbeat,
    /// Broker-reported error that does not end the session
    Error(String),
    /// Well-formed message with no meaning to the core
    Unknown(String),
}

/// One market depth level in the broker's native units
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NativeLevel {
    pub price: f64,
    pub quantity: i64,
    pub orders: i64,
}

/// Native field value
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Int(i64),
    Float(f64),
    Text(String),
    Levels {
        buy: Vec<NativeLevel>,
        sell: Vec<NativeLevel>,
    },
}

/// Broker-named fields of one message
pub type NativeFields = FxHashMap<&'static str, NativeValue>;

/// Decoded upstream message
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub kind: MessageKind,
    /// Broker token of the instrument, when the message is about one
    pub token: Option<String>,
    /// Broker exchange code, when the broker reports it
    pub exchange_code: Option<String>,
    pub fields: NativeFields,
}

impl DecodedMessage {
    /// Message with no instrument and no fields
    #[must_use]
    pub fn control(kind: MessageKind) -> Self {
        Self {
            kind,
            token: None,
            exchange_code: None,
            fields: NativeFields::default(),
        }
    }

    /// Tick message for `token`
    pub fn tick(mode: SubscriptionMode, token: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Tick(mode),
            token: Some(token.into()),
            exchange_code: None,
            fields: NativeFields::default(),
        }
    }

    #[must_use]
    pub fn with_exchange(mut self, exchange_code: impl Into<String>) -> Self {
        self.exchange_code = Some(exchange_code.into());
        self
    }

    pub fn insert(&mut self, name: &'static str, value: NativeValue) {
        self.fields.insert(name, value);
    }

    /// Integer field, converting floats and numeric text
    #[must_use]
    pub fn int(&self, name: &str) -> Option<i64> {
        match self.fields.get(name)? {
            NativeValue::Int(v) => Some(*v),
            NativeValue::Float(v) => Some(*v as i64),
            NativeValue::Text(text) => text
                .parse::<i64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().map(|v| v as i64)),
            NativeValue::Levels { .. } => None,
        }
    }

    /// Float field, converting integers and numeric text
    #[must_use]
    pub fn float(&self, name: &str) -> Option<f64> {
        match self.fields.get(name)? {
            NativeValue::Int(v) => Some(*v as f64),
            NativeValue::Float(v) => Some(*v),
            NativeValue::Text(text) => text.parse::<f64>().ok(),
            NativeValue::Levels { .. } => None,
        }
    }

    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.fields.get(name)? {
            NativeValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Depth levels field
    #[must_use]
    pub fn levels(&self, name: &str) -> Option<(&[NativeLevel], &[NativeLevel])> {
        match self.fields.get(name)? {
            NativeValue::Levels { buy, sell } => Some((buy, sell)),
            _ => None,
        }
    }
}

/// Frame decoding errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame too short for message {code}: need {needed} bytes, got {actual}")]
    Truncated {
        code: String,
        needed: usize,
        actual: usize,
    },

    #[error("Unknown message code {code}")]
    UnknownMessage { code: String },

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Invalid JSON: {0}")]
    Json(String),
}

impl DecodeError {
    /// Message code the failure relates to, for logging
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Truncated { code, .. } | Self::UnknownMessage { code } => code,
            Self::Malformed(_) => "malformed",
            Self::Json(_) => "json",
        }
    }

    pub(crate) fn truncated(code: impl ToString, needed: usize, actual: usize) -> Self {
        Self::Truncated {
            code: code.to_string(),
            needed,
            actual,
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type for decoding
pub type DecodeResult<T> = Result<T, DecodeError>;

/// How a broker scopes upstream subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeScope {
    /// Each `(scrip, mode)` is its own upstream subscription
    PerMode,
    /// One upstream subscription per scrip at its highest mode
    PerScrip,
}

/// Previously merged prices, used to narrow heuristic decoding
pub trait PriceHints {
    /// `(low, high)` of the instrument carrying `token`, when known
    fn ohlc_band(&self, token: &str, exchange_code: Option<&str>) -> Option<(f64, f64)>;
}

/// Hints source with no knowledge
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHints;

impl PriceHints for NoHints {
    fn ohlc_band(&self, _token: &str, _exchange_code: Option<&str>) -> Option<(f64, f64)> {
        None
    }
}

/// Broker wire protocol
pub trait ProtocolCodec: Send + Sync {
    /// Broker name
    fn broker(&self) -> &'static str;

    fn mode_scope(&self) -> ModeScope;

    /// Credential fields the broker needs besides the auth token
    fn required_credentials(&self) -> &'static [CredentialField] {
        &[]
    }

    /// Connection parameters, `base_url` overriding the broker default
    fn endpoint(&self, base_url: Option<&str>, credentials: &SessionCredentials)
    -> FeedResult<Endpoint>;

    /// First frame after the socket opens, if the broker wants one
    fn handshake(&self, _credentials: &SessionCredentials) -> Option<WireFrame> {
        None
    }

    /// Whether the session is usable only after an explicit auth ack
    fn awaits_auth_ack(&self) -> bool {
        false
    }

    /// Client keep-alive frame
    fn heartbeat(&self) -> WireFrame {
        WireFrame::Ping(Vec::new())
    }

    fn heartbeat_interval(&self) -> Duration;

    fn encode_subscribe(&self, scrip: &Scrip, mode: SubscriptionMode) -> Vec<WireFrame>;

    fn encode_unsubscribe(&self, scrip: &Scrip, mode: SubscriptionMode) -> Vec<WireFrame>;

    /// Frames moving a per-scrip subscription from one mode to another
    fn encode_mode_change(
        &self,
        scrip: &Scrip,
        from: SubscriptionMode,
        to: SubscriptionMode,
    ) -> Vec<WireFrame> {
        let mut frames = self.encode_unsubscribe(scrip, from);
        frames.extend(self.encode_subscribe(scrip, to));
        frames
    }

    /// Decode one upstream frame into zero or more messages
    ///
    /// A frame that fails to decode yields nothing; partial results are
    /// never returned.
    fn decode(&self, frame: &WireFrame, hints: &dyn PriceHints)
    -> DecodeResult<Vec<DecodedMessage>>;
}

/// Native to canonical field mapping
pub trait FieldNormalizer: Send + Sync {
    fn normalize(&self, message: &DecodedMessage) -> FieldMap;
}

/// Codec and normalizer of one broker
pub struct BrokerProtocol {
    pub codec: Box<dyn ProtocolCodec>,
    pub normalizer: Box<dyn FieldNormalizer>,
}

impl std::fmt::Debug for BrokerProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerProtocol")
            .field("broker", &self.codec.broker())
            .field("mode_scope", &self.codec.mode_scope())
            .finish()
    }
}

/// Fixed-offset readers that fail with [`DecodeError::Truncated`]
pub(crate) mod read {
    use super::{DecodeError, DecodeResult};
    use byteorder::{BigEndian, ByteOrder, LittleEndian};

    fn slice<'a>(buf: &'a [u8], offset: usize, width: usize, code: &str) -> DecodeResult<&'a [u8]> {
        buf.get(offset..offset + width)
            .ok_or_else(|| DecodeError::truncated(code, offset + width, buf.len()))
    }

    pub fn be_i16(buf: &[u8], offset: usize, code: &str) -> DecodeResult<i16> {
        slice(buf, offset, 2, code).map(BigEndian::read_i16)
    }

    pub fn be_u16(buf: &[u8], offset: usize, code: &str) -> DecodeResult<u16> {
        slice(buf, offset, 2, code).map(BigEndian::read_u16)
    }

    pub fn be_i32(buf: &[u8], offset: usize, code: &str) -> DecodeResult<i32> {
        slice(buf, offset, 4, code).map(BigEndian::read_i32)
    }

    pub fn be_u32(buf: &[u8], offset: usize, code: &str) -> DecodeResult<u32> {
        slice(buf, offset, 4, code).map(BigEndian::read_u32)
    }

    pub fn le_i16(buf: &[u8], offset: usize, code: &str) -> DecodeResult<i16> {
        slice(buf, offset, 2, code).map(LittleEndian::read_i16)
    }

    pub fn le_u16(buf: &[u8], offset: usize, code: &str) -> DecodeResult<u16> {
        slice(buf, offset, 2, code).map(LittleEndian::read_u16)
    }

    pub fn le_u32(buf: &[u8], offset: usize, code: &str) -> DecodeResult<u32> {
        slice(buf, offset, 4, code).map(LittleEndian::read_u32)
    }

    pub fn le_i64(buf: &[u8], offset: usize, code: &str) -> DecodeResult<i64> {
        slice(buf, offset, 8, code).map(LittleEndian::read_i64)
    }

    pub fn le_u64(buf: &[u8], offset: usize, code: &str) -> DecodeResult<u64> {
        slice(buf, offset, 8, code).map(LittleEndian::read_u64)
    }

    pub fn le_f64(buf: &[u8], offset: usize, code: &str) -> DecodeResult<f64> {
        slice(buf, offset, 8, code).map(LittleEndian::read_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_value_conversions() {
        let mut message = DecodedMessage::tick(SubscriptionMode::Quote, "22");
        message.insert("lp", NativeValue::Text("2450.55".into()));
        message.insert("v", NativeValue::Text("125000".into()));
        message.insert("ltp", NativeValue::Int(245_055));

        assert_eq!(message.float("lp"), Some(2450.55));
        assert_eq!(message.int("v"), Some(125_000));
        assert_eq!(message.int("lp"), Some(2450));
        assert_eq!(message.float("ltp"), Some(245_055.0));
        assert_eq!(message.text("ltp"), None);
        assert_eq!(message.float("missing"), None);
    }

    #[test]
    fn test_reader_reports_truncation() {
        let buf = [0u8, 1, 2];
        assert_eq!(read::be_u16(&buf, 0, "x"), Ok(1));
        let err = read::be_u32(&buf, 0, "44").unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated { code: "44".into(), needed: 4, actual: 3 }
        );
        assert_eq!(err.code(), "44");
    }
}
