//! Kite ticker frame codec

use super::{DEFAULT_URL, field, packet};
use crate::codec::{
    DecodeError, DecodeResult, DecodedMessage, Endpoint, MessageKind, ModeScope, NativeLevel,
    NativeValue, PriceHints, ProtocolCodec, WireFrame, read,
};
use auth::{CredentialField, SessionCredentials};
use serde::Deserialize;
use serde_json::json;
use services_common::{
    DEFAULT_HEARTBEAT_INTERVAL_MS, FeedError, FeedResult, Scrip, SubscriptionMode,
};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Kite JSON text messages
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum KiteText {
    /// Order postback, not market data
    Order,
    /// Error reported by the ticker
    Error { data: String },
    /// Informational message
    Message { data: String },
    #[serde(other)]
    Other,
}

const fn mode_name(mode: SubscriptionMode) -> &'static str {
    match mode {
        SubscriptionMode::Ltp => "ltp",
        SubscriptionMode::Quote => "quote",
        SubscriptionMode::Depth => "full",
    }
}

/// Kite ticker codec
#[derive(Debug, Clone)]
pub struct KiteCodec {
    heartbeat_interval: Duration,
}

impl Default for KiteCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl KiteCodec {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
        }
    }

    fn token(scrip: &Scrip) -> Option<u32> {
        let token = scrip.token.parse::<u32>().ok();
        if token.is_none() {
            warn!(scrip = %scrip, "Kite tokens must be numeric");
        }
        token
    }

    fn mode_frame(token: u32, mode: SubscriptionMode) -> WireFrame {
        WireFrame::Text(json!({ "a": "mode", "v": [mode_name(mode), [token]] }).to_string())
    }

    fn decode_text(text: &str) -> DecodeResult<Vec<DecodedMessage>> {
        let message = match serde_json::from_str::<KiteText>(text)? {
            KiteText::Error { data } => DecodedMessage::control(MessageKind::Error(data)),
            KiteText::Message { data } => {
                debug!(message = %data, "Kite server message");
                DecodedMessage::control(MessageKind::Unknown("message".to_string()))
            }
            KiteText::Order => DecodedMessage::control(MessageKind::Unknown("order".to_string())),
            KiteText::Other => DecodedMessage::control(MessageKind::Unknown("text".to_string())),
        };
        Ok(vec![message])
    }

    fn decode_binary(data: &[u8]) -> DecodeResult<Vec<DecodedMessage>> {
        // a lone byte is the server heartbeat
        if data.len() == 1 {
            return Ok(vec![DecodedMessage::control(MessageKind::Heartbeat)]);
        }

        let count = usize::from(read::be_u16(data, 0, "frame")?);
        let mut messages = Vec::with_capacity(count);
        let mut offset = 2;
        for _ in 0..count {
            let len = usize::from(read::be_u16(data, offset, "packet")?);
            offset += 2;
            let packet = data
                .get(offset..offset + len)
                .ok_or_else(|| DecodeError::truncated("packet", offset + len, data.len()))?;
            messages.push(Self::decode_packet(packet)?);
            offset += len;
        }
        Ok(messages)
    }

    fn decode_packet(packet: &[u8]) -> DecodeResult<DecodedMessage> {
        let len = packet.len();
        if len < packet::LTP {
            return Err(DecodeError::truncated(len, packet::LTP, len));
        }

        let code = len.to_string();
        let code = code.as_str();
        let token = read::be_u32(packet, 0, code)?;
        let mode = match len {
            packet::LTP => SubscriptionMode::Ltp,
            packet::INDEX_QUOTE | packet::INDEX_FULL | packet::QUOTE => SubscriptionMode::Quote,
            packet::FULL => SubscriptionMode::Depth,
            _ => return Err(DecodeError::UnknownMessage { code: code.to_string() }),
        };

        let mut message = DecodedMessage::tick(mode, token.to_string());
        let int = |offset| read::be_i32(packet, offset, code).map(|v| NativeValue::Int(i64::from(v)));
        message.insert(field::SEGMENT, NativeValue::Int(i64::from(token & 0xff)));
        message.insert(field::LAST_PRICE, int(4)?);

        match len {
            packet::INDEX_QUOTE | packet::INDEX_FULL => {
                message.insert(field::HIGH, int(8)?);
                message.insert(field::LOW, int(12)?);
                message.insert(field::OPEN, int(16)?);
                message.insert(field::CLOSE, int(20)?);
                message.insert(field::CHANGE, int(24)?);
                if len == packet::INDEX_FULL {
                    message.insert(field::EXCHANGE_TIMESTAMP, int(28)?);
                }
            }
            packet::QUOTE | packet::FULL => {
                message.insert(field::LAST_TRADED_QUANTITY, int(8)?);
                message.insert(field::AVERAGE_TRADED_PRICE, int(12)?);
                message.insert(field::VOLUME_TRADED, int(16)?);
                message.insert(field::TOTAL_BUY_QUANTITY, int(20)?);
                message.insert(field::TOTAL_SELL_QUANTITY, int(24)?);
                message.insert(field::OPEN, int(28)?);
                message.insert(field::HIGH, int(32)?);
                message.insert(field::LOW, int(36)?);
                message.insert(field::CLOSE, int(40)?);
            }
            _ => {}
        }

        if len == packet::FULL {
            message.insert(field::LAST_TRADE_TIME, int(44)?);
            message.insert(field::OI, int(48)?);
            message.insert(field::OI_DAY_HIGH, int(52)?);
            message.insert(field::OI_DAY_LOW, int(56)?);
            message.insert(field::EXCHANGE_TIMESTAMP, int(60)?);
            message.insert(field::DEPTH, Self::decode_depth(packet, code)?);
        }
        Ok(message)
    }

    fn decode_depth(packet: &[u8], code: &str) -> DecodeResult<NativeValue> {
        let level = |index: usize| -> DecodeResult<NativeLevel> {
            let base = packet::DEPTH_OFFSET + index * packet::DEPTH_LEVEL_SIZE;
            Ok(NativeLevel {
                quantity: i64::from(read::be_i32(packet, base, code)?),
                price: f64::from(read::be_i32(packet, base + 4, code)?),
                orders: i64::from(read::be_i16(packet, base + 8, code)?),
            })
        };

        let per_side = packet::DEPTH_LEVELS_PER_SIDE;
        Ok(NativeValue::Levels {
            buy: (0..per_side).map(level).collect::<DecodeResult<_>>()?,
            sell: (per_side..2 * per_side).map(level).collect::<DecodeResult<_>>()?,
        })
    }
}

impl ProtocolCodec for KiteCodec {
    fn broker(&self) -> &'static str {
        super::BROKER
    }

    fn mode_scope(&self) -> ModeScope {
        ModeScope::PerScrip
    }

    fn required_credentials(&self) -> &'static [CredentialField] {
        &[CredentialField::ApiKey]
    }

    fn endpoint(
        &self,
        base_url: Option<&str>,
        credentials: &SessionCredentials,
    ) -> FeedResult<Endpoint> {
        let api_key = credentials
            .api_key
            .as_deref()
            .ok_or_else(|| FeedError::Auth("Kite ticker needs an api key".to_string()))?;
        let url = Url::parse_with_params(
            base_url.unwrap_or(DEFAULT_URL),
            &[
                ("api_key", api_key.trim()),
                ("access_token", credentials.auth_token.trim()),
            ],
        )
        .map_err(|e| FeedError::Config(format!("Invalid Kite ticker url: {e}")))?;

        Ok(Endpoint {
            url: url.into(),
            headers: Vec::new(),
        })
    }

    fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    fn encode_subscribe(&self, scrip: &Scrip, mode: SubscriptionMode) -> Vec<WireFrame> {
        let Some(token) = Self::token(scrip) else {
            return Vec::new();
        };
        vec![
            WireFrame::Text(json!({ "a": "subscribe", "v": [token] }).to_string()),
            Self::mode_frame(token, mode),
        ]
    }

    fn encode_unsubscribe(&self, scrip: &Scrip, _mode: SubscriptionMode) -> Vec<WireFrame> {
        Self::token(scrip)
            .map(|token| {
                vec![WireFrame::Text(
                    json!({ "a": "unsubscribe", "v": [token] }).to_string(),
                )]
            })
            .unwrap_or_default()
    }

    fn encode_mode_change(
        &self,
        scrip: &Scrip,
        _from: SubscriptionMode,
        to: SubscriptionMode,
    ) -> Vec<WireFrame> {
        Self::token(scrip)
            .map(|token| vec![Self::mode_frame(token, to)])
            .unwrap_or_default()
    }

    fn decode(
        &self,
        frame: &WireFrame,
        _hints: &dyn PriceHints,
    ) -> DecodeResult<Vec<DecodedMessage>> {
        match frame {
            WireFrame::Text(text) => Self::decode_text(text),
            WireFrame::Binary(data) => Self::decode_binary(data),
            WireFrame::Ping(_) | WireFrame::Pong(_) => {
                Ok(vec![DecodedMessage::control(MessageKind::Heartbeat)])
            }
        }
    }
}
