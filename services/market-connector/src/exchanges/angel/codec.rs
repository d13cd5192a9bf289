//! SmartAPI stream frame codec

use super::{DEFAULT_URL, HEARTBEAT_INTERVAL_SECS, exchange_code, exchange_type, field, layout};
use crate::codec::{
    DecodeError, DecodeResult, DecodedMessage, Endpoint, MessageKind, ModeScope, NativeLevel,
    NativeValue, PriceHints, ProtocolCodec, WireFrame, read,
};
use auth::{CredentialField, SessionCredentials};
use serde::Serialize;
use services_common::{FeedError, FeedResult, Scrip, SubscriptionMode};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

const PING: &str = "ping";
const PONG: &str = "pong";
const CORRELATION_ID_LEN: usize = 10;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenList<'a> {
    exchange_type: u8,
    tokens: [&'a str; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Params<'a> {
    mode: u8,
    token_list: [TokenList<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    #[serde(rename = "correlationID")]
    correlation_id: String,
    action: u8,
    params: Params<'a>,
}

const ACTION_SUBSCRIBE: u8 = 1;
const ACTION_UNSUBSCRIBE: u8 = 0;

const fn mode_code(mode: SubscriptionMode) -> u8 {
    match mode {
        SubscriptionMode::Ltp => 1,
        SubscriptionMode::Quote => 2,
        SubscriptionMode::Depth => 3,
    }
}

/// SmartAPI stream codec
#[derive(Debug, Clone, Copy, Default)]
pub struct SmartStreamCodec;

impl SmartStreamCodec {
    fn request(action: u8, scrip: &Scrip, mode: SubscriptionMode) -> Vec<WireFrame> {
        let Some(exchange_type) = exchange_type(&scrip.exchange_code) else {
            warn!(scrip = %scrip, "Unknown SmartAPI exchange code");
            return Vec::new();
        };

        let mut correlation_id = Uuid::new_v4().simple().to_string();
        correlation_id.truncate(CORRELATION_ID_LEN);
        let request = Request {
            correlation_id,
            action,
            params: Params {
                mode: mode_code(mode),
                token_list: [TokenList {
                    exchange_type,
                    tokens: [scrip.token.as_str()],
                }],
            },
        };

        match serde_json::to_string(&request) {
            Ok(text) => vec![WireFrame::Text(text)],
            Err(e) => {
                warn!(scrip = %scrip, error = %e, "Failed to encode SmartAPI request");
                Vec::new()
            }
        }
    }

    fn decode_text(text: &str) -> DecodeResult<Vec<DecodedMessage>> {
        if text.trim() == PONG {
            return Ok(vec![DecodedMessage::control(MessageKind::Heartbeat)]);
        }

        let value: serde_json::Value = serde_json::from_str(text)?;
        let kind = match value.get("errorMessage").or_else(|| value.get("errorCode")) {
            Some(error) => MessageKind::Error(
                error
                    .as_str()
                    .map_or_else(|| error.to_string(), str::to_string),
            ),
            None => MessageKind::Unknown("text".to_string()),
        };
        Ok(vec![DecodedMessage::control(kind)])
    }

    fn decode_binary(data: &[u8]) -> DecodeResult<Vec<DecodedMessage>> {
        let mode_byte = *data
            .first()
            .ok_or_else(|| DecodeError::truncated("header", layout::LTP_PACKET, 0))?;
        let code = mode_byte.to_string();
        let code = code.as_str();

        let (mode, needed) = match mode_byte {
            1 => (SubscriptionMode::Ltp, layout::LTP_PACKET),
            2 => (SubscriptionMode::Quote, layout::QUOTE_PACKET),
            3 => (SubscriptionMode::Depth, layout::SNAP_QUOTE_PACKET),
            _ => return Err(DecodeError::UnknownMessage { code: code.to_string() }),
        };
        if data.len() < needed {
            return Err(DecodeError::truncated(code, needed, data.len()));
        }

        let exchange_type_byte = data[layout::EXCHANGE_TYPE];
        let exchange = exchange_code(exchange_type_byte).ok_or_else(|| {
            DecodeError::Malformed(format!("unknown exchange type {exchange_type_byte}"))
        })?;
        let token_bytes = &data[layout::TOKEN..layout::TOKEN + layout::TOKEN_LEN];
        let token_len = token_bytes
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(token_bytes.len());
        let token = std::str::from_utf8(&token_bytes[..token_len])
            .map_err(|_| DecodeError::Malformed("token is not utf-8".to_string()))?;
        if token.is_empty() {
            return Err(DecodeError::Malformed("empty token".to_string()));
        }

        let mut message = DecodedMessage::tick(mode, token).with_exchange(exchange);
        let int = |offset| read::le_i64(data, offset, code).map(NativeValue::Int);
        let float = |offset| read::le_f64(data, offset, code).map(NativeValue::Float);

        message.insert(field::EXCHANGE_TYPE, NativeValue::Int(i64::from(exchange_type_byte)));
        message.insert(field::SEQUENCE_NUMBER, int(layout::SEQUENCE)?);
        message.insert(field::EXCHANGE_TIMESTAMP, int(layout::EXCHANGE_TIMESTAMP)?);
        message.insert(field::LAST_TRADED_PRICE, int(layout::LTP)?);

        if mode >= SubscriptionMode::Quote {
            message.insert(field::LAST_TRADED_QUANTITY, int(layout::LAST_TRADED_QUANTITY)?);
            message.insert(field::AVERAGE_TRADED_PRICE, int(layout::AVERAGE_PRICE)?);
            message.insert(field::VOLUME_TRADE_FOR_THE_DAY, int(layout::VOLUME)?);
            message.insert(field::TOTAL_BUY_QUANTITY, float(layout::TOTAL_BUY_QUANTITY)?);
            message.insert(field::TOTAL_SELL_QUANTITY, float(layout::TOTAL_SELL_QUANTITY)?);
            message.insert(field::OPEN_PRICE, int(layout::OPEN)?);
            message.insert(field::HIGH_PRICE, int(layout::HIGH)?);
            message.insert(field::LOW_PRICE, int(layout::LOW)?);
            message.insert(field::CLOSED_PRICE, int(layout::CLOSE)?);
        }

        if mode == SubscriptionMode::Depth {
            message.insert(field::LAST_TRADED_TIMESTAMP, int(layout::LAST_TRADED_TIMESTAMP)?);
            message.insert(field::OPEN_INTEREST, int(layout::OPEN_INTEREST)?);
            message.insert(field::OPEN_INTEREST_CHANGE, float(layout::OPEN_INTEREST_CHANGE)?);
            message.insert(field::BEST_FIVE, Self::decode_best_five(data, code)?);
            message.insert(field::UPPER_CIRCUIT, int(layout::UPPER_CIRCUIT)?);
            message.insert(field::LOWER_CIRCUIT, int(layout::LOWER_CIRCUIT)?);
            message.insert(field::HIGH_52_WEEK, int(layout::HIGH_52_WEEK)?);
            message.insert(field::LOW_52_WEEK, int(layout::LOW_52_WEEK)?);
        }
        Ok(vec![message])
    }

    /// Best-five entries, each flagged buy (1) or sell (0)
    fn decode_best_five(data: &[u8], code: &str) -> DecodeResult<NativeValue> {
        let mut buy = Vec::with_capacity(layout::BEST_FIVE_ENTRIES / 2);
        let mut sell = Vec::with_capacity(layout::BEST_FIVE_ENTRIES / 2);
        for index in 0..layout::BEST_FIVE_ENTRIES {
            let base = layout::BEST_FIVE + index * layout::BEST_FIVE_ENTRY;
            let flag = read::le_i16(data, base, code)?;
            let level = NativeLevel {
                quantity: read::le_i64(data, base + 2, code)?,
                price: read::le_i64(data, base + 10, code)? as f64,
                orders: i64::from(read::le_i16(data, base + 18, code)?),
            };
            if flag == 1 {
                buy.push(level);
            } else {
                sell.push(level);
            }
        }
        Ok(NativeValue::Levels { buy, sell })
    }
}

impl ProtocolCodec for SmartStreamCodec {
    fn broker(&self) -> &'static str {
        super::BROKER
    }

    fn mode_scope(&self) -> ModeScope {
        ModeScope::PerMode
    }

    fn required_credentials(&self) -> &'static [CredentialField] {
        &[
            CredentialField::ApiKey,
            CredentialField::ClientCode,
            CredentialField::FeedToken,
        ]
    }

    fn endpoint(
        &self,
        base_url: Option<&str>,
        credentials: &SessionCredentials,
    ) -> FeedResult<Endpoint> {
        let require = |value: &Option<String>, name: &str| {
            value
                .clone()
                .ok_or_else(|| FeedError::Auth(format!("SmartAPI stream needs a {name}")))
        };

        Ok(Endpoint {
            url: base_url.unwrap_or(DEFAULT_URL).to_string(),
            headers: vec![
                (
                    "Authorization".to_string(),
                    format!("Bearer {}", credentials.auth_token),
                ),
                ("x-api-key".to_string(), require(&credentials.api_key, "api key")?),
                (
                    "x-client-code".to_string(),
                    require(&credentials.client_code, "client code")?,
                ),
                (
                    "x-feed-token".to_string(),
                    require(&credentials.feed_token, "feed token")?,
                ),
            ],
        })
    }

    fn heartbeat(&self) -> WireFrame {
        WireFrame::Text(PING.to_string())
    }

    fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(HEARTBEAT_INTERVAL_SECS)
    }

    fn encode_subscribe(&self, scrip: &Scrip, mode: SubscriptionMode) -> Vec<WireFrame> {
        Self::request(ACTION_SUBSCRIBE, scrip, mode)
    }

    fn encode_unsubscribe(&self, scrip: &Scrip, mode: SubscriptionMode) -> Vec<WireFrame> {
        Self::request(ACTION_UNSUBSCRIBE, scrip, mode)
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

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::NoHints;
    use rstest::*;

    fn put_i64(packet: &mut [u8], offset: usize, value: i64) {
        packet[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    fn put_f64(packet: &mut [u8], offset: usize, value: f64) {
        packet[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Packet for `token` on nse_cm in `mode` with realistic values
    pub(crate) fn packet(mode: u8, token: &str) -> Vec<u8> {
        let len = match mode {
            1 => layout::LTP_PACKET,
            2 => layout::QUOTE_PACKET,
            _ => layout::SNAP_QUOTE_PACKET,
        };
        let mut packet = vec![0u8; len];
        packet[layout::MODE] = mode;
        packet[layout::EXCHANGE_TYPE] = 1;
        packet[layout::TOKEN..layout::TOKEN + token.len()].copy_from_slice(token.as_bytes());
        put_i64(&mut packet, layout::SEQUENCE, 42);
        put_i64(&mut packet, layout::EXCHANGE_TIMESTAMP, 1_700_000_000_123);
        put_i64(&mut packet, layout::LTP, 245_055);

        if mode >= 2 {
            put_i64(&mut packet, layout::LAST_TRADED_QUANTITY, 10);
            put_i64(&mut packet, layout::AVERAGE_PRICE, 244_980);
            put_i64(&mut packet, layout::VOLUME, 1_250_000);
            put_f64(&mut packet, layout::TOTAL_BUY_QUANTITY, 4_000.0);
            put_f64(&mut packet, layout::TOTAL_SELL_QUANTITY, 5_000.0);
            put_i64(&mut packet, layout::OPEN, 243_000);
            put_i64(&mut packet, layout::HIGH, 246_500);
            put_i64(&mut packet, layout::LOW, 242_010);
            put_i64(&mut packet, layout::CLOSE, 242_500);
        }

        if mode == 3 {
            put_i64(&mut packet, layout::LAST_TRADED_TIMESTAMP, 1_700_000_000);
            put_i64(&mut packet, layout::OPEN_INTEREST, 0);
            for index in 0..layout::BEST_FIVE_ENTRIES {
                let base = layout::BEST_FIVE + index * layout::BEST_FIVE_ENTRY;
                let is_buy = index < 5;
                let step = i64::try_from(index % 5).unwrap() * 5;
                let price = if is_buy { 245_050 - step } else { 245_060 + step };
                packet[base..base + 2].copy_from_slice(&i16::from(is_buy).to_le_bytes());
                put_i64(&mut packet, base + 2, 100 + step);
                put_i64(&mut packet, base + 10, price);
                packet[base + 18..base + 20].copy_from_slice(&3i16.to_le_bytes());
            }
        }
        packet
    }

    fn decode(data: Vec<u8>) -> DecodeResult<Vec<DecodedMessage>> {
        SmartStreamCodec.decode(&WireFrame::Binary(data), &NoHints)
    }

    #[rstest]
    #[case(1, SubscriptionMode::Ltp)]
    #[case(2, SubscriptionMode::Quote)]
    #[case(3, SubscriptionMode::Depth)]
    fn test_decodes_each_mode(#[case] mode: u8, #[case] expected: SubscriptionMode) {
        let messages = decode(packet(mode, "2885")).unwrap();
        let message = &messages[0];
        assert_eq!(message.kind, MessageKind::Tick(expected));
        assert_eq!(message.token.as_deref(), Some("2885"));
        assert_eq!(message.exchange_code.as_deref(), Some("nse_cm"));
        assert_eq!(message.int(field::LAST_TRADED_PRICE), Some(245_055));
        assert_eq!(message.int(field::CLOSED_PRICE).is_some(), mode >= 2);
    }

    #[test]
    fn test_best_five_split_by_flag() {
        let messages = decode(packet(3, "2885")).unwrap();
        let (buy, sell) = messages[0].levels(field::BEST_FIVE).unwrap();
        assert_eq!(buy.len(), 5);
        assert_eq!(sell.len(), 5);
        assert_eq!(buy[0], NativeLevel { price: 245_050.0, quantity: 100, orders: 3 });
        assert_eq!(sell[4].price, 245_080.0);
    }

    #[rstest]
    #[case::ltp_cut(packet(1, "2885")[..50].to_vec())]
    #[case::quote_cut(packet(2, "2885")[..100].to_vec())]
    #[case::snap_quote_as_quote(packet(3, "2885")[..layout::QUOTE_PACKET].to_vec())]
    #[case::empty(Vec::new())]
    fn test_short_packets_are_rejected(#[case] data: Vec<u8>) {
        assert!(matches!(decode(data), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_unknown_mode_and_exchange() {
        let mut unknown_mode = packet(1, "2885");
        unknown_mode[0] = 9;
        assert!(matches!(decode(unknown_mode), Err(DecodeError::UnknownMessage { .. })));

        let mut unknown_exchange = packet(1, "2885");
        unknown_exchange[1] = 99;
        assert!(matches!(decode(unknown_exchange), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_text_frames() {
        let codec = SmartStreamCodec;
        let pong = codec.decode(&WireFrame::Text("pong".into()), &NoHints).unwrap();
        assert_eq!(pong[0].kind, MessageKind::Heartbeat);

        let error = codec
            .decode(
                &WireFrame::Text(r#"{"correlationID":"abc","errorCode":"E1002","errorMessage":"Invalid Request"}"#.into()),
                &NoHints,
            )
            .unwrap();
        assert_eq!(error[0].kind, MessageKind::Error("Invalid Request".to_string()));
    }

    #[test]
    fn test_subscribe_request_shape() {
        let frames = SmartStreamCodec.encode_subscribe(&Scrip::new("nse_cm", "2885"), SubscriptionMode::Depth);
        let WireFrame::Text(text) = &frames[0] else {
            panic!("expected text frame");
        };
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(value["action"], 1);
        assert_eq!(value["params"]["mode"], 3);
        assert_eq!(value["params"]["tokenList"][0]["exchangeType"], 1);
        assert_eq!(value["params"]["tokenList"][0]["tokens"][0], "2885");
        assert_eq!(value["correlationID"].as_str().unwrap().len(), 10);

        let frames = SmartStreamCodec.encode_unsubscribe(&Scrip::new("nse_cm", "2885"), SubscriptionMode::Ltp);
        let WireFrame::Text(text) = &frames[0] else {
            panic!("expected text frame");
        };
        assert!(text.contains(r#""action":0"#));
        assert!(SmartStreamCodec.encode_subscribe(&Scrip::new("XYZ", "1"), SubscriptionMode::Ltp).is_empty());
    }

    #[test]
    fn test_endpoint_headers() {
        let creds = SessionCredentials::new("jwt")
            .with_api_key("key")
            .with_client_code("A123")
            .with_feed_token("feed");
        let endpoint = SmartStreamCodec.endpoint(None, &creds).unwrap();
        assert_eq!(endpoint.url, DEFAULT_URL);
        assert!(endpoint.headers.contains(&("Authorization".to_string(), "Bearer jwt".to_string())));
        assert!(endpoint.headers.contains(&("x-feed-token".to_string(), "feed".to_string())));

        let missing = SmartStreamCodec.endpoint(None, &SessionCredentials::new("jwt").with_api_key("key"));
        assert!(matches!(missing, Err(FeedError::Auth(_))));
    }
}
