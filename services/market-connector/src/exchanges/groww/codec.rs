//! Groww feed frame codec

use super::{DEFAULT_URL, HEARTBEAT_INTERVAL_SECS, code, field, layout, segment_name};
use crate::codec::{
    DecodeError, DecodeResult, DecodedMessage, Endpoint, MessageKind, ModeScope, NativeLevel,
    NativeValue, PriceHints, ProtocolCodec, WireFrame, read, scan_for_plausible_price,
};
use serde_json::{Value, json};
use services_common::{FeedResult, Scrip, SubscriptionMode};
use std::time::Duration;
use tracing::debug;

const fn feed_name(mode: SubscriptionMode) -> &'static str {
    match mode {
        SubscriptionMode::Ltp => "ltp",
        SubscriptionMode::Quote => "quote",
        SubscriptionMode::Depth => "depth",
    }
}

/// Groww feed codec
#[derive(Debug, Clone, Copy, Default)]
pub struct GrowwCodec;

impl GrowwCodec {
    fn request(action: &str, scrip: &Scrip, mode: SubscriptionMode) -> Vec<WireFrame> {
        vec![WireFrame::Text(
            json!({
                "action": action,
                "feed": feed_name(mode),
                "exchange": scrip.exchange_code,
                "token": scrip.token,
            })
            .to_string(),
        )]
    }

    fn decode_text(text: &str) -> DecodeResult<Vec<DecodedMessage>> {
        let value: Value = serde_json::from_str(text)?;
        let kind = if let Some(error) = value.get("error") {
            MessageKind::Error(error.as_str().map_or_else(|| error.to_string(), str::to_string))
        } else {
            match value.get("status").and_then(Value::as_str) {
                Some("subscribed") => MessageKind::SubscriptionAck,
                Some("unsubscribed") => MessageKind::UnsubscriptionAck,
                Some(other) => MessageKind::Unknown(other.to_string()),
                None => MessageKind::Unknown("text".to_string()),
            }
        };
        Ok(vec![DecodedMessage::control(kind)])
    }

    fn decode_binary(data: &[u8], hints: &dyn PriceHints) -> DecodeResult<Vec<DecodedMessage>> {
        let mut messages = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let header = &data[offset..];
            if header.len() < layout::HEADER {
                return Err(DecodeError::truncated("header", layout::HEADER, header.len()));
            }

            let message_code = header[layout::CODE];
            let segment = header[layout::SEGMENT];
            let code_name = message_code.to_string();
            let token = read::le_u32(header, layout::TOKEN, &code_name)?.to_string();
            let payload_len = usize::from(read::le_u16(header, layout::PAYLOAD_LEN, &code_name)?);
            let payload = header
                .get(layout::HEADER..layout::HEADER + payload_len)
                .ok_or_else(|| {
                    DecodeError::truncated(&code_name, payload_len, header.len() - layout::HEADER)
                })?;
            let exchange = segment_name(segment)
                .ok_or_else(|| DecodeError::Malformed(format!("unknown segment {segment}")))?;

            let message = match message_code {
                code::LTP => Self::decode_ltp(payload, &token, exchange, hints, &code_name)?,
                code::SNAPSHOT => Self::decode_snapshot(payload, &token, &code_name)?,
                code::DEPTH => Self::decode_depth(payload, &token, &code_name)?,
                _ => return Err(DecodeError::UnknownMessage { code: code_name }),
            };
            messages.push(message.with_exchange(exchange));
            offset += layout::HEADER + payload_len;
        }
        Ok(messages)
    }

    fn decode_ltp(
        payload: &[u8],
        token: &str,
        exchange: &str,
        hints: &dyn PriceHints,
        code_name: &str,
    ) -> DecodeResult<DecodedMessage> {
        if payload.len() < layout::LTP_MIN_PAYLOAD {
            return Err(DecodeError::truncated(code_name, layout::LTP_MIN_PAYLOAD, payload.len()));
        }

        let mut message = DecodedMessage::tick(SubscriptionMode::Ltp, token);
        let band = hints.ohlc_band(token, Some(exchange));
        match scan_for_plausible_price(payload, band) {
            Some(found) => {
                message.insert(field::LTP, NativeValue::Float(found.price));
                message.insert(field::LTP_VALIDATED, NativeValue::Int(i64::from(found.validated)));
            }
            None => debug!(token, "No plausible price in LTP payload"),
        }
        Ok(message)
    }

    fn decode_snapshot(payload: &[u8], token: &str, code_name: &str) -> DecodeResult<DecodedMessage> {
        if payload.len() < layout::SNAPSHOT_PAYLOAD {
            return Err(DecodeError::truncated(code_name, layout::SNAPSHOT_PAYLOAD, payload.len()));
        }

        let mut message = DecodedMessage::tick(SubscriptionMode::Quote, token);
        let float = |offset| read::le_f64(payload, offset, code_name).map(NativeValue::Float);
        let count = |offset| {
            read::le_u64(payload, offset, code_name)
                .map(|v| NativeValue::Int(i64::try_from(v).unwrap_or(i64::MAX)))
        };
        message.insert(field::LTP, float(0)?);
        message.insert(field::LTP_VALIDATED, NativeValue::Int(1));
        message.insert(field::OPEN, float(8)?);
        message.insert(field::HIGH, float(16)?);
        message.insert(field::LOW, float(24)?);
        message.insert(field::CLOSE, float(32)?);
        message.insert(field::VOLUME, count(40)?);
        message.insert(field::TOTAL_BUY_QUANTITY, count(48)?);
        message.insert(field::TOTAL_SELL_QUANTITY, count(56)?);
        message.insert(
            field::EXCHANGE_TIMESTAMP,
            read::le_i64(payload, 64, code_name).map(NativeValue::Int)?,
        );
        Ok(message)
    }

    fn decode_depth(payload: &[u8], token: &str, code_name: &str) -> DecodeResult<DecodedMessage> {
        if payload.len() < layout::DEPTH_LEVELS {
            return Err(DecodeError::truncated(code_name, layout::DEPTH_LEVELS, payload.len()));
        }
        let buy_count = usize::from(payload[0]);
        let sell_count = usize::from(payload[1]);
        let needed = layout::DEPTH_LEVELS + (buy_count + sell_count) * layout::DEPTH_LEVEL_SIZE;
        if payload.len() < needed {
            return Err(DecodeError::truncated(code_name, needed, payload.len()));
        }

        let level = |index: usize| -> DecodeResult<NativeLevel> {
            let base = layout::DEPTH_LEVELS + index * layout::DEPTH_LEVEL_SIZE;
            Ok(NativeLevel {
                price: read::le_f64(payload, base, code_name)?,
                quantity: i64::from(read::le_u32(payload, base + 8, code_name)?),
                orders: i64::from(read::le_u32(payload, base + 12, code_name)?),
            })
        };

        let mut message = DecodedMessage::tick(SubscriptionMode::Depth, token);
        message.insert(
            field::DEPTH,
            NativeValue::Levels {
                buy: (0..buy_count).map(level).collect::<DecodeResult<_>>()?,
                sell: (buy_count..buy_count + sell_count)
                    .map(level)
                    .collect::<DecodeResult<_>>()?,
            },
        );
        Ok(message)
    }
}

impl ProtocolCodec for GrowwCodec {
    fn broker(&self) -> &'static str {
        super::BROKER
    }

    fn mode_scope(&self) -> ModeScope {
        ModeScope::PerMode
    }

    fn endpoint(
        &self,
        base_url: Option<&str>,
        credentials: &auth::SessionCredentials,
    ) -> FeedResult<Endpoint> {
        let mut headers = vec![(
            "Authorization".to_string(),
            format!("Bearer {}", credentials.auth_token),
        )];
        if let Some(api_key) = &credentials.api_key {
            headers.push(("x-api-key".to_string(), api_key.clone()));
        }
        Ok(Endpoint {
            url: base_url.unwrap_or(DEFAULT_URL).to_string(),
            headers,
        })
    }

    fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(HEARTBEAT_INTERVAL_SECS)
    }

    fn encode_subscribe(&self, scrip: &Scrip, mode: SubscriptionMode) -> Vec<WireFrame> {
        Self::request("subscribe", scrip, mode)
    }

    fn encode_unsubscribe(&self, scrip: &Scrip, mode: SubscriptionMode) -> Vec<WireFrame> {
        Self::request("unsubscribe", scrip, mode)
    }

    fn decode(
        &self,
        frame: &WireFrame,
        hints: &dyn PriceHints,
    ) -> DecodeResult<Vec<DecodedMessage>> {
        match frame {
            WireFrame::Text(text) => Self::decode_text(text),
            WireFrame::Binary(data) => Self::decode_binary(data, hints),
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

    pub(crate) fn message(code: u8, segment: u8, token: u32, payload: &[u8]) -> Vec<u8> {
        let mut data = vec![code, segment];
        data.extend_from_slice(&token.to_le_bytes());
        data.extend_from_slice(&u16::try_from(payload.len()).unwrap().to_le_bytes());
        data.extend_from_slice(payload);
        data
    }

    /// Synthetic LTP payload: a sequence number, the price, padding
    pub(crate) fn ltp_payload(price: f64) -> Vec<u8> {
        let mut payload = 7u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&price.to_le_bytes());
        payload.extend_from_slice(&[0; 4]);
        payload
    }

    pub(crate) fn snapshot_payload() -> Vec<u8> {
        let mut payload = Vec::with_capacity(layout::SNAPSHOT_PAYLOAD);
        for price in [2450.55f64, 2430.0, 2465.0, 2420.1, 2425.0] {
            payload.extend_from_slice(&price.to_le_bytes());
        }
        for count in [1_250_000u64, 4_000, 5_000] {
            payload.extend_from_slice(&count.to_le_bytes());
        }
        payload.extend_from_slice(&1_700_000_000_123i64.to_le_bytes());
        payload
    }

    pub(crate) fn depth_payload(buy: &[(f64, u32, u32)], sell: &[(f64, u32, u32)]) -> Vec<u8> {
        let mut payload = vec![u8::try_from(buy.len()).unwrap(), u8::try_from(sell.len()).unwrap()];
        payload.resize(layout::DEPTH_LEVELS, 0);
        for (price, quantity, orders) in buy.iter().chain(sell) {
            payload.extend_from_slice(&price.to_le_bytes());
            payload.extend_from_slice(&quantity.to_le_bytes());
            payload.extend_from_slice(&orders.to_le_bytes());
        }
        payload
    }

    struct Band(f64, f64);

    impl PriceHints for Band {
        fn ohlc_band(&self, _token: &str, _exchange_code: Option<&str>) -> Option<(f64, f64)> {
            Some((self.0, self.1))
        }
    }

    fn decode(data: Vec<u8>) -> DecodeResult<Vec<DecodedMessage>> {
        GrowwCodec.decode(&WireFrame::Binary(data), &NoHints)
    }

    #[test]
    fn test_concatenated_messages() {
        let mut data = message(code::LTP, 1, 2885, &ltp_payload(2450.55));
        data.extend(message(code::SNAPSHOT, 1, 2885, &snapshot_payload()));
        data.extend(message(code::DEPTH, 1, 2885, &depth_payload(&[(2450.5, 150, 3)], &[(2450.6, 90, 2), (2450.7, 40, 1)])));

        let messages = decode(data).unwrap();
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().all(|m| m.token.as_deref() == Some("2885")));
        assert!(messages.iter().all(|m| m.exchange_code.as_deref() == Some("NSE")));

        assert_eq!(messages[0].kind, MessageKind::Tick(SubscriptionMode::Ltp));
        assert_eq!(messages[0].float(field::LTP), Some(2450.55));
        assert_eq!(messages[0].int(field::LTP_VALIDATED), Some(0));

        assert_eq!(messages[1].kind, MessageKind::Tick(SubscriptionMode::Quote));
        assert_eq!(messages[1].float(field::LOW), Some(2420.1));
        assert_eq!(messages[1].int(field::VOLUME), Some(1_250_000));

        let (buy, sell) = messages[2].levels(field::DEPTH).unwrap();
        assert_eq!(buy, &[NativeLevel { price: 2450.5, quantity: 150, orders: 3 }]);
        assert_eq!(sell.len(), 2);
    }

    #[test]
    fn test_ltp_scan_uses_hints() {
        let data = message(code::LTP, 1, 2885, &ltp_payload(2450.55));
        let messages = GrowwCodec
            .decode(&WireFrame::Binary(data.clone()), &Band(2400.0, 2500.0))
            .unwrap();
        assert_eq!(messages[0].int(field::LTP_VALIDATED), Some(1));

        let messages = GrowwCodec
            .decode(&WireFrame::Binary(data), &Band(100.0, 110.0))
            .unwrap();
        assert_eq!(messages[0].kind, MessageKind::Tick(SubscriptionMode::Ltp));
        assert_eq!(messages[0].float(field::LTP), None);
    }

    #[rstest]
    #[case::short_header(vec![1, 1, 0, 0])]
    #[case::short_ltp(message(code::LTP, 1, 2885, &[0; 4]))]
    #[case::short_snapshot(message(code::SNAPSHOT, 1, 2885, &snapshot_payload()[..40]))]
    #[case::depth_counts_exceed_payload(message(code::DEPTH, 1, 2885, &depth_payload(&[(1.0, 1, 1)], &[])[..16]))]
    #[case::payload_len_beyond_frame(message(code::LTP, 1, 2885, &ltp_payload(2450.55))[..12].to_vec())]
    fn test_short_frames_are_rejected(#[case] data: Vec<u8>) {
        assert!(matches!(decode(data), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_one_bad_message_rejects_whole_frame() {
        let mut data = message(code::LTP, 1, 2885, &ltp_payload(2450.55));
        data.extend_from_slice(&[3, 1, 0]);
        assert!(decode(data).is_err());
    }

    #[test]
    fn test_unknown_code_and_segment() {
        assert!(matches!(
            decode(message(9, 1, 1, &[0; 8])),
            Err(DecodeError::UnknownMessage { .. })
        ));
        assert!(matches!(
            decode(message(code::LTP, 42, 1, &[0; 8])),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_text_acks() {
        let ack = GrowwCodec
            .decode(&WireFrame::Text(r#"{"status":"subscribed","token":"2885"}"#.into()), &NoHints)
            .unwrap();
        assert_eq!(ack[0].kind, MessageKind::SubscriptionAck);

        let frames = GrowwCodec.encode_subscribe(&Scrip::new("NSE", "2885"), SubscriptionMode::Depth);
        assert_eq!(
            frames,
            vec![WireFrame::Text(r#"{"action":"subscribe","exchange":"NSE","feed":"depth","token":"2885"}"#.to_string())]
        );
    }
}
