//! Noren websocket message codec

use super::{DEFAULT_URL, HEARTBEAT_INTERVAL_SECS, field, tag};
use crate::codec::{
    DecodeError, DecodeResult, DecodedMessage, Endpoint, MessageKind, ModeScope, NativeValue,
    PriceHints, ProtocolCodec, WireFrame,
};
use auth::{CredentialField, SessionCredentials};
use serde_json::{Map, Value, json};
use services_common::{FeedError, FeedResult, Scrip, SubscriptionMode};
use std::time::Duration;

const STATUS_OK: &str = "OK";

/// Upstream channel of a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Touchline,
    Depth,
}

impl Channel {
    const fn of(mode: SubscriptionMode) -> Self {
        match mode {
            SubscriptionMode::Ltp | SubscriptionMode::Quote => Self::Touchline,
            SubscriptionMode::Depth => Self::Depth,
        }
    }

    const fn subscribe_tag(self) -> &'static str {
        match self {
            Self::Touchline => tag::TOUCHLINE,
            Self::Depth => tag::DEPTH,
        }
    }

    const fn unsubscribe_tag(self) -> &'static str {
        match self {
            Self::Touchline => tag::TOUCHLINE_UNSUBSCRIBE,
            Self::Depth => tag::DEPTH_UNSUBSCRIBE,
        }
    }
}

/// Noren websocket codec
#[derive(Debug, Clone, Copy, Default)]
pub struct NorenCodec;

impl NorenCodec {
    fn keyed(tag: &str, scrip: &Scrip) -> WireFrame {
        WireFrame::Text(json!({ "t": tag, "k": scrip.to_string() }).to_string())
    }

    fn decode_text(text: &str) -> DecodeResult<Vec<DecodedMessage>> {
        let value: Value = serde_json::from_str(text)?;
        let object = value
            .as_object()
            .ok_or_else(|| DecodeError::Malformed("expected a JSON object".to_string()))?;
        let message_tag = object
            .get("t")
            .and_then(Value::as_str)
            .ok_or_else(|| DecodeError::Malformed("missing message tag".to_string()))?;

        let messages = match message_tag {
            tag::CONNECT_ACK => {
                let status = object.get("s").and_then(Value::as_str).unwrap_or_default();
                let kind = if status == STATUS_OK {
                    MessageKind::AuthAck
                } else {
                    let reason = object
                        .get("emsg")
                        .and_then(Value::as_str)
                        .unwrap_or(status);
                    MessageKind::AuthRejected(reason.to_string())
                };
                vec![DecodedMessage::control(kind)]
            }
            tag::TOUCHLINE_ACK => vec![
                DecodedMessage::control(MessageKind::SubscriptionAck),
                Self::feed(object, SubscriptionMode::Quote, message_tag)?,
            ],
            tag::DEPTH_ACK => vec![
                DecodedMessage::control(MessageKind::SubscriptionAck),
                Self::feed(object, SubscriptionMode::Depth, message_tag)?,
            ],
            tag::TOUCHLINE_FEED => vec![Self::feed(object, SubscriptionMode::Quote, message_tag)?],
            tag::DEPTH_FEED => vec![Self::feed(object, SubscriptionMode::Depth, message_tag)?],
            tag::TOUCHLINE_UNSUBSCRIBE_ACK | tag::DEPTH_UNSUBSCRIBE_ACK => {
                vec![DecodedMessage::control(MessageKind::UnsubscriptionAck)]
            }
            tag::HEARTBEAT => vec![DecodedMessage::control(MessageKind::Heartbeat)],
            other => vec![DecodedMessage::control(MessageKind::Unknown(other.to_string()))],
        };
        Ok(messages)
    }

    fn feed(
        object: &Map<String, Value>,
        mode: SubscriptionMode,
        message_tag: &str,
    ) -> DecodeResult<DecodedMessage> {
        let token = object
            .get(field::TOKEN)
            .and_then(Value::as_str)
            .ok_or_else(|| DecodeError::Malformed(format!("{message_tag} without token")))?;

        let mut message = DecodedMessage::tick(mode, token);
        if let Some(exchange) = object.get(field::EXCHANGE).and_then(Value::as_str) {
            message = message.with_exchange(exchange);
        }

        let depth_fields = [
            field::BUY_PRICE,
            field::BUY_QUANTITY,
            field::BUY_ORDERS,
            field::SELL_PRICE,
            field::SELL_QUANTITY,
            field::SELL_ORDERS,
        ];
        let names = field::SCALARS
            .iter()
            .chain(depth_fields.iter().flat_map(|names| names.iter()));
        for &name in names {
            let value = match object.get(name) {
                Some(Value::String(text)) => NativeValue::Text(text.clone()),
                Some(Value::Number(number)) => number
                    .as_i64()
                    .map(NativeValue::Int)
                    .or_else(|| number.as_f64().map(NativeValue::Float))
                    .ok_or_else(|| DecodeError::Malformed(format!("bad number in {name}")))?,
                _ => continue,
            };
            message.insert(name, value);
        }
        Ok(message)
    }
}

impl ProtocolCodec for NorenCodec {
    fn broker(&self) -> &'static str {
        super::BROKER
    }

    fn mode_scope(&self) -> ModeScope {
        ModeScope::PerScrip
    }

    fn required_credentials(&self) -> &'static [CredentialField] {
        &[CredentialField::ClientCode]
    }

    fn endpoint(
        &self,
        base_url: Option<&str>,
        credentials: &SessionCredentials,
    ) -> FeedResult<Endpoint> {
        if credentials.client_code.is_none() {
            return Err(FeedError::Auth("Noren session needs a client code".to_string()));
        }
        Ok(Endpoint {
            url: base_url.unwrap_or(DEFAULT_URL).to_string(),
            headers: Vec::new(),
        })
    }

    fn handshake(&self, credentials: &SessionCredentials) -> Option<WireFrame> {
        let user = credentials.client_code.as_deref().unwrap_or_default();
        Some(WireFrame::Text(
            json!({
                "t": tag::CONNECT,
                "uid": user,
                "actid": user,
                "susertoken": credentials.auth_token,
                "source": "API",
            })
            .to_string(),
        ))
    }

    fn awaits_auth_ack(&self) -> bool {
        true
    }

    fn heartbeat(&self) -> WireFrame {
        WireFrame::Text(json!({ "t": tag::HEARTBEAT }).to_string())
    }

    fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(HEARTBEAT_INTERVAL_SECS)
    }

    fn encode_subscribe(&self, scrip: &Scrip, mode: SubscriptionMode) -> Vec<WireFrame> {
        vec![Self::keyed(Channel::of(mode).subscribe_tag(), scrip)]
    }

    fn encode_unsubscribe(&self, scrip: &Scrip, mode: SubscriptionMode) -> Vec<WireFrame> {
        vec![Self::keyed(Channel::of(mode).unsubscribe_tag(), scrip)]
    }

    fn encode_mode_change(
        &self,
        scrip: &Scrip,
        from: SubscriptionMode,
        to: SubscriptionMode,
    ) -> Vec<WireFrame> {
        let (from, to) = (Channel::of(from), Channel::of(to));
        if from == to {
            return Vec::new();
        }
        vec![
            Self::keyed(from.unsubscribe_tag(), scrip),
            Self::keyed(to.subscribe_tag(), scrip),
        ]
    }

    fn decode(
        &self,
        frame: &WireFrame,
        _hints: &dyn PriceHints,
    ) -> DecodeResult<Vec<DecodedMessage>> {
        match frame {
            WireFrame::Text(text) => Self::decode_text(text),
            WireFrame::Binary(_) => Err(DecodeError::UnknownMessage {
                code: "binary".to_string(),
            }),
            WireFrame::Ping(_) | WireFrame::Pong(_) => {
                Ok(vec![DecodedMessage::control(MessageKind::Heartbeat)])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::NoHints;
    use rstest::*;

    fn decode(text: &str) -> DecodeResult<Vec<DecodedMessage>> {
        NorenCodec.decode(&WireFrame::Text(text.to_string()), &NoHints)
    }

    #[rstest]
    #[case(r#"{"t":"ck","s":"OK","uid":"FA1234"}"#, MessageKind::AuthAck)]
    #[case(r#"{"t":"ck","s":"NOT_OK"}"#, MessageKind::AuthRejected("NOT_OK".to_string()))]
    #[case(r#"{"t":"ck","s":"NOT_OK","emsg":"Invalid session"}"#, MessageKind::AuthRejected("Invalid session".to_string()))]
    #[case(r#"{"t":"uk","k":"NSE|22"}"#, MessageKind::UnsubscriptionAck)]
    #[case(r#"{"t":"udk","k":"NSE|22"}"#, MessageKind::UnsubscriptionAck)]
    #[case(r#"{"t":"om","norenordno":"1"}"#, MessageKind::Unknown("om".to_string()))]
    fn test_control_messages(#[case] text: &str, #[case] kind: MessageKind) {
        assert_eq!(decode(text).unwrap(), vec![DecodedMessage::control(kind)]);
    }

    #[test]
    fn test_touchline_ack_is_also_a_tick() {
        let messages = decode(
            r#"{"t":"tk","e":"NSE","tk":"2885","ts":"RELIANCE-EQ","lp":"2450.55","pc":"1.05","o":"2430.00","h":"2465.00","l":"2420.10","c":"2425.00","v":"1250000"}"#,
        )
        .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].kind, MessageKind::SubscriptionAck);

        let tick = &messages[1];
        assert_eq!(tick.kind, MessageKind::Tick(SubscriptionMode::Quote));
        assert_eq!(tick.token.as_deref(), Some("2885"));
        assert_eq!(tick.exchange_code.as_deref(), Some("NSE"));
        assert_eq!(tick.float(field::LAST_PRICE), Some(2450.55));
        assert_eq!(tick.int(field::VOLUME), Some(1_250_000));
        assert_eq!(tick.text("ts"), None);
    }

    #[test]
    fn test_depth_feed_keeps_partial_levels() {
        let messages = decode(r#"{"t":"df","e":"NSE","tk":"2885","bp1":"2450.50","bq1":"150","sq3":"40"}"#).unwrap();
        let tick = &messages[0];
        assert_eq!(tick.kind, MessageKind::Tick(SubscriptionMode::Depth));
        assert_eq!(tick.float("bp1"), Some(2450.5));
        assert_eq!(tick.int("sq3"), Some(40));
        assert_eq!(tick.float("sp1"), None);
    }

    #[rstest]
    #[case::not_json("hello")]
    #[case::not_object("[1,2]")]
    #[case::no_tag(r#"{"s":"OK"}"#)]
    #[case::feed_without_token(r#"{"t":"tf","lp":"1.00"}"#)]
    fn test_malformed_messages(#[case] text: &str) {
        assert!(decode(text).is_err());
    }

    #[test]
    fn test_channel_frames() {
        let scrip = Scrip::new("NSE", "22");
        let frame = |text: &str| WireFrame::Text(text.to_string());

        assert_eq!(NorenCodec.encode_subscribe(&scrip, SubscriptionMode::Ltp), vec![frame(r#"{"k":"NSE|22","t":"t"}"#)]);
        assert_eq!(NorenCodec.encode_subscribe(&scrip, SubscriptionMode::Depth), vec![frame(r#"{"k":"NSE|22","t":"d"}"#)]);
        assert_eq!(NorenCodec.encode_unsubscribe(&scrip, SubscriptionMode::Quote), vec![frame(r#"{"k":"NSE|22","t":"u"}"#)]);
        assert_eq!(NorenCodec.encode_unsubscribe(&scrip, SubscriptionMode::Depth), vec![frame(r#"{"k":"NSE|22","t":"ud"}"#)]);

        assert!(NorenCodec.encode_mode_change(&scrip, SubscriptionMode::Ltp, SubscriptionMode::Quote).is_empty());
        assert_eq!(
            NorenCodec.encode_mode_change(&scrip, SubscriptionMode::Quote, SubscriptionMode::Depth),
            vec![frame(r#"{"k":"NSE|22","t":"u"}"#), frame(r#"{"k":"NSE|22","t":"d"}"#)]
        );
    }

    #[test]
    fn test_handshake_and_heartbeat() {
        let creds = SessionCredentials::new("session-token").with_client_code("FA1234");
        let Some(WireFrame::Text(text)) = NorenCodec.handshake(&creds) else {
            panic!("expected text handshake");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["t"], "c");
        assert_eq!(value["uid"], "FA1234");
        assert_eq!(value["susertoken"], "session-token");
        assert_eq!(NorenCodec.heartbeat(), WireFrame::Text(r#"{"t":"h"}"#.to_string()));
        assert!(NorenCodec.awaits_auth_ack());

        assert!(NorenCodec.endpoint(None, &SessionCredentials::new("x")).is_err());
    }
}
