//! SmartAPI native fields to canonical fields

use super::{CURRENCY_EXCHANGE_TYPE, field};
use crate::cache::{FieldMap, fields};
use crate::codec::{DecodedMessage, FieldNormalizer, MessageKind};
use services_common::{DepthLevel, MILLIS_PER_SEC, Side};

/// SmartAPI field normalizer
#[derive(Debug, Clone, Copy, Default)]
pub struct SmartStreamNormalizer;

impl FieldNormalizer for SmartStreamNormalizer {
    fn normalize(&self, message: &DecodedMessage) -> FieldMap {
        let mut map = FieldMap::new();
        if !matches!(message.kind, MessageKind::Tick(_)) {
            return map;
        }

        let divisor = if message.int(field::EXCHANGE_TYPE) == Some(CURRENCY_EXCHANGE_TYPE) {
            10_000_000.0
        } else {
            100.0
        };

        let prices = [
            (field::LAST_TRADED_PRICE, fields::LTP),
            (field::AVERAGE_TRADED_PRICE, fields::AVERAGE_PRICE),
            (field::OPEN_PRICE, fields::OPEN),
            (field::HIGH_PRICE, fields::HIGH),
            (field::LOW_PRICE, fields::LOW),
            (field::CLOSED_PRICE, fields::CLOSE),
        ];
        for (native, canonical) in prices {
            if let Some(value) = message.int(native) {
                map.set_float(canonical, value as f64 / divisor);
            }
        }

        let counts = [
            (field::LAST_TRADED_QUANTITY, fields::LAST_TRADED_QUANTITY),
            (field::VOLUME_TRADE_FOR_THE_DAY, fields::VOLUME),
            (field::TOTAL_BUY_QUANTITY, fields::TOTAL_BUY_QTY),
            (field::TOTAL_SELL_QUANTITY, fields::TOTAL_SELL_QTY),
            (field::OPEN_INTEREST, fields::OPEN_INTEREST),
            (field::EXCHANGE_TIMESTAMP, fields::EXCHANGE_TIMESTAMP),
        ];
        for (native, canonical) in counts {
            if let Some(value) = message.int(native) {
                map.set_int(canonical, value);
            }
        }

        // last traded time is in seconds, the feed timestamp already in millis
        if let Some(ltt) = message.int(field::LAST_TRADED_TIMESTAMP).filter(|v| *v > 0) {
            map.set_int(fields::LAST_TRADE_TIMESTAMP, ltt * MILLIS_PER_SEC as i64);
        }

        if let Some((buy, sell)) = message.levels(field::BEST_FIVE) {
            for (side, levels) in [(Side::Buy, buy), (Side::Sell, sell)] {
                map.replace_side(
                    side,
                    levels.iter().map(|level| DepthLevel {
                        price: level.price / divisor,
                        quantity: level.quantity,
                        orders: level.orders,
                    }),
                );
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FieldValue;
    use crate::codec::{NoHints, ProtocolCodec, WireFrame};
    use crate::exchanges::angel::SmartStreamCodec;
    use crate::exchanges::angel::codec::tests::packet;

    fn normalize(data: Vec<u8>) -> FieldMap {
        let messages = SmartStreamCodec
            .decode(&WireFrame::Binary(data), &NoHints)
            .unwrap();
        SmartStreamNormalizer.normalize(&messages[0])
    }

    #[test]
    fn test_snap_quote_fields() {
        let map = normalize(packet(3, "2885"));
        assert_eq!(map.get(fields::LTP), Some(FieldValue::Float(2450.55)));
        assert_eq!(map.get(fields::OPEN), Some(FieldValue::Float(2430.0)));
        assert_eq!(map.get(fields::TOTAL_BUY_QTY), Some(FieldValue::Int(4_000)));
        assert_eq!(map.get(fields::EXCHANGE_TIMESTAMP), Some(FieldValue::Int(1_700_000_000_123)));
        assert_eq!(map.get(fields::LAST_TRADE_TIMESTAMP), Some(FieldValue::Int(1_700_000_000_000)));
        assert!(map.has_depth());
    }

    #[test]
    fn test_ltp_packet_carries_only_price_and_time() {
        let map = normalize(packet(1, "2885"));
        assert_eq!(map.get(fields::LTP), Some(FieldValue::Float(2450.55)));
        assert_eq!(map.get(fields::OPEN), None);
        assert!(!map.has_depth());
    }

    #[test]
    fn test_currency_derivative_divisor() {
        let mut data = packet(1, "1234");
        data[1] = 13;
        data[43..51].copy_from_slice(&832_512_500i64.to_le_bytes());
        let map = normalize(data);
        assert_eq!(map.get(fields::LTP), Some(FieldValue::Float(83.25125)));
    }
}
