//! Kite native fields to canonical fields

use super::{field, segment};
use crate::cache::{FieldMap, fields};
use crate::codec::{DecodedMessage, FieldNormalizer, MessageKind};
use services_common::{DepthLevel, MILLIS_PER_SEC, Side};

/// Price divisor of a segment
const fn divisor(segment: i64) -> f64 {
    match segment {
        segment::CDS => 10_000_000.0,
        segment::BCD => 10_000.0,
        _ => 100.0,
    }
}

/// Kite field normalizer
#[derive(Debug, Clone, Copy, Default)]
pub struct KiteNormalizer;

impl FieldNormalizer for KiteNormalizer {
    fn normalize(&self, message: &DecodedMessage) -> FieldMap {
        let mut map = FieldMap::new();
        if !matches!(message.kind, MessageKind::Tick(_)) {
            return map;
        }

        let divisor = divisor(message.int(field::SEGMENT).unwrap_or_default());
        let price = |name: &str| message.int(name).map(|v| v as f64 / divisor);
        let seconds = |name: &str| {
            message
                .int(name)
                .filter(|v| *v > 0)
                .map(|v| v * MILLIS_PER_SEC as i64)
        };

        let prices = [
            (field::LAST_PRICE, fields::LTP),
            (field::AVERAGE_TRADED_PRICE, fields::AVERAGE_PRICE),
            (field::OPEN, fields::OPEN),
            (field::HIGH, fields::HIGH),
            (field::LOW, fields::LOW),
            (field::CLOSE, fields::CLOSE),
        ];
        for (native, canonical) in prices {
            if let Some(value) = price(native) {
                map.set_float(canonical, value);
            }
        }

        let counts = [
            (field::LAST_TRADED_QUANTITY, fields::LAST_TRADED_QUANTITY),
            (field::VOLUME_TRADED, fields::VOLUME),
            (field::TOTAL_BUY_QUANTITY, fields::TOTAL_BUY_QTY),
            (field::TOTAL_SELL_QUANTITY, fields::TOTAL_SELL_QTY),
            (field::OI, fields::OPEN_INTEREST),
        ];
        for (native, canonical) in counts {
            if let Some(value) = message.int(native) {
                map.set_int(canonical, value);
            }
        }

        if let Some(ts) = seconds(field::LAST_TRADE_TIME) {
            map.set_int(fields::LAST_TRADE_TIMESTAMP, ts);
        }
        if let Some(ts) = seconds(field::EXCHANGE_TIMESTAMP) {
            map.set_int(fields::EXCHANGE_TIMESTAMP, ts);
        }

        if let Some((buy, sell)) = message.levels(field::DEPTH) {
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
