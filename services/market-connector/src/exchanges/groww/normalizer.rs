//! Groww native fields to canonical fields

use super::field;
use crate::cache::{FieldMap, fields};
use crate::codec::{DecodedMessage, FieldNormalizer, MessageKind};
use services_common::{DepthLevel, Side};

/// Groww field normalizer
///
/// Prices are already in rupees. A price found by scanning without an OHLC
/// band to check it against is flagged as estimated.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrowwNormalizer;

impl FieldNormalizer for GrowwNormalizer {
    fn normalize(&self, message: &DecodedMessage) -> FieldMap {
        let mut map = FieldMap::new();
        if !matches!(message.kind, MessageKind::Tick(_)) {
            return map;
        }

        if let Some(ltp) = message.float(field::LTP) {
            map.set_float(fields::LTP, ltp);
            let validated = message.int(field::LTP_VALIDATED).unwrap_or_default() != 0;
            map.set_flag(fields::LTP_ESTIMATED, !validated);
        }

        let prices = [
            (field::OPEN, fields::OPEN),
            (field::HIGH, fields::HIGH),
            (field::LOW, fields::LOW),
            (field::CLOSE, fields::CLOSE),
        ];
        for (native, canonical) in prices {
            if let Some(value) = message.float(native) {
                map.set_float(canonical, value);
            }
        }

        let counts = [
            (field::VOLUME, fields::VOLUME),
            (field::TOTAL_BUY_QUANTITY, fields::TOTAL_BUY_QTY),
            (field::TOTAL_SELL_QUANTITY, fields::TOTAL_SELL_QTY),
            (field::EXCHANGE_TIMESTAMP, fields::EXCHANGE_TIMESTAMP),
        ];
        for (native, canonical) in counts {
            if let Some(value) = message.int(native) {
                map.set_int(canonical, value);
            }
        }

        if let Some((buy, sell)) = message.levels(field::DEPTH) {
            for (side, levels) in [(Side::Buy, buy), (Side::Sell, sell)] {
                map.replace_side(
                    side,
                    levels.iter().map(|level| DepthLevel {
                        price: level.price,
                        quantity: level.quantity,
                        orders: level.orders,
                    }),
                );
            }
        }
        map
    }
}
