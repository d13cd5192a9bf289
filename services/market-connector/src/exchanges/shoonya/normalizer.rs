//! Noren native fields to canonical fields

use super::field;
use crate::cache::{FieldMap, LevelPatch, fields};
use crate::codec::{DecodedMessage, FieldNormalizer, MessageKind};
use services_common::{IST_OFFSET_SECS, MILLIS_PER_SEC, SECS_PER_DAY, Side};

/// Noren field normalizer
#[derive(Debug, Clone, Copy, Default)]
pub struct NorenNormalizer;

impl NorenNormalizer {
    fn level(
        message: &DecodedMessage,
        price: &str,
        quantity: &str,
        orders: &str,
    ) -> Option<LevelPatch> {
        let patch = LevelPatch {
            price: message.float(price),
            quantity: message.int(quantity),
            orders: message.int(orders),
        };
        (patch != LevelPatch::default()).then_some(patch)
    }

    /// Last trade time in epoch seconds
    ///
    /// `ltt` is either epoch seconds or an `HH:MM:SS` exchange-local time,
    /// which is placed on the IST trading day of the feed time.
    fn last_trade_secs(message: &DecodedMessage, feed_time: Option<i64>) -> Option<i64> {
        if let Some(secs) = message.text(field::LAST_TRADE_TIME).and_then(time_of_day) {
            let feed_time = feed_time?;
            let day = (feed_time + IST_OFFSET_SECS).div_euclid(SECS_PER_DAY) * SECS_PER_DAY;
            return Some(day - IST_OFFSET_SECS + secs);
        }
        message.int(field::LAST_TRADE_TIME).filter(|v| *v > 0)
    }
}

fn time_of_day(text: &str) -> Option<i64> {
    let mut parts = text.split(':').map(|part| part.parse::<i64>().ok());
    let (hours, minutes, seconds) = (parts.next()??, parts.next()??, parts.next()??);
    let valid = parts.next().is_none()
        && (0..24).contains(&hours)
        && (0..60).contains(&minutes)
        && (0..60).contains(&seconds);
    valid.then_some(hours * 3600 + minutes * 60 + seconds)
}

impl FieldNormalizer for NorenNormalizer {
    fn normalize(&self, message: &DecodedMessage) -> FieldMap {
        let mut map = FieldMap::new();
        if !matches!(message.kind, MessageKind::Tick(_)) {
            return map;
        }

        let prices = [
            (field::LAST_PRICE, fields::LTP),
            (field::PERCENT_CHANGE, fields::PERCENT_CHANGE),
            (field::OPEN, fields::OPEN),
            (field::HIGH, fields::HIGH),
            (field::LOW, fields::LOW),
            (field::CLOSE, fields::CLOSE),
            (field::AVERAGE_PRICE, fields::AVERAGE_PRICE),
        ];
        for (native, canonical) in prices {
            if let Some(value) = message.float(native) {
                map.set_float(canonical, value);
            }
        }

        let counts = [
            (field::VOLUME, fields::VOLUME),
            (field::LAST_TRADED_QUANTITY, fields::LAST_TRADED_QUANTITY),
            (field::TOTAL_BUY_QUANTITY, fields::TOTAL_BUY_QTY),
            (field::TOTAL_SELL_QUANTITY, fields::TOTAL_SELL_QTY),
            (field::OPEN_INTEREST, fields::OPEN_INTEREST),
        ];
        for (native, canonical) in counts {
            if let Some(value) = message.int(native) {
                map.set_int(canonical, value);
            }
        }

        let feed_time = message.int(field::FEED_TIME).filter(|v| *v > 0);
        if let Some(feed_time) = feed_time {
            map.set_int(fields::EXCHANGE_TIMESTAMP, feed_time * MILLIS_PER_SEC as i64);
        }
        if let Some(ltt) = Self::last_trade_secs(message, feed_time) {
            map.set_int(fields::LAST_TRADE_TIMESTAMP, ltt * MILLIS_PER_SEC as i64);
        }

        for index in 0..field::BUY_PRICE.len() {
            if let Some(patch) = Self::level(
                message,
                field::BUY_PRICE[index],
                field::BUY_QUANTITY[index],
                field::BUY_ORDERS[index],
            ) {
                map.set_level(Side::Buy, index, patch);
            }
            if let Some(patch) = Self::level(
                message,
                field::SELL_PRICE[index],
                field::SELL_QUANTITY[index],
                field::SELL_ORDERS[index],
            ) {
                map.set_level(Side::Sell, index, patch);
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{FieldValue, MarketDataCache};
    use crate::codec::{NoHints, ProtocolCodec, WireFrame};
    use crate::exchanges::shoonya::NorenCodec;
    use rstest::*;
    use services_common::{DepthLevel, InstrumentKey, Scrip, SubscriptionMode};

    fn normalize(text: &str) -> Vec<FieldMap> {
        NorenCodec
            .decode(&WireFrame::Text(text.to_string()), &NoHints)
            .unwrap()
            .iter()
            .map(|message| NorenNormalizer.normalize(message))
            .collect()
    }

    #[test]
    fn test_touchline_fields() {
        let maps = normalize(r#"{"t":"tk","e":"NSE","tk":"22","lp":"2450.55","pc":"1.05","c":"2425.00","v":"1250000","ft":"1700000000"}"#);
        assert!(maps[0].is_empty());

        let map = &maps[1];
        assert_eq!(map.get(fields::LTP), Some(FieldValue::Float(2450.55)));
        assert_eq!(map.get(fields::PERCENT_CHANGE), Some(FieldValue::Float(1.05)));
        assert_eq!(map.get(fields::VOLUME), Some(FieldValue::Int(1_250_000)));
        assert_eq!(map.get(fields::EXCHANGE_TIMESTAMP), Some(FieldValue::Int(1_700_000_000_000)));
    }

    #[rstest]
    #[case::local_time(r#""ltt":"03:40:00""#, Some(1_699_999_800_000))]
    #[case::epoch_seconds(r#""ltt":"1699999990""#, Some(1_699_999_990_000))]
    #[case::garbage(r#""ltt":"25:00:00""#, None)]
    fn test_last_trade_time(#[case] ltt: &str, #[case] expected: Option<i64>) {
        let text = format!(r#"{{"t":"tf","e":"NSE","tk":"22","lp":"2450.55","ft":"1700000000",{ltt}}}"#);
        let map = &normalize(&text)[0];
        assert_eq!(map.get(fields::LAST_TRADE_TIMESTAMP), expected.map(FieldValue::Int));
        assert_eq!(map.get(fields::EXCHANGE_TIMESTAMP), Some(FieldValue::Int(1_700_000_000_000)));
    }

    #[test]
    fn test_touchline_without_trade_time_projects_feed_time() {
        let scrip = Scrip::new("NSE", "22");
        let mut cache = MarketDataCache::new();
        let map = normalize(r#"{"t":"tf","e":"NSE","tk":"22","lp":"2450.55","ft":"1700000000"}"#).remove(0);
        let tick = cache
            .merge(&scrip, map)
            .project("shoonya", &InstrumentKey::new("NSE", "ACC"), &scrip, SubscriptionMode::Ltp, 0);
        assert_eq!(tick.last_trade_timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_depth_updates_accumulate_per_level() {
        let scrip = Scrip::new("NSE", "22");
        let key = InstrumentKey::new("NSE", "ACC");
        let mut cache = MarketDataCache::new();

        for text in [
            r#"{"t":"dk","e":"NSE","tk":"22","lp":"2450.55","bp1":"2450.50","bq1":"150","bo1":"3","sp1":"2450.60","sq1":"90","so1":"2"}"#,
            r#"{"t":"df","e":"NSE","tk":"22","bq1":"175"}"#,
        ] {
            for map in normalize(text) {
                cache.merge(&scrip, map);
            }
        }

        let tick = cache
            .get(&scrip)
            .unwrap()
            .project("shoonya", &key, &scrip, SubscriptionMode::Depth, 5);
        let depth = tick.depth.unwrap();
        assert_eq!(depth.buy[0], DepthLevel { price: 2450.5, quantity: 175, orders: 3 });
        assert_eq!(depth.sell[0], DepthLevel { price: 2450.6, quantity: 90, orders: 2 });
        assert_eq!(depth.buy.len(), 5);
        assert_eq!(tick.ltp, 2450.55);
    }
}
