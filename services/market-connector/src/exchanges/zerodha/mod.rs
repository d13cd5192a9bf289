//! Zerodha KiteConnect ticker
//!
//! Binary, big-endian frames: a `u16` packet count followed by
//! length-prefixed packets whose size identifies the mode. Prices are
//! integers in the smallest currency unit of the instrument's segment.

mod codec;
mod normalizer;

pub use codec::KiteCodec;
pub use normalizer::KiteNormalizer;

use crate::codec::BrokerProtocol;

/// Broker name
pub const BROKER: &str = "zerodha";

pub(crate) const DEFAULT_URL: &str = "wss://ws.kite.trade";

/// Packet sizes
pub(crate) mod packet {
    pub const LTP: usize = 8;
    pub const INDEX_QUOTE: usize = 28;
    pub const INDEX_FULL: usize = 32;
    pub const QUOTE: usize = 44;
    pub const FULL: usize = 184;
    pub const DEPTH_OFFSET: usize = 64;
    pub const DEPTH_LEVEL_SIZE: usize = 12;
    pub const DEPTH_LEVELS_PER_SIDE: usize = 5;
}

/// Native field names
pub(crate) mod field {
    pub const SEGMENT: &str = "segment";
    pub const LAST_PRICE: &str = "last_price";
    pub const LAST_TRADED_QUANTITY: &str = "last_traded_quantity";
    pub const AVERAGE_TRADED_PRICE: &str = "average_traded_price";
    pub const VOLUME_TRADED: &str = "volume_traded";
    pub const TOTAL_BUY_QUANTITY: &str = "total_buy_quantity";
    pub const TOTAL_SELL_QUANTITY: &str = "total_sell_quantity";
    pub const OPEN: &str = "open";
    pub const HIGH: &str = "high";
    pub const LOW: &str = "low";
    pub const CLOSE: &str = "close";
    pub const CHANGE: &str = "change";
    pub const LAST_TRADE_TIME: &str = "last_trade_time";
    pub const OI: &str = "oi";
    pub const OI_DAY_HIGH: &str = "oi_day_high";
    pub const OI_DAY_LOW: &str = "oi_day_low";
    pub const EXCHANGE_TIMESTAMP: &str = "exchange_timestamp";
    pub const DEPTH: &str = "depth";
}

/// Exchange segments, the low byte of an instrument token
pub(crate) mod segment {
    pub const CDS: i64 = 3;
    pub const BCD: i64 = 6;
    pub const INDICES: i64 = 9;
}

/// Codec and normalizer pair
#[must_use]
pub fn protocol() -> BrokerProtocol {
    BrokerProtocol {
        codec: Box::new(KiteCodec::new()),
        normalizer: Box::new(KiteNormalizer),
    }
}
