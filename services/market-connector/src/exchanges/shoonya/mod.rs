//! Shoonya (Noren) websocket
//!
//! Tagged JSON messages keyed by `t`. Touchline and depth are separate
//! channels per scrip, so the upstream holds one channel per scrip and
//! switches channel when the highest subscribed mode changes. Numeric
//! values arrive as decimal strings and only changed fields are sent.

mod codec;
mod normalizer;

pub use codec::NorenCodec;
pub use normalizer::NorenNormalizer;

use crate::codec::BrokerProtocol;

/// Broker name
pub const BROKER: &str = "shoonya";

pub(crate) const DEFAULT_URL: &str = "wss://api.shoonya.com/NorenWSTP/";

pub(crate) const HEARTBEAT_INTERVAL_SECS: u64 = 50;

/// Message tags
pub(crate) mod tag {
    pub const CONNECT: &str = "c";
    pub const CONNECT_ACK: &str = "ck";
    pub const HEARTBEAT: &str = "h";
    pub const TOUCHLINE: &str = "t";
    pub const TOUCHLINE_ACK: &str = "tk";
    pub const TOUCHLINE_FEED: &str = "tf";
    pub const TOUCHLINE_UNSUBSCRIBE: &str = "u";
    pub const TOUCHLINE_UNSUBSCRIBE_ACK: &str = "uk";
    pub const DEPTH: &str = "d";
    pub const DEPTH_ACK: &str = "dk";
    pub const DEPTH_FEED: &str = "df";
    pub const DEPTH_UNSUBSCRIBE: &str = "ud";
    pub const DEPTH_UNSUBSCRIBE_ACK: &str = "udk";
}

/// Native field names
pub(crate) mod field {
    pub const EXCHANGE: &str = "e";
    pub const TOKEN: &str = "tk";
    pub const LAST_PRICE: &str = "lp";
    pub const PERCENT_CHANGE: &str = "pc";
    pub const OPEN: &str = "o";
    pub const HIGH: &str = "h";
    pub const LOW: &str = "l";
    pub const CLOSE: &str = "c";
    pub const AVERAGE_PRICE: &str = "ap";
    pub const VOLUME: &str = "v";
    pub const LAST_TRADED_QUANTITY: &str = "ltq";
    pub const TOTAL_BUY_QUANTITY: &str = "tbq";
    pub const TOTAL_SELL_QUANTITY: &str = "tsq";
    pub const OPEN_INTEREST: &str = "oi";
    pub const FEED_TIME: &str = "ft";
    pub const LAST_TRADE_TIME: &str = "ltt";

    pub const BUY_PRICE: [&str; 5] = ["bp1", "bp2", "bp3", "bp4", "bp5"];
    pub const BUY_QUANTITY: [&str; 5] = ["bq1", "bq2", "bq3", "bq4", "bq5"];
    pub const BUY_ORDERS: [&str; 5] = ["bo1", "bo2", "bo3", "bo4", "bo5"];
    pub const SELL_PRICE: [&str; 5] = ["sp1", "sp2", "sp3", "sp4", "sp5"];
    pub const SELL_QUANTITY: [&str; 5] = ["sq1", "sq2", "sq3", "sq4", "sq5"];
    pub const SELL_ORDERS: [&str; 5] = ["so1", "so2", "so3", "so4", "so5"];

    /// Scalar fields copied from feed messages
    pub const SCALARS: [&str; 14] = [
        LAST_PRICE,
        PERCENT_CHANGE,
        OPEN,
        HIGH,
        LOW,
        CLOSE,
        AVERAGE_PRICE,
        VOLUME,
        LAST_TRADED_QUANTITY,
        TOTAL_BUY_QUANTITY,
        TOTAL_SELL_QUANTITY,
        OPEN_INTEREST,
        FEED_TIME,
        LAST_TRADE_TIME,
    ];
}

/// Codec and normalizer pair
#[must_use]
pub fn protocol() -> BrokerProtocol {
    BrokerProtocol {
        codec: Box::new(NorenCodec),
        normalizer: Box::new(NorenNormalizer),
    }
}
