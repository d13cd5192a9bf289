//! Groww live feed
//!
//! Binary, little-endian messages with an 8-byte header; several messages
//! may share one frame. Snapshot and depth payloads have fixed layouts. The
//! LTP payload layout is not published, so its price is located with
//! [`scan_for_plausible_price`](crate::codec::scan_for_plausible_price).

mod codec;
mod normalizer;

pub use codec::GrowwCodec;
pub use normalizer::GrowwNormalizer;

use crate::codec::BrokerProtocol;

/// Broker name
pub const BROKER: &str = "groww";

pub(crate) const DEFAULT_URL: &str = "wss://socket-api.groww.in/v1/feed";

pub(crate) const HEARTBEAT_INTERVAL_SECS: u64 = 20;

/// Message layout
pub(crate) mod layout {
    pub const HEADER: usize = 8;
    pub const CODE: usize = 0;
    pub const SEGMENT: usize = 1;
    pub const TOKEN: usize = 2;
    pub const PAYLOAD_LEN: usize = 6;

    pub const LTP_MIN_PAYLOAD: usize = 8;
    pub const SNAPSHOT_PAYLOAD: usize = 72;
    pub const DEPTH_LEVELS: usize = 8;
    pub const DEPTH_LEVEL_SIZE: usize = 16;
}

/// Message codes
pub(crate) mod code {
    pub const LTP: u8 = 1;
    pub const SNAPSHOT: u8 = 2;
    pub const DEPTH: u8 = 3;
}

/// Native field names
pub(crate) mod field {
    pub const LTP: &str = "ltp";
    pub const LTP_VALIDATED: &str = "ltp_validated";
    pub const OPEN: &str = "open";
    pub const HIGH: &str = "high";
    pub const LOW: &str = "low";
    pub const CLOSE: &str = "close";
    pub const VOLUME: &str = "volume";
    pub const TOTAL_BUY_QUANTITY: &str = "total_buy_quantity";
    pub const TOTAL_SELL_QUANTITY: &str = "total_sell_quantity";
    pub const EXCHANGE_TIMESTAMP: &str = "exchange_ts";
    pub const DEPTH: &str = "depth";
}

/// Segment codes and their broker exchange codes
pub(crate) const SEGMENTS: [(u8, &str); 6] = [
    (1, "NSE"),
    (2, "BSE"),
    (3, "NFO"),
    (4, "BFO"),
    (5, "NSE_INDEX"),
    (6, "BSE_INDEX"),
];

pub(crate) fn segment_name(segment: u8) -> Option<&'static str> {
    SEGMENTS
        .iter()
        .find(|(code, _)| *code == segment)
        .map(|(_, name)| *name)
}

/// Codec and normalizer pair
#[must_use]
pub fn protocol() -> BrokerProtocol {
    BrokerProtocol {
        codec: Box::new(GrowwCodec),
        normalizer: Box::new(GrowwNormalizer),
    }
}
