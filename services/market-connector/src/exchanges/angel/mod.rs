//! Angel One SmartAPI stream (v2)
//!
//! Binary, little-endian packets whose first byte is the subscription mode.
//! Every packet shares a 51-byte header; quote and snap-quote packets extend
//! it. Prices are integers in paise, or 1e-7 rupee for currency derivatives.

mod codec;
mod normalizer;

pub use codec::SmartStreamCodec;
pub use normalizer::SmartStreamNormalizer;

use crate::codec::BrokerProtocol;

/// Broker name
pub const BROKER: &str = "angel";

pub(crate) const DEFAULT_URL: &str = "wss://smartapisocket.angelone.in/smart-stream";

/// Heartbeat interval
pub(crate) const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Packet layout
pub(crate) mod layout {
    pub const MODE: usize = 0;
    pub const EXCHANGE_TYPE: usize = 1;
    pub const TOKEN: usize = 2;
    pub const TOKEN_LEN: usize = 25;
    pub const SEQUENCE: usize = 27;
    pub const EXCHANGE_TIMESTAMP: usize = 35;
    pub const LTP: usize = 43;
    pub const LTP_PACKET: usize = 51;

    pub const LAST_TRADED_QUANTITY: usize = 51;
    pub const AVERAGE_PRICE: usize = 59;
    pub const VOLUME: usize = 67;
    pub const TOTAL_BUY_QUANTITY: usize = 75;
    pub const TOTAL_SELL_QUANTITY: usize = 83;
    pub const OPEN: usize = 91;
    pub const HIGH: usize = 99;
    pub const LOW: usize = 107;
    pub const CLOSE: usize = 115;
    pub const QUOTE_PACKET: usize = 123;

    pub const LAST_TRADED_TIMESTAMP: usize = 123;
    pub const OPEN_INTEREST: usize = 131;
    pub const OPEN_INTEREST_CHANGE: usize = 139;
    pub const BEST_FIVE: usize = 147;
    pub const BEST_FIVE_ENTRY: usize = 20;
    pub const BEST_FIVE_ENTRIES: usize = 10;
    pub const UPPER_CIRCUIT: usize = 347;
    pub const LOWER_CIRCUIT: usize = 355;
    pub const HIGH_52_WEEK: usize = 363;
    pub const LOW_52_WEEK: usize = 371;
    pub const SNAP_QUOTE_PACKET: usize = 379;
}

/// Native field names
pub(crate) mod field {
    pub const EXCHANGE_TYPE: &str = "exchange_type";
    pub const SEQUENCE_NUMBER: &str = "sequence_number";
    pub const EXCHANGE_TIMESTAMP: &str = "exchange_timestamp";
    pub const LAST_TRADED_PRICE: &str = "last_traded_price";
    pub const LAST_TRADED_QUANTITY: &str = "last_traded_quantity";
    pub const AVERAGE_TRADED_PRICE: &str = "average_traded_price";
    pub const VOLUME_TRADE_FOR_THE_DAY: &str = "volume_trade_for_the_day";
    pub const TOTAL_BUY_QUANTITY: &str = "total_buy_quantity";
    pub const TOTAL_SELL_QUANTITY: &str = "total_sell_quantity";
    pub const OPEN_PRICE: &str = "open_price_of_the_day";
    pub const HIGH_PRICE: &str = "high_price_of_the_day";
    pub const LOW_PRICE: &str = "low_price_of_the_day";
    pub const CLOSED_PRICE: &str = "closed_price";
    pub const LAST_TRADED_TIMESTAMP: &str = "last_traded_timestamp";
    pub const OPEN_INTEREST: &str = "open_interest";
    pub const OPEN_INTEREST_CHANGE: &str = "open_interest_change_percentage";
    pub const BEST_FIVE: &str = "best_5_data";
    pub const UPPER_CIRCUIT: &str = "upper_circuit_limit";
    pub const LOWER_CIRCUIT: &str = "lower_circuit_limit";
    pub const HIGH_52_WEEK: &str = "52_week_high_price";
    pub const LOW_52_WEEK: &str = "52_week_low_price";
}

/// Exchange types and their broker exchange codes
pub(crate) const EXCHANGE_TYPES: [(u8, &str); 7] = [
    (1, "nse_cm"),
    (2, "nse_fo"),
    (3, "bse_cm"),
    (4, "bse_fo"),
    (5, "mcx_fo"),
    (7, "ncx_fo"),
    (13, "cde_fo"),
];

/// Exchange type carrying 1e-7 rupee prices
pub(crate) const CURRENCY_EXCHANGE_TYPE: i64 = 13;

pub(crate) fn exchange_code(exchange_type: u8) -> Option<&'static str> {
    EXCHANGE_TYPES
        .iter()
        .find(|(code, _)| *code == exchange_type)
        .map(|(_, name)| *name)
}

pub(crate) fn exchange_type(exchange_code: &str) -> Option<u8> {
    EXCHANGE_TYPES
        .iter()
        .find(|(_, name)| name.eq_ignore_ascii_case(exchange_code))
        .map(|(code, _)| *code)
}

/// Codec and normalizer pair
#[must_use]
pub fn protocol() -> BrokerProtocol {
    BrokerProtocol {
        codec: Box::new(SmartStreamCodec),
        normalizer: Box::new(SmartStreamNormalizer),
    }
}
