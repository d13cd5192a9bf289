//! Instrument master records

use serde::{Deserialize, Serialize};
use services_common::{InstrumentKey, Scrip};

/// Instrument type classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstrumentType {
    /// Equity/Stock instrument
    #[default]
    #[serde(alias = "EQ")]
    Equity,
    /// Index instrument
    Index,
    /// Future contract
    #[serde(alias = "FUT")]
    Future,
    /// Option contract
    #[serde(alias = "CE", alias = "PE", alias = "OPT")]
    Option,
    /// Currency contract
    Currency,
    /// Commodity contract
    Commodity,
}

/// One row of a broker instrument master
///
/// CSV columns: `symbol,exchange,token,broker_exchange,name,lot_size,tick_size,instrument_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Trading symbol (e.g., "NIFTY24DEC24000CE")
    pub symbol: String,

    /// Exchange (e.g., "NSE", "NFO")
    pub exchange: String,

    /// Broker instrument token
    pub token: String,

    /// Broker exchange code (e.g., "NSE" for Kite, "nse_cm" for SmartAPI)
    pub broker_exchange: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Lot size (minimum quantity)
    #[serde(default = "default_lot_size")]
    pub lot_size: u32,

    /// Tick size in rupees
    #[serde(default)]
    pub tick_size: f64,

    /// Instrument type
    #[serde(default)]
    pub instrument_type: InstrumentType,
}

const fn default_lot_size() -> u32 {
    1
}

impl Instrument {
    /// Downstream key
    #[must_use]
    pub fn key(&self) -> InstrumentKey {
        InstrumentKey::new(&self.exchange, &self.symbol)
    }

    /// Broker-native identity
    #[must_use]
    pub fn scrip(&self) -> Scrip {
        Scrip::new(self.broker_exchange.trim(), self.token.trim())
    }
}
