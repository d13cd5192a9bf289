//! Instrument resolution
//!
//! Maps downstream `(symbol, exchange)` pairs onto broker scrips using a
//! preloaded instrument master.

pub mod store;
pub mod types;

pub use store::InstrumentStore;
pub use types::*;

use services_common::Scrip;

/// Symbol to broker scrip resolution
pub trait SymbolResolver: Send + Sync {
    /// Broker scrip for a symbol, `None` when unknown
    fn lookup(&self, symbol: &str, exchange: &str) -> Option<Scrip>;
}
