//! In-memory instrument master with efficient lookups
//!
//! Loaded once from the broker CSV and read-only afterwards.

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use services_common::{InstrumentKey, Scrip};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

use super::SymbolResolver;
use super::types::Instrument;

/// Instrument master indexed by downstream key and broker token
#[derive(Debug, Default)]
pub struct InstrumentStore {
    /// Instruments by `(exchange, symbol)`
    by_key: FxHashMap<InstrumentKey, Instrument>,
    /// Keys by broker scrip
    by_scrip: FxHashMap<Scrip, InstrumentKey>,
}

impl InstrumentStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a CSV instrument master from disk
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open instrument master {}", path.display()))?;
        let store = Self::from_csv_reader(file)
            .with_context(|| format!("Failed to load instrument master {}", path.display()))?;
        info!(
            path = %path.display(),
            instruments = store.len(),
            "Loaded instrument master"
        );
        Ok(store)
    }

    /// Load a CSV instrument master from any reader
    ///
    /// Malformed rows are skipped with a warning.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let mut store = Self::new();
        let mut skipped = 0usize;
        for (row, record) in csv_reader.deserialize::<Instrument>().enumerate() {
            match record {
                Ok(instrument) => store.add_instrument(instrument),
                Err(e) => {
                    skipped += 1;
                    debug!(row, error = %e, "Skipping malformed instrument row");
                }
            }
        }

        if skipped > 0 {
            warn!(skipped, "Instrument master had malformed rows");
        }
        Ok(store)
    }

    /// Add instrument to indices, replacing any previous entry for its key
    pub fn add_instrument(&mut self, instrument: Instrument) {
        let key = instrument.key();
        if let Some(previous) = self.by_key.get(&key) {
            self.by_scrip.remove(&previous.scrip());
        }
        self.by_scrip.insert(instrument.scrip(), key.clone());
        self.by_key.insert(key, instrument);
    }

    /// Look up an instrument by downstream key
    #[must_use]
    pub fn get(&self, key: &InstrumentKey) -> Option<&Instrument> {
        self.by_key.get(key)
    }

    /// Look up the downstream key of a broker scrip
    #[must_use]
    pub fn key_for_scrip(&self, scrip: &Scrip) -> Option<&InstrumentKey> {
        self.by_scrip.get(scrip)
    }

    /// Number of instruments
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

impl SymbolResolver for InstrumentStore {
    fn lookup(&self, symbol: &str, exchange: &str) -> Option<Scrip> {
        self.by_key
            .get(&InstrumentKey::new(exchange, symbol))
            .map(Instrument::scrip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::InstrumentType;

    const MASTER: &str = "\
symbol,exchange,token,broker_exchange,name,lot_size,tick_size,instrument_type
RELIANCE,NSE,2885,nse_cm,Reliance Industries,1,0.05,EQ
NIFTY24JANFUT,NFO,35001,nse_fo,NIFTY,50,0.05,FUT
broken row without enough columns
NIFTY 50,NSE_INDEX,99926000,nse_cm,Nifty 50,1,0,INDEX
";

    #[test]
    fn test_csv_load_and_lookup() {
        let store = InstrumentStore::from_csv_reader(MASTER.as_bytes()).unwrap();
        assert_eq!(store.len(), 3);

        assert_eq!(store.lookup("reliance", "nse"), Some(Scrip::new("nse_cm", "2885")));
        assert_eq!(store.lookup("NIFTY 50", "NSE_INDEX"), Some(Scrip::new("nse_cm", "99926000")));
        assert_eq!(store.lookup("RELIANCE", "BSE"), None);

        let future = store.get(&InstrumentKey::new("NFO", "NIFTY24JANFUT")).unwrap();
        assert_eq!(future.lot_size, 50);
        assert_eq!(future.instrument_type, InstrumentType::Future);
    }

    #[test]
    fn test_reverse_lookup() {
        let store = InstrumentStore::from_csv_reader(MASTER.as_bytes()).unwrap();
        assert_eq!(
            store.key_for_scrip(&Scrip::new("nse_fo", "35001")),
            Some(&InstrumentKey::new("NFO", "NIFTY24JANFUT"))
        );
    }
}
