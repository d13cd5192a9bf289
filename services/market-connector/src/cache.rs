//! Last-known market data per scrip
//!
//! Upstream updates are often partial, and some brokers send zeros for OHLC
//! fields they did not refresh. Merging keeps the last non-zero OHLC-class
//! value and overwrites everything else, so a projection of the entry is
//! always the best current picture of the instrument.

use rustc_hash::FxHashMap;
use services_common::{
    CanonicalTick, DepthLevel, InstrumentKey, MarketDepth, Scrip, Side, SubscriptionMode,
};

/// Canonical field names
pub mod fields {
    pub const LTP: &str = "ltp";
    pub const LTP_ESTIMATED: &str = "ltp_estimated";
    pub const LAST_TRADE_TIMESTAMP: &str = "last_trade_timestamp";
    pub const EXCHANGE_TIMESTAMP: &str = "exchange_timestamp";
    pub const LAST_TRADED_QUANTITY: &str = "last_traded_quantity";
    pub const OPEN: &str = "open";
    pub const HIGH: &str = "high";
    pub const LOW: &str = "low";
    pub const CLOSE: &str = "close";
    pub const AVERAGE_PRICE: &str = "average_price";
    pub const VOLUME: &str = "volume";
    pub const PERCENT_CHANGE: &str = "percent_change";
    pub const TOTAL_BUY_QTY: &str = "total_buy_qty";
    pub const TOTAL_SELL_QTY: &str = "total_sell_qty";
    pub const OPEN_INTEREST: &str = "open_interest";

    /// Fields that never regress to zero on merge
    pub const OHLC_CLASS: [&str; 5] = [OPEN, HIGH, LOW, CLOSE, AVERAGE_PRICE];
}

/// One canonical field value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Flag(bool),
}

impl FieldValue {
    /// Zero, NaN and false count as empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Float(v) => *v == 0.0 || v.is_nan(),
            Self::Int(v) => *v == 0,
            Self::Flag(v) => !*v,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Float(v) => *v,
            Self::Int(v) => *v as f64,
            Self::Flag(v) => f64::from(u8::from(*v)),
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Float(v) => *v as i64,
            Self::Int(v) => *v,
            Self::Flag(v) => i64::from(*v),
        }
    }
}

/// Partial update of one depth level
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LevelPatch {
    pub price: Option<f64>,
    pub quantity: Option<i64>,
    pub orders: Option<i64>,
}

impl LevelPatch {
    /// Patch replacing every field of a level
    #[must_use]
    pub const fn full(price: f64, quantity: i64, orders: i64) -> Self {
        Self {
            price: Some(price),
            quantity: Some(quantity),
            orders: Some(orders),
        }
    }

    fn apply(&self, level: &mut DepthLevel) {
        if let Some(price) = self.price {
            level.price = price;
        }
        if let Some(quantity) = self.quantity {
            level.quantity = quantity;
        }
        if let Some(orders) = self.orders {
            level.orders = orders;
        }
    }
}

/// Normalized partial update produced by a field normalizer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    values: FxHashMap<&'static str, FieldValue>,
    depth: Vec<(Side, usize, LevelPatch)>,
    replaced: Vec<Side>,
}

impl FieldMap {
    /// Empty update
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_float(&mut self, name: &'static str, value: f64) {
        self.values.insert(name, FieldValue::Float(value));
    }

    pub fn set_int(&mut self, name: &'static str, value: i64) {
        self.values.insert(name, FieldValue::Int(value));
    }

    pub fn set_flag(&mut self, name: &'static str, value: bool) {
        self.values.insert(name, FieldValue::Flag(value));
    }

    /// Patch one depth level
    pub fn set_level(&mut self, side: Side, index: usize, patch: LevelPatch) {
        self.depth.push((side, index, patch));
    }

    /// Replace one depth side with a complete snapshot
    ///
    /// Cached levels beyond the snapshot are dropped on merge, so a shorter
    /// book projects as zero-filled rather than keeping old quotes.
    pub fn replace_side<I>(&mut self, side: Side, levels: I)
    where
        I: IntoIterator<Item = DepthLevel>,
    {
        if !self.replaced.contains(&side) {
            self.replaced.push(side);
        }
        self.depth.retain(|(patched, _, _)| *patched != side);
        for (index, level) in levels.into_iter().enumerate() {
            self.set_level(side, index, LevelPatch::full(level.price, level.quantity, level.orders));
        }
    }

    /// Replace both depth sides with complete levels
    pub fn set_depth(&mut self, depth: &MarketDepth) {
        self.replace_side(Side::Buy, depth.buy.iter().copied());
        self.replace_side(Side::Sell, depth.sell.iter().copied());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<FieldValue> {
        self.values.get(name).copied()
    }

    /// Whether the update carries any depth level
    #[must_use]
    pub fn has_depth(&self) -> bool {
        !self.depth.is_empty() || !self.replaced.is_empty()
    }

    /// Whether the update carries nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.depth.is_empty() && self.replaced.is_empty()
    }
}

/// Last-known state of one scrip
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    values: FxHashMap<&'static str, FieldValue>,
    depth: MarketDepth,
    initialized: bool,
}

impl CacheEntry {
    /// Whether any update has been merged
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<FieldValue> {
        self.values.get(name).copied()
    }

    fn float(&self, name: &str) -> f64 {
        self.get(name).map_or(0.0, |v| v.as_f64())
    }

    fn int(&self, name: &str) -> i64 {
        self.get(name).map_or(0, |v| v.as_i64())
    }

    /// Cached depth, unpadded
    #[must_use]
    pub fn depth(&self) -> &MarketDepth {
        &self.depth
    }

    /// `(low, high)` of the session when both are known
    #[must_use]
    pub fn price_band(&self) -> Option<(f64, f64)> {
        let low = self.float(fields::LOW);
        let high = self.float(fields::HIGH);
        (low > 0.0 && high >= low).then_some((low, high))
    }

    fn merge(&mut self, incoming: FieldMap) {
        for (name, value) in incoming.values {
            let keep_previous = fields::OHLC_CLASS.contains(&name)
                && value.is_empty()
                && self.values.get(name).is_some_and(|previous| !previous.is_empty());
            if !keep_previous {
                self.values.insert(name, value);
            }
        }

        for side in incoming.replaced {
            self.depth.side_mut(side).clear();
        }
        for (side, index, patch) in incoming.depth {
            let levels = self.depth.side_mut(side);
            if levels.len() <= index {
                levels.resize(index + 1, DepthLevel::default());
            }
            patch.apply(&mut levels[index]);
        }
        self.initialized = true;
    }

    /// Canonical tick for `mode`
    ///
    /// LTP ticks carry price and trade time only, quote ticks add the
    /// session aggregates, depth ticks add exactly `depth_level` levels per
    /// side. Percent change is derived from close when not supplied.
    #[must_use]
    pub fn project(
        &self,
        broker: &str,
        key: &InstrumentKey,
        scrip: &Scrip,
        mode: SubscriptionMode,
        depth_level: u8,
    ) -> CanonicalTick {
        let mut tick = CanonicalTick::new(broker, key, scrip.token.clone(), mode);
        tick.ltp = self.float(fields::LTP);
        tick.ltp_estimated = self.get(fields::LTP_ESTIMATED).is_some_and(|v| !v.is_empty());
        tick.exchange_timestamp = self.int(fields::EXCHANGE_TIMESTAMP);
        // feeds without a separate trade time stamp the price with the feed time
        tick.last_trade_timestamp = match self.int(fields::LAST_TRADE_TIMESTAMP) {
            0 => tick.exchange_timestamp,
            ltt => ltt,
        };

        if mode >= SubscriptionMode::Quote {
            tick.last_traded_quantity = self.int(fields::LAST_TRADED_QUANTITY);
            tick.open = self.float(fields::OPEN);
            tick.high = self.float(fields::HIGH);
            tick.low = self.float(fields::LOW);
            tick.close = self.float(fields::CLOSE);
            tick.average_price = self.float(fields::AVERAGE_PRICE);
            tick.volume = self.int(fields::VOLUME);
            tick.total_buy_qty = self.int(fields::TOTAL_BUY_QTY);
            tick.total_sell_qty = self.int(fields::TOTAL_SELL_QTY);
            tick.open_interest = self.int(fields::OPEN_INTEREST);
            tick.percent_change = match self.get(fields::PERCENT_CHANGE) {
                Some(value) if !value.is_empty() => value.as_f64(),
                _ if tick.close > 0.0 && tick.ltp > 0.0 => {
                    (tick.ltp - tick.close) * 100.0 / tick.close
                }
                _ => 0.0,
            };
        }

        if mode == SubscriptionMode::Depth {
            tick.depth = Some(self.depth.padded(usize::from(depth_level)));
        }
        tick
    }
}

/// Market data cache owned by one adapter
#[derive(Debug, Default)]
pub struct MarketDataCache {
    entries: FxHashMap<Scrip, CacheEntry>,
}

impl MarketDataCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an update into the entry of `scrip`
    pub fn merge(&mut self, scrip: &Scrip, incoming: FieldMap) -> &CacheEntry {
        let entry = self.entries.entry(scrip.clone()).or_default();
        entry.merge(incoming);
        entry
    }

    #[must_use]
    pub fn get(&self, scrip: &Scrip) -> Option<&CacheEntry> {
        self.entries.get(scrip)
    }

    /// Reset the entry of `scrip`
    pub fn clear(&mut self, scrip: &Scrip) {
        self.entries.remove(scrip);
    }

    /// Reset every entry
    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
