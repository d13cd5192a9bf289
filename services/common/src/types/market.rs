//! Canonical market data types

use super::instrument::{InstrumentKey, SubscriptionMode, topic_for};
use serde::{Deserialize, Serialize};

/// Book side
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy side (bid)
    Buy,
    /// Sell side (ask/offer)
    Sell,
}

/// One price level of market depth
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    /// Level price
    pub price: f64,
    /// Total quantity at this price
    pub quantity: i64,
    /// Number of orders at this price
    pub orders: i64,
}

/// Market depth, best level first on both sides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketDepth {
    /// Bids, highest price first
    pub buy: Vec<DepthLevel>,
    /// Asks, lowest price first
    pub sell: Vec<DepthLevel>,
}

impl MarketDepth {
    /// Copy of this depth with exactly `levels` entries per side
    ///
    /// Missing levels are zero-filled, extra levels are dropped.
    #[must_use]
    pub fn padded(&self, levels: usize) -> Self {
        Self {
            buy: pad_side(&self.buy, levels),
            sell: pad_side(&self.sell, levels),
        }
    }

    /// Mutable access to one side
    pub fn side_mut(&mut self, side: Side) -> &mut Vec<DepthLevel> {
        match side {
            Side::Buy => &mut self.buy,
            Side::Sell => &mut self.sell,
        }
    }

    /// Best bid, if any non-empty level exists
    #[must_use]
    pub fn best_bid(&self) -> Option<&DepthLevel> {
        self.buy.first().filter(|level| level.price > 0.0)
    }

    /// Best ask, if any non-empty level exists
    #[must_use]
    pub fn best_ask(&self) -> Option<&DepthLevel> {
        self.sell.first().filter(|level| level.price > 0.0)
    }
}

fn pad_side(levels: &[DepthLevel], count: usize) -> Vec<DepthLevel> {
    let mut side: Vec<DepthLevel> = levels.iter().take(count).copied().collect();
    side.resize(count, DepthLevel::default());
    side
}

/// Broker-agnostic normalized tick
///
/// Every numeric field is always present and defaults to zero. `depth` is
/// populated for depth-mode ticks only. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTick {
    /// Broker that produced the tick
    pub broker: String,
    /// Downstream exchange
    pub exchange: String,
    /// Downstream trading symbol
    pub symbol: String,
    /// Broker instrument token
    pub token: String,
    /// Mode the tick was published for
    pub mode: SubscriptionMode,
    /// Last traded price
    pub ltp: f64,
    /// Set when `ltp` was located heuristically without cross-validation
    pub ltp_estimated: bool,
    /// Last trade time, epoch milliseconds
    pub last_trade_timestamp: i64,
    /// Exchange feed time, epoch milliseconds
    pub exchange_timestamp: i64,
    pub last_traded_quantity: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub average_price: f64,
    pub volume: i64,
    /// Change against previous close, in percent
    pub percent_change: f64,
    pub total_buy_qty: i64,
    pub total_sell_qty: i64,
    pub open_interest: i64,
    /// Market depth, exactly the subscribed number of levels per side
    pub depth: Option<MarketDepth>,
}

impl CanonicalTick {
    /// Empty tick for `key` in `mode`
    pub fn new(
        broker: impl Into<String>,
        key: &InstrumentKey,
        token: impl Into<String>,
        mode: SubscriptionMode,
    ) -> Self {
        Self {
            broker: broker.into(),
            exchange: key.exchange.clone(),
            symbol: key.symbol.clone(),
            token: token.into(),
            mode,
            ..Self::default()
        }
    }

    /// Bus topic this tick is published on
    #[must_use]
    pub fn topic(&self) -> String {
        topic_for(&self.exchange, &self.symbol, self.mode)
    }
}
