//! Static per-broker capability tables
//!
//! Which exchanges each broker serves, in which modes, and how many depth
//! levels. Depth requests that a broker cannot serve fall back to the
//! deepest level it can, never to an error.

use services_common::{DEFAULT_DEPTH_LEVEL, FeedError, FeedResult, SubscriptionMode};

const ALL_MODES: &[SubscriptionMode] = &[
    SubscriptionMode::Ltp,
    SubscriptionMode::Quote,
    SubscriptionMode::Depth,
];
const INDEX_MODES: &[SubscriptionMode] = &[SubscriptionMode::Ltp, SubscriptionMode::Quote];
const FIVE_LEVELS: &[u8] = &[5];
const NO_DEPTH: &[u8] = &[];

/// What a broker offers on one exchange
#[derive(Debug, Clone, Copy)]
pub struct ExchangeCapability {
    /// Downstream exchange name
    pub exchange: &'static str,
    /// Modes served
    pub modes: &'static [SubscriptionMode],
    /// Supported depth levels, ascending
    pub depth_levels: &'static [u8],
}

const fn exchange(
    exchange: &'static str,
    modes: &'static [SubscriptionMode],
    depth_levels: &'static [u8],
) -> ExchangeCapability {
    ExchangeCapability {
        exchange,
        modes,
        depth_levels,
    }
}

/// Capability table of one broker
#[derive(Debug)]
pub struct BrokerCapabilities {
    /// Broker name
    pub broker: &'static str,
    /// Per-exchange capabilities
    pub exchanges: &'static [ExchangeCapability],
    /// Depth used when nothing better applies
    pub default_depth: u8,
}

impl BrokerCapabilities {
    fn exchange(&self, exchange: &str) -> Option<&ExchangeCapability> {
        self.exchanges
            .iter()
            .find(|cap| cap.exchange.eq_ignore_ascii_case(exchange))
    }

    /// Whether the broker serves `exchange` at all
    #[must_use]
    pub fn supports_exchange(&self, exchange: &str) -> bool {
        self.exchange(exchange).is_some()
    }

    /// Whether the broker serves `mode` on `exchange`
    #[must_use]
    pub fn supports_mode(&self, exchange: &str, mode: SubscriptionMode) -> bool {
        self.exchange(exchange)
            .is_some_and(|cap| cap.modes.contains(&mode))
    }

    /// Whether `level` is a supported depth on `exchange`
    #[must_use]
    pub fn is_depth_supported(&self, exchange: &str, level: u8) -> bool {
        self.exchange(exchange)
            .is_some_and(|cap| cap.depth_levels.contains(&level))
    }

    /// Deepest supported level not above `requested`, else the broker default
    #[must_use]
    pub fn fallback_depth(&self, exchange: &str, requested: u8) -> u8 {
        self.exchange(exchange)
            .and_then(|cap| {
                cap.depth_levels
                    .iter()
                    .copied()
                    .filter(|level| *level <= requested)
                    .max()
            })
            .unwrap_or(self.default_depth)
    }

    /// Validate a subscription request and settle its depth
    ///
    /// Returns `(actual_depth, is_fallback)`. Non-depth modes report a depth of
    /// zero.
    pub fn resolve(
        &self,
        exchange: &str,
        mode: SubscriptionMode,
        depth_level: u8,
    ) -> FeedResult<(u8, bool)> {
        if !self.supports_exchange(exchange) {
            return Err(FeedError::UnsupportedCapability(format!(
                "{} does not serve exchange {exchange}",
                self.broker
            )));
        }
        if !self.supports_mode(exchange, mode) {
            return Err(FeedError::UnsupportedCapability(format!(
                "{} does not serve {mode} on {exchange}",
                self.broker
            )));
        }
        if mode != SubscriptionMode::Depth {
            return Ok((0, false));
        }
        if self.is_depth_supported(exchange, depth_level) {
            return Ok((depth_level, false));
        }
        Ok((self.fallback_depth(exchange, depth_level), true))
    }
}

static ZERODHA: BrokerCapabilities = BrokerCapabilities {
    broker: "zerodha",
    exchanges: &[
        exchange("NSE", ALL_MODES, FIVE_LEVELS),
        exchange("BSE", ALL_MODES, FIVE_LEVELS),
        exchange("NFO", ALL_MODES, FIVE_LEVELS),
        exchange("BFO", ALL_MODES, FIVE_LEVELS),
        exchange("CDS", ALL_MODES, FIVE_LEVELS),
        exchange("BCD", ALL_MODES, FIVE_LEVELS),
        exchange("MCX", ALL_MODES, FIVE_LEVELS),
        exchange("NSE_INDEX", INDEX_MODES, NO_DEPTH),
        exchange("BSE_INDEX", INDEX_MODES, NO_DEPTH),
    ],
    default_depth: DEFAULT_DEPTH_LEVEL,
};

static ANGEL: BrokerCapabilities = BrokerCapabilities {
    broker: "angel",
    exchanges: &[
        exchange("NSE", ALL_MODES, FIVE_LEVELS),
        exchange("BSE", ALL_MODES, FIVE_LEVELS),
        exchange("NFO", ALL_MODES, FIVE_LEVELS),
        exchange("BFO", ALL_MODES, FIVE_LEVELS),
        exchange("CDS", ALL_MODES, FIVE_LEVELS),
        exchange("MCX", ALL_MODES, FIVE_LEVELS),
        exchange("NCDEX", ALL_MODES, FIVE_LEVELS),
        exchange("NSE_INDEX", INDEX_MODES, NO_DEPTH),
        exchange("BSE_INDEX", INDEX_MODES, NO_DEPTH),
    ],
    default_depth: DEFAULT_DEPTH_LEVEL,
};

static SHOONYA: BrokerCapabilities = BrokerCapabilities {
    broker: "shoonya",
    exchanges: &[
        exchange("NSE", ALL_MODES, FIVE_LEVELS),
        exchange("BSE", ALL_MODES, FIVE_LEVELS),
        exchange("NFO", ALL_MODES, FIVE_LEVELS),
        exchange("BFO", ALL_MODES, FIVE_LEVELS),
        exchange("CDS", ALL_MODES, FIVE_LEVELS),
        exchange("MCX", ALL_MODES, FIVE_LEVELS),
        exchange("NSE_INDEX", INDEX_MODES, NO_DEPTH),
        exchange("BSE_INDEX", INDEX_MODES, NO_DEPTH),
    ],
    default_depth: DEFAULT_DEPTH_LEVEL,
};

static GROWW: BrokerCapabilities = BrokerCapabilities {
    broker: "groww",
    exchanges: &[
        exchange("NSE", ALL_MODES, FIVE_LEVELS),
        exchange("BSE", ALL_MODES, FIVE_LEVELS),
        exchange("NFO", ALL_MODES, FIVE_LEVELS),
        exchange("BFO", ALL_MODES, FIVE_LEVELS),
        exchange("NSE_INDEX", INDEX_MODES, NO_DEPTH),
        exchange("BSE_INDEX", INDEX_MODES, NO_DEPTH),
    ],
    default_depth: DEFAULT_DEPTH_LEVEL,
};

/// Capability table for a broker
#[must_use]
pub fn for_broker(broker: &str) -> Option<&'static BrokerCapabilities> {
    [&ZERODHA, &ANGEL, &SHOONYA, &GROWW]
        .into_iter()
        .find(|caps| caps.broker.eq_ignore_ascii_case(broker))
}
