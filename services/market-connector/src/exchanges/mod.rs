//! Broker protocol implementations

pub mod angel;
pub mod groww;
pub mod shoonya;
pub mod zerodha;

use crate::codec::BrokerProtocol;

/// Brokers with a protocol implementation
pub const BROKERS: [&str; 4] = [zerodha::BROKER, angel::BROKER, shoonya::BROKER, groww::BROKER];

/// Codec and normalizer for a broker, `None` when unsupported
#[must_use]
pub fn protocol_for(broker: &str) -> Option<BrokerProtocol> {
    match broker.to_ascii_lowercase().as_str() {
        zerodha::BROKER => Some(zerodha::protocol()),
        angel::BROKER => Some(angel::protocol()),
        shoonya::BROKER => Some(shoonya::protocol()),
        groww::BROKER => Some(groww::protocol()),
        _ => None,
    }
}
