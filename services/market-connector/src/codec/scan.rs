//! Heuristic price location for undocumented binary payloads
//!
//! Used only where a broker does not publish the offset of its price field.
//! The scan is linear and bounded by the payload length: every offset is
//! tried as a little-endian `f64`, then every offset as an `f32`. A value is
//! accepted when it is finite, lies within `[0.01, 1e7]`, sits on a 0.01
//! tick and, when an OHLC band is known, lies within
//! `[low * 0.8, high * 1.2]`. The first accepted value wins. When nothing
//! qualifies the caller gets `None` and must treat the price as absent.

use byteorder::{ByteOrder, LittleEndian};

/// Lowest accepted price
pub const MIN_PLAUSIBLE_PRICE: f64 = 0.01;
/// Highest accepted price
pub const MAX_PLAUSIBLE_PRICE: f64 = 1e7;
/// Band widening below the session low
pub const BAND_LOW_FACTOR: f64 = 0.8;
/// Band widening above the session high
pub const BAND_HIGH_FACTOR: f64 = 1.2;

const TICKS_PER_UNIT: f64 = 100.0;
const F64_TICK_TOLERANCE: f64 = 1e-9;

/// A price located by [`scan_for_plausible_price`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScannedPrice {
    pub price: f64,
    /// Byte offset within the scanned payload
    pub offset: usize,
    /// Width of the matched field, 8 or 4
    pub width: usize,
    /// Whether the price was checked against a known OHLC band
    pub validated: bool,
}

/// Locate the most plausible price in `payload`
#[must_use]
pub fn scan_for_plausible_price(payload: &[u8], band: Option<(f64, f64)>) -> Option<ScannedPrice> {
    let validated = band.is_some();
    let accept = |value: f64| in_range(value) && band.is_none_or(|band| in_band(value, band));

    let wide = payload.windows(8).enumerate().find_map(|(offset, bytes)| {
        let value = LittleEndian::read_f64(bytes);
        (accept(value) && on_tick_f64(value)).then_some(ScannedPrice {
            price: value,
            offset,
            width: 8,
            validated,
        })
    });
    if wide.is_some() {
        return wide;
    }

    payload.windows(4).enumerate().find_map(|(offset, bytes)| {
        let raw = LittleEndian::read_f32(bytes);
        let value = f64::from(raw);
        if !accept(value) {
            return None;
        }
        on_tick_f32(raw).map(|price| ScannedPrice {
            price,
            offset,
            width: 4,
            validated,
        })
    })
}

fn in_range(value: f64) -> bool {
    value.is_finite() && (MIN_PLAUSIBLE_PRICE..=MAX_PLAUSIBLE_PRICE).contains(&value)
}

fn in_band(value: f64, (low, high): (f64, f64)) -> bool {
    (low * BAND_LOW_FACTOR..=high * BAND_HIGH_FACTOR).contains(&value)
}

fn on_tick_f64(value: f64) -> bool {
    let ticked = (value * TICKS_PER_UNIT).round() / TICKS_PER_UNIT;
    (ticked - value).abs() <= F64_TICK_TOLERANCE * value.abs().max(1.0)
}

/// The tick-aligned `f64` an `f32` was rounded from, if any
fn on_tick_f32(raw: f32) -> Option<f64> {
    let ticked = (f64::from(raw) * TICKS_PER_UNIT).round() / TICKS_PER_UNIT;
    (ticked as f32 == raw).then_some(ticked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    /// Synthetic frame: a `u32` sequence number followed by an `f64` price
    const F64_AFTER_SEQUENCE: &str = "070000009a9999991925a34000000000";
    /// Synthetic frame: a `u32` sequence number, an `f32` price, padding
    const F32_AFTER_SEQUENCE: &str = "07000000cd2819450000000000000000";

    fn frame(hex_str: &str) -> Vec<u8> {
        hex::decode(hex_str).unwrap()
    }

    #[rstest]
    #[case(F64_AFTER_SEQUENCE, 4, 8)]
    #[case(F32_AFTER_SEQUENCE, 4, 4)]
    fn test_finds_price_after_sequence_number(
        #[case] hex_frame: &str,
        #[case] offset: usize,
        #[case] width: usize,
    ) {
        let found = scan_for_plausible_price(&frame(hex_frame), None).unwrap();
        assert_eq!(found.price, 2450.55);
        assert_eq!(found.offset, offset);
        assert_eq!(found.width, width);
        assert!(!found.validated);
    }

    #[test]
    fn test_band_skips_decoy_values() {
        let mut payload = 100.0f64.to_le_bytes().to_vec();
        payload.extend_from_slice(&2450.55f64.to_le_bytes());

        let unbanded = scan_for_plausible_price(&payload, None).unwrap();
        assert_eq!(unbanded.price, 100.0);

        let banded = scan_for_plausible_price(&payload, Some((2400.0, 2500.0))).unwrap();
        assert_eq!(banded.price, 2450.55);
        assert_eq!(banded.offset, 8);
        assert!(banded.validated);
    }

    #[rstest]
    #[case(vec![0xff; 16])]
    #[case(vec![0; 16])]
    #[case(vec![1, 2, 3])]
    #[case(Vec::new())]
    fn test_no_plausible_value(#[case] payload: Vec<u8>) {
        assert_eq!(scan_for_plausible_price(&payload, None), None);
    }

    #[test]
    fn test_out_of_band_value_is_rejected() {
        let payload = 2450.55f64.to_le_bytes();
        assert_eq!(scan_for_plausible_price(&payload, Some((100.0, 110.0))), None);
    }

    #[test]
    fn test_off_tick_and_out_of_range_values_are_rejected() {
        let mut payload = 1e9f64.to_le_bytes().to_vec();
        payload.extend_from_slice(&2450.551_234_5f64.to_le_bytes());
        assert_eq!(scan_for_plausible_price(&payload, None), None);
    }
}
