//! Length-prefixed wire encoding for bus records
//!
//! Each frame is a big-endian `u32` byte length followed by a bincode record.

use super::{BusResult, EventBusError};
use crate::constants::{FRAME_LENGTH_PREFIX, MAX_FRAME_LEN};
use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encode one record into a length-prefixed frame
pub fn encode_frame<T: Serialize>(record: &T) -> BusResult<Vec<u8>> {
    let body =
        bincode::serialize(record).map_err(|e| EventBusError::Serialization(e.to_string()))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(EventBusError::FrameTooLarge(body.len()));
    }
    let len = u32::try_from(body.len()).map_err(|_| EventBusError::FrameTooLarge(body.len()))?;

    let mut frame = vec![0u8; FRAME_LENGTH_PREFIX];
    BigEndian::write_u32(&mut frame, len);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode the first frame in `buf`
///
/// Returns the record and the number of bytes consumed.
pub fn decode_frame<T: DeserializeOwned>(buf: &[u8]) -> BusResult<(T, usize)> {
    if buf.len() < FRAME_LENGTH_PREFIX {
        return Err(EventBusError::Incomplete {
            needed: FRAME_LENGTH_PREFIX,
            available: buf.len(),
        });
    }

    let len = BigEndian::read_u32(&buf[..FRAME_LENGTH_PREFIX]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(EventBusError::FrameTooLarge(len));
    }

    let end = FRAME_LENGTH_PREFIX + len;
    if buf.len() < end {
        return Err(EventBusError::Incomplete {
            needed: end,
            available: buf.len(),
        });
    }

    let record = bincode::deserialize(&buf[FRAME_LENGTH_PREFIX..end])
        .map_err(|e| EventBusError::Serialization(e.to_string()))?;
    Ok((record, end))
}

/// Incremental decoder for a byte stream of concatenated frames
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes waiting for the rest of their frame
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete record, if one is buffered
    pub fn next_frame<T: DeserializeOwned>(&mut self) -> BusResult<Option<T>> {
        match decode_frame(&self.buffer) {
            Ok((record, consumed)) => {
                self.buffer.drain(..consumed);
                Ok(Some(record))
            }
            Err(EventBusError::Incomplete { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
