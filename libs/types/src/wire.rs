//! Envelope Wire Codec
//!
//! Frames are a one-byte version prefix followed by the bincode body:
//!
//! ```text
//! ┌─────────┬───────────────────────────────────────────┐
//! │ version │ bincode(Envelope)                         │
//! │ 1 byte  │ variable                                  │
//! └─────────┴───────────────────────────────────────────┘
//! ```
//!
//! Framing of the byte stream itself belongs to the transport.

use crate::{Envelope, WireError};
use bytes::{BufMut, Bytes, BytesMut};

/// Version byte written in front of every frame
pub const WIRE_VERSION: u8 = 1;

impl Envelope {
    /// Serialize into a transport frame
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let body = bincode::serialize(self)?;
        let mut frame = BytesMut::with_capacity(body.len() + 1);
        frame.put_u8(WIRE_VERSION);
        frame.put_slice(&body);
        Ok(frame.freeze())
    }

    /// Parse a transport frame
    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        let (&version, body) = frame
            .split_first()
            .ok_or(WireError::Truncated { len: frame.len() })?;
        if version != WIRE_VERSION {
            return Err(WireError::UnsupportedVersion {
                found: version,
                expected: WIRE_VERSION,
            });
        }
        Ok(bincode::deserialize(body)?)
    }
}
