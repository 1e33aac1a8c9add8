//! Error types for envelope encoding and decoding

use thiserror::Error;

/// Failures turning envelopes into frames and back
#[derive(Debug, Error)]
pub enum WireError {
    /// Frame shorter than the version prefix
    #[error("Frame too short: {len} bytes")]
    Truncated { len: usize },

    /// Frame produced by an incompatible encoder
    #[error("Unsupported wire version {found} (expected {expected})")]
    UnsupportedVersion { found: u8, expected: u8 },

    /// Serializer rejected the envelope or the frame body
    #[error("Envelope codec error: {0}")]
    Codec(#[from] bincode::Error),
}
