//! Error types for envelope framing and verification.

/// Errors that can occur while unpacking or verifying a signed envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    /// The datagram is shorter than the fixed envelope header.
    #[error("malformed envelope: {len} bytes, header needs {min}")]
    Malformed {
        /// Length of the datagram received.
        len: usize,
        /// Minimum length of a valid envelope.
        min: usize,
    },

    /// The envelope timestamp is outside the accepted window around now.
    #[error("timestamp outside of accepted window")]
    TimeOutOfWindow,

    /// The signature does not match the timestamp and payload.
    #[error("signature mismatch")]
    BadSignature,
}
