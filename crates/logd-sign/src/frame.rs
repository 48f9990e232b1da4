//! Envelope framing: `signature ‖ timestamp ‖ payload`.

use logd_types::LogRecord;
use prost::Message;

use crate::error::SignError;

/// Length of the HMAC-SHA256 signature.
pub const SIGNATURE_LEN: usize = 32;

/// Length of the big-endian nanosecond timestamp.
pub const TIMESTAMP_LEN: usize = 8;

/// Length of the fixed envelope header.
pub const HEADER_LEN: usize = SIGNATURE_LEN + TIMESTAMP_LEN;

/// A signed envelope borrowed from a received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub signature: &'a [u8; SIGNATURE_LEN],
    pub timestamp: &'a [u8; TIMESTAMP_LEN],
    pub payload: &'a [u8],
}

/// Splits a datagram into its envelope parts.
///
/// # Errors
///
/// Returns `SignError::Malformed` if the datagram is shorter than
/// [`HEADER_LEN`].
pub fn unpack(datagram: &[u8]) -> Result<Envelope<'_>, SignError> {
    let malformed = || SignError::Malformed {
        len: datagram.len(),
        min: HEADER_LEN,
    };
    if datagram.len() < HEADER_LEN {
        return Err(malformed());
    }
    let (signature, rest) = datagram.split_at(SIGNATURE_LEN);
    let (timestamp, payload) = rest.split_at(TIMESTAMP_LEN);
    Ok(Envelope {
        signature: signature.try_into().map_err(|_| malformed())?,
        timestamp: timestamp.try_into().map_err(|_| malformed())?,
        payload,
    })
}

/// Wire-encodes a record for transmission to a tailer or querier.
pub fn pack(record: &LogRecord) -> Vec<u8> {
    record.encode_to_vec()
}
