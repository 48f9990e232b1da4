//! Signed envelope for the logd wire protocol.
//!
//! Every datagram a producer, tailer or querier sends to the daemon is framed
//! as:
//!
//! ```text
//! +----------------+----------------+---------------------+
//! | signature (32) | timestamp (8)  | payload (variable)  |
//! +----------------+----------------+---------------------+
//! ```
//!
//! The signature is `HMAC-SHA256(secret, timestamp ‖ payload)` and the
//! timestamp is Unix nanoseconds, big-endian. Binding the timestamp into the
//! MAC and rejecting timestamps outside a short window (200ms by default)
//! limits replay to that window; the daemon's write guard closes it for
//! writes.
//!
//! The signer is stateless: verification never consults or records anything.

mod error;
mod frame;
mod signer;

pub use error::SignError;
pub use frame::{pack, unpack, Envelope, HEADER_LEN, SIGNATURE_LEN, TIMESTAMP_LEN};
pub use signer::{Signer, DEFAULT_TTL};
