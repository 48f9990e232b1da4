//! HMAC-SHA256 signing bound to a timestamp.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::SignError;
use crate::frame::{Envelope, HEADER_LEN, TIMESTAMP_LEN};

type HmacSha256 = Hmac<Sha256>;

/// Default freshness window for signed envelopes.
pub const DEFAULT_TTL: Duration = Duration::from_millis(200);

/// Signs and verifies envelopes against a shared secret.
///
/// The only state is the freshness window; the same `Signer` may verify
/// against any number of secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signer {
    ttl: Duration,
}

impl Default for Signer {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl Signer {
    /// Creates a signer accepting timestamps within `ttl` of now.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    /// The freshness window.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Signs `payload` at time `now`, returning the full envelope bytes.
    pub fn sign(&self, secret: &[u8], payload: &[u8], now: SystemTime) -> Vec<u8> {
        let timestamp = encode_time(now);
        let signature = mac(secret, &timestamp, payload).finalize().into_bytes();

        let mut signed = Vec::with_capacity(HEADER_LEN + payload.len());
        signed.extend_from_slice(&signature);
        signed.extend_from_slice(&timestamp);
        signed.extend_from_slice(payload);
        signed
    }

    /// Verifies an envelope against `secret` at time `now`.
    ///
    /// The freshness window is checked before the MAC; the MAC comparison is
    /// constant-time.
    ///
    /// # Errors
    ///
    /// Returns `SignError::TimeOutOfWindow` if the timestamp is more than the
    /// TTL away from `now`, or `SignError::BadSignature` if the signature does
    /// not match.
    pub fn verify(
        &self,
        secret: &[u8],
        envelope: &Envelope<'_>,
        now: SystemTime,
    ) -> Result<(), SignError> {
        let signed_at = decode_time(envelope.timestamp);
        let earliest = now.checked_sub(self.ttl).unwrap_or(UNIX_EPOCH);
        let latest = now.checked_add(self.ttl).unwrap_or(now);
        if signed_at < earliest || signed_at > latest {
            return Err(SignError::TimeOutOfWindow);
        }

        mac(secret, envelope.timestamp, envelope.payload)
            .verify_slice(envelope.signature)
            .map_err(|_| SignError::BadSignature)
    }
}

fn mac(secret: &[u8], timestamp: &[u8; TIMESTAMP_LEN], payload: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(timestamp);
    mac.update(payload);
    mac
}

/// Encodes a time as big-endian Unix nanoseconds. Times before the epoch
/// encode as zero.
fn encode_time(t: SystemTime) -> [u8; TIMESTAMP_LEN] {
    let nanos = t
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    nanos.to_be_bytes()
}

fn decode_time(bytes: &[u8; TIMESTAMP_LEN]) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(u64::from_be_bytes(*bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{unpack, SIGNATURE_LEN};

    fn at(millis: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000) + Duration::from_millis(millis)
    }

    #[test]
    fn verifies_within_ttl() {
        let signer = Signer::new(Duration::from_millis(200));
        let signed = signer.sign(b"s", b"payload", at(0));
        let envelope = unpack(&signed).unwrap();

        assert_eq!(signer.verify(b"s", &envelope, at(50)), Ok(()));
        assert_eq!(signer.verify(b"s", &envelope, at(200)), Ok(()));
    }

    #[test]
    fn rejects_after_ttl() {
        let signer = Signer::new(Duration::from_millis(200));
        let signed = signer.sign(b"s", b"payload", at(0));
        let envelope = unpack(&signed).unwrap();

        assert_eq!(
            signer.verify(b"s", &envelope, at(250)),
            Err(SignError::TimeOutOfWindow)
        );
    }

    #[test]
    fn rejects_timestamp_from_the_future() {
        let signer = Signer::new(Duration::from_millis(200));
        let signed = signer.sign(b"s", b"payload", at(1_000));
        let envelope = unpack(&signed).unwrap();

        assert_eq!(
            signer.verify(b"s", &envelope, at(0)),
            Err(SignError::TimeOutOfWindow)
        );
    }

    #[test]
    fn rejects_wrong_secret() {
        let signer = Signer::default();
        let signed = signer.sign(b"read", b"tail", at(0));
        let envelope = unpack(&signed).unwrap();

        assert_eq!(
            signer.verify(b"write", &envelope, at(0)),
            Err(SignError::BadSignature)
        );
    }

    #[test]
    fn time_is_bound_into_signature() {
        let signer = Signer::default();
        let a = signer.sign(b"s", b"payload", at(0));
        let b = signer.sign(b"s", b"payload", at(1));
        assert_ne!(a[..SIGNATURE_LEN], b[..SIGNATURE_LEN]);
    }

    #[test]
    fn any_flipped_bit_invalidates() {
        let signer = Signer::default();
        let signed = signer.sign(b"s", b"some payload", at(0));

        // Flip every bit of the timestamp and payload in turn. Timestamp flips
        // may also push the time out of window; either way verification fails.
        for byte in SIGNATURE_LEN..signed.len() {
            for bit in 0..8 {
                let mut tampered = signed.clone();
                tampered[byte] ^= 1 << bit;
                let envelope = unpack(&tampered).unwrap();
                assert!(
                    signer.verify(b"s", &envelope, at(0)).is_err(),
                    "flip of byte {byte} bit {bit} went unnoticed"
                );
            }
        }
    }

    #[test]
    fn envelope_layout() {
        let signer = Signer::default();
        let now = at(0);
        let signed = signer.sign(b"s", b"ping", now);

        assert_eq!(signed.len(), HEADER_LEN + 4);
        assert_eq!(&signed[HEADER_LEN..], b"ping");
        let envelope = unpack(&signed).unwrap();
        assert_eq!(decode_time(envelope.timestamp), now);
    }
}
