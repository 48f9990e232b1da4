//! Replay protection for WRITE commands.
//!
//! The signer already rejects envelopes that arrive more than the TTL away
//! from their timestamp, so two arrivals of one signature are at most twice
//! the TTL apart. Entries are kept that long, measured from arrival.
//! Expired entries are swept once the table passes a soft cap, at most once
//! per retention window.

use logd_sign::SIGNATURE_LEN;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_SOFT_CAP: usize = 4_096;

/// Remembers which WRITE signatures were already applied.
pub trait DedupFilter: Send + Sync {
    /// Returns `true` if `signature` was seen before. Otherwise records it,
    /// stamped with the instant its datagram arrived, and returns `false`.
    fn seen(&self, signature: &[u8; SIGNATURE_LEN], arrived: Instant) -> bool;
}

#[derive(Debug, Default)]
struct Entries {
    first_seen: HashMap<[u8; SIGNATURE_LEN], Instant>,
    last_sweep: Option<Instant>,
}

/// In-memory [`DedupFilter`] keyed by signature.
#[derive(Debug)]
pub struct WriteGuard {
    entries: Mutex<Entries>,
    retention: Duration,
    soft_cap: usize,
}

impl WriteGuard {
    /// Creates a guard for envelopes signed with the given TTL.
    pub fn new(sig_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            retention: sig_ttl * 2,
            soft_cap: DEFAULT_SOFT_CAP,
        }
    }

    pub fn with_soft_cap(mut self, soft_cap: usize) -> Self {
        self.soft_cap = soft_cap.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("write guard lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().first_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().first_seen.is_empty()
    }
}

impl Entries {
    fn sweep_due(&self, now: Instant, retention: Duration) -> bool {
        self.last_sweep
            .map_or(true, |last| now.saturating_duration_since(last) >= retention)
    }
}

impl DedupFilter for WriteGuard {
    fn seen(&self, signature: &[u8; SIGNATURE_LEN], arrived: Instant) -> bool {
        let retention = self.retention;
        let mut entries = self.lock();

        if entries.first_seen.len() >= self.soft_cap && entries.sweep_due(arrived, retention) {
            let before = entries.first_seen.len();
            entries
                .first_seen
                .retain(|_, first| arrived.saturating_duration_since(*first) <= retention);
            entries.last_sweep = Some(arrived);
            tracing::trace!(
                swept = before - entries.first_seen.len(),
                remaining = entries.first_seen.len(),
                "write guard swept"
            );
        }

        match entries.first_seen.get(signature) {
            Some(first) if arrived.saturating_duration_since(*first) <= retention => true,
            _ => {
                entries.first_seen.insert(*signature, arrived);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_sighting_is_a_duplicate() {
        let guard = WriteGuard::new(Duration::from_millis(200));
        let sig = [7u8; SIGNATURE_LEN];
        let now = Instant::now();

        assert!(!guard.seen(&sig, now));
        assert!(guard.seen(&sig, now));
        assert!(!guard.seen(&[8u8; SIGNATURE_LEN], now));
    }

    #[test]
    fn entries_expire_after_twice_the_ttl() {
        let guard = WriteGuard::new(Duration::from_millis(200));
        let sig = [1u8; SIGNATURE_LEN];
        let start = Instant::now();

        assert!(!guard.seen(&sig, start));
        assert!(guard.seen(&sig, start + Duration::from_millis(400)));
        assert!(!guard.seen(&sig, start + Duration::from_millis(1_000)));
    }

    #[test]
    fn soft_cap_prunes_expired_entries() {
        let guard = WriteGuard::new(Duration::from_millis(10)).with_soft_cap(4);
        let start = Instant::now();
        for i in 0..4u8 {
            guard.seen(&[i; SIGNATURE_LEN], start);
        }
        assert_eq!(guard.len(), 4);

        let later = start + Duration::from_secs(1);
        assert!(!guard.seen(&[99; SIGNATURE_LEN], later));
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn fresh_table_over_the_cap_is_swept_once_per_window() {
        // Retention is 200ms.
        let guard = WriteGuard::new(Duration::from_millis(100)).with_soft_cap(2);
        let start = Instant::now();
        let at = |ms| start + Duration::from_millis(ms);

        guard.seen(&[1; SIGNATURE_LEN], at(0));
        guard.seen(&[2; SIGNATURE_LEN], at(0));
        // Over the cap: the first insert sweeps, the next one within the
        // window does not.
        guard.seen(&[3; SIGNATURE_LEN], at(1));
        guard.seen(&[4; SIGNATURE_LEN], at(2));
        assert_eq!(guard.len(), 4);

        // Window elapsed and every earlier entry has expired.
        assert!(!guard.seen(&[5; SIGNATURE_LEN], at(250)));
        assert_eq!(guard.len(), 1);
    }
}
