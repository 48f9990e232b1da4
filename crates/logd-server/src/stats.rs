//! Daemon counters exposed on the status endpoint.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Reason a datagram or command was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Short datagram or undecodable command.
    Malformed,
    /// Signature or freshness check failed.
    Unauthorized,
    /// WRITE already applied.
    Duplicate,
    /// WRITE key has fewer than three segments.
    BadKey,
    /// Inbound queue or handler budget exhausted.
    QueueFull,
    /// Store rejected the write.
    StoreFailed,
}

/// Lock-free counters shared by the transport and the status surface.
#[derive(Debug, Default)]
pub struct Stats {
    writes: AtomicU64,
    queries: AtomicU64,
    malformed: AtomicU64,
    unauthorized: AtomicU64,
    duplicate: AtomicU64,
    bad_key: AtomicU64,
    queue_full: AtomicU64,
    store_failed: AtomicU64,
    writes_per_sec: AtomicU64,
    max_writes_per_sec: AtomicU64,
    last_measured_writes: AtomicU64,
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub writes: u64,
    pub writes_per_sec: u64,
    pub max_writes_per_sec: u64,
    pub queries: u64,
    pub dropped: DropCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropCounts {
    pub malformed: u64,
    pub unauthorized: u64,
    pub duplicate: u64,
    pub bad_key: u64,
    pub queue_full: u64,
    pub store_failed: u64,
}

impl Stats {
    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Malformed => &self.malformed,
            DropReason::Unauthorized => &self.unauthorized,
            DropReason::Duplicate => &self.duplicate,
            DropReason::BadKey => &self.bad_key,
            DropReason::QueueFull => &self.queue_full,
            DropReason::StoreFailed => &self.store_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Recomputes write throughput over the `elapsed` interval since the
    /// previous call. Called by a single measurer task.
    pub fn measure(&self, elapsed: Duration) {
        let current = self.writes.load(Ordering::Relaxed);
        let previous = self.last_measured_writes.swap(current, Ordering::Relaxed);
        let millis = elapsed.as_millis().max(1);
        let delta = u128::from(current.saturating_sub(previous));
        let per_sec = u64::try_from(delta * 1_000 / millis).unwrap_or(u64::MAX);

        self.writes_per_sec.store(per_sec, Ordering::Relaxed);
        self.max_writes_per_sec.fetch_max(per_sec, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            writes: self.writes.load(Ordering::Relaxed),
            writes_per_sec: self.writes_per_sec.load(Ordering::Relaxed),
            max_writes_per_sec: self.max_writes_per_sec.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            dropped: DropCounts {
                malformed: self.malformed.load(Ordering::Relaxed),
                unauthorized: self.unauthorized.load(Ordering::Relaxed),
                duplicate: self.duplicate.load(Ordering::Relaxed),
                bad_key: self.bad_key.load(Ordering::Relaxed),
                queue_full: self.queue_full.load(Ordering::Relaxed),
                store_failed: self.store_failed.load(Ordering::Relaxed),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_are_counted_by_reason() {
        let stats = Stats::default();
        stats.record_drop(DropReason::Duplicate);
        stats.record_drop(DropReason::Duplicate);
        stats.record_drop(DropReason::BadKey);

        let dropped = stats.snapshot().dropped;
        assert_eq!(dropped.duplicate, 2);
        assert_eq!(dropped.bad_key, 1);
        assert_eq!(dropped.malformed, 0);
    }

    #[test]
    fn measure_tracks_rate_and_peak() {
        let stats = Stats::default();
        for _ in 0..50 {
            stats.record_write();
        }
        stats.measure(Duration::from_millis(500));
        let first = stats.snapshot();
        assert_eq!(first.writes_per_sec, 100);
        assert_eq!(first.max_writes_per_sec, 100);

        for _ in 0..10 {
            stats.record_write();
        }
        stats.measure(Duration::from_millis(500));
        let second = stats.snapshot();
        assert_eq!(second.writes, 60);
        assert_eq!(second.writes_per_sec, 20);
        assert_eq!(second.max_writes_per_sec, 100, "peak is retained");
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let json = serde_json::to_value(Stats::default().snapshot()).unwrap();
        assert!(json.get("writesPerSec").is_some());
        assert!(json["dropped"].get("queueFull").is_some());
    }
}
