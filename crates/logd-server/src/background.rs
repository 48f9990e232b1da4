//! Background tasks for the logd daemon.
//!
//! Includes:
//! - Per-partition retention on the log store.
//! - Write throughput measurement for the status surface.

use logd_db::SqliteStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::stats::Stats;

/// How often write throughput is recomputed.
pub const MEASURE_PERIOD: Duration = Duration::from_millis(500);

/// Starts the retention task.
///
/// Every `interval_seconds` the oldest records of each partition above
/// `max_records_per_partition` are deleted. Runs until `cancel` fires.
pub async fn start_retention_task(
    store: SqliteStore,
    max_records_per_partition: u64,
    interval_seconds: u64,
    cancel: CancellationToken,
) {
    if interval_seconds == 0 {
        tracing::warn!("retention task disabled (interval=0)");
        return;
    }

    tracing::info!(
        interval_seconds,
        max_records_per_partition,
        "starting log retention task"
    );

    let mut ticker = interval(Duration::from_secs(interval_seconds));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; let startup settle first.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let store = store.clone();
        let result =
            tokio::task::spawn_blocking(move || store.prune(max_records_per_partition)).await;

        match result {
            Ok(Ok(count)) if count > 0 => {
                tracing::info!(count, "pruned old log records");
            }
            Ok(Ok(_)) => {
                tracing::debug!("no log records to prune");
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "failed to prune log records");
            }
            Err(e) => {
                tracing::error!(error = %e, "retention task panicked or was cancelled");
            }
        }
    }
}

/// Starts the throughput measurer. Runs until `cancel` fires.
pub async fn start_measure_task(stats: Arc<Stats>, cancel: CancellationToken) {
    let mut ticker = interval(MEASURE_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = Instant::now();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let now = Instant::now();
        stats.measure(now.duration_since(last));
        last = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logd_db::{DbRuntimeSettings, LogStore};
    use logd_sign::pack;
    use logd_types::{Level, LogRecord};

    #[tokio::test(start_paused = true)]
    async fn measurer_publishes_throughput() {
        let stats = Arc::new(Stats::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(start_measure_task(Arc::clone(&stats), cancel.clone()));

        // Let the immediate first tick pass, then record writes.
        tokio::time::sleep(Duration::from_millis(10)).await;
        for _ in 0..30 {
            stats.record_write();
        }
        tokio::time::sleep(MEASURE_PERIOD).await;

        let snapshot = stats.snapshot();
        assert!(snapshot.writes_per_sec > 0);
        assert_eq!(snapshot.max_writes_per_sec, snapshot.writes_per_sec);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn retention_prunes_on_interval() {
        let store = SqliteStore::open(":memory:", DbRuntimeSettings::default()).unwrap();
        for i in 0..5 {
            let record = LogRecord::new("/a/b/c", Level::Info, format!("m{i}"));
            store.write("/a/b", &pack(&record)).unwrap();
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(start_retention_task(store.clone(), 2, 1, cancel.clone()));

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        // spawn_blocking runs on a real thread; give it a moment to finish.
        for _ in 0..100 {
            if store.len().unwrap() == 2 {
                break;
            }
            tokio::task::yield_now().await;
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(store.len().unwrap(), 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn zero_interval_disables_retention() {
        let store = SqliteStore::open(":memory:", DbRuntimeSettings::default()).unwrap();
        // Returns immediately instead of looping.
        start_retention_task(store, 1, 0, CancellationToken::new()).await;
    }
}
