//! Soft-state table of active tailers.
//!
//! A subscriber is identified by its remote address and kept alive by
//! periodic pings. All mutation happens under one short-lived lock; callers
//! take a [`SubscriberRegistry::snapshot`] and send outside of it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a TAIL registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The address was absent and is now active.
    New,
    /// The address was already active; its heartbeat was refreshed.
    Refreshed,
    /// The registry is at capacity; nothing changed.
    Full,
}

#[derive(Debug)]
pub struct SubscriberRegistry {
    subscribers: Mutex<HashMap<SocketAddr, Instant>>,
    capacity: usize,
}

impl SubscriberRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SocketAddr, Instant>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("subscriber registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Registers `addr` as a tailer, or refreshes it if already active.
    pub fn register(&self, addr: SocketAddr, now: Instant) -> Registration {
        let mut subscribers = self.lock();
        if let Some(last_ping) = subscribers.get_mut(&addr) {
            *last_ping = now;
            return Registration::Refreshed;
        }
        if subscribers.len() >= self.capacity {
            return Registration::Full;
        }
        subscribers.insert(addr, now);
        Registration::New
    }

    /// Records a heartbeat. Returns `false` if `addr` is not subscribed.
    pub fn refresh(&self, addr: SocketAddr, now: Instant) -> bool {
        match self.lock().get_mut(&addr) {
            Some(last_ping) => {
                *last_ping = now;
                true
            }
            None => false,
        }
    }

    /// Removes `addr`. Returns `true` if it was present.
    pub fn remove(&self, addr: SocketAddr) -> bool {
        self.lock().remove(&addr).is_some()
    }

    pub fn contains(&self, addr: SocketAddr) -> bool {
        self.lock().contains_key(&addr)
    }

    /// Addresses of all active subscribers at this instant.
    pub fn snapshot(&self) -> Vec<SocketAddr> {
        self.lock().keys().copied().collect()
    }

    /// Removes every subscriber silent for longer than `threshold` and
    /// returns their addresses.
    pub fn evict_expired(&self, now: Instant, threshold: Duration) -> Vec<SocketAddr> {
        let mut subscribers = self.lock();
        let expired: Vec<SocketAddr> = subscribers
            .iter()
            .filter(|(_, last_ping)| now.saturating_duration_since(**last_ping) > threshold)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in &expired {
            subscribers.remove(addr);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn tail_registers_then_refreshes() {
        let registry = SubscriberRegistry::new(8);
        let now = Instant::now();

        assert_eq!(registry.register(addr(1), now), Registration::New);
        assert_eq!(registry.register(addr(1), now), Registration::Refreshed);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn ping_from_unknown_address_is_ignored() {
        let registry = SubscriberRegistry::new(8);
        assert!(!registry.refresh(addr(1), Instant::now()));
        assert!(registry.is_empty());
    }

    #[test]
    fn capacity_rejects_new_but_refreshes_existing() {
        let registry = SubscriberRegistry::new(1);
        let now = Instant::now();

        assert_eq!(registry.register(addr(1), now), Registration::New);
        assert_eq!(registry.register(addr(2), now), Registration::Full);
        assert_eq!(registry.register(addr(1), now), Registration::Refreshed);
        assert!(!registry.contains(addr(2)));
    }

    #[test]
    fn sweep_evicts_only_silent_subscribers() {
        let registry = SubscriberRegistry::new(8);
        let threshold = Duration::from_secs(1) * 10;
        let start = Instant::now();

        registry.register(addr(1), start);
        registry.register(addr(2), start);
        registry.refresh(addr(2), start + Duration::from_secs(9));

        assert!(registry
            .evict_expired(start + Duration::from_secs(10), threshold)
            .is_empty());

        let evicted = registry.evict_expired(start + Duration::from_millis(10_001), threshold);
        assert_eq!(evicted, vec![addr(1)]);
        assert_eq!(registry.snapshot(), vec![addr(2)]);
    }

    #[test]
    fn remove_reports_presence() {
        let registry = SubscriberRegistry::new(8);
        registry.register(addr(1), Instant::now());
        assert!(registry.remove(addr(1)));
        assert!(!registry.remove(addr(1)));
    }
}
