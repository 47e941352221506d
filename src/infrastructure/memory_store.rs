//! In-process counter store backed by a concurrent map.
//!
//! The default backend for single-instance deployments and tests. Each key
//! holds the Unix timestamps of requests inside the current window; pruning
//! happens inline on every check.
//!
//! Atomicity per key comes from the map's entry guard: the guard holds the
//! shard lock for the duration of the prune-check-record sequence, so two
//! concurrent checks at the limit boundary cannot both be admitted.
//!
//! Keys whose whole window has aged out are reclaimed by a full sweep that
//! runs every 1024 checks, mirroring the expiry the Redis backend gets from
//! `EXPIRE`. [`MemoryCounterStore::sweep`] is public for callers that want
//! to reclaim on their own schedule.

use crate::application::ports::{CounterStore, StoreError, WindowCheck};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Checks between amortized sweeps of expired keys.
const SWEEP_EVERY_OPS: u64 = 1_024;

#[derive(Debug)]
struct WindowLog {
    /// Window length of the rule writing this key; a key expires once its
    /// newest entry is older than this.
    window_seconds: u64,
    entries: Vec<u64>,
}

/// In-memory sliding-window counter store.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    windows: DashMap<String, WindowLog>,
    checks_since_sweep: AtomicU64,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys. Keys whose window has fully aged out remain
    /// counted until the next sweep.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop all window logs.
    pub fn clear(&self) {
        self.windows.clear();
    }

    /// Remove every key whose newest entry has aged out of its window.
    /// Returns the number of keys reclaimed.
    pub fn sweep(&self, now: u64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, log| {
            log.entries
                .last()
                .is_some_and(|&newest| newest + log.window_seconds > now)
        });
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            tracing::debug!(removed, "swept expired rate limit keys");
        }
        removed
    }

    fn maybe_sweep(&self, now: u64) {
        if self.checks_since_sweep.fetch_add(1, Ordering::Relaxed) + 1 >= SWEEP_EVERY_OPS {
            self.checks_since_sweep.store(0, Ordering::Relaxed);
            self.sweep(now);
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn check_and_record(
        &self,
        key: &str,
        window_seconds: u64,
        limit: u32,
        now: u64,
    ) -> Result<WindowCheck, StoreError> {
        let cutoff = now.saturating_sub(window_seconds);
        let check = {
            let mut log = self.windows.entry(key.to_string()).or_insert_with(|| WindowLog {
                window_seconds,
                entries: Vec::new(),
            });
            log.window_seconds = window_seconds;
            log.entries.retain(|&at| at > cutoff);

            let count = log.entries.len() as u64;
            let oldest = log.entries.first().copied();
            if count >= u64::from(limit) {
                WindowCheck {
                    allowed: false,
                    count,
                    oldest,
                }
            } else {
                log.entries.push(now);
                WindowCheck {
                    allowed: true,
                    count,
                    oldest: oldest.or(Some(now)),
                }
            }
        };
        // Guard dropped above; sweeping takes the same shard locks.
        self.maybe_sweep(now);
        Ok(check)
    }

    async fn entries(
        &self,
        key: &str,
        window_seconds: u64,
        now: u64,
    ) -> Result<Vec<u64>, StoreError> {
        let cutoff = now.saturating_sub(window_seconds);
        Ok(self
            .windows
            .get(key)
            .map(|log| {
                log.entries
                    .iter()
                    .copied()
                    .filter(|&at| at > cutoff)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.windows.remove(key);
        Ok(())
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .windows
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_records_until_limit() {
        let store = MemoryCounterStore::new();

        for expected_count in 0..3 {
            let check = store.check_and_record("k", 60, 3, 100).await.unwrap();
            assert!(check.allowed);
            assert_eq!(check.count, expected_count);
        }

        let rejected = store.check_and_record("k", 60, 3, 100).await.unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.count, 3);
        assert_eq!(rejected.oldest, Some(100));
    }

    #[tokio::test]
    async fn test_prunes_expired_entries() {
        let store = MemoryCounterStore::new();
        store.check_and_record("k", 60, 1, 100).await.unwrap();

        // At t=160 the entry from t=100 is exactly at the cutoff and drops.
        let check = store.check_and_record("k", 60, 1, 160).await.unwrap();
        assert!(check.allowed);
        assert_eq!(check.count, 0);

        let entries = store.entries("k", 60, 160).await.unwrap();
        assert_eq!(entries, vec![160]);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryCounterStore::new();
        store.check_and_record("a", 60, 1, 100).await.unwrap();

        let check = store.check_and_record("b", 60, 1, 100).await.unwrap();
        assert!(check.allowed);
    }

    #[tokio::test]
    async fn test_remove_and_scan() {
        let store = MemoryCounterStore::new();
        store
            .check_and_record("rate_limit:u1:hour", 3600, 5, 100)
            .await
            .unwrap();
        store
            .check_and_record("rate_limit:u1:minute", 60, 5, 100)
            .await
            .unwrap();
        store
            .check_and_record("rate_limit:u2:hour", 3600, 5, 100)
            .await
            .unwrap();

        let keys = store.scan_keys("rate_limit:u1:").await.unwrap();
        assert_eq!(
            keys,
            vec!["rate_limit:u1:hour", "rate_limit:u1:minute"]
        );

        store.remove("rate_limit:u1:hour").await.unwrap();
        let keys = store.scan_keys("rate_limit:u1:").await.unwrap();
        assert_eq!(keys, vec!["rate_limit:u1:minute"]);
    }

    #[tokio::test]
    async fn test_sweep_reclaims_expired_keys() {
        let store = MemoryCounterStore::new();
        for i in 0..100 {
            store
                .check_and_record(&format!("key-{i}"), 1, 5, 100)
                .await
                .unwrap();
        }
        assert_eq!(store.len(), 100);

        // A full day later every one-second window has drained.
        let removed = store.sweep(86_500);
        assert_eq!(removed, 100);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_keys() {
        let store = MemoryCounterStore::new();
        store.check_and_record("stale", 1, 5, 100).await.unwrap();
        store.check_and_record("live", 3_600, 5, 100).await.unwrap();

        assert_eq!(store.sweep(200), 1);
        assert_eq!(store.len(), 1);
        let entries = store.entries("live", 3_600, 200).await.unwrap();
        assert_eq!(entries, vec![100]);
    }

    #[tokio::test]
    async fn test_checks_eventually_reclaim_stale_keys() {
        let store = MemoryCounterStore::new();
        for i in 0..10 {
            store
                .check_and_record(&format!("stale-{i}"), 1, 5, 100)
                .await
                .unwrap();
        }
        assert_eq!(store.len(), 10);

        // Enough later checks on an unrelated key cross the sweep interval
        // and reclaim the drained windows without anyone touching them.
        for _ in 0..SWEEP_EVERY_OPS {
            store
                .check_and_record("fresh", 3_600, u32::MAX, 86_500)
                .await
                .unwrap();
        }
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_boundary_admits_exactly_limit() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.check_and_record("k", 60, 5, 100).await.unwrap()
            }));
        }

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap().allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }
}
