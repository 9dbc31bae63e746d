use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::types::PermissionSet;

/// Number of writes between sweeps of expired entries.
const PRUNE_INTERVAL: u64 = 64;

/// Per-user cache of resolved permission sets.
///
/// Readers take an [`epoch`](PermissionCache::epoch) before resolving and hand it to
/// [`put`](PermissionCache::put); any invalidation in between advances the epoch and
/// the stale result is discarded.
pub trait PermissionCache: Send + Sync {
    fn epoch(&self) -> u64;
    fn get(&self, user_id: &str) -> Option<PermissionSet>;
    fn put(&self, user_id: &str, permissions: PermissionSet, epoch: u64);
    fn invalidate_user(&self, user_id: &str);
    fn invalidate_users(&self, user_ids: &[String]) {
        for user_id in user_ids {
            self.invalidate_user(user_id);
        }
    }
    fn invalidate_all(&self);
}

struct CacheEntry {
    permissions: PermissionSet,
    cached_at: Instant,
}

pub struct TtlPermissionCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    epoch: AtomicU64,
    writes: AtomicU64,
}

impl TtlPermissionCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            epoch: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops expired entries.
    pub fn prune(&self) {
        self.entries
            .retain(|_, entry| !is_cache_entry_expired(entry.cached_at, self.ttl));
    }

    fn bump(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }
}

fn is_cache_entry_expired(cached_at: Instant, ttl: Duration) -> bool {
    cached_at.elapsed() >= ttl
}

impl PermissionCache for TtlPermissionCache {
    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn get(&self, user_id: &str) -> Option<PermissionSet> {
        let entry = self.entries.get(user_id)?;
        if is_cache_entry_expired(entry.cached_at, self.ttl) {
            drop(entry);
            self.entries.remove(user_id);
            tracing::debug!(user_id, "permission cache entry expired");
            return None;
        }
        Some(entry.permissions.clone())
    }

    fn put(&self, user_id: &str, permissions: PermissionSet, epoch: u64) {
        if self.ttl.is_zero() {
            return;
        }
        // Checked again after the insert: an invalidation may land between the two.
        if epoch != self.epoch() {
            tracing::debug!(user_id, "discarding permissions resolved before invalidation");
            return;
        }
        self.entries.insert(
            user_id.to_string(),
            CacheEntry {
                permissions,
                cached_at: Instant::now(),
            },
        );
        if epoch != self.epoch() {
            self.entries.remove(user_id);
        }

        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_INTERVAL == 0 {
            self.prune();
        }
    }

    fn invalidate_user(&self, user_id: &str) {
        self.bump();
        self.entries.remove(user_id);
    }

    fn invalidate_users(&self, user_ids: &[String]) {
        self.bump();
        for user_id in user_ids {
            self.entries.remove(user_id);
        }
    }

    fn invalidate_all(&self) {
        self.bump();
        self.entries.clear();
    }
}

/// Cache that never stores anything.
#[derive(Debug, Default)]
pub struct NoopPermissionCache;

impl PermissionCache for NoopPermissionCache {
    fn epoch(&self) -> u64 {
        0
    }

    fn get(&self, _user_id: &str) -> Option<PermissionSet> {
        None
    }

    fn put(&self, _user_id: &str, _permissions: PermissionSet, _epoch: u64) {}

    fn invalidate_user(&self, _user_id: &str) {}

    fn invalidate_all(&self) {}
}
