//! Cache core: TTL expiry, entry/byte quotas with LRU eviction, and
//! pluggable storage backends.
//!
//! All operations are best-effort with respect to the caller: a failed
//! prune or a corrupted artifact never propagates as an error to `get`/`set`
//! callers, matching the rest of this crate's error-handling posture where
//! cache failures degrade gracefully instead of failing a tool call.

pub mod encrypted_store;
pub mod fs_store;
pub mod memory_store;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A structured value as stored in the cache, already codec-encoded by the
/// caller (see [`crate::codec`]).
pub type StoredBytes = Vec<u8>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: StoredBytes,
    pub created_at_ms: i64,
    pub expires_at_ms: Option<i64>,
}

impl CacheEntry {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|exp| exp < now_ms)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    pub ttl_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QuotaLimits {
    pub max_entries: Option<usize>,
    pub max_bytes: Option<u64>,
}

/// Storage backend contract. Implementations may be in-memory, filesystem,
/// or a wrapper (e.g. encryption) around another store.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str, now_ms: i64) -> Option<StoredBytes>;
    fn set(&self, key: &str, value: StoredBytes, now_ms: i64, opts: SetOptions);
    fn delete(&self, key: &str);
    fn clear(&self);
    /// Removes expired entries; returns the number removed.
    fn prune_expired(&self, now_ms: i64) -> usize;
    /// Evicts by ascending `last_access_ms` until quotas are satisfied;
    /// returns the number of entries evicted.
    fn prune(&self, limits: QuotaLimits, now_ms: i64) -> usize;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct ManagerInner {
    limits: QuotaLimits,
}

/// Thin orchestration layer over a [`CacheStore`]: applies TTL expiry and
/// entry/byte quota pruning after every `set`.
pub struct CacheManager<S: CacheStore> {
    store: S,
    inner: Mutex<ManagerInner>,
}

impl<S: CacheStore> CacheManager<S> {
    pub fn new(store: S, limits: QuotaLimits) -> Self {
        Self {
            store,
            inner: Mutex::new(ManagerInner { limits }),
        }
    }

    pub fn get(&self, key: &str, now_ms: i64) -> Option<StoredBytes> {
        self.store.get(key, now_ms)
    }

    pub fn set(&self, key: &str, value: StoredBytes, now_ms: i64, opts: SetOptions) {
        self.store.set(key, value, now_ms, opts);
        let limits = self.inner.lock().limits;
        if limits.max_entries.is_some() || limits.max_bytes.is_some() {
            self.store.prune_expired(now_ms);
            self.store.prune(limits, now_ms);
        }
    }

    pub fn delete(&self, key: &str) {
        self.store.delete(key);
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn prune_expired(&self, now_ms: i64) -> usize {
        self.store.prune_expired(now_ms)
    }

    pub fn prune(&self, limits: QuotaLimits, now_ms: i64) -> usize {
        self.store.prune(limits, now_ms)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }
}

/// Shared LRU bookkeeping used by both the memory and filesystem stores to
/// decide eviction order: expired entries first, then ascending
/// `last_access_ms`, with a stable key tie-break.
pub(crate) fn select_eviction_victims<'a>(
    metas: impl IntoIterator<Item = (&'a str, i64, u64)>,
    limits: QuotaLimits,
    current_entries: usize,
    current_bytes: u64,
) -> Vec<String> {
    let mut entries: Vec<(String, i64, u64)> = metas
        .into_iter()
        .map(|(k, last_access, size)| (k.to_string(), last_access, size))
        .collect();
    entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let mut victims = Vec::new();
    let mut entry_count = current_entries;
    let mut byte_count = current_bytes;
    let max_entries = limits.max_entries.unwrap_or(usize::MAX);
    let max_bytes = limits.max_bytes.unwrap_or(u64::MAX);

    for (key, _, size) in entries {
        if entry_count <= max_entries && byte_count <= max_bytes {
            break;
        }
        victims.push(key);
        entry_count = entry_count.saturating_sub(1);
        byte_count = byte_count.saturating_sub(size);
    }
    victims
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AccessMeta {
    pub last_access_ms: i64,
    pub size_bytes: u64,
}

pub(crate) type MetaMap = HashMap<String, AccessMeta>;
