//! Pure in-memory [`CacheStore`] implementation.

use super::{AccessMeta, CacheEntry, CacheStore, MetaMap, QuotaLimits, SetOptions, StoredBytes, select_eviction_victims};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    meta: RwLock<MetaMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str, now_ms: i64) -> Option<StoredBytes> {
        let expired = {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.is_expired(now_ms) => true,
                Some(_) => false,
                None => return None,
            }
        };
        if expired {
            self.delete(key);
            return None;
        }
        let value = self.entries.read().get(key).map(|e| e.value.clone());
        if value.is_some() {
            self.meta.write().insert(
                key.to_string(),
                AccessMeta {
                    last_access_ms: now_ms,
                    size_bytes: value.as_ref().map(|v| v.len() as u64).unwrap_or(0),
                },
            );
        }
        value
    }

    fn set(&self, key: &str, value: StoredBytes, now_ms: i64, opts: SetOptions) {
        let size_bytes = value.len() as u64;
        self.entries.write().insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at_ms: now_ms,
                expires_at_ms: opts.ttl_ms.map(|ttl| now_ms + ttl),
            },
        );
        self.meta.write().insert(
            key.to_string(),
            AccessMeta {
                last_access_ms: now_ms,
                size_bytes,
            },
        );
    }

    fn delete(&self, key: &str) {
        self.entries.write().remove(key);
        self.meta.write().remove(key);
    }

    fn clear(&self) {
        self.entries.write().clear();
        self.meta.write().clear();
    }

    fn prune_expired(&self, now_ms: i64) -> usize {
        let expired_keys: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| e.is_expired(now_ms))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired_keys {
            self.delete(key);
        }
        expired_keys.len()
    }

    fn prune(&self, limits: QuotaLimits, now_ms: i64) -> usize {
        let current_entries = self.entries.read().len();
        let current_bytes: u64 = self.meta.read().values().map(|m| m.size_bytes).sum();
        let metas: Vec<(String, i64, u64)> = self
            .meta
            .read()
            .iter()
            .map(|(k, m)| (k.clone(), m.last_access_ms, m.size_bytes))
            .collect();
        let victims = select_eviction_victims(
            metas.iter().map(|(k, t, s)| (k.as_str(), *t, *s)),
            limits,
            current_entries,
            current_bytes,
        );
        for key in &victims {
            self.delete(key);
        }
        let _ = now_ms;
        victims.len()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_expires_exactly_at_boundary() {
        let store = MemoryStore::new();
        store.set("k", vec![1], 0, SetOptions { ttl_ms: Some(100) });
        assert!(store.get("k", 100).is_some());
        assert!(store.get("k", 101).is_none());
    }

    #[test]
    fn quota_eviction_respects_lru() {
        let store = MemoryStore::new();
        store.set("k1", vec![1], 0, SetOptions::default());
        store.set("k2", vec![1], 1, SetOptions::default());
        store.get("k1", 2); // k1 is now more recently used than k2
        store.set("k3", vec![1], 3, SetOptions::default());
        let limits = QuotaLimits {
            max_entries: Some(2),
            max_bytes: None,
        };
        store.prune(limits, 4);
        assert_eq!(store.len(), 2);
        assert!(store.get("k1", 4).is_some());
        assert!(store.get("k3", 4).is_some());
        assert!(store.get("k2", 4).is_none());
    }
}
