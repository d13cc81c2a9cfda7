//! Filesystem-backed [`CacheStore`]: one `<hash>.json` per entry, written
//! via temp-file + atomic rename. Corrupted or orphaned files
//! encountered on read are cleaned up best-effort; they never turn into a
//! user-visible error.

use super::{CacheEntry, CacheStore, QuotaLimits, SetOptions, StoredBytes, select_eviction_victims};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct OnDiskEntry {
    key: String,
    entry: CacheEntry,
    last_access_ms: i64,
}

use serde::{Deserialize, Serialize};

pub struct FsStore {
    dir: PathBuf,
    // Guards the read-modify-write cycle for last_access_ms bookkeeping;
    // separate entries can still be written concurrently by other processes.
    lock: Mutex<()>,
}

impl FsStore {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    fn key_hash(key: &str) -> String {
        let digest = Sha256::digest(key.as_bytes());
        digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::key_hash(key)))
    }

    fn temp_path(&self, hash: &str) -> PathBuf {
        let nonce: u32 = rand::random();
        self.dir
            .join(format!("{hash}.tmp-{}-{nonce}", chrono::Utc::now().timestamp_millis()))
    }

    fn write_atomic(&self, path: &Path, hash: &str, bytes: &[u8]) -> std::io::Result<()> {
        let tmp = self.temp_path(hash);
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)
    }

    fn read_entry(&self, path: &Path) -> Option<OnDiskEntry> {
        let bytes = fs::read(path).ok()?;
        match serde_json::from_slice::<OnDiskEntry>(&bytes) {
            Ok(entry) => Some(entry),
            Err(_) => {
                // Corrupted entry: best-effort cleanup, treat as miss.
                let _ = fs::remove_file(path);
                None
            }
        }
    }

    fn all_entries(&self) -> HashMap<String, (PathBuf, OnDiskEntry)> {
        let mut out = HashMap::new();
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return out;
        };
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(on_disk) = self.read_entry(&path) {
                out.insert(on_disk.key.clone(), (path, on_disk));
            }
        }
        out
    }

    /// Removes temp files that are older than `max_age_ms`; guards against
    /// leftover artifacts from a crash mid-write.
    pub fn sweep_stale_temp_files(&self, now_ms: i64, max_age_ms: i64) {
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in read_dir.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.contains(".tmp-") {
                continue;
            }
            let Some(ts_str) = name.split(".tmp-").nth(1).and_then(|s| s.split('-').next()) else {
                continue;
            };
            if let Ok(ts) = ts_str.parse::<i64>() {
                if now_ms - ts > max_age_ms {
                    let _ = fs::remove_file(&path);
                }
            }
        }
    }
}

impl CacheStore for FsStore {
    fn get(&self, key: &str, now_ms: i64) -> Option<StoredBytes> {
        let path = self.entry_path(key);
        let _guard = self.lock.lock();
        let on_disk = self.read_entry(&path)?;
        if on_disk.key != key {
            return None; // hash collision guard: treat as miss, never mix values
        }
        if on_disk.entry.is_expired(now_ms) {
            let _ = fs::remove_file(&path);
            return None;
        }
        let value = on_disk.entry.value.clone();
        let updated = OnDiskEntry {
            last_access_ms: now_ms,
            ..on_disk
        };
        if let Ok(bytes) = serde_json::to_vec(&updated) {
            let hash = Self::key_hash(key);
            let _ = self.write_atomic(&path, &hash, &bytes);
        }
        Some(value)
    }

    fn set(&self, key: &str, value: StoredBytes, now_ms: i64, opts: SetOptions) {
        let path = self.entry_path(key);
        let hash = Self::key_hash(key);
        let on_disk = OnDiskEntry {
            key: key.to_string(),
            entry: CacheEntry {
                value,
                created_at_ms: now_ms,
                expires_at_ms: opts.ttl_ms.map(|ttl| now_ms + ttl),
            },
            last_access_ms: now_ms,
        };
        if let Ok(bytes) = serde_json::to_vec(&on_disk) {
            let _guard = self.lock.lock();
            let _ = self.write_atomic(&path, &hash, &bytes);
        }
    }

    fn delete(&self, key: &str) {
        let _ = fs::remove_file(self.entry_path(key));
    }

    fn clear(&self) {
        if let Ok(read_dir) = fs::read_dir(&self.dir) {
            for entry in read_dir.flatten() {
                let _ = fs::remove_file(entry.path());
            }
        }
    }

    fn prune_expired(&self, now_ms: i64) -> usize {
        let mut removed = 0;
        for (_, (path, on_disk)) in self.all_entries() {
            if on_disk.entry.is_expired(now_ms) {
                let _ = fs::remove_file(path);
                removed += 1;
            }
        }
        removed
    }

    fn prune(&self, limits: QuotaLimits, _now_ms: i64) -> usize {
        let all = self.all_entries();
        let current_entries = all.len();
        let current_bytes: u64 = all.values().map(|(_, e)| e.entry.value.len() as u64).sum();
        let metas: Vec<(String, i64, u64)> = all
            .iter()
            .map(|(k, (_, e))| (k.clone(), e.last_access_ms, e.entry.value.len() as u64))
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
        victims.len()
    }

    fn len(&self) -> usize {
        self.all_entries().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();
        store.set("k", vec![1, 2, 3], 0, SetOptions::default());
        assert_eq!(store.get("k", 1), Some(vec![1, 2, 3]));
    }

    #[test]
    fn corrupted_entry_is_treated_as_miss_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();
        let path = store.entry_path("k");
        fs::write(&path, b"not json").unwrap();
        assert_eq!(store.get("k", 0), None);
        assert!(!path.exists());
    }

    #[test]
    fn expired_entry_is_removed_on_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();
        store.set("k", vec![1], 0, SetOptions { ttl_ms: Some(10) });
        assert_eq!(store.get("k", 11), None);
        assert!(!store.entry_path("k").exists());
    }
}
