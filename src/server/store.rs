//! Sharded in-memory key-value storage with per-entry expiration.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::utils::{fnv1a_32, ShardKvError};

use parking_lot::Mutex;

/// A stored value together with its expiration deadline.
#[derive(Debug, Clone)]
struct Entry {
    /// The value bytes.
    value: String,

    /// Entry is treated as absent at or after this point in time.
    expires_at: Instant,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Partitioned mapping from key to entry, one independent lock per shard.
///
/// A key's shard is a pure function of its bytes, so no key ever moves
/// shards while the process runs. Operations on different shards proceed
/// fully in parallel; operations on the same shard serialize. Lookups treat
/// expired entries as absent without removing them (lazy expiration, no
/// background sweep).
pub struct ShardStore {
    /// Independently locked shard maps; count fixed at construction.
    shards: Vec<Mutex<HashMap<String, Entry>>>,
}

impl ShardStore {
    /// Creates a new store with a fixed number of shards.
    pub fn new(shard_count: usize) -> Result<Self, ShardKvError> {
        if shard_count == 0 {
            return logged_err!("shard count must be non-zero");
        }

        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shards.push(Mutex::new(HashMap::new()));
        }
        Ok(ShardStore { shards })
    }

    /// Number of shards fixed at construction.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Index of the shard owning the given key.
    #[inline]
    pub fn shard_index(&self, key: &str) -> usize {
        fnv1a_32(key.as_bytes()) as usize % self.shards.len()
    }

    /// Looks up a live value for the key. Absent or expired entries yield
    /// `None`; expiry detection does not remove the entry.
    pub fn get(&self, key: &str) -> Option<String> {
        let shard = self.shards[self.shard_index(key)].lock();
        match shard.get(key) {
            Some(entry) if !entry.expired(Instant::now()) => {
                Some(entry.value.clone())
            }
            _ => None,
        }
    }

    /// Stores a value with the given time-to-live, overwriting any existing
    /// entry regardless of its expiry state.
    pub fn put(&self, key: String, value: String, ttl: Duration) {
        let idx = self.shard_index(&key);
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.shards[idx].lock().insert(key, entry);
    }

    /// Total number of entries held, including expired ones that have not
    /// been overwritten.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grabs a shard's lock directly, for tests exercising lock isolation.
    #[cfg(test)]
    fn shard_guard(
        &self,
        idx: usize,
    ) -> parking_lot::MutexGuard<'_, HashMap<String, Entry>> {
        self.shards[idx].lock()
    }
}

#[cfg(test)]
mod store_tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    const LONG_TTL: Duration = Duration::from_secs(600);

    #[test]
    fn zero_shards_rejected() {
        assert!(ShardStore::new(0).is_err());
    }

    #[test]
    fn get_absent() -> Result<(), ShardKvError> {
        let store = ShardStore::new(4)?;
        assert_eq!(store.get("nothing-here"), None);
        Ok(())
    }

    #[test]
    fn put_then_get() -> Result<(), ShardKvError> {
        let store = ShardStore::new(4)?;
        store.put("140".into(), "xxxx".into(), LONG_TTL);
        assert_eq!(store.get("140"), Some("xxxx".into()));
        Ok(())
    }

    #[test]
    fn put_overwrites() -> Result<(), ShardKvError> {
        let store = ShardStore::new(4)?;
        store.put("140".into(), "old".into(), LONG_TTL);
        store.put("140".into(), "new".into(), LONG_TTL);
        assert_eq!(store.get("140"), Some("new".into()));
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn shard_index_stable() -> Result<(), ShardKvError> {
        let store = ShardStore::new(10)?;
        for k in 0..1000u64 {
            let key = k.to_string();
            let idx = store.shard_index(&key);
            assert!(idx < store.shard_count());
            for _ in 0..10 {
                assert_eq!(store.shard_index(&key), idx);
            }
        }
        Ok(())
    }

    #[test]
    fn keys_spread_across_shards() -> Result<(), ShardKvError> {
        let store = ShardStore::new(8)?;
        let mut hit = vec![false; store.shard_count()];
        for k in 0..1000u64 {
            hit[store.shard_index(&k.to_string())] = true;
        }
        assert!(hit.iter().all(|&h| h));
        Ok(())
    }

    #[test]
    fn expiry_lazy_not_evicting() -> Result<(), ShardKvError> {
        let store = ShardStore::new(4)?;
        store.put(
            "ephemeral".into(),
            "gone-soon".into(),
            Duration::from_millis(50),
        );
        assert_eq!(store.get("ephemeral"), Some("gone-soon".into()));
        thread::sleep(Duration::from_millis(80));
        assert_eq!(store.get("ephemeral"), None);
        // the expired entry is still held, just invisible
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn put_resets_expiry() -> Result<(), ShardKvError> {
        let store = ShardStore::new(4)?;
        store.put("k".into(), "v1".into(), Duration::from_millis(40));
        thread::sleep(Duration::from_millis(60));
        assert_eq!(store.get("k"), None);
        store.put("k".into(), "v2".into(), Duration::from_millis(200));
        assert_eq!(store.get("k"), Some("v2".into()));
        Ok(())
    }

    #[test]
    fn same_shard_puts_linearized() -> Result<(), ShardKvError> {
        let store = ShardStore::new(4)?;
        thread::scope(|s| {
            for t in 0..8usize {
                let store = &store;
                s.spawn(move || {
                    for i in 0..100 {
                        store.put(
                            "contended".into(),
                            format!("{}-{}", t, i),
                            LONG_TTL,
                        );
                    }
                });
            }
        });
        // no lost update: exactly one entry left, holding some thread's
        // final value
        assert_eq!(store.len(), 1);
        let value = store.get("contended").ok_or_else(|| {
            ShardKvError::msg("contended key missing after writes")
        })?;
        assert!(value.ends_with("-99"));
        Ok(())
    }

    #[test]
    fn different_shard_puts_unblocked() -> Result<(), ShardKvError> {
        let store = ShardStore::new(4)?;

        // find two keys living on different shards
        let key_a = "0".to_string();
        let key_b = (1..100u64)
            .map(|k| k.to_string())
            .find(|k| store.shard_index(k) != store.shard_index(&key_a))
            .ok_or_else(|| ShardKvError::msg("no second shard hit"))?;

        // hold key_a's shard lock; a put to key_b's shard must not block
        let guard = store.shard_guard(store.shard_index(&key_a));
        let (tx, rx) = mpsc::channel();
        thread::scope(|s| {
            let store = &store;
            let key_b2 = key_b.clone();
            s.spawn(move || {
                store.put(key_b2, "parallel".into(), LONG_TTL);
                tx.send(()).unwrap();
            });
            rx.recv_timeout(Duration::from_secs(1)).unwrap();
        });
        drop(guard);

        assert_eq!(store.get(&key_b), Some("parallel".into()));
        Ok(())
    }
}
