//! Per-account instance cache.
//!
//! The map lock is held only while a slot is looked up, inserted or removed.
//! Construction runs under the slot's own lock, so callers racing for the
//! same key wait for a single construction while other keys proceed.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Slot<V> = Arc<Mutex<Option<V>>>;

pub struct InstanceCache<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> InstanceCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached value, if construction for `key` has completed.
    pub fn get(&self, key: &K) -> Option<V> {
        let slot = lock(&self.slots).get(key).cloned()?;
        let value = lock(&slot).clone();
        value
    }

    /// Returns the cached value for `key` or builds it with `create`.
    ///
    /// A failed `create` leaves nothing cached, not even an empty slot; the
    /// next call tries again.
    pub fn get_or_try_insert_with<E, F>(&self, key: &K, create: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        loop {
            let slot = lock(&self.slots).entry(key.clone()).or_default().clone();

            let mut value = lock(&slot);
            if let Some(existing) = value.as_ref() {
                return Ok(existing.clone());
            }
            // A failed construction we waited on dropped this slot from the map.
            if !self.holds(key, &slot) {
                continue;
            }

            return match create() {
                Ok(created) => {
                    *value = Some(created.clone());
                    Ok(created)
                }
                Err(e) => {
                    drop(value);
                    let mut slots = lock(&self.slots);
                    if slots.get(key).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                        slots.remove(key);
                    }
                    Err(e)
                }
            };
        }
    }

    fn holds(&self, key: &K, slot: &Slot<V>) -> bool {
        lock(&self.slots)
            .get(key)
            .is_some_and(|s| Arc::ptr_eq(s, slot))
    }

    /// Evicts `key`. Returns whether an entry was present.
    pub fn remove(&self, key: &K) -> bool {
        lock(&self.slots).remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<K> {
        lock(&self.slots).keys().cloned().collect()
    }
}

impl<K, V> Default for InstanceCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

// Every critical section is a single map or slot update, so the data behind a
// poisoned lock is still consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn second_lookup_returns_cached_value() {
        let cache: InstanceCache<String, Arc<u32>> = InstanceCache::new();
        let calls = AtomicUsize::new(0);
        let key = "a".to_string();

        let first = cache
            .get_or_try_insert_with(&key, || -> Result<_, ()> {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(1))
            })
            .unwrap();
        let second = cache
            .get_or_try_insert_with(&key, || -> Result<_, ()> {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(2))
            })
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&key).as_deref(), Some(&1));
    }

    #[test]
    fn failed_construction_is_not_cached() {
        let cache: InstanceCache<&str, u32> = InstanceCache::new();

        let err = cache.get_or_try_insert_with(&"a", || Err("boom"));
        assert_eq!(err, Err("boom"));
        assert_eq!(cache.get(&"a"), None);

        let ok = cache.get_or_try_insert_with(&"a", || Ok::<_, &str>(7));
        assert_eq!(ok, Ok(7));
    }

    #[test]
    fn failed_construction_leaves_no_slot() {
        let cache: InstanceCache<&str, u32> = InstanceCache::new();
        for _ in 0..3 {
            assert!(cache.get_or_try_insert_with(&"x", || Err("bad uri")).is_err());
        }

        assert!(cache.keys().is_empty());
        assert!(!cache.remove(&"x"));
    }

    #[test]
    fn remove_forces_reconstruction() {
        let cache: InstanceCache<&str, u32> = InstanceCache::new();
        cache.get_or_try_insert_with(&"a", || Ok::<_, ()>(1)).unwrap();

        assert!(cache.remove(&"a"));
        assert!(!cache.remove(&"a"));

        let value = cache.get_or_try_insert_with(&"a", || Ok::<_, ()>(2)).unwrap();
        assert_eq!(value, 2);
    }

    #[test]
    fn slow_construction_does_not_block_other_keys() {
        let cache: Arc<InstanceCache<&'static str, u32>> = Arc::new(InstanceCache::new());
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let slow = {
            let cache = cache.clone();
            thread::spawn(move || {
                cache.get_or_try_insert_with(&"slow", || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok::<_, ()>(1)
                })
            })
        };

        started_rx.recv().unwrap();
        let fast = cache.get_or_try_insert_with(&"fast", || Ok::<_, ()>(2));
        assert_eq!(fast, Ok(2));

        release_tx.send(()).unwrap();
        assert_eq!(slow.join().unwrap(), Ok(1));

        let mut keys = cache.keys();
        keys.sort();
        assert_eq!(keys, vec!["fast", "slow"]);
    }
}
