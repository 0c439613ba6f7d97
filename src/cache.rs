use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

/// Per-run read-through memo shared across source tasks.
///
/// Each key owns its own slot lock, so concurrent callers asking for the same
/// key wait for the first computation instead of repeating it, while callers
/// on different keys proceed independently. Failed computations leave the
/// slot empty.
#[derive(Debug)]
pub struct MemoCache<K, V> {
    slots: Mutex<HashMap<K, Arc<Mutex<Option<V>>>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl<K, V> Default for MemoCache<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: usize,
    pub misses: usize,
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_try_insert_with<E, F>(&self, key: &K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = guard.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = compute()?;
        *guard = Some(value.clone());
        Ok(value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.get(key).map(Arc::clone)?
        };
        let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    pub fn stats(&self) -> CacheStats {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = slots
            .values()
            .filter(|slot| {
                slot.try_lock()
                    .map(|guard| guard.is_some())
                    .unwrap_or(true)
            })
            .count();
        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn computes_once_per_key() {
        let cache = MemoCache::<String, usize>::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value: Result<usize, ()> = cache.get_or_try_insert_with(&"a".to_string(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            });
            assert_eq!(value, Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn failed_computation_is_not_cached() {
        let cache = MemoCache::<u32, u32>::new();
        let first: Result<u32, &str> = cache.get_or_try_insert_with(&1, || Err("boom"));
        assert_eq!(first, Err("boom"));
        assert_eq!(cache.get(&1), None);
        let second: Result<u32, &str> = cache.get_or_try_insert_with(&1, || Ok(5));
        assert_eq!(second, Ok(5));
    }

    #[test]
    fn concurrent_callers_converge() {
        let cache = MemoCache::<u32, u32>::new();
        let calls = AtomicUsize::new(0);
        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let value: Result<u32, ()> = cache.get_or_try_insert_with(&42, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(10));
                        Ok(99)
                    });
                    assert_eq!(value, Ok(99));
                });
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
