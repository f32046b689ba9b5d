//! Module `cache` implement a thread-safe LRU with coalesced misses.
//!
//! Used for the dirent cache (keyed by entry index) and the cluster
//! cache (keyed by cluster index). On a miss the value is computed
//! outside the cache lock while a pending marker makes concurrent
//! readers of the same key wait for the single in-flight computation.
//! Eviction walks entries oldest first and skips values that are still
//! referenced outside the cache.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Condvar, Mutex},
};

use crate::Result;

enum Slot<V> {
    Ready { value: Arc<V>, at: u64 },
    Pending,
}

struct Inner<K, V> {
    max: usize,
    tick: u64,
    map: HashMap<K, Slot<V>>,
}

/// Thread-safe LRU keyed by a small copyable key.
pub struct Lru<K, V> {
    inner: Mutex<Inner<K, V>>,
    fetched: Condvar,
}

impl<K, V> Lru<K, V>
where
    K: Copy + Eq + Hash,
{
    pub fn new(max: usize) -> Lru<K, V> {
        Lru {
            inner: Mutex::new(Inner {
                max,
                tick: 0,
                map: HashMap::new(),
            }),
            fetched: Condvar::new(),
        }
    }

    pub fn max(&self) -> usize {
        self.inner.lock().unwrap().max
    }

    pub fn set_max(&self, max: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.max = max;
        Self::evict(&mut inner);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove `key` from the cache. Outstanding references stay valid.
    pub fn drop_key(&self, key: &K) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(Slot::Ready { .. }) = inner.map.get(key) {
            inner.map.remove(key);
        }
    }

    /// Get `key`, computing it with `fetch` on a miss. Concurrent gets
    /// of the same missing key coalesce into a single `fetch` call.
    pub fn get_or_fetch<F>(&self, key: K, fetch: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<V>,
    {
        let mut inner = self.inner.lock().unwrap();
        loop {
            let hit = match inner.map.get(&key) {
                Some(Slot::Ready { value, .. }) => Some(Some(Arc::clone(value))),
                Some(Slot::Pending) => Some(None),
                None => None,
            };
            match hit {
                Some(Some(value)) => {
                    inner.tick += 1;
                    let tick = inner.tick;
                    if let Some(Slot::Ready { at, .. }) = inner.map.get_mut(&key) {
                        *at = tick;
                    }
                    return Ok(value);
                }
                Some(None) => inner = self.fetched.wait(inner).unwrap(),
                None => break,
            }
        }

        inner.map.insert(key, Slot::Pending);
        std::mem::drop(inner);

        let res = fetch();

        let mut inner = self.inner.lock().unwrap();
        let val = match res {
            Ok(value) => {
                let value = Arc::new(value);
                inner.tick += 1;
                let at = inner.tick;
                inner.map.insert(
                    key,
                    Slot::Ready {
                        value: Arc::clone(&value),
                        at,
                    },
                );
                Self::evict(&mut inner);
                Ok(value)
            }
            Err(err) => {
                inner.map.remove(&key);
                Err(err)
            }
        };
        self.fetched.notify_all();
        val
    }

    // Oldest-first eviction, skipping pending slots and values that are
    // referenced outside the cache.
    fn evict(inner: &mut Inner<K, V>) {
        while inner.map.len() > inner.max {
            let mut victim: Option<(K, u64)> = None;
            for (key, slot) in inner.map.iter() {
                if let Slot::Ready { value, at } = slot {
                    if Arc::strong_count(value) > 1 {
                        continue;
                    }
                    match victim {
                        Some((_, best)) if *at >= best => (),
                        _ => victim = Some((*key, *at)),
                    }
                }
            }
            match victim {
                Some((key, _)) => {
                    inner.map.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
