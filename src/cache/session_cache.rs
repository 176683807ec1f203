//-
// Copyright (c) 2026, the Mailcache authors
//
// This file is part of Mailcache.
//
// Mailcache is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailcache is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailcache. If not, see <http://www.gnu.org/licenses/>.

//! Caches scoped to one user session.
//!
//! A `SessionMailCache` holds arbitrary values for the lifetime of a session.
//! Each key has its own read/write lock so that readers of one key never wait
//! on writers of another. A full `clear` raises a barrier: operations which
//! start while the clear is in progress block until it is done, so nobody
//! observes a half-emptied cache.

use std::collections::HashMap;
use std::hash::Hash;
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};

use log::debug;

type Slot<V> = Arc<RwLock<Option<V>>>;

struct Table<K, V> {
    slots: HashMap<K, Slot<V>>,
    clearing: bool,
}

pub struct SessionMailCache<K, V> {
    table: Mutex<Table<K, V>>,
    cleared: Condvar,
}

impl<K, V> Default for SessionMailCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        SessionMailCache {
            table: Mutex::new(Table {
                slots: HashMap::new(),
                clearing: false,
            }),
            cleared: Condvar::new(),
        }
    }
}

impl<K, V> SessionMailCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the table, waiting out any clear in progress.
    fn table(&self) -> MutexGuard<'_, Table<K, V>> {
        let mut table = self.table.lock().unwrap();
        while table.clearing {
            table = self.cleared.wait(table).unwrap();
        }
        table
    }

    fn existing_slot(&self, key: &K) -> Option<Slot<V>> {
        self.table().slots.get(key).cloned()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let slot = self.existing_slot(key)?;
        let value = slot.read().unwrap().clone();
        value
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.existing_slot(key)
            .map_or(false, |slot| slot.read().unwrap().is_some())
    }

    /// Store `value` under `key`, returning what was there before.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let slot = Arc::clone(self.table().slots.entry(key).or_default());
        let previous = slot.write().unwrap().replace(value);
        previous
    }

    /// Store `value` under `key` unless something is already there.
    ///
    /// Returns the value which ends up cached.
    pub fn put_if_absent(&self, key: K, value: V) -> V {
        let slot = Arc::clone(self.table().slots.entry(key).or_default());
        let mut current = slot.write().unwrap();
        current.get_or_insert(value).clone()
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let slot = self.existing_slot(key)?;
        let removed = slot.write().unwrap().take();

        let mut table = self.table();
        // Only the table and `slot` hold it, so nobody can be about to write
        // into it.
        if 2 == Arc::strong_count(&slot) && slot.read().unwrap().is_none() {
            table.slots.remove(key);
        }
        removed
    }

    /// The number of keys with a lock in the table.
    pub fn len(&self) -> usize {
        self.table().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        0 == self.len()
    }

    /// Remove everything.
    ///
    /// Operations on this cache which start before this returns wait for it.
    pub fn clear(&self) {
        let slots = {
            let mut table = self.table();
            table.clearing = true;
            mem::take(&mut table.slots)
        };

        // Wait for in-flight readers and writers of each key so none of them
        // completes against a value the clear already dropped.
        for slot in slots.values() {
            slot.write().unwrap().take();
        }
        let n = slots.len();
        drop(slots);

        self.table.lock().unwrap().clearing = false;
        self.cleared.notify_all();
        debug!("Session cache cleared ({} keys)", n);
    }
}

/// All live session caches, by session id.
pub struct SessionCacheRegistry<K, V> {
    caches: Mutex<HashMap<String, Arc<SessionMailCache<K, V>>>>,
}

impl<K, V> Default for SessionCacheRegistry<K, V> {
    fn default() -> Self {
        SessionCacheRegistry {
            caches: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SessionCacheRegistry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cache of `session_id`, creating it if necessary.
    pub fn session(&self, session_id: &str) -> Arc<SessionMailCache<K, V>> {
        let mut caches = self.caches.lock().unwrap();
        if let Some(cache) = caches.get(session_id) {
            return Arc::clone(cache);
        }

        let cache = Arc::new(SessionMailCache::new());
        caches.insert(session_id.to_owned(), Arc::clone(&cache));
        cache
    }

    pub fn existing_session(
        &self,
        session_id: &str,
    ) -> Option<Arc<SessionMailCache<K, V>>> {
        self.caches.lock().unwrap().get(session_id).cloned()
    }

    /// Drop the cache of `session_id`, clearing it first in case someone
    /// still holds a reference.
    ///
    /// Returns whether the session had a cache.
    pub fn remove(&self, session_id: &str) -> bool {
        let cache = self.caches.lock().unwrap().remove(session_id);
        match cache {
            Some(cache) => {
                cache.clear();
                true
            },
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.caches.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        0 == self.len()
    }

    pub fn clear(&self) {
        let caches = mem::take(&mut *self.caches.lock().unwrap());
        for cache in caches.values() {
            cache.clear();
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn basic_operations() {
        let cache = SessionMailCache::<String, u32>::new();
        assert_eq!(None, cache.get(&"a".to_owned()));
        assert!(!cache.contains_key(&"a".to_owned()));

        assert_eq!(None, cache.put("a".to_owned(), 1));
        assert_eq!(Some(1), cache.put("a".to_owned(), 2));
        assert_eq!(2, cache.put_if_absent("a".to_owned(), 3));
        assert_eq!(4, cache.put_if_absent("b".to_owned(), 4));
        assert_eq!(Some(2), cache.get(&"a".to_owned()));
        assert_eq!(2, cache.len());

        assert_eq!(Some(2), cache.remove(&"a".to_owned()));
        assert_eq!(None, cache.remove(&"a".to_owned()));
        assert_eq!(1, cache.len());

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(None, cache.get(&"b".to_owned()));
    }

    #[test]
    fn operations_wait_for_clear() {
        let cache = Arc::new(SessionMailCache::<u32, u32>::new());
        cache.put(1, 1);

        // Hold the slot's write lock so the clear stalls half way through.
        let slot = cache.existing_slot(&1).unwrap();
        let held = slot.write().unwrap();

        let finished_put = Arc::new(AtomicBool::new(false));
        crossbeam::scope(|s| {
            s.spawn(|_| cache.clear());
            while !cache.table.lock().unwrap().clearing {
                thread::yield_now();
            }

            s.spawn(|_| {
                cache.put(2, 2);
                finished_put.store(true, Ordering::SeqCst);
            });

            thread::sleep(Duration::from_millis(50));
            assert!(!finished_put.load(Ordering::SeqCst));
            drop(held);
        })
        .unwrap();

        assert!(finished_put.load(Ordering::SeqCst));
        assert_eq!(None, cache.get(&1));
        assert_eq!(Some(2), cache.get(&2));
    }

    #[test]
    fn concurrent_puts_and_clears() {
        use rayon::prelude::*;

        let cache = SessionMailCache::<u32, u32>::new();
        (0..1000u32).into_par_iter().for_each(|i| {
            if 0 == i % 100 {
                cache.clear();
            } else {
                cache.put(i % 17, i);
                if let Some(v) = cache.get(&(i % 17)) {
                    assert_eq!(i % 17, v % 17);
                }
            }
        });
        assert!(cache.len() <= 17);
    }

    #[test]
    fn registry_lifecycle() {
        let registry = SessionCacheRegistry::<String, u32>::new();
        let a = registry.session("sess-a");
        a.put("x".to_owned(), 1);
        assert!(Arc::ptr_eq(&a, &registry.session("sess-a")));
        assert!(registry.existing_session("sess-b").is_none());
        registry.session("sess-b");
        assert_eq!(2, registry.len());

        assert!(registry.remove("sess-a"));
        assert!(!registry.remove("sess-a"));
        // Anyone still holding the cache sees it emptied
        assert_eq!(None, a.get(&"x".to_owned()));

        registry.clear();
        assert!(registry.is_empty());
    }
}
