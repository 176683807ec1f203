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

//! A keyed map whose entries expire.
//!
//! Each entry records when it was created and how long it may live; the map
//! has a default TTL which individual entries may override. Expired entries
//! are invisible to lookups immediately, but are only actually removed (and
//! reported to the timeout listener) by `sweep`, which normally runs
//! periodically on the shared `Scheduler`.
//!
//! All access, including the sweep, goes through one mutex. Closures passed
//! to the `with_*` methods run while it is held, which is what allows callers
//! to make compound updates atomic; they must not call back into the same
//! map.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use super::clock::Clock;
use super::scheduler::{Scheduler, SweepHandle};

/// Called with each entry the sweep removes because it expired.
pub type TimeoutListener<K, V> = Box<dyn Fn(K, V) + Send + Sync>;

struct Timed<V> {
    value: V,
    created: Instant,
    ttl: Duration,
}

impl<V> Timed<V> {
    fn is_expired(&self, now: Instant) -> bool {
        match self.created.checked_add(self.ttl) {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

pub struct TimeoutMap<K, V> {
    entries: Mutex<HashMap<K, Timed<V>>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    listener: Option<TimeoutListener<K, V>>,
    sweep: Mutex<Option<SweepHandle>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TimeoutMap<K, V> {
    pub fn new(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        TimeoutMap {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
            clock,
            listener: None,
            sweep: Mutex::new(None),
        }
    }

    pub fn with_timeout_listener(
        mut self,
        listener: impl Fn(K, V) + Send + Sync + 'static,
    ) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Insert `value` with the default TTL, returning the live value it
    /// replaced, if any.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        self.put_with_ttl(key, value, self.default_ttl)
    }

    pub fn put_with_ttl(&self, key: K, value: V, ttl: Duration) -> Option<V> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        let replaced = {
            let mut entries = self.entries.lock().unwrap();
            let old = entries.insert(
                key.clone(),
                Timed {
                    value,
                    created: now,
                    ttl,
                },
            );
            match old {
                Some(old) if old.is_expired(now) => {
                    expired.push((key, old.value));
                    None
                },
                old => old.map(|e| e.value),
            }
        };

        self.notify(expired);
        replaced
    }

    /// Run `f` on the live value for `key`, first atomically inserting the
    /// result of `make` if there is none.
    pub fn with_value_or_insert<R>(
        &self,
        key: K,
        make: impl FnOnce() -> V,
        f: impl FnOnce(&V) -> R,
    ) -> R {
        let now = self.clock.now();
        let mut expired = Vec::new();
        let result = {
            let mut entries = self.entries.lock().unwrap();
            if entries.get(&key).map_or(false, |e| e.is_expired(now)) {
                if let Some(old) = entries.remove(&key) {
                    expired.push((key.clone(), old.value));
                }
            }

            let entry = entries.entry(key).or_insert_with(|| Timed {
                value: make(),
                created: now,
                ttl: self.default_ttl,
            });
            f(&entry.value)
        };

        self.notify(expired);
        result
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.with_value(key, V::clone)
    }

    /// Run `f` on the live value for `key`, if there is one.
    pub fn with_value<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        let now = self.clock.now();
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| f(&e.value))
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.with_value(key, |_| ()).is_some()
    }

    /// Remove and return the live value for `key`.
    ///
    /// An expired entry is removed too, but is reported to the timeout
    /// listener instead of being returned.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.remove_if(key, |_| true)
    }

    /// Remove and return the live value for `key` if `pred` accepts it.
    ///
    /// `pred` is evaluated under the map lock, so nothing can change the
    /// entry between the check and the removal.
    pub fn remove_if(&self, key: &K, pred: impl FnOnce(&V) -> bool) -> Option<V> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        let removed = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get(key) {
                None => None,
                Some(e) if e.is_expired(now) => {
                    if let Some(old) = entries.remove(key) {
                        expired.push((key.clone(), old.value));
                    }
                    None
                },
                Some(e) if pred(&e.value) => {
                    entries.remove(key).map(|e| e.value)
                },
                Some(_) => None,
            }
        };

        self.notify(expired);
        removed
    }

    /// Remove every live entry `keep` rejects, returning them.
    pub fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) -> Vec<(K, V)> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap();
        let doomed = entries
            .iter()
            .filter(|&(k, e)| !e.is_expired(now) && !keep(k, &e.value))
            .map(|(k, _)| k.clone())
            .collect::<Vec<_>>();

        doomed
            .into_iter()
            .filter_map(|k| entries.remove(&k).map(|e| (k, e.value)))
            .collect()
    }

    /// Remove everything, returning what was removed (expired or not).
    pub fn clear(&self) -> Vec<(K, V)> {
        let mut entries = self.entries.lock().unwrap();
        entries.drain().map(|(k, e)| (k, e.value)).collect()
    }

    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let entries = self.entries.lock().unwrap();
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        0 == self.len()
    }

    /// Remove all expired entries, reporting each to the timeout listener.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let expired = {
            let mut entries = self.entries.lock().unwrap();
            let doomed = entries
                .iter()
                .filter(|&(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect::<Vec<_>>();
            doomed
                .into_iter()
                .filter_map(|k| entries.remove(&k).map(|e| (k, e.value)))
                .collect::<Vec<_>>()
        };

        let n = expired.len();
        self.notify(expired);
        n
    }

    /// Stop the periodic sweep, if any, and remove everything.
    ///
    /// The removed entries are returned so the caller can dispose of them in
    /// turn; they are not reported to the timeout listener.
    pub fn dispose(&self) -> Vec<(K, V)> {
        self.sweep.lock().unwrap().take();
        self.clear()
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweep.lock().unwrap().is_some()
    }

    fn notify(&self, expired: Vec<(K, V)>) {
        if let Some(ref listener) = self.listener {
            for (k, v) in expired {
                listener(k, v);
            }
        }
    }
}

impl<K, V> TimeoutMap<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Have `scheduler` sweep this map every `interval`.
    ///
    /// The scheduled task only holds a weak reference, so the sweep ends by
    /// itself once the map is dropped. Replaces any earlier registration.
    pub fn start_sweep(self: &Arc<Self>, scheduler: &Scheduler, interval: Duration) {
        let this: Weak<Self> = Arc::downgrade(self);
        let handle = scheduler.schedule(interval, move || match this.upgrade() {
            Some(map) => {
                map.sweep();
                true
            },
            None => false,
        });
        *self.sweep.lock().unwrap() = Some(handle);
    }
}
