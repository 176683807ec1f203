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

//! A mail-access cache pooling several connections per key.
//!
//! Each key gets a `MailAccessQueue`. A connection put into the cache is
//! stamped with the instant it must be closed (its own idle time if it has
//! one, else the configured default) and a periodic sweep closes every
//! connection whose time is up. A connection taken out of the cache is the
//! one closest to expiring, whether or not it already has.
//!
//! Queues are created on first put and dropped by the sweep once empty.
//! Both happen under the table lock, as does every offer, so a connection can
//! never be offered into a queue that is no longer in the table.

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::{debug, info, warn};

use super::keys::MailAccessKey;
use super::mail_access::{
    self, AccountDirectory, MailAccess, MailAccessCache, SessionDirectory,
};
use super::mail_access_queue::MailAccessQueue;
use crate::support::clock::Clock;
use crate::support::error::Error;
use crate::support::scheduler::{Scheduler, SweepHandle};
use crate::support::system_config::MailAccessConfig;

pub struct ManagedMailAccessCache<A> {
    queues: Mutex<HashMap<MailAccessKey, Arc<MailAccessQueue<A>>>>,
    default_idle_time: Duration,
    capacity: Option<usize>,
    clock: Arc<dyn Clock>,
    sessions: Arc<dyn SessionDirectory>,
    accounts: Arc<dyn AccountDirectory>,
    sweep: Mutex<Option<SweepHandle>>,
}

impl<A: MailAccess> ManagedMailAccessCache<A> {
    /// Create the cache and register its sweep with `scheduler`.
    pub fn new(
        config: &MailAccessConfig,
        scheduler: &Scheduler,
        clock: Arc<dyn Clock>,
        sessions: Arc<dyn SessionDirectory>,
        accounts: Arc<dyn AccountDirectory>,
    ) -> Arc<Self> {
        let this = Arc::new(ManagedMailAccessCache {
            queues: Mutex::new(HashMap::new()),
            default_idle_time: config.idle_time(),
            capacity: config.max_per_key(),
            clock,
            sessions,
            accounts,
            sweep: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&this);
        let handle = scheduler.schedule(config.sweep_interval(), move || {
            match weak.upgrade() {
                Some(cache) => {
                    cache.sweep();
                    true
                },
                None => false,
            }
        });
        *this.sweep.lock().unwrap() = Some(handle);

        info!(
            "Pooled connection cache started (idle {:?}, sweep every {:?}, \
             {} per key)",
            config.idle_time(),
            config.sweep_interval(),
            config
                .max_per_key()
                .map_or_else(|| "unbounded".to_owned(), |n| n.to_string()),
        );
        this
    }

    /// Close every connection whose deadline has passed.
    ///
    /// Returns the number of connections closed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut expired = Vec::new();
        {
            let mut queues = self.queues.lock().unwrap();
            for (key, queue) in queues.iter() {
                while let Some(access) = queue.poll_if_expired(now) {
                    expired.push((*key, access));
                }
            }
            queues.retain(|_, queue| !queue.is_empty());
        }

        let n = expired.len();
        for (key, access) in expired {
            debug!("{:?} Closing idle connection", key);
            access.close();
        }
        n
    }

    /// The number of connections pooled under `key`.
    pub fn pooled(&self, key: &MailAccessKey) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(key)
            .map_or(0, |queue| queue.len())
    }

    fn take_all(&self, key: &MailAccessKey) -> Vec<A> {
        let queue = self.queues.lock().unwrap().remove(key);
        queue.map(|q| q.drain()).unwrap_or_default()
    }
}

impl<A: MailAccess> MailAccessCache<A> for ManagedMailAccessCache<A> {
    fn put_mail_access(&self, key: MailAccessKey, access: A) -> Result<(), A> {
        let idle_time = access.idle_time().unwrap_or(self.default_idle_time);
        let deadline = self.clock.now().checked_add(idle_time);
        if deadline.is_none() {
            warn!(
                "{:?} Idle time {:?} is unbounded; never expiring",
                key, idle_time
            );
        }

        let result = {
            let mut queues = self.queues.lock().unwrap();
            let queue = queues
                .entry(key)
                .or_insert_with(|| Arc::new(MailAccessQueue::new(self.capacity)));
            queue.offer(access, deadline)
        };

        match result {
            Ok(()) => debug!("{:?} Pooled connection for {:?}", key, idle_time),
            Err(_) => debug!("{:?} Pool full; connection rejected", key),
        }
        result
    }

    fn remove_mail_access(&self, key: &MailAccessKey) -> Option<A> {
        let queue = self.queues.lock().unwrap().get(key).cloned()?;
        let taken = queue.poll();
        if taken.is_some() {
            debug!("{:?} Reusing pooled connection", key);
        }
        taken
    }

    fn contains_mail_access(&self, key: &MailAccessKey) -> bool {
        0 != self.pooled(key)
    }

    fn clear_user_entries(
        &self,
        user_id: u32,
        context_id: u32,
    ) -> Result<usize, Error> {
        mail_access::clear_user_entries(
            &*self.sessions,
            &*self.accounts,
            user_id,
            context_id,
            |key| self.take_all(key),
        )
    }

    fn dispose(&self) {
        self.sweep.lock().unwrap().take();
        let queues = mem::take(&mut *self.queues.lock().unwrap());

        let mut closed = 0;
        for (_, queue) in queues {
            for access in queue.drain() {
                access.close();
                closed += 1;
            }
        }
        info!("Pooled connection cache disposed; closed {}", closed);
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::cache::mail_access::testing::{FakeAccess, FakeDirectory};
    use crate::support::clock::{system_clock, ManualClock};
    use crate::support::system_config::CacheConfig;

    struct Setup {
        cache: Arc<ManagedMailAccessCache<FakeAccess>>,
        clock: Arc<ManualClock>,
        directory: Arc<FakeDirectory>,
        closed: Arc<AtomicUsize>,
        _scheduler: Arc<Scheduler>,
    }

    fn setup(config: MailAccessConfig) -> Setup {
        let scheduler = Scheduler::new();
        let clock = ManualClock::new();
        let directory = Arc::new(FakeDirectory::default());
        let cache = ManagedMailAccessCache::new(
            &config,
            &scheduler,
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::clone(&directory) as Arc<dyn SessionDirectory>,
            Arc::clone(&directory) as Arc<dyn AccountDirectory>,
        );
        Setup {
            cache,
            clock,
            directory,
            closed: Arc::new(AtomicUsize::new(0)),
            _scheduler: scheduler,
        }
    }

    fn access(setup: &Setup, id: u32, idle_secs: Option<u64>) -> FakeAccess {
        FakeAccess {
            idle: idle_secs.map(Duration::from_secs),
            ..FakeAccess::new(id, &setup.closed)
        }
    }

    #[test]
    fn expired_connection_is_swept_not_handed_out() {
        let setup = setup(MailAccessConfig::default());
        let key = MailAccessKey::new(7, 0, 1);

        setup
            .cache
            .put_mail_access(key, access(&setup, 1, Some(1)))
            .unwrap();
        assert!(setup.cache.contains_mail_access(&key));
        assert_eq!(0, setup.cache.sweep());
        assert_eq!(1, setup.cache.remove_mail_access(&key).unwrap().id);

        setup
            .cache
            .put_mail_access(key, access(&setup, 2, Some(1)))
            .unwrap();
        setup.clock.advance(Duration::from_secs(1));
        assert_eq!(1, setup.cache.sweep());
        assert_eq!(1, setup.closed.load(Ordering::SeqCst));
        assert!(setup.cache.remove_mail_access(&key).is_none());
        assert!(!setup.cache.contains_mail_access(&key));
    }

    #[test]
    fn remove_prefers_soonest_deadline() {
        let setup = setup(MailAccessConfig::default());
        let key = MailAccessKey::new(7, 0, 1);

        setup
            .cache
            .put_mail_access(key, access(&setup, 1, Some(60)))
            .unwrap();
        setup
            .cache
            .put_mail_access(key, access(&setup, 2, Some(5)))
            .unwrap();
        // Default idle time of 7 seconds
        setup
            .cache
            .put_mail_access(key, access(&setup, 3, None))
            .unwrap();
        assert_eq!(3, setup.cache.pooled(&key));

        setup.clock.advance(Duration::from_secs(6));
        assert_eq!(1, setup.cache.sweep());
        assert_eq!(3, setup.cache.remove_mail_access(&key).unwrap().id);
        assert_eq!(1, setup.cache.remove_mail_access(&key).unwrap().id);
    }

    #[test]
    fn unbounded_idle_time_never_expires() {
        crate::init_test_log();

        let setup = setup(MailAccessConfig::default());
        let key = MailAccessKey::new(7, 0, 1);

        let forever = FakeAccess {
            idle: Some(Duration::from_secs(u64::MAX)),
            ..FakeAccess::new(1, &setup.closed)
        };
        setup.cache.put_mail_access(key, forever).unwrap();
        setup
            .cache
            .put_mail_access(key, access(&setup, 2, Some(1)))
            .unwrap();

        setup.clock.advance(Duration::from_secs(86400 * 365));
        assert_eq!(1, setup.cache.sweep());
        assert_eq!(1, setup.cache.remove_mail_access(&key).unwrap().id);
    }

    #[test]
    fn huge_configured_idle_time_is_usable() {
        let config =
            CacheConfig::parse("[mail_access]\nidle_secs = 9223372036854775807")
                .unwrap()
                .mail_access;
        let setup = setup(config);
        let key = MailAccessKey::new(7, 0, 1);

        setup
            .cache
            .put_mail_access(key, access(&setup, 1, None))
            .unwrap();
        setup.clock.advance(Duration::from_secs(86400));
        assert_eq!(0, setup.cache.sweep());
        assert!(setup.cache.contains_mail_access(&key));
    }

    #[test]
    fn bounded_pool_rejects_overflow() {
        let setup = setup(MailAccessConfig {
            max_per_key: Some(2),
            ..MailAccessConfig::default()
        });
        let key = MailAccessKey::new(7, 0, 1);

        for id in 0..2 {
            setup
                .cache
                .put_mail_access(key, access(&setup, id, None))
                .unwrap();
        }
        let rejected = setup
            .cache
            .put_mail_access(key, access(&setup, 2, None))
            .unwrap_err();
        assert_eq!(2, rejected.id);

        // Other keys have their own pools
        assert!(setup
            .cache
            .put_mail_access(MailAccessKey::new(7, 1, 1), access(&setup, 3, None))
            .is_ok());
    }

    #[test]
    fn clear_user_entries_only_without_sessions() {
        let setup = setup(MailAccessConfig::default());
        setup.directory.set_accounts(7, 1, &[0, 1]);
        setup.directory.set_sessions(7, 1, 2);

        for (id, account) in [(1, 0), (2, 0), (3, 1)].iter().copied() {
            setup
                .cache
                .put_mail_access(
                    MailAccessKey::new(7, account, 1),
                    access(&setup, id, None),
                )
                .unwrap();
        }

        assert_eq!(0, setup.cache.clear_user_entries(7, 1).unwrap());
        assert_eq!(2, setup.cache.pooled(&MailAccessKey::new(7, 0, 1)));

        setup.directory.set_sessions(7, 1, 0);
        assert_eq!(3, setup.cache.clear_user_entries(7, 1).unwrap());
        assert_eq!(3, setup.closed.load(Ordering::SeqCst));
        assert!(!setup
            .cache
            .contains_mail_access(&MailAccessKey::new(7, 1, 1)));

        assert_matches!(
            Err(Error::AccountLookup(_)),
            setup.cache.clear_user_entries(8, 1)
        );
    }

    #[test]
    fn dispose_closes_everything() {
        let setup = setup(MailAccessConfig::default());
        for id in 0..4 {
            setup
                .cache
                .put_mail_access(
                    MailAccessKey::new(7, id % 2, 1),
                    access(&setup, id, None),
                )
                .unwrap();
        }

        setup.cache.dispose();
        assert_eq!(4, setup.closed.load(Ordering::SeqCst));
        assert!(setup.cache.sweep.lock().unwrap().is_none());
    }

    #[test]
    fn background_sweep_closes_expired_connections() {
        let scheduler = Scheduler::new();
        let directory = Arc::new(FakeDirectory::default());
        let closed = Arc::new(AtomicUsize::new(0));
        let cache = ManagedMailAccessCache::new(
            &MailAccessConfig {
                sweep_secs: Some(1),
                ..MailAccessConfig::default()
            },
            &scheduler,
            system_clock(),
            Arc::clone(&directory) as Arc<dyn SessionDirectory>,
            Arc::clone(&directory) as Arc<dyn AccountDirectory>,
        );

        let key = MailAccessKey::new(7, 0, 1);
        cache
            .put_mail_access(
                key,
                FakeAccess {
                    idle: Some(Duration::from_millis(10)),
                    ..FakeAccess::new(1, &closed)
                },
            )
            .unwrap();

        let give_up = Instant::now() + Duration::from_secs(10);
        while 0 == closed.load(Ordering::SeqCst) {
            assert!(Instant::now() < give_up);
            thread::sleep(Duration::from_millis(20));
        }
        assert!(!cache.contains_mail_access(&key));
    }
}
