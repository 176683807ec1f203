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

//! Owns every cache and ties their lifecycles to server and session events.
//!
//! A server creates one `CacheService` at startup and passes it (usually in
//! an `Arc`) to whatever handles requests. Nothing in this crate is global.

use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use serde_json::Value;

use crate::cache::json_message_cache::JsonMessageCache;
use crate::cache::mail_access::{
    AccountDirectory, MailAccess, MailAccessCache, SessionDirectory,
};
use crate::cache::managed::ManagedMailAccessCache;
use crate::cache::prefetch::Prefetcher;
use crate::cache::session_cache::{SessionCacheRegistry, SessionMailCache};
use crate::support::clock::{system_clock, Clock};
use crate::support::scheduler::Scheduler;
use crate::support::system_config::CacheConfig;
use crate::support::threading::BackgroundWorker;

pub type SessionCache = SessionMailCache<String, Value>;

pub struct CacheService<A: MailAccess> {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    scheduler: Arc<Scheduler>,
    worker: Arc<BackgroundWorker>,
    sessions: Arc<dyn SessionDirectory>,
    json_cache: Mutex<Option<Arc<JsonMessageCache>>>,
    mail_access: Arc<dyn MailAccessCache<A>>,
    session_caches: SessionCacheRegistry<String, Value>,
}

impl<A: MailAccess> CacheService<A> {
    /// Create the service with a pooled mail-access cache and the system
    /// clock.
    pub fn new(
        config: CacheConfig,
        sessions: Arc<dyn SessionDirectory>,
        accounts: Arc<dyn AccountDirectory>,
    ) -> Self {
        Self::with_clock(config, system_clock(), sessions, accounts)
    }

    pub fn with_clock(
        config: CacheConfig,
        clock: Arc<dyn Clock>,
        sessions: Arc<dyn SessionDirectory>,
        accounts: Arc<dyn AccountDirectory>,
    ) -> Self {
        let scheduler = Scheduler::new();
        let mail_access = ManagedMailAccessCache::new(
            &config.mail_access,
            &scheduler,
            Arc::clone(&clock),
            Arc::clone(&sessions),
            accounts,
        );
        Self::assemble(config, clock, scheduler, sessions, mail_access)
    }

    /// Create the service around an already constructed mail-access cache,
    /// such as a `SingleSlotMailAccessCache`.
    pub fn with_mail_access_cache(
        config: CacheConfig,
        clock: Arc<dyn Clock>,
        sessions: Arc<dyn SessionDirectory>,
        mail_access: Arc<dyn MailAccessCache<A>>,
    ) -> Self {
        Self::assemble(config, clock, Scheduler::new(), sessions, mail_access)
    }

    fn assemble(
        config: CacheConfig,
        clock: Arc<dyn Clock>,
        scheduler: Arc<Scheduler>,
        sessions: Arc<dyn SessionDirectory>,
        mail_access: Arc<dyn MailAccessCache<A>>,
    ) -> Self {
        CacheService {
            config,
            clock,
            scheduler,
            worker: Arc::new(BackgroundWorker::default()),
            sessions,
            json_cache: Mutex::new(None),
            mail_access,
            session_caches: SessionCacheRegistry::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Create the rendered-message cache if it is enabled and does not exist
    /// yet.
    ///
    /// Returns the cache, or `None` if it is disabled.
    pub fn init_json_cache(&self) -> Option<Arc<JsonMessageCache>> {
        if !self.config.json_message_cache.enabled() {
            debug!("Rendered-message cache disabled");
            return None;
        }

        let mut json_cache = self.json_cache.lock().unwrap();
        let cache = json_cache.get_or_insert_with(|| {
            Arc::new(JsonMessageCache::new(
                self.config.json_message_cache.clone(),
                Arc::clone(&self.scheduler),
                Arc::clone(&self.clock),
            ))
        });
        Some(Arc::clone(cache))
    }

    /// The rendered-message cache, if it has been initialised.
    pub fn json_cache(&self) -> Option<Arc<JsonMessageCache>> {
        self.json_cache.lock().unwrap().clone()
    }

    /// Clear and dispose the rendered-message cache.
    ///
    /// Anyone still holding the cache finds it empty, and nothing they put
    /// into it expires any more. A later `init_json_cache` creates a new one.
    pub fn release_json_cache(&self) {
        let cache = self.json_cache.lock().unwrap().take();
        if let Some(cache) = cache {
            cache.clear();
            cache.dispose();
        }
    }

    /// A prefetcher feeding the rendered-message cache, if it is enabled.
    pub fn prefetcher(&self) -> Option<Prefetcher> {
        self.init_json_cache()
            .map(|cache| Prefetcher::new(cache, Arc::clone(&self.worker)))
    }

    pub fn mail_access(&self) -> &Arc<dyn MailAccessCache<A>> {
        &self.mail_access
    }

    /// The cache of the given session, created on first use.
    pub fn session_cache(&self, session_id: &str) -> Arc<SessionCache> {
        self.session_caches.session(session_id)
    }

    /// Handle the end of a session.
    ///
    /// The session's own cache is dropped immediately. If the user has no
    /// other session left, their rendered messages and cached connections
    /// are dropped as well; that part runs in the background if so
    /// configured.
    pub fn session_removed(
        &self,
        session_id: &str,
        user_id: u32,
        context_id: u32,
    ) {
        if self.session_caches.remove(session_id) {
            debug!("Session {} Dropped session cache", session_id);
        }

        let sessions = Arc::clone(&self.sessions);
        let json_cache = self.json_cache();
        let mail_access = Arc::clone(&self.mail_access);
        let cleanup = move || {
            if sessions.session_count(user_id, context_id) > 0 {
                return;
            }

            if let Some(json_cache) = json_cache {
                json_cache.remove_user(user_id, context_id);
            }
            if let Err(e) = mail_access.clear_user_entries(user_id, context_id)
            {
                warn!(
                    "UserKey({}@{}) Failed to release cached connections: {}",
                    user_id, context_id, e
                );
            }
        };

        if self.config.service.background_cleanup() {
            self.worker.run_in_background(cleanup);
        } else {
            cleanup();
        }
    }

    /// Drop all caches and stop the sweep thread.
    pub fn shutdown(&self) {
        self.release_json_cache();
        self.mail_access.dispose();
        self.session_caches.clear();
        self.scheduler.shutdown();
        info!("Cache service shut down");
    }
}
