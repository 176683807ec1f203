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

//! The rendered-message cache.
//!
//! Rendered messages are kept per user, then per folder, then per mail id:
//!
//! ```text
//! users:   TimeoutMap<UserKey, folders>      (user TTL, swept)
//! folders: TimeoutMap<FolderKey, ids>        (folder TTL, swept; one per user)
//! ids:     Mutex<HashMap<mail id, Arc<PendingMessage>>>
//! ```
//!
//! Values are stored as deferred renderings, so a request which finds a
//! message somebody else is already rendering waits for that instead of
//! rendering it again.
//!
//! Compound updates hold the locks of the levels they touch, always in the
//! order users, folders, ids. This is what makes "insert the folder map if
//! absent, then insert the message" and "remove the message, then drop the
//! folder if it is now empty" atomic with respect to each other. No lock is
//! ever held while a rendering is waited for or computed.

use std::collections::{hash_map, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, info};
use serde_json::Value;

use super::keys::{FolderKey, UserKey};
use super::model::{self, MailFlags};
use crate::support::clock::Clock;
use crate::support::deferred::{Deferred, WaitPolicy};
use crate::support::error::{BoxError, Error};
use crate::support::scheduler::Scheduler;
use crate::support::system_config::JsonMessageCacheConfig;
use crate::support::timeout_map::TimeoutMap;

/// The cached master copy of a rendered message.
///
/// Flag updates modify this in place; readers only ever receive clones.
pub type RenderedMessage = Arc<RwLock<Value>>;

/// A rendering which may not have happened yet.
pub type PendingMessage = Deferred<RenderedMessage>;

type IdMap = Mutex<HashMap<String, Arc<PendingMessage>>>;
type FolderMap = TimeoutMap<FolderKey, Arc<IdMap>>;

pub struct JsonMessageCache {
    users: Arc<TimeoutMap<UserKey, Arc<FolderMap>>>,
    config: JsonMessageCacheConfig,
    policy: WaitPolicy,
    scheduler: Arc<Scheduler>,
    clock: Arc<dyn Clock>,
}

/// Defer rendering a message until somebody needs it.
pub fn defer(
    render: impl FnOnce() -> Result<Value, BoxError> + Send + 'static,
) -> Arc<PendingMessage> {
    Arc::new(Deferred::new(move || {
        render().map(|message| Arc::new(RwLock::new(message)))
    }))
}

/// Wrap an already rendered message.
pub fn rendered(message: Value) -> Arc<PendingMessage> {
    Arc::new(Deferred::ready(Arc::new(RwLock::new(message))))
}

impl JsonMessageCache {
    pub fn new(
        config: JsonMessageCacheConfig,
        scheduler: Arc<Scheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let users = Arc::new(
            TimeoutMap::new(config.user_ttl(), Arc::clone(&clock))
                .with_timeout_listener(
                    |user: UserKey, folders: Arc<FolderMap>| {
                        debug!("{:?} Rendered messages expired", user);
                        folders.dispose();
                    },
                ),
        );
        users.start_sweep(&scheduler, config.user_sweep_interval());

        info!(
            "Rendered-message cache started (user TTL {:?}, folder TTL {:?})",
            config.user_ttl(),
            config.folder_ttl(),
        );

        JsonMessageCache {
            users,
            policy: WaitPolicy::new(config.max_wait()),
            config,
            scheduler,
            clock,
        }
    }

    pub fn config(&self) -> &JsonMessageCacheConfig {
        &self.config
    }

    /// Cache `message` (usually a deferred rendering) under the given key,
    /// replacing whatever was there.
    pub fn put(
        &self,
        account_id: u32,
        folder: &str,
        mail_id: &str,
        message: Arc<PendingMessage>,
        user_id: u32,
        context_id: u32,
    ) {
        let user = UserKey::new(user_id, context_id);
        let folder = FolderKey::new(account_id, folder);
        debug!("{:?} Caching {:?} {}", user, folder, mail_id);

        self.users.with_value_or_insert(
            user,
            || self.new_folder_map(),
            |folders| {
                folders.with_value_or_insert(folder, Arc::default, |ids| {
                    ids.lock().unwrap().insert(mail_id.to_owned(), message);
                })
            },
        );
    }

    /// Cache `message` unless something is already cached under the key.
    ///
    /// Returns whether `message` was stored.
    pub fn put_if_absent(
        &self,
        account_id: u32,
        folder: &str,
        mail_id: &str,
        message: Arc<PendingMessage>,
        user_id: u32,
        context_id: u32,
    ) -> bool {
        let user = UserKey::new(user_id, context_id);
        let folder = FolderKey::new(account_id, folder);

        self.users.with_value_or_insert(
            user,
            || self.new_folder_map(),
            |folders| {
                folders.with_value_or_insert(folder, Arc::default, |ids| {
                    match ids.lock().unwrap().entry(mail_id.to_owned()) {
                        hash_map::Entry::Occupied(_) => false,
                        hash_map::Entry::Vacant(slot) => {
                            slot.insert(message);
                            true
                        },
                    }
                })
            },
        )
    }

    /// Look up a message, returning a copy independent of the cache.
    ///
    /// If the message is still being rendered, waits up to the configured
    /// time, then renders it in the calling thread if nobody has started.
    pub fn get(
        &self,
        account_id: u32,
        folder: &str,
        mail_id: &str,
        user_id: u32,
        context_id: u32,
    ) -> Result<Option<Value>, Error> {
        match self.lookup(account_id, folder, mail_id, user_id, context_id) {
            None => Ok(None),
            Some(pending) => self.materialise(&pending).map(Some),
        }
    }

    /// Remove a message from the cache, returning a copy of it.
    ///
    /// A folder left with no messages is removed from the user, and a user
    /// left with no folders is removed entirely.
    pub fn remove(
        &self,
        account_id: u32,
        folder: &str,
        mail_id: &str,
        user_id: u32,
        context_id: u32,
    ) -> Result<Option<Value>, Error> {
        let user = UserKey::new(user_id, context_id);
        let folder = FolderKey::new(account_id, folder);

        let removed = self
            .users
            .with_value(&user, |folders| {
                let removed = folders
                    .with_value(&folder, |ids| ids.lock().unwrap().remove(mail_id))
                    .flatten();
                if removed.is_some() {
                    folders.remove_if(&folder, |ids| ids.lock().unwrap().is_empty());
                }
                removed
            })
            .flatten();

        let removed = match removed {
            None => return Ok(None),
            Some(removed) => removed,
        };

        debug!("{:?} Uncached {:?} {}", user, folder, mail_id);
        self.remove_user_if_empty(&user);
        self.materialise(&removed).map(Some)
    }

    /// Whether a message is cached, rendered or not.
    pub fn contains_key(
        &self,
        account_id: u32,
        folder: &str,
        mail_id: &str,
        user_id: u32,
        context_id: u32,
    ) -> bool {
        self.lookup(account_id, folder, mail_id, user_id, context_id)
            .is_some()
    }

    /// Whether any messages of a folder are cached.
    pub fn contains_folder(
        &self,
        account_id: u32,
        folder: &str,
        user_id: u32,
        context_id: u32,
    ) -> bool {
        let folder = FolderKey::new(account_id, folder);
        self.users
            .with_value(&UserKey::new(user_id, context_id), |folders| {
                folders.contains_key(&folder)
            })
            .unwrap_or(false)
    }

    /// Whether anything at all is cached for a user.
    pub fn contains_user(&self, user_id: u32, context_id: u32) -> bool {
        self.users.contains_key(&UserKey::new(user_id, context_id))
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn folder_count(&self, user_id: u32, context_id: u32) -> usize {
        self.users
            .with_value(&UserKey::new(user_id, context_id), |f| f.len())
            .unwrap_or(0)
    }

    /// Mark messages as seen or unseen, and record the folder's new unread
    /// count.
    ///
    /// `mail_ids` selects the messages to change; `None` means every cached
    /// message of the folder. The unread count is written to every cached
    /// message of the folder regardless, so they all carry the current
    /// folder total.
    ///
    /// This is best-effort: messages which are not rendered within the
    /// configured wait, or whose rendering failed, are skipped.
    #[allow(clippy::too_many_arguments)]
    pub fn switch_seen_flag(
        &self,
        account_id: u32,
        folder: &str,
        mail_ids: Option<&[String]>,
        seen: bool,
        unread: u32,
        user_id: u32,
        context_id: u32,
    ) {
        self.update_in_place(
            account_id,
            folder,
            mail_ids,
            true,
            user_id,
            context_id,
            |message, targeted| {
                if targeted {
                    model::update_flags(message, MailFlags::SEEN, seen);
                }
                model::set_unread(message, unread);
            },
        );
    }

    /// Set (`set == true`) or clear `mask` in the flags of the selected
    /// messages (`None` selects all cached messages of the folder).
    ///
    /// Best-effort, like `switch_seen_flag`.
    #[allow(clippy::too_many_arguments)]
    pub fn update_flags(
        &self,
        account_id: u32,
        folder: &str,
        mail_ids: Option<&[String]>,
        mask: MailFlags,
        set: bool,
        user_id: u32,
        context_id: u32,
    ) {
        self.update_in_place(
            account_id,
            folder,
            mail_ids,
            false,
            user_id,
            context_id,
            |message, targeted| {
                if targeted {
                    model::update_flags(message, mask, set);
                }
            },
        );
    }

    /// Overwrite the color label of the selected messages.
    ///
    /// Best-effort, like `switch_seen_flag`.
    pub fn update_color_flag(
        &self,
        account_id: u32,
        folder: &str,
        mail_ids: Option<&[String]>,
        color_label: u32,
        user_id: u32,
        context_id: u32,
    ) {
        self.update_in_place(
            account_id,
            folder,
            mail_ids,
            false,
            user_id,
            context_id,
            |message, targeted| {
                if targeted {
                    model::set_color_label(message, color_label);
                }
            },
        );
    }

    /// Drop all cached messages of a folder.
    ///
    /// Returns whether anything was cached for it.
    pub fn remove_folder(
        &self,
        account_id: u32,
        folder: &str,
        user_id: u32,
        context_id: u32,
    ) -> bool {
        let user = UserKey::new(user_id, context_id);
        let folder = FolderKey::new(account_id, folder);
        let removed = self
            .users
            .with_value(&user, |folders| folders.remove(&folder).is_some())
            .unwrap_or(false);

        if removed {
            debug!("{:?} Uncached folder {:?}", user, folder);
            self.remove_user_if_empty(&user);
        }
        removed
    }

    /// Drop the cached messages of every folder of the user except one.
    pub fn remove_all_folders_except(
        &self,
        account_id: u32,
        folder: &str,
        user_id: u32,
        context_id: u32,
    ) {
        let user = UserKey::new(user_id, context_id);
        let keep = FolderKey::new(account_id, folder);
        let removed = self
            .users
            .with_value(&user, |folders| {
                folders.retain(|folder, _| *folder == keep).len()
            })
            .unwrap_or(0);

        if removed > 0 {
            debug!(
                "{:?} Uncached {} folder(s) other than {:?}",
                user, removed, keep
            );
            self.remove_user_if_empty(&user);
        }
    }

    /// Drop everything cached for a user.
    pub fn remove_user(&self, user_id: u32, context_id: u32) -> bool {
        let user = UserKey::new(user_id, context_id);
        match self.users.remove(&user) {
            Some(folders) => {
                debug!("{:?} Uncached all rendered messages", user);
                folders.dispose();
                true
            },
            None => false,
        }
    }

    /// Drop everything cached for every user.
    pub fn clear(&self) {
        for (_, folders) in self.users.clear() {
            folders.dispose();
        }
    }

    /// Stop all sweeps and drop everything.
    pub fn dispose(&self) {
        for (_, folders) in self.users.dispose() {
            folders.dispose();
        }
        info!("Rendered-message cache disposed");
    }

    fn new_folder_map(&self) -> Arc<FolderMap> {
        let folders = Arc::new(FolderMap::new(
            self.config.folder_ttl(),
            Arc::clone(&self.clock),
        ));
        folders.start_sweep(&self.scheduler, self.config.folder_sweep_interval());
        folders
    }

    fn lookup(
        &self,
        account_id: u32,
        folder: &str,
        mail_id: &str,
        user_id: u32,
        context_id: u32,
    ) -> Option<Arc<PendingMessage>> {
        let folder = FolderKey::new(account_id, folder);
        self.users
            .with_value(&UserKey::new(user_id, context_id), |folders| {
                folders
                    .with_value(&folder, |ids| {
                        ids.lock().unwrap().get(mail_id).cloned()
                    })
                    .flatten()
            })
            .flatten()
    }

    fn folder_messages(
        &self,
        user: &UserKey,
        folder: &FolderKey,
    ) -> Vec<(String, Arc<PendingMessage>)> {
        self.users
            .with_value(user, |folders| {
                folders.with_value(folder, |ids| {
                    ids.lock()
                        .unwrap()
                        .iter()
                        .map(|(id, m)| (id.clone(), Arc::clone(m)))
                        .collect::<Vec<_>>()
                })
            })
            .flatten()
            .unwrap_or_default()
    }

    fn remove_user_if_empty(&self, user: &UserKey) {
        if let Some(folders) =
            self.users.remove_if(user, |folders| folders.is_empty())
        {
            debug!("{:?} No rendered messages left", user);
            folders.dispose();
        }
    }

    fn materialise(&self, pending: &PendingMessage) -> Result<Value, Error> {
        let rendered = self.policy.resolve(pending)?;
        let copy = rendered.read().unwrap().clone();
        Ok(copy)
    }

    /// Apply `update` to every settled message of a folder, telling it
    /// whether the message was selected by `mail_ids`.
    ///
    /// Selected messages get the configured wait to settle. Unselected ones
    /// are only visited at all if `visit_all`, and then only if already
    /// settled.
    #[allow(clippy::too_many_arguments)]
    fn update_in_place(
        &self,
        account_id: u32,
        folder: &str,
        mail_ids: Option<&[String]>,
        visit_all: bool,
        user_id: u32,
        context_id: u32,
        mut update: impl FnMut(&mut Value, bool),
    ) {
        let user = UserKey::new(user_id, context_id);
        let folder = FolderKey::new(account_id, folder);
        let selected = mail_ids
            .map(|ids| ids.iter().map(String::as_str).collect::<HashSet<_>>());

        let mut updated = 0;
        for (id, pending) in self.folder_messages(&user, &folder) {
            let targeted =
                selected.as_ref().map_or(true, |s| s.contains(id.as_str()));
            let rendered = if targeted {
                self.policy.peek(&pending)
            } else if visit_all {
                pending.try_get().and_then(Result::ok)
            } else {
                continue;
            };

            match rendered {
                Some(rendered) => {
                    let mut message = rendered.write().unwrap();
                    update(&mut *message, targeted);
                    updated += 1;
                },
                None => {
                    debug!("{:?} Skipped unsettled {:?} {}", user, folder, id)
                },
            }
        }

        debug!("{:?} Updated {} message(s) in {:?}", user, updated, folder);
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    use rayon::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::support::clock::{system_clock, ManualClock};

    fn config(max_wait_millis: u64) -> JsonMessageCacheConfig {
        JsonMessageCacheConfig {
            max_wait_millis: Some(max_wait_millis),
            ..JsonMessageCacheConfig::default()
        }
    }

    fn cache() -> JsonMessageCache {
        JsonMessageCache::new(config(50), Scheduler::new(), system_clock())
    }

    fn message(id: &str, flags: u32) -> Value {
        json!({ "id": id, "folder": "INBOX", "flags": flags, "unread": 0 })
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|&s| s.to_owned()).collect()
    }

    #[test]
    fn put_get_remove_scenario() {
        let cache = cache();
        cache.put(0, "INBOX", "42", rendered(message("42", 0)), 7, 1);

        let got = cache.get(0, "INBOX", "42", 7, 1).unwrap().unwrap();
        assert_eq!(message("42", 0), got);

        let removed = cache.remove(0, "INBOX", "42", 7, 1).unwrap().unwrap();
        assert_eq!(message("42", 0), removed);
        assert_eq!(None, cache.get(0, "INBOX", "42", 7, 1).unwrap());
    }

    #[test]
    fn put_if_absent_keeps_existing() {
        let cache = cache();
        let first = rendered(message("1", 0));
        let second = rendered(message("1", 8));
        assert!(cache.put_if_absent(0, "INBOX", "1", first, 7, 1));
        assert!(!cache.put_if_absent(0, "INBOX", "1", second, 7, 1));
        assert_eq!(
            Some(message("1", 0)),
            cache.get(0, "INBOX", "1", 7, 1).unwrap()
        );
    }

    #[test]
    fn misses_at_every_level() {
        let cache = cache();
        cache.put(0, "INBOX", "1", rendered(message("1", 0)), 7, 1);

        assert_eq!(None, cache.get(0, "INBOX", "1", 8, 1).unwrap());
        assert_eq!(None, cache.get(0, "INBOX", "1", 7, 2).unwrap());
        assert_eq!(None, cache.get(1, "INBOX", "1", 7, 1).unwrap());
        assert_eq!(None, cache.get(0, "Sent", "1", 7, 1).unwrap());
        assert_eq!(None, cache.get(0, "INBOX", "2", 7, 1).unwrap());
        assert_eq!(None, cache.remove(0, "INBOX", "2", 7, 1).unwrap());
        assert!(cache.contains_key(0, "INBOX", "1", 7, 1));
    }

    #[test]
    fn returned_copies_are_independent() {
        let cache = cache();
        cache.put(0, "INBOX", "1", rendered(message("1", 0)), 7, 1);

        let mut first = cache.get(0, "INBOX", "1", 7, 1).unwrap().unwrap();
        first["flags"] = json!(999);
        first["nested"] = json!({ "added": true });

        let second = cache.get(0, "INBOX", "1", 7, 1).unwrap().unwrap();
        assert_eq!(message("1", 0), second);

        // And in-place updates of the master don't reach old copies
        cache.update_flags(0, "INBOX", None, MailFlags::FLAGGED, true, 7, 1);
        assert_eq!(json!(0), second["flags"]);
        let third = cache.get(0, "INBOX", "1", 7, 1).unwrap().unwrap();
        assert_eq!(json!(8), third["flags"]);
    }

    #[test]
    fn concurrent_gets_render_once() {
        let cache = cache();
        let renders = Arc::new(AtomicUsize::new(0));
        {
            let renders = Arc::clone(&renders);
            cache.put(
                0,
                "INBOX",
                "1",
                defer(move || {
                    renders.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(100));
                    Ok(message("1", 0))
                }),
                7,
                1,
            );
        }

        let results = (0..32)
            .into_par_iter()
            .map(|_| cache.get(0, "INBOX", "1", 7, 1).unwrap().unwrap())
            .collect::<Vec<_>>();

        assert_eq!(1, renders.load(Ordering::SeqCst));
        assert!(results.iter().all(|r| *r == message("1", 0)));
    }

    #[test]
    fn slow_rendering_falls_back_to_caller() {
        let cache = JsonMessageCache::new(
            config(10),
            Scheduler::new(),
            system_clock(),
        );
        cache.put(
            0,
            "INBOX",
            "1",
            defer(|| {
                thread::sleep(Duration::from_millis(80));
                Ok(message("1", 0))
            }),
            7,
            1,
        );

        let start = Instant::now();
        let got = cache.get(0, "INBOX", "1", 7, 1).unwrap();
        assert_eq!(Some(message("1", 0)), got);
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn rendering_failure_is_reported() {
        let cache = cache();
        cache.put(
            0,
            "INBOX",
            "1",
            defer(|| Err("message vanished".into())),
            7,
            1,
        );

        assert_matches!(
            Err(Error::Computation(_)),
            cache.get(0, "INBOX", "1", 7, 1)
        );
        // Still cached; every later reader sees the same failure
        assert_matches!(
            Err(Error::Computation(_)),
            cache.get(0, "INBOX", "1", 7, 1)
        );
    }

    #[test]
    fn switch_seen_flag_updates_targets_and_unread_everywhere() {
        let cache = cache();
        for id in &["1", "2", "3"] {
            cache.put(0, "INBOX", id, rendered(message(id, 1)), 7, 1);
        }
        cache.put(0, "Sent", "1", rendered(message("1", 0)), 7, 1);

        cache.switch_seen_flag(0, "INBOX", Some(&ids(&["2"])), true, 5, 7, 1);

        for id in &["1", "2", "3"] {
            let m = cache.get(0, "INBOX", id, 7, 1).unwrap().unwrap();
            assert_eq!(json!(5), m["unread"], "unread of {}", id);
            let expected_flags = if *id == "2" { 1 | 32 } else { 1 };
            assert_eq!(json!(expected_flags), m["flags"], "flags of {}", id);
        }

        let other = cache.get(0, "Sent", "1", 7, 1).unwrap().unwrap();
        assert_eq!(message("1", 0), other);

        cache.switch_seen_flag(0, "INBOX", None, false, 3, 7, 1);
        for id in &["1", "2", "3"] {
            let m = cache.get(0, "INBOX", id, 7, 1).unwrap().unwrap();
            assert_eq!(json!(3), m["unread"]);
            assert_eq!(json!(1), m["flags"]);
        }
    }

    #[test]
    fn flag_updates_skip_unsettled_messages() {
        let cache = JsonMessageCache::new(
            config(5),
            Scheduler::new(),
            system_clock(),
        );
        cache.put(0, "INBOX", "1", rendered(message("1", 0)), 7, 1);
        cache.put(0, "INBOX", "2", defer(|| Ok(message("2", 0))), 7, 1);

        cache.update_flags(0, "INBOX", None, MailFlags::DELETED, true, 7, 1);
        cache.update_color_flag(0, "INBOX", Some(&ids(&["1", "2"])), 4, 7, 1);

        let one = cache.get(0, "INBOX", "1", 7, 1).unwrap().unwrap();
        assert_eq!(json!(2), one["flags"]);
        assert_eq!(json!(4), one["color_label"]);

        // Nobody had rendered 2 during the updates, so it was left alone;
        // reading it now renders it fresh.
        let two = cache.get(0, "INBOX", "2", 7, 1).unwrap().unwrap();
        assert_eq!(message("2", 0), two);
    }

    #[test]
    fn removal_cascades_to_folder_and_user() {
        let cache = cache();
        cache.put(0, "INBOX", "1", rendered(message("1", 0)), 7, 1);
        cache.put(0, "INBOX", "2", rendered(message("2", 0)), 7, 1);
        cache.put(0, "Sent", "3", rendered(message("3", 0)), 7, 1);
        assert_eq!(1, cache.user_count());
        assert_eq!(2, cache.folder_count(7, 1));

        cache.remove(0, "INBOX", "1", 7, 1).unwrap();
        assert!(cache.contains_folder(0, "INBOX", 7, 1));

        cache.remove(0, "INBOX", "2", 7, 1).unwrap();
        assert!(!cache.contains_folder(0, "INBOX", 7, 1));
        assert_eq!(1, cache.folder_count(7, 1));
        assert!(cache.contains_user(7, 1));

        cache.remove(0, "Sent", "3", 7, 1).unwrap();
        assert!(!cache.contains_folder(0, "Sent", 7, 1));
        assert!(!cache.contains_user(7, 1));
        assert_eq!(0, cache.user_count());
    }

    #[test]
    fn bulk_removal() {
        let cache = cache();
        for folder in &["INBOX", "Sent", "Trash"] {
            cache.put(0, folder, "1", rendered(message("1", 0)), 7, 1);
        }
        cache.put(1, "INBOX", "1", rendered(message("1", 0)), 7, 1);
        cache.put(0, "INBOX", "1", rendered(message("1", 0)), 8, 1);

        assert!(cache.remove_folder(0, "Trash", 7, 1));
        assert!(!cache.remove_folder(0, "Trash", 7, 1));
        assert_eq!(3, cache.folder_count(7, 1));

        cache.remove_all_folders_except(0, "INBOX", 7, 1);
        assert_eq!(1, cache.folder_count(7, 1));
        assert!(cache.contains_folder(0, "INBOX", 7, 1));
        assert!(!cache.contains_folder(1, "INBOX", 7, 1));

        assert!(cache.remove_user(7, 1));
        assert!(!cache.contains_user(7, 1));
        assert!(cache.contains_user(8, 1));

        cache.clear();
        assert_eq!(0, cache.user_count());
    }

    #[test]
    fn levels_expire_independently() {
        let clock = ManualClock::new();
        let config = JsonMessageCacheConfig {
            user_ttl_secs: Some(100),
            folder_ttl_secs: Some(10),
            ..JsonMessageCacheConfig::default()
        };
        let cache = JsonMessageCache::new(
            config,
            Scheduler::new(),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );

        cache.put(0, "INBOX", "1", rendered(message("1", 0)), 7, 1);
        clock.advance(Duration::from_secs(10));
        assert!(!cache.contains_folder(0, "INBOX", 7, 1));
        assert!(cache.contains_user(7, 1));

        // The user's folder map is still there and takes new folders
        cache.put(0, "Sent", "1", rendered(message("1", 0)), 7, 1);
        assert!(cache.contains_key(0, "Sent", "1", 7, 1));

        clock.advance(Duration::from_secs(90));
        assert!(!cache.contains_user(7, 1));
        assert!(!cache.contains_key(0, "Sent", "1", 7, 1));
        assert_eq!(1, cache.users.sweep());
    }

    #[test]
    fn expired_user_map_stops_sweeping() {
        let clock = ManualClock::new();
        let cache = JsonMessageCache::new(
            JsonMessageCacheConfig {
                user_ttl_secs: Some(5),
                ..JsonMessageCacheConfig::default()
            },
            Scheduler::new(),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        cache.put(0, "INBOX", "1", rendered(message("1", 0)), 7, 1);
        let folders = cache.users.get(&UserKey::new(7, 1)).unwrap();
        assert!(folders.is_sweeping());

        clock.advance(Duration::from_secs(5));
        assert_eq!(1, cache.users.sweep());
        assert!(!folders.is_sweeping());
        assert!(folders.is_empty());
    }

    #[test]
    fn removed_user_maps_stop_sweeping() {
        let cache = JsonMessageCache::new(
            JsonMessageCacheConfig::default(),
            Scheduler::new(),
            ManualClock::new() as Arc<dyn Clock>,
        );
        let folders_of = |user_id| {
            cache.users.get(&UserKey::new(user_id, 1)).unwrap()
        };

        // Cascade from removing the last message
        cache.put(0, "INBOX", "1", rendered(message("1", 0)), 7, 1);
        let folders = folders_of(7);
        assert!(folders.is_sweeping());
        cache.remove(0, "INBOX", "1", 7, 1).unwrap();
        assert!(!cache.contains_user(7, 1));
        assert!(!folders.is_sweeping());

        cache.put(0, "INBOX", "1", rendered(message("1", 0)), 8, 1);
        let folders = folders_of(8);
        assert!(cache.remove_user(8, 1));
        assert!(!folders.is_sweeping());

        cache.put(0, "INBOX", "1", rendered(message("1", 0)), 9, 1);
        let folders = folders_of(9);
        cache.clear();
        assert!(!folders.is_sweeping());
        assert_eq!(0, cache.user_count());
    }
}
