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

//! Rendering messages before anybody asks for them.
//!
//! When a folder listing is produced, the messages in it are likely to be
//! opened soon. The prefetcher registers a deferred rendering for each one
//! and runs them on the background worker. A request which arrives before
//! the background rendering is done finds the deferred value in the cache
//! and either waits for it or renders it itself, so nothing is ever rendered
//! twice.

use std::sync::Arc;

use log::debug;
use serde_json::Value;

use super::json_message_cache::{defer, JsonMessageCache};
use super::model::MailFlags;
use crate::support::error::BoxError;
use crate::support::threading::BackgroundWorker;

/// A message as it appears in a folder listing.
#[derive(Clone, Debug)]
pub struct ListedMessage {
    pub mail_id: String,
    pub flags: MailFlags,
}

pub struct Prefetcher {
    cache: Arc<JsonMessageCache>,
    worker: Arc<BackgroundWorker>,
    unseen_only: bool,
}

impl Prefetcher {
    pub fn new(
        cache: Arc<JsonMessageCache>,
        worker: Arc<BackgroundWorker>,
    ) -> Self {
        let unseen_only = cache.config().prefetch_unseen_only();
        Prefetcher {
            cache,
            worker,
            unseen_only,
        }
    }

    /// Schedule rendering of the listed messages of a folder which are not
    /// already cached.
    ///
    /// `render` is called with the mail id of each message to render.
    /// Returns the number of renderings scheduled.
    pub fn prefetch<R>(
        &self,
        account_id: u32,
        folder: &str,
        listing: &[ListedMessage],
        render: Arc<R>,
        user_id: u32,
        context_id: u32,
    ) -> usize
    where
        R: Fn(&str) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        let mut scheduled = Vec::new();
        for listed in listing {
            if self.unseen_only && listed.flags.contains(MailFlags::SEEN) {
                continue;
            }

            let render = Arc::clone(&render);
            let mail_id = listed.mail_id.clone();
            let pending = defer(move || render(&mail_id));
            if self.cache.put_if_absent(
                account_id,
                folder,
                &listed.mail_id,
                Arc::clone(&pending),
                user_id,
                context_id,
            ) {
                scheduled.push(pending);
            }
        }

        let n = scheduled.len();
        if n > 0 {
            debug!(
                "UserKey({}@{}) Prefetching {} message(s) of {}:{:?}",
                user_id, context_id, n, account_id, folder
            );
            self.worker.run_in_background(move || {
                for pending in scheduled {
                    // Whoever got there first did the work; either way the
                    // cached value is settled afterwards.
                    pending.run();
                }
            });
        }

        n
    }
}
