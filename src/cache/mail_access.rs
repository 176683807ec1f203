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

//! Caching of live mail-server connections.
//!
//! Establishing a connection (connect, TLS, login) is much more expensive
//! than using one, so connections a request is done with are handed to a
//! `MailAccessCache` and the next request for the same user and account
//! takes one from there before opening a new one.
//!
//! Two implementations exist: `SingleSlotMailAccessCache` keeps at most one
//! connection per key, `ManagedMailAccessCache` keeps a bounded pool per key
//! and closes connections which sit idle too long.

use std::time::Duration;

use log::debug;

use super::keys::MailAccessKey;
use crate::support::error::Error;

/// A live connection to a mail server.
pub trait MailAccess: Send + 'static {
    /// How long this connection may sit idle in a cache.
    ///
    /// `None` means the configured default.
    fn idle_time(&self) -> Option<Duration> {
        None
    }

    /// Cleanly close the connection.
    ///
    /// Called by the cache for every connection it discards instead of
    /// handing out.
    fn close(self);
}

/// Reports how many sessions a user currently has.
pub trait SessionDirectory: Send + Sync {
    fn session_count(&self, user_id: u32, context_id: u32) -> usize;
}

/// Lists the mail accounts a user has.
pub trait AccountDirectory: Send + Sync {
    fn account_ids(
        &self,
        user_id: u32,
        context_id: u32,
    ) -> Result<Vec<u32>, Error>;
}

pub trait MailAccessCache<A: MailAccess>: Send + Sync {
    /// Offer a connection for reuse.
    ///
    /// If the cache has no room for it, the connection is given back in
    /// `Err`; the caller then closes it (or keeps using it) itself.
    fn put_mail_access(&self, key: MailAccessKey, access: A) -> Result<(), A>;

    /// Take a cached connection, if there is one.
    fn remove_mail_access(&self, key: &MailAccessKey) -> Option<A>;

    fn contains_mail_access(&self, key: &MailAccessKey) -> bool;

    /// Remove and close all connections of all accounts of a user, provided
    /// the user has no sessions left.
    ///
    /// Returns the number of connections closed.
    fn clear_user_entries(
        &self,
        user_id: u32,
        context_id: u32,
    ) -> Result<usize, Error>;

    /// Close everything. The cache must not be used afterwards.
    fn dispose(&self);
}

/// The part of `clear_user_entries` common to all implementations.
///
/// `take_all` removes and returns every connection cached for one key.
pub(super) fn clear_user_entries<A: MailAccess>(
    sessions: &dyn SessionDirectory,
    accounts: &dyn AccountDirectory,
    user_id: u32,
    context_id: u32,
    mut take_all: impl FnMut(&MailAccessKey) -> Vec<A>,
) -> Result<usize, Error> {
    let remaining = sessions.session_count(user_id, context_id);
    if remaining > 0 {
        debug!(
            "UserKey({}@{}) Keeping connections for {} remaining session(s)",
            user_id, context_id, remaining
        );
        return Ok(0);
    }

    let mut closed = 0;
    for account_id in accounts.account_ids(user_id, context_id)? {
        let key = MailAccessKey::new(user_id, account_id, context_id);
        for access in take_all(&key) {
            access.close();
            closed += 1;
        }
    }

    if closed > 0 {
        debug!(
            "UserKey({}@{}) Closed {} cached connection(s)",
            user_id, context_id, closed
        );
    }
    Ok(closed)
}
