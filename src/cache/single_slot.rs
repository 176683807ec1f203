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

//! A mail-access cache holding at most one connection per key.
//!
//! Each key has its own lock, kept in a shared table. Every access takes the
//! key's lock exclusively, so the "is the slot free?" check and the write
//! which depends on it can never be separated by another thread's write.
//!
//! Locks are created on first use and dropped from the table again once
//! their slot is empty and nobody but the table holds them, which keeps the
//! table from growing with every user ever seen.

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex};

use log::debug;

use super::keys::MailAccessKey;
use super::mail_access::{
    self, AccountDirectory, MailAccess, MailAccessCache, SessionDirectory,
};
use crate::support::error::Error;

type Slot<A> = Arc<Mutex<Option<A>>>;

pub struct SingleSlotMailAccessCache<A> {
    slots: Mutex<HashMap<MailAccessKey, Slot<A>>>,
    sessions: Arc<dyn SessionDirectory>,
    accounts: Arc<dyn AccountDirectory>,
}

impl<A: MailAccess> SingleSlotMailAccessCache<A> {
    pub fn new(
        sessions: Arc<dyn SessionDirectory>,
        accounts: Arc<dyn AccountDirectory>,
    ) -> Self {
        SingleSlotMailAccessCache {
            slots: Mutex::new(HashMap::new()),
            sessions,
            accounts,
        }
    }

    /// The number of per-key locks currently in the table.
    pub fn lock_count(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    fn slot(&self, key: MailAccessKey) -> Slot<A> {
        Arc::clone(self.slots.lock().unwrap().entry(key).or_default())
    }

    /// Hand back a slot obtained from `slot`, dropping it from the table if
    /// it is empty and uncontended.
    fn release(&self, key: &MailAccessKey, slot: Slot<A>) {
        let mut slots = self.slots.lock().unwrap();
        // New references are only ever made under the table lock, so if only
        // the table and `slot` refer to it now, nobody can be waiting on it.
        if 2 == Arc::strong_count(&slot) && slot.lock().unwrap().is_none() {
            slots.remove(key);
        }
    }
}

impl<A: MailAccess> MailAccessCache<A> for SingleSlotMailAccessCache<A> {
    fn put_mail_access(&self, key: MailAccessKey, access: A) -> Result<(), A> {
        let slot = self.slot(key);
        let result = {
            let mut held = slot.lock().unwrap();
            if held.is_some() {
                Err(access)
            } else {
                *held = Some(access);
                Ok(())
            }
        };
        self.release(&key, slot);

        match result {
            Ok(()) => debug!("{:?} Cached connection", key),
            Err(_) => debug!("{:?} Slot occupied; connection rejected", key),
        }
        result
    }

    fn remove_mail_access(&self, key: &MailAccessKey) -> Option<A> {
        let slot = self.slots.lock().unwrap().get(key).cloned()?;
        let taken = slot.lock().unwrap().take();
        self.release(key, slot);
        taken
    }

    fn contains_mail_access(&self, key: &MailAccessKey) -> bool {
        let slot = match self.slots.lock().unwrap().get(key) {
            None => return false,
            Some(slot) => Arc::clone(slot),
        };
        let occupied = slot.lock().unwrap().is_some();
        occupied
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
            |key| self.remove_mail_access(key).into_iter().collect(),
        )
    }

    fn dispose(&self) {
        let slots = mem::take(&mut *self.slots.lock().unwrap());
        let mut closed = 0;
        for (_, slot) in slots {
            if let Some(access) = slot.lock().unwrap().take() {
                access.close();
                closed += 1;
            }
        }
        debug!("Single-slot connection cache disposed; closed {}", closed);
    }
}
