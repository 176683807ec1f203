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

//! The per-key connection pool of `ManagedMailAccessCache`.
//!
//! A priority queue of connections ordered by the instant each one must be
//! closed, soonest first. `offer` and `poll` are plain bounded-queue
//! operations which pay no attention to expiry; only `poll_if_expired`, used
//! by the sweep, looks at the deadline.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::time::Instant;

struct Pooled<A> {
    access: A,
    // `None` never expires.
    deadline: Option<Instant>,
    // Breaks ties between equal deadlines in insertion order.
    seq: u64,
}

impl<A> Pooled<A> {
    fn order_key(&self) -> (bool, Option<Instant>, u64) {
        (self.deadline.is_none(), self.deadline, self.seq)
    }
}

impl<A> PartialEq for Pooled<A> {
    fn eq(&self, other: &Self) -> bool {
        self.order_key() == other.order_key()
    }
}

impl<A> Eq for Pooled<A> {}

impl<A> PartialOrd for Pooled<A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<A> Ord for Pooled<A> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

struct Inner<A> {
    heap: BinaryHeap<Reverse<Pooled<A>>>,
    next_seq: u64,
}

pub struct MailAccessQueue<A> {
    inner: Mutex<Inner<A>>,
    capacity: Option<usize>,
}

impl<A> MailAccessQueue<A> {
    /// Create a queue holding at most `capacity` connections, or any number
    /// if `None`.
    pub fn new(capacity: Option<usize>) -> Self {
        MailAccessQueue {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            capacity,
        }
    }

    /// Add `access`, to be closed at `deadline`, or never if `None`.
    ///
    /// If the queue is full, `access` is returned.
    pub fn offer(&self, access: A, deadline: Option<Instant>) -> Result<(), A> {
        let mut inner = self.inner.lock().unwrap();
        if self.capacity.map_or(false, |cap| inner.heap.len() >= cap) {
            return Err(access);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(Reverse(Pooled {
            access,
            deadline,
            seq,
        }));
        Ok(())
    }

    /// Take the connection with the earliest deadline, expired or not.
    pub fn poll(&self) -> Option<A> {
        let mut inner = self.inner.lock().unwrap();
        inner.heap.pop().map(|Reverse(p)| p.access)
    }

    /// Take the connection with the earliest deadline, but only if that
    /// deadline is not after `now`.
    pub fn poll_if_expired(&self, now: Instant) -> Option<A> {
        let mut inner = self.inner.lock().unwrap();
        let expired = inner
            .heap
            .peek()
            .and_then(|&Reverse(ref head)| head.deadline)
            .map_or(false, |deadline| deadline <= now);
        if expired {
            inner.heap.pop().map(|Reverse(p)| p.access)
        } else {
            None
        }
    }

    /// Remove everything, in deadline order.
    pub fn drain(&self) -> Vec<A> {
        let mut inner = self.inner.lock().unwrap();
        let mut drained = Vec::with_capacity(inner.heap.len());
        while let Some(Reverse(p)) = inner.heap.pop() {
            drained.push(p.access);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        0 == self.len()
    }
}
