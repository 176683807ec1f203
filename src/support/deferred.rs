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

//! Single-assignment deferred values.
//!
//! A `Deferred` starts out holding the computation that will produce its
//! value. Whichever thread calls `run` first takes the computation and runs
//! it; every other thread can only wait for the outcome. Once settled, the
//! outcome (a value or the failure cause) never changes, so at most one
//! computation ever happens per deferred value no matter how many threads
//! want it.
//!
//! How long a reader is prepared to wait before doing the work itself is a
//! `WaitPolicy`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use thiserror::Error;

use super::error::{BoxError, Cause, Error};

type Computation<T> = Box<dyn FnOnce() -> Result<T, BoxError> + Send>;

enum State<T> {
    Pending(Computation<T>),
    Running,
    Settled(Result<T, Cause>),
}

#[derive(Error, Debug)]
#[error("Computation panicked: {0}")]
struct Panicked(String);

pub struct Deferred<T> {
    state: Mutex<State<T>>,
    settled: Condvar,
}

impl<T: Clone> Deferred<T> {
    /// Create a deferred value which will be produced by `computation` once
    /// somebody runs it.
    pub fn new(
        computation: impl FnOnce() -> Result<T, BoxError> + Send + 'static,
    ) -> Self {
        Deferred {
            state: Mutex::new(State::Pending(Box::new(computation))),
            settled: Condvar::new(),
        }
    }

    /// Create a deferred value which is already settled with `value`.
    pub fn ready(value: T) -> Self {
        Deferred {
            state: Mutex::new(State::Settled(Ok(value))),
            settled: Condvar::new(),
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(*self.state.lock().unwrap(), State::Settled(_))
    }

    /// Run the computation in the calling thread, unless somebody already
    /// started it.
    ///
    /// Returns whether this call did the work. A computation which panics
    /// settles the value with a failure rather than leaving waiters stranded.
    pub fn run(&self) -> bool {
        let computation = {
            let mut state = self.state.lock().unwrap();
            match std::mem::replace(&mut *state, State::Running) {
                State::Pending(computation) => computation,
                other => {
                    *state = other;
                    return false;
                },
            }
        };

        let outcome = match panic::catch_unwind(AssertUnwindSafe(computation)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Cause::from(e)),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_owned());
                Err(Arc::new(Panicked(message)) as Cause)
            },
        };

        *self.state.lock().unwrap() = State::Settled(outcome);
        self.settled.notify_all();
        true
    }

    /// Return the outcome if already settled, without blocking.
    pub fn try_get(&self) -> Option<Result<T, Error>> {
        outcome(&*self.state.lock().unwrap())
    }

    /// Block until somebody settles the value.
    ///
    /// This does not run the computation; if nobody ever calls `run`, this
    /// never returns. Prefer `WaitPolicy::resolve`.
    pub fn wait(&self) -> Result<T, Error> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(result) = outcome(&*state) {
                return result;
            }
            state = self.settled.wait(state).unwrap();
        }
    }

    /// Wait up to `timeout` for somebody to settle the value.
    ///
    /// Returns `None` if it is still unsettled when the time is up.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, Error>> {
        let state = self.state.lock().unwrap();
        let (state, _) = self
            .settled
            .wait_timeout_while(state, timeout, |s| {
                !matches!(*s, State::Settled(_))
            })
            .unwrap();
        outcome(&*state)
    }
}

fn outcome<T: Clone>(state: &State<T>) -> Option<Result<T, Error>> {
    match *state {
        State::Settled(Ok(ref value)) => Some(Ok(value.clone())),
        State::Settled(Err(ref cause)) => {
            Some(Err(Error::Computation(Arc::clone(cause))))
        },
        State::Pending(_) | State::Running => None,
    }
}

/// How long a reader of a deferred value waits for another thread before
/// acting on its own.
#[derive(Clone, Copy, Debug)]
pub struct WaitPolicy {
    pub max_wait: Duration,
}

impl WaitPolicy {
    pub fn new(max_wait: Duration) -> Self {
        WaitPolicy { max_wait }
    }

    /// Obtain the outcome of `deferred`, never waiting on a computation
    /// nobody is running.
    ///
    /// Waits up to `max_wait` for another thread (e.g. a prefetcher) to
    /// settle the value. If it is still unsettled after that, the calling
    /// thread runs the computation itself. If another thread started running
    /// it in the meantime, this waits for that run instead of starting a
    /// second one.
    pub fn resolve<T: Clone>(&self, deferred: &Deferred<T>) -> Result<T, Error> {
        if let Some(outcome) = deferred.wait_timeout(self.max_wait) {
            return outcome;
        }

        deferred.run();
        deferred.wait()
    }

    /// Obtain the value of `deferred` if it settles successfully within
    /// `max_wait`.
    ///
    /// For best-effort updates: an unsettled or failed value is simply
    /// `None`, and the computation is never run here.
    pub fn peek<T: Clone>(&self, deferred: &Deferred<T>) -> Option<T> {
        deferred.wait_timeout(self.max_wait).and_then(Result::ok)
    }
}
