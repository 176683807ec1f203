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

//! Background work for things nobody should wait on.
//!
//! Session cleanup and message prefetching are handed to a small pool of
//! worker threads. The pool is geared to sporadic work with occasional
//! bursts: threads are only spawned once there is something to do, and if
//! too much work is queued the submitter simply does the work itself, which
//! gives natural back-pressure.

use std::sync::Mutex;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use lazy_static::lazy_static;
use log::{error, warn};

const MAX_BACKGROUND_WORK: usize = 256;

lazy_static! {
    static ref MAX_WORKERS: usize = std::env::var("MAILCACHE_BACKGROUND_THREADS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(2);
}

type Job = Box<dyn FnOnce() + Send>;

pub struct BackgroundWorker {
    queue: Sender<Job>,
    receiver: Receiver<Job>,
    spawned: Mutex<usize>,
    max_workers: usize,
}

impl Default for BackgroundWorker {
    fn default() -> Self {
        Self::new(*MAX_WORKERS)
    }
}

impl BackgroundWorker {
    pub fn new(max_workers: usize) -> Self {
        let (queue, receiver) = channel::bounded(MAX_BACKGROUND_WORK);
        BackgroundWorker {
            queue,
            receiver,
            spawned: Mutex::new(0),
            max_workers: max_workers.max(1),
        }
    }

    /// Run the given task in the background.
    ///
    /// Usually this returns immediately and `task` runs on a worker thread at
    /// some point in the future, in no particular order relative to other
    /// tasks. If the queue is full, or no worker could be started, the task
    /// runs synchronously before this call returns.
    pub fn run_in_background(&self, task: impl FnOnce() + Send + 'static) {
        if !self.ensure_worker() {
            task();
            return;
        }

        match self.queue.try_send(Box::new(task)) {
            Ok(()) => (),
            Err(TrySendError::Full(task))
            | Err(TrySendError::Disconnected(task)) => {
                warn!("Background work queue is full; running task inline");
                task()
            },
        }
    }

    fn ensure_worker(&self) -> bool {
        let mut spawned = self.spawned.lock().unwrap();
        // Spawn another worker only when work is already backing up.
        if *spawned > 0
            && (*spawned >= self.max_workers || self.receiver.is_empty())
        {
            return true;
        }

        let receiver = self.receiver.clone();
        match thread::Builder::new()
            .name(format!("mailcache-worker-{}", *spawned))
            .spawn(move || {
                for job in receiver.iter() {
                    job();
                }
            }) {
            Ok(_) => {
                *spawned += 1;
                true
            },
            Err(e) => {
                error!("Failed to spawn background worker: {}", e);
                *spawned > 0
            },
        }
    }
}
