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

//! A single shared thread that runs periodic sweeps.
//!
//! Every cache that needs a background eviction pass registers a task here
//! with its own interval instead of spawning a thread of its own. Tasks
//! return whether they want to keep running; a task whose cache has gone
//! away returns `false` and is dropped.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

type Task = Box<dyn FnMut() -> bool + Send>;

enum Control {
    Register {
        id: u64,
        interval: Duration,
        task: Task,
    },
    Cancel(u64),
    Shutdown,
}

struct Scheduled {
    interval: Duration,
    /// `None` when the interval is too long to express as an `Instant`; such
    /// a task stays registered but never runs.
    due: Option<Instant>,
    task: Task,
}

/// The longest the sweep thread sleeps without looking at its tasks.
const MAX_IDLE_WAIT: Duration = Duration::from_secs(3600);

fn next_due(interval: Duration) -> Option<Instant> {
    Instant::now().checked_add(interval)
}

pub struct Scheduler {
    control: Sender<Control>,
    next_id: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Keeps a scheduled task registered.
///
/// Dropping the handle (or calling `cancel`) unregisters the task. A run
/// which is already in progress is allowed to finish.
pub struct SweepHandle {
    id: u64,
    control: Sender<Control>,
}

impl SweepHandle {
    pub fn cancel(self) {}
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        // Fails only once the scheduler has shut down, in which case there is
        // nothing left to cancel.
        let _ = self.control.send(Control::Cancel(self.id));
    }
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        let (send, recv) = channel::unbounded();
        let worker = thread::Builder::new()
            .name("mailcache-sweep".to_owned())
            .spawn(move || run_schedule(recv))
            .ok();
        if worker.is_none() {
            error!("Failed to spawn the sweep thread; caches will not expire");
        }

        Arc::new(Scheduler {
            control: send,
            next_id: AtomicU64::new(1),
            worker: Mutex::new(worker),
        })
    }

    /// Run `task` every `interval` until it returns false or the returned
    /// handle is dropped.
    ///
    /// The first run happens one interval from now.
    pub fn schedule(
        &self,
        interval: Duration,
        task: impl FnMut() -> bool + Send + 'static,
    ) -> SweepHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.control.send(Control::Register {
            id,
            interval: interval.max(Duration::from_millis(1)),
            task: Box::new(task),
        });
        SweepHandle {
            id,
            control: self.control.clone(),
        }
    }

    /// Stop the sweep thread and wait for it to exit.
    ///
    /// Idempotent. Handles outstanding after this point are inert.
    pub fn shutdown(&self) {
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = self.control.send(Control::Shutdown);
            if worker.join().is_err() {
                error!("Sweep thread panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_schedule(control: Receiver<Control>) {
    let mut tasks = HashMap::<u64, Scheduled>::new();

    loop {
        let received = match tasks.values().filter_map(|t| t.due).min() {
            None => control
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
            Some(due) => control.recv_timeout(
                due.saturating_duration_since(Instant::now())
                    .min(MAX_IDLE_WAIT),
            ),
        };

        match received {
            Ok(Control::Register { id, interval, task }) => {
                let due = next_due(interval);
                if due.is_none() {
                    warn!(
                        "Sweep task {} interval {:?} is unbounded; not running",
                        id, interval
                    );
                }
                tasks.insert(
                    id,
                    Scheduled {
                        interval,
                        due,
                        task,
                    },
                );
            },
            Ok(Control::Cancel(id)) => {
                tasks.remove(&id);
            },
            Ok(Control::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                break
            },
            Err(RecvTimeoutError::Timeout) => (),
        }

        let now = Instant::now();
        let due = tasks
            .iter()
            .filter(|&(_, t)| t.due.map_or(false, |due| due <= now))
            .map(|(&id, _)| id)
            .collect::<Vec<_>>();

        for id in due {
            let keep = match tasks.get_mut(&id) {
                None => continue,
                Some(scheduled) => {
                    match panic::catch_unwind(AssertUnwindSafe(|| {
                        (scheduled.task)()
                    })) {
                        Ok(keep) => {
                            scheduled.due = next_due(scheduled.interval);
                            keep
                        },
                        Err(_) => {
                            error!("Sweep task {} panicked; dropping it", id);
                            false
                        },
                    }
                },
            };

            if !keep {
                debug!("Sweep task {} finished", id);
                tasks.remove(&id);
            }
        }
    }

    info!("Sweep thread exiting with {} task(s) registered", tasks.len());
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn wait_for(what: impl Fn() -> bool) {
        let give_up = Instant::now() + Duration::from_secs(5);
        while !what() {
            assert!(Instant::now() < give_up, "condition never became true");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn tasks_run_repeatedly_until_cancelled() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let handle = {
            let runs = Arc::clone(&runs);
            scheduler.schedule(Duration::from_millis(5), move || {
                runs.fetch_add(1, Ordering::SeqCst);
                true
            })
        };

        wait_for(|| runs.load(Ordering::SeqCst) >= 3);
        handle.cancel();
        // Let any queued cancel take effect
        thread::sleep(Duration::from_millis(30));
        let after_cancel = runs.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(after_cancel, runs.load(Ordering::SeqCst));

        scheduler.shutdown();
    }

    #[test]
    fn task_returning_false_is_dropped() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let _handle = {
            let runs = Arc::clone(&runs);
            scheduler.schedule(Duration::from_millis(2), move || {
                runs.fetch_add(1, Ordering::SeqCst);
                false
            })
        };

        wait_for(|| runs.load(Ordering::SeqCst) >= 1);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(1, runs.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_task_does_not_kill_the_thread() {
        crate::init_test_log();

        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let _bad = scheduler.schedule(Duration::from_millis(2), || {
            panic!("sweep exploded")
        });
        let _good = {
            let runs = Arc::clone(&runs);
            scheduler.schedule(Duration::from_millis(2), move || {
                runs.fetch_add(1, Ordering::SeqCst);
                true
            })
        };

        wait_for(|| runs.load(Ordering::SeqCst) >= 5);
    }

    #[test]
    fn unrepresentable_interval_does_not_stop_other_tasks() {
        crate::init_test_log();

        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let _forever = scheduler
            .schedule(Duration::from_secs(u64::MAX / 2), || {
                panic!("must never run")
            });
        let _good = {
            let runs = Arc::clone(&runs);
            scheduler.schedule(Duration::from_millis(2), move || {
                runs.fetch_add(1, Ordering::SeqCst);
                true
            })
        };

        wait_for(|| runs.load(Ordering::SeqCst) >= 3);
        scheduler.shutdown();
    }
}
