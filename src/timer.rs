// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    cmp::Ordering as CmpOrdering,
    collections::BinaryHeap,
    sync::{Arc, Condvar, Mutex},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, span, Level};

/// A deadline-ordered callback queue backed by a single worker thread.
///
/// The timeline scheduler queues every note on/off of a playback run here and
/// keeps the returned handles so pause/stop can cancel the ones that haven't
/// fired yet. Cancellation reports whether it won the race against the worker.
pub struct TimerQueue {
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
}

struct Shared {
    queue: Mutex<Queue>,
    condvar: Condvar,
}

struct Queue {
    tasks: BinaryHeap<Task>,
    next_seq: u64,
    shutdown: bool,
}

/// The state of a scheduled task. Transitions are one-way: a task either
/// fires or is cancelled, never both.
#[derive(PartialEq)]
enum TaskState {
    Pending,
    Cancelled,
    Fired,
}

struct Task {
    deadline: Instant,
    /// Breaks deadline ties so same-instant tasks fire in schedule order.
    seq: u64,
    state: Arc<Mutex<TaskState>>,
    callback: Box<dyn FnOnce() + Send>,
}

/// A handle to a scheduled task.
#[derive(Clone)]
pub struct TaskHandle {
    state: Arc<Mutex<TaskState>>,
}

impl TaskHandle {
    /// Cancels the task. Returns true if the task was still pending, false if
    /// it already fired or was already cancelled.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock().expect("Error getting lock");
        if *state == TaskState::Pending {
            *state = TaskState::Cancelled;
            true
        } else {
            false
        }
    }

    /// Returns true if the task's callback has run.
    pub fn has_fired(&self) -> bool {
        *self.state.lock().expect("Error getting lock") == TaskState::Fired
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; reverse to pop the earliest deadline.
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerQueue {
    /// Creates a timer queue and starts its worker thread.
    pub fn new() -> TimerQueue {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                tasks: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            condvar: Condvar::new(),
        });

        let worker = {
            let shared = shared.clone();
            thread::spawn(move || {
                let span = span!(Level::INFO, "timer queue worker");
                let _enter = span.enter();
                Self::run(shared)
            })
        };

        TimerQueue {
            shared,
            worker: Some(worker),
        }
    }

    /// Schedules a callback to run after the given delay.
    pub fn schedule_in<F>(&self, delay: Duration, callback: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_at(Instant::now() + delay, callback)
    }

    /// Schedules a callback to run at the given instant. A deadline in the
    /// past fires as soon as the worker gets to it.
    pub fn schedule_at<F>(&self, deadline: Instant, callback: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let state = Arc::new(Mutex::new(TaskState::Pending));
        {
            let mut queue = self.shared.queue.lock().expect("Error getting lock");
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.tasks.push(Task {
                deadline,
                seq,
                state: state.clone(),
                callback: Box::new(callback),
            });
        }
        self.shared.condvar.notify_all();
        TaskHandle { state }
    }

    /// The worker loop. Pops due tasks and runs their callbacks with the
    /// queue lock released, so callbacks may schedule further tasks.
    fn run(shared: Arc<Shared>) {
        let mut queue = shared.queue.lock().expect("Error getting lock");
        loop {
            if queue.shutdown {
                debug!("Timer queue worker stopping.");
                return;
            }

            let now = Instant::now();
            match queue.tasks.peek() {
                None => {
                    queue = shared.condvar.wait(queue).expect("Error getting lock");
                }
                Some(task) if task.deadline > now => {
                    let timeout = task.deadline - now;
                    (queue, _) = shared
                        .condvar
                        .wait_timeout(queue, timeout)
                        .expect("Error getting lock");
                }
                Some(_) => {
                    let task = queue.tasks.pop().expect("peeked task");
                    let fire = {
                        let mut state = task.state.lock().expect("Error getting lock");
                        if *state == TaskState::Pending {
                            *state = TaskState::Fired;
                            true
                        } else {
                            false
                        }
                    };
                    if fire {
                        drop(queue);
                        (task.callback)();
                        queue = shared.queue.lock().expect("Error getting lock");
                    }
                }
            }
        }
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock().expect("Error getting lock");
            queue.shutdown = true;
        }
        self.shared.condvar.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
