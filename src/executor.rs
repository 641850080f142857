//! Cooperative single-threaded execution contexts (TS 38.322's own wording: "the same executor
//! that calls `pull_pdu`", "the same executor that calls `handle_sdu`").
//!
//! The original entity pins itself to whichever of the UE or cell executor owns a given call
//! path and defers cross-path work (timer callbacks, status notifications) onto the right one
//! instead of taking a lock. This crate keeps the shape of that split — `post`/`post_delayed` —
//! but, having no access to the surrounding gNB's real task-executor framework, backs it with
//! either same-thread inline execution (for tests and the loopback demo, mirroring how a unit
//! test stands in a manual_task_worker) or a single background thread carrying a work queue,
//! the same pattern the teacher's `NetStack::new` uses for its packet-processing loop.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// A single-threaded run context that task posted to it will eventually run on, possibly after
/// a given delay. No ordering guarantee is made between tasks posted from different threads
/// beyond "delayed tasks run no earlier than their deadline".
pub trait Executor: Send + Sync {
    fn post(&self, task: Box<dyn FnOnce() + Send>);
    fn post_delayed(&self, delay: Duration, task: Box<dyn FnOnce() + Send>);
}

/// Runs every posted task inline, on the caller's thread. `post_delayed` ignores the delay.
/// Intended for tests and the loopback demo, where there is no real MAC cadence to honor and
/// timer expiry is driven explicitly instead of by wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SameThreadExecutor;

impl Executor for SameThreadExecutor {
    fn post(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }

    fn post_delayed(&self, _delay: Duration, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

enum Job {
    Now(Box<dyn FnOnce() + Send>),
    Shutdown,
}

/// A single background thread draining a queue of immediate and delayed tasks, in the spirit of
/// the teacher's `thread::spawn(move || segment_loop(...))`. Dropping the last `Arc` stops the
/// worker thread.
pub struct ThreadExecutor {
    sender: Sender<Job>,
    _worker: Arc<WorkerHandle>,
}

struct WorkerHandle {
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl ThreadExecutor {
    pub fn spawn() -> Self {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::spawn(move || Self::run(receiver));
        Self {
            sender,
            _worker: Arc::new(WorkerHandle {
                handle: Mutex::new(Some(handle)),
            }),
        }
    }

    fn run(receiver: Receiver<Job>) {
        for job in receiver {
            match job {
                Job::Now(task) => task(),
                Job::Shutdown => break,
            }
        }
    }
}

impl Drop for ThreadExecutor {
    fn drop(&mut self) {
        let _ = self.sender.send(Job::Shutdown);
    }
}

impl Executor for ThreadExecutor {
    fn post(&self, task: Box<dyn FnOnce() + Send>) {
        let _ = self.sender.send(Job::Now(task));
    }

    fn post_delayed(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) {
        // No separate timer wheel: the wrapped task sleeps out the remaining delay on the
        // worker thread itself before running. Serializes with other posted work, which is
        // fine since an RLC entity only ever has t-PollRetransmit/t-Reassembly/t-StatusProhibit
        // alive at once and none of them are on a latency-sensitive path.
        let sender = self.sender.clone();
        let deadline = Instant::now() + delay;
        let _ = sender.send(Job::Now(Box::new(move || {
            let remaining = deadline.saturating_duration_since(Instant::now());
            thread::sleep(remaining);
            task();
        })));
    }
}
