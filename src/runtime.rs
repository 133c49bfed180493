//! Process-scoped time and background-task seams.
//!
//! Every component takes its clock and spawner explicitly so tests can build
//! isolated instances with virtual time and deterministic background work.

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;

    /// Blocks the calling thread. Virtual clocks advance instead.
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock for tests. `sleep` advances time without blocking.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
    slept: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
            slept: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = lock(&self.now);
        *now += to_chrono(duration);
    }

    /// Total time spent in `sleep` so far.
    pub fn slept(&self) -> Duration {
        *lock(&self.slept)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }

    fn sleep(&self, duration: Duration) {
        *lock(&self.slept) += duration;
        self.advance(duration);
    }
}

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs work detached from the caller. An error means the task was dropped
/// without running.
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, name: &str, task: Task) -> io::Result<()>;
}

/// Spawns each task on its own detached OS thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSpawner;

impl TaskSpawner for ThreadSpawner {
    fn spawn(&self, name: &str, task: Task) -> io::Result<()> {
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(task)
            .map(|_| ())
    }
}

/// Queues tasks until `run_pending` is called.
#[derive(Clone, Default)]
pub struct DeferredSpawner {
    queue: Arc<Mutex<Vec<(String, Task)>>>,
}

impl DeferredSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Runs every queued task on the current thread, returning how many ran.
    pub fn run_pending(&self) -> usize {
        let tasks = std::mem::take(&mut *lock(&self.queue));
        let count = tasks.len();
        for (_, task) in tasks {
            task();
        }
        count
    }
}

impl TaskSpawner for DeferredSpawner {
    fn spawn(&self, name: &str, task: Task) -> io::Result<()> {
        lock(&self.queue).push((name.to_string(), task));
        Ok(())
    }
}

pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Seconds between two instants, never negative.
pub fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let millis = (to - from).num_milliseconds();
    if millis <= 0 { 0.0 } else { millis as f64 / 1000.0 }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
