//! Fixed-size worker pool over a bounded task queue.
//!
//! Grounded on the teacher's `async-executor` crate (`Mutex<VecDeque> +
//! Condvar` queue, named `std::thread::Builder` workers, panic-catching
//! dispatch loop), generalized from polling `Future`s to running plain
//! boxed closures since this server is synchronous.

#![warn(clippy::all)]

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    shutdown: AtomicBool,
}

pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

/// Linux `pthread_setname_np` rejects names over 15 bytes + nul;
/// Darwin allows 63. Truncate so `thread::Builder::name` never panics.
fn thread_name(prefix: &str, index: usize) -> String {
    let full = format!("{prefix}-{index}");
    let limit = if cfg!(target_os = "linux") { 15 } else { 63 };
    if full.len() <= limit {
        full
    } else {
        full.chars().take(limit).collect()
    }
}

impl ThreadPool {
    /// Spawns `threads` workers named `{name_prefix}-{n}`, backed by a
    /// queue bounded at `capacity` pending tasks.
    pub fn new(threads: usize, capacity: usize, name_prefix: &str) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            shutdown: AtomicBool::new(false),
        });

        let workers = (0..threads)
            .map(|i| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(thread_name(name_prefix, i))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { shared, workers }
    }

    /// Blocks the caller until there is room in the queue, then enqueues
    /// `task` for a worker to pick up.
    pub fn spawn(&self, task: impl FnOnce() + Send + 'static) {
        let mut queue = self.shared.queue.lock().unwrap();
        while queue.len() >= self.shared.capacity && !self.shared.shutdown.load(Ordering::SeqCst) {
            queue = self.shared.not_full.wait(queue).unwrap();
        }
        queue.push_back(Box::new(task));
        self.shared.not_empty.notify_one();
    }

    /// Signals every worker to stop after draining its current task and
    /// joins them all.
    pub fn shutdown(mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(task) = queue.pop_front() {
                    shared.not_full.notify_one();
                    break Some(task);
                }
                if shared.shutdown.load(Ordering::SeqCst) {
                    break None;
                }
                queue = shared.not_empty.wait(queue).unwrap();
            }
        };

        let Some(task) = task else { break };

        if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            log::error!("worker task panicked: {message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn runs_queued_tasks() {
        let pool = ThreadPool::new(4, 64, "test-worker");
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = counter.clone();
            pool.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn panicking_task_does_not_kill_pool() {
        let pool = ThreadPool::new(2, 16, "test-worker");
        pool.spawn(|| panic!("boom"));
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        pool.spawn(move || {
            counter2.fetch_add(1, Ordering::SeqCst);
        });
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn thread_name_truncates_on_linux_limit() {
        let name = thread_name("a-very-long-worker-prefix", 3);
        if cfg!(target_os = "linux") {
            assert!(name.len() <= 15);
        }
    }
}
