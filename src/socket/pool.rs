//! Bounded worker pool for connection handlers.
//!
//! # Sizing
//!
//! ```text
//! execute(job)
//!   │
//!   ├─ queue has room ──────────────► queued, picked up by the next free worker
//!   ├─ queue full, live < max ──────► new extra worker runs the job
//!   └─ queue full, live == max ─────► Err(job): the caller runs it (backpressure)
//! ```
//!
//! Core workers are spawned up front and live until shutdown. Extra workers
//! exit after sitting idle for the keep-alive interval. Every worker holds
//! its own clone of the queue's receiver.
//!
//! # Shutdown
//!
//! [`WorkerPool::shutdown`] stops intake; workers drain the queue and exit.
//! [`WorkerPool::cancel_pending`] drops whatever is still queued.
//! [`WorkerPool::await_termination`] waits, bounded, for workers to finish.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::constants::{DEFAULT_CORE_WORKERS, DEFAULT_MAX_WORKERS, DEFAULT_QUEUE_CAPACITY, WORKER_KEEP_ALIVE};

/// A unit of work: one connection handler.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Poll interval while waiting for workers to exit.
const TERMINATION_POLL: Duration = Duration::from_millis(10);

/// Worker pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Workers kept for the pool's lifetime.
    pub core_workers: usize,
    /// Upper bound on live workers.
    pub max_workers: usize,
    /// Jobs waiting for a worker.
    pub queue_capacity: usize,
    /// Idle time after which an extra worker exits.
    pub keep_alive: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_workers: DEFAULT_CORE_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            keep_alive: WORKER_KEEP_ALIVE,
        }
    }
}

#[derive(Debug)]
struct Shared {
    live: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<()>>>,
    config: PoolConfig,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed-bound thread pool with caller-runs overflow.
#[derive(Debug)]
pub struct WorkerPool {
    /// `None` once shut down; dropping it disconnects the workers.
    sender: Mutex<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Start a pool with `config.core_workers` threads.
    ///
    /// `max_workers` is raised to at least `core_workers`, and both to at
    /// least one.
    pub fn new(config: PoolConfig) -> Self {
        let core_workers = config.core_workers.max(1);
        let config = PoolConfig {
            core_workers,
            max_workers: config.max_workers.max(core_workers),
            ..config
        };
        let (sender, receiver) = bounded(config.queue_capacity);
        let pool = Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            shared: Arc::new(Shared {
                live: AtomicUsize::new(0),
                handles: Mutex::new(Vec::new()),
                config,
            }),
        };
        for _ in 0..core_workers {
            let _ = pool.spawn_worker(None, true);
        }
        pool
    }

    /// Effective sizing after normalization.
    pub fn config(&self) -> PoolConfig {
        self.shared.config
    }

    /// Hand `job` to the pool.
    ///
    /// Returns the job back when the pool is saturated or shut down; the
    /// caller is then expected to run it (or drop it) itself.
    pub fn execute(&self, job: Job) -> Result<(), Job> {
        let sender = lock(&self.sender);
        let Some(tx) = sender.as_ref() else {
            return Err(job);
        };

        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => self.spawn_worker(Some(job), false),
            Err(TrySendError::Disconnected(job)) => Err(job),
        }
    }

    /// Start a worker, optionally seeded with a first job. Fails (returning
    /// the job) when the pool is already at `max_workers`.
    fn spawn_worker(&self, first: Option<Job>, core: bool) -> Result<(), Job> {
        let mut handles = lock(&self.shared.handles);
        let live = self.shared.live.load(Ordering::SeqCst);
        if live >= self.shared.config.max_workers {
            return match first {
                Some(job) => Err(job),
                None => Ok(()),
            };
        }
        self.shared.live.fetch_add(1, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let receiver = self.receiver.clone();
        let spawned = thread::Builder::new()
            .name(if core { "touchgate-worker" } else { "touchgate-worker-extra" }.to_string())
            .spawn(move || worker_loop(&shared, &receiver, first, core));
        match spawned {
            Ok(handle) => {
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
                Ok(())
            }
            Err(e) => {
                // The closure, and with it the job, is gone; nothing to hand back.
                self.shared.live.fetch_sub(1, Ordering::SeqCst);
                log::error!("[pool] failed to spawn worker: {e}");
                Ok(())
            }
        }
    }

    /// Stop accepting jobs. Queued jobs still run.
    pub fn shutdown(&self) {
        if lock(&self.sender).take().is_some() {
            log::debug!("[pool] shutdown requested");
        }
    }

    /// Drop every job still waiting in the queue. Returns how many were
    /// dropped.
    pub fn cancel_pending(&self) -> usize {
        let dropped = self.receiver.try_iter().count();
        if dropped > 0 {
            log::warn!("[pool] dropped {dropped} queued connection(s)");
        }
        dropped
    }

    /// Wait up to `timeout` for every worker to exit. Returns `true` when
    /// they all did.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.shared.live.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(TERMINATION_POLL);
        }
        for handle in lock(&self.shared.handles).drain(..) {
            let _ = handle.join();
        }
        true
    }

    /// Workers currently alive.
    pub fn live_workers(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Jobs waiting for a worker.
    pub fn queued_jobs(&self) -> usize {
        self.receiver.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared, receiver: &Receiver<Job>, first: Option<Job>, core: bool) {
    if let Some(job) = first {
        run_job(job);
    }
    loop {
        let next = if core {
            receiver.recv().map_err(|_| RecvTimeoutError::Disconnected)
        } else {
            receiver.recv_timeout(shared.config.keep_alive)
        };
        match next {
            Ok(job) => run_job(job),
            Err(RecvTimeoutError::Timeout) => {
                log::debug!("[pool] idle extra worker exiting");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    shared.live.fetch_sub(1, Ordering::SeqCst);
}

fn run_job(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        log::error!("[pool] connection handler panicked");
    }
}
