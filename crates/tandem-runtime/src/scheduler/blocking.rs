//! Elastic pool for blocking work
//!
//! Jobs are handed directly to an idle thread through a zero-capacity
//! channel; when no thread is waiting a new one is spawned with the job as
//! its first unit of work. Threads above the core size retire after the
//! keep-alive passes without work. Nothing is ever buffered.

use crate::config::BlockingConfig;
use crate::error::{panic_message, BlockingRejected};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error};

type BlockingJob = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    live: usize,
    shutdown: bool,
}

struct ExecutorInner {
    handoff_tx: Sender<BlockingJob>,
    handoff_rx: Receiver<BlockingJob>,
    /// Dropped on shutdown, which wakes every idle thread
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    pool: Mutex<PoolState>,
    terminated: Condvar,
    core_threads: usize,
    keep_alive: Duration,
    thread_prefix: String,
    next_thread_id: AtomicU64,
    completed_jobs: AtomicU64,
}

/// Unbounded thread pool for blocking calls
pub struct BlockingTaskExecutor {
    inner: Arc<ExecutorInner>,
}

impl BlockingTaskExecutor {
    /// Create an executor; threads are spawned on demand
    pub fn new(config: &BlockingConfig, thread_prefix: impl Into<String>) -> Self {
        let (handoff_tx, handoff_rx) = channel::bounded(0);
        let (shutdown_tx, shutdown_rx) = channel::bounded(0);
        Self {
            inner: Arc::new(ExecutorInner {
                handoff_tx,
                handoff_rx,
                shutdown_tx: Mutex::new(Some(shutdown_tx)),
                shutdown_rx,
                pool: Mutex::new(PoolState {
                    live: 0,
                    shutdown: false,
                }),
                terminated: Condvar::new(),
                core_threads: config.core_threads,
                keep_alive: config.keep_alive(),
                thread_prefix: thread_prefix.into(),
                next_thread_id: AtomicU64::new(0),
                completed_jobs: AtomicU64::new(0),
            }),
        }
    }

    /// Run `job` on a pool thread
    ///
    /// Fails once the executor is shut down, or when no thread is idle and a
    /// new one cannot be spawned.
    pub fn execute<F>(&self, job: F) -> Result<(), BlockingRejected>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(BlockingRejected);
        }
        match self.inner.handoff_tx.try_send(Box::new(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => self.spawn_thread(job),
            Err(TrySendError::Disconnected(_)) => Err(BlockingRejected),
        }
    }

    fn spawn_thread(&self, first: BlockingJob) -> Result<(), BlockingRejected> {
        let mut pool = self.inner.pool.lock();
        if pool.shutdown {
            return Err(BlockingRejected);
        }

        let n = self.inner.next_thread_id.fetch_add(1, Ordering::Relaxed) + 1;
        let name = format!("{}-{}", self.inner.thread_prefix, n);
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(name.clone())
            .spawn(move || ExecutorInner::thread_loop(inner, first));

        match spawned {
            Ok(_) => {
                pool.live += 1;
                debug!(thread = %name, live = pool.live, "blocking thread spawned");
                Ok(())
            }
            Err(err) => {
                error!(thread = %name, error = %err, "failed to spawn blocking thread");
                Err(BlockingRejected)
            }
        }
    }

    /// Stop accepting jobs. Idle threads exit at once, busy threads after
    /// their current job.
    pub fn shutdown(&self) {
        let live = {
            let mut pool = self.inner.pool.lock();
            if pool.shutdown {
                return;
            }
            pool.shutdown = true;
            if pool.live == 0 {
                self.inner.terminated.notify_all();
            }
            pool.live
        };
        self.inner.shutdown_tx.lock().take();
        debug!(live, "blocking executor shut down");
    }

    /// Wait until every thread has exited after `shutdown()`
    ///
    /// Returns false if threads are still alive when `timeout` elapses.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut pool = self.inner.pool.lock();
        while !(pool.shutdown && pool.live == 0) {
            match deadline {
                Some(deadline) => {
                    if self.inner.terminated.wait_until(&mut pool, deadline).timed_out() {
                        return pool.shutdown && pool.live == 0;
                    }
                }
                None => self.inner.terminated.wait(&mut pool),
            }
        }
        true
    }

    /// Whether `shutdown()` was called
    pub fn is_shutdown(&self) -> bool {
        self.inner.pool.lock().shutdown
    }

    /// Pool threads currently alive
    pub fn live_threads(&self) -> usize {
        self.inner.pool.lock().live
    }

    /// Jobs finished since creation
    pub fn completed_jobs(&self) -> u64 {
        self.inner.completed_jobs.load(Ordering::Relaxed)
    }
}

impl Drop for BlockingTaskExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ExecutorInner {
    fn thread_loop(inner: Arc<ExecutorInner>, first: BlockingJob) {
        inner.run_job(first);
        loop {
            crossbeam::channel::select! {
                recv(inner.handoff_rx) -> job => match job {
                    Ok(job) => inner.run_job(job),
                    Err(_) => break,
                },
                recv(inner.shutdown_rx) -> _ => break,
                default(inner.keep_alive) => {
                    if inner.try_retire() {
                        return;
                    }
                }
            }
        }
        inner.release_thread();
    }

    fn run_job(&self, job: BlockingJob) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(panic = %panic_message(&*payload), "blocking job panicked");
        }
        self.completed_jobs.fetch_add(1, Ordering::Relaxed);
    }

    /// Retire an idle thread if the pool is above its core size
    fn try_retire(&self) -> bool {
        let mut pool = self.pool.lock();
        if pool.live <= self.core_threads {
            return false;
        }
        pool.live -= 1;
        debug!(live = pool.live, "idle blocking thread retired");
        if pool.shutdown && pool.live == 0 {
            self.terminated.notify_all();
        }
        true
    }

    fn release_thread(&self) {
        let mut pool = self.pool.lock();
        pool.live -= 1;
        if pool.shutdown && pool.live == 0 {
            self.terminated.notify_all();
        }
    }
}
