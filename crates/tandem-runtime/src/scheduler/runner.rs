//! Runner thread that drives actor tasks
//!
//! Each runner owns a FIFO run queue and one OS thread. A task runs until it
//! yields, asks for a blocking call, or finishes; the runner never waits on
//! blocking work itself.

use super::scheduler::SchedulerCore;
use super::task::{ActorContext, ActorTask, Step, TaskPhase};
use crate::clock::ActorClock;
use crate::error::{panic_message, SchedulerResult, TaskFault};
use crate::metrics::RunnerMetrics;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace, warn};

/// Run queue entries
enum RunnerMessage {
    Run(Arc<ActorTask>),
    /// Marker enqueued by `close()` behind every accepted task
    Close,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
enum RunnerState {
    Idle = 0,
    Running = 1,
    Closing = 2,
    Closed = 3,
}

/// State shared between the runner handle and its thread
struct RunnerShared {
    id: usize,
    tx: Sender<RunnerMessage>,
    rx: Receiver<RunnerMessage>,
    /// Cleared by `close()`; submitters hold the read lock while enqueueing
    accepting: RwLock<bool>,
    state: AtomicU8,
    metrics: Arc<RunnerMetrics>,
    clock: Arc<dyn ActorClock>,
    core: Weak<SchedulerCore>,
}

/// One non-blocking runner: a thread plus its run queue
pub struct ActorTaskRunner {
    shared: Arc<RunnerShared>,
    thread_name: String,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ActorTaskRunner {
    pub(crate) fn new(
        id: usize,
        thread_name: String,
        metrics: Arc<RunnerMetrics>,
        clock: Arc<dyn ActorClock>,
        core: Weak<SchedulerCore>,
    ) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            shared: Arc::new(RunnerShared {
                id,
                tx,
                rx,
                accepting: RwLock::new(true),
                state: AtomicU8::new(RunnerState::Idle as u8),
                metrics,
                clock,
                core,
            }),
            thread_name,
            handle: Mutex::new(None),
        }
    }

    /// Runner index
    pub fn id(&self) -> usize {
        self.shared.id
    }

    /// Metrics label, `runner-<id>`
    pub fn label(&self) -> &str {
        self.shared.metrics.label()
    }

    /// OS thread name
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Runner counters
    pub fn metrics(&self) -> &RunnerMetrics {
        &self.shared.metrics
    }

    /// Entries currently waiting in the run queue
    pub fn queued(&self) -> usize {
        self.shared.rx.len()
    }

    /// Whether the runner thread is started and not yet closed
    pub fn is_running(&self) -> bool {
        self.shared.state() == RunnerState::Running
    }

    /// Spawn the runner thread. Called once by the scheduler.
    pub(crate) fn start(&self) -> SchedulerResult<()> {
        // Held until the join handle is stored so close() never sees a
        // running runner without its thread
        let mut handle = self.handle.lock();
        if self
            .shared
            .transition(RunnerState::Idle, RunnerState::Running)
            .is_err()
        {
            warn!(runner = self.id(), state = ?self.shared.state(), "runner not startable");
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || shared.run_loop());

        match spawned {
            Ok(thread) => {
                *handle = Some(thread);
                Ok(())
            }
            Err(err) => {
                self.shared.state.store(RunnerState::Idle as u8, Ordering::Release);
                Err(err.into())
            }
        }
    }

    /// Enqueue a task submitted through the scheduler. Gives the task back if
    /// the runner is closing.
    pub(crate) fn submit(&self, task: Arc<ActorTask>) -> Result<(), Arc<ActorTask>> {
        self.shared.enqueue(task)?;
        self.shared.metrics.tasks_submitted.incr();
        Ok(())
    }

    /// Enqueue a task returning from a blocking call
    pub(crate) fn resubmit(&self, task: Arc<ActorTask>) -> Result<(), Arc<ActorTask>> {
        self.shared.enqueue(task)
    }

    /// Fail a task that can no longer be scheduled and count it here
    pub(crate) fn abandon(&self, task: &ActorTask, reason: &'static str) {
        self.shared.abandon(task, reason);
    }

    /// Stop accepting work and let the thread finish what was already queued
    ///
    /// Tasks queued before this call get one more quantum; if they yield or
    /// block during it they are abandoned. The returned handle resolves once
    /// the thread has exited. Closing a runner that never started abandons
    /// its queue and returns an already-resolved handle.
    pub(crate) fn close(&self) -> RunnerCloseHandle {
        let mut handle = self.handle.lock();
        {
            let mut accepting = self.shared.accepting.write();
            if !*accepting {
                return RunnerCloseHandle::finished(self.id());
            }
            *accepting = false;

            if self
                .shared
                .transition(RunnerState::Running, RunnerState::Closing)
                .is_ok()
            {
                // Sent under the write lock: every accepted task is ahead of it
                let _ = self.shared.tx.send(RunnerMessage::Close);
            }
        }

        match handle.take() {
            Some(thread) => RunnerCloseHandle {
                runner: self.id(),
                handle: Some(thread),
            },
            None => {
                // Never started; a later start() finds the runner closed
                self.shared.state.store(RunnerState::Closed as u8, Ordering::Release);
                self.shared.abandon_queued();
                RunnerCloseHandle::finished(self.id())
            }
        }
    }
}

impl std::fmt::Debug for ActorTaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorTaskRunner")
            .field("id", &self.id())
            .field("thread_name", &self.thread_name)
            .field("state", &self.shared.state())
            .field("queued", &self.queued())
            .finish()
    }
}

impl RunnerShared {
    fn state(&self) -> RunnerState {
        match self.state.load(Ordering::Acquire) {
            0 => RunnerState::Idle,
            1 => RunnerState::Running,
            2 => RunnerState::Closing,
            _ => RunnerState::Closed,
        }
    }

    fn transition(&self, from: RunnerState, to: RunnerState) -> Result<(), RunnerState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| self.state())
    }

    fn enqueue(&self, task: Arc<ActorTask>) -> Result<(), Arc<ActorTask>> {
        let accepting = self.accepting.read();
        if !*accepting {
            return Err(task);
        }
        // The receiver lives as long as `self`, so the send cannot fail
        self.tx
            .send(RunnerMessage::Run(task))
            .map_err(|err| match err.into_inner() {
                RunnerMessage::Run(task) => task,
                RunnerMessage::Close => unreachable!("only Run messages are enqueued here"),
            })
    }

    fn abandon(&self, task: &ActorTask, reason: &'static str) {
        if task.abandon(reason) {
            self.metrics.tasks_abandoned.incr();
            warn!(runner = self.id, task = %task.id(), actor = task.name(), reason, "task abandoned");
        }
    }

    fn abandon_queued(&self) {
        for message in self.rx.try_iter() {
            if let RunnerMessage::Run(task) = message {
                self.abandon(&task, "runner closed");
            }
        }
    }

    fn run_loop(self: Arc<Self>) {
        debug!(runner = self.id, "runner started");

        while let Ok(message) = self.rx.recv() {
            match message {
                RunnerMessage::Run(task) => self.drive(task),
                RunnerMessage::Close => break,
            }
        }

        // Nothing can be accepted after the close marker; this is a safety net
        self.abandon_queued();
        self.state.store(RunnerState::Closed as u8, Ordering::Release);
        debug!(runner = self.id, "runner closed");
    }

    /// Run one quantum of `task`
    fn drive(&self, task: Arc<ActorTask>) {
        if !task.try_begin_quantum() {
            warn!(runner = self.id, task = %task.id(), phase = ?task.phase(), "skipping task that is not ready");
            return;
        }
        let Some(mut body) = task.take_body() else {
            error!(runner = self.id, task = %task.id(), "running task has no body");
            task.fail(TaskFault::Abandoned("missing actor body"), None);
            return;
        };

        task.assign_to(self.id);
        let quantum = task.record_quantum();
        self.metrics.quanta_executed.incr();
        trace!(runner = self.id, task = %task.id(), actor = task.name(), quantum, "quantum start");

        let started = self.clock.now();
        let mut ctx = ActorContext::new(
            &task,
            self.id,
            quantum,
            task.take_blocking_outcome(),
            &self.core,
        );
        let result = panic::catch_unwind(AssertUnwindSafe(|| body.run(&mut ctx)));
        let unhandled = ctx.into_unhandled_fault();
        let busy = self.clock.now().saturating_duration_since(started);
        self.metrics.busy_micros.add(busy.as_micros() as u64);

        let step = match result {
            Ok(Ok(step)) => match unhandled {
                Some(fault) => Err(fault),
                None => Ok(step),
            },
            Ok(Err(err)) => Err(TaskFault::Error(err.to_string())),
            Err(payload) => Err(TaskFault::Panicked(panic_message(&*payload))),
        };

        match step {
            Ok(Step::Done) => {
                drop(body);
                task.complete();
                self.metrics.tasks_completed.incr();
                trace!(runner = self.id, task = %task.id(), "task completed");
            }
            Ok(Step::Yield) => {
                task.park(body, TaskPhase::Yielded);
                self.metrics.tasks_yielded.incr();
                if let Err(task) = self.enqueue(task) {
                    self.abandon(&task, "runner closed");
                }
            }
            Ok(Step::Block(call)) => {
                task.park(body, TaskPhase::Blocked);
                self.metrics.blocking_handoffs.incr();
                trace!(runner = self.id, task = %task.id(), "handing off to blocking pool");
                let rejected = match self.core.upgrade() {
                    Some(core) => core.dispatch_blocking(task, call).err(),
                    None => Some(task),
                };
                if let Some(task) = rejected {
                    self.abandon(&task, "blocking pool unavailable");
                }
            }
            Err(fault) => {
                warn!(runner = self.id, task = %task.id(), actor = task.name(), %fault, "task failed");
                self.metrics.tasks_failed.incr();
                task.fail(fault, Some(body));
            }
        }
    }
}

/// Resolves once a runner thread has exited
#[derive(Debug)]
pub struct RunnerCloseHandle {
    runner: usize,
    handle: Option<JoinHandle<()>>,
}

impl RunnerCloseHandle {
    fn finished(runner: usize) -> Self {
        Self {
            runner,
            handle: None,
        }
    }

    /// Runner index
    pub fn runner(&self) -> usize {
        self.runner
    }

    /// Whether the thread has already exited
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the thread to exit
    pub fn join(self) {
        if let Some(handle) = self.handle {
            if handle.join().is_err() {
                error!(runner = self.runner, "runner thread panicked");
            }
        }
    }
}
