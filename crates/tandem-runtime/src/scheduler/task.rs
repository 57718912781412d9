//! Actor tasks and their execution phases

use super::latch::Completion;
use super::scheduler::{SchedulerCore, SchedulerState};
use crate::error::{panic_message, BoxError, SchedulerError, SchedulerResult, TaskFault};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Unique identifier for an actor task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Allocate a new unique id
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Execution phase of an actor task
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskPhase {
    /// Accepted by the scheduler, waiting for its first quantum
    Submitted = 0,
    /// A runner thread is executing the body
    Running = 1,
    /// Gave up its quantum, waiting in a run queue
    Yielded = 2,
    /// A blocking call is in flight, or it finished and the task is queued again
    Blocked = 3,
    /// Finished successfully
    Completed = 4,
    /// Finished with a fault
    Failed = 5,
}

impl TaskPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TaskPhase::Submitted,
            1 => TaskPhase::Running,
            2 => TaskPhase::Yielded,
            3 => TaskPhase::Blocked,
            4 => TaskPhase::Completed,
            _ => TaskPhase::Failed,
        }
    }

    /// `Completed` or `Failed`
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskPhase::Completed | TaskPhase::Failed)
    }

    /// Phases a runner may pick up
    fn is_ready(self) -> bool {
        matches!(
            self,
            TaskPhase::Submitted | TaskPhase::Yielded | TaskPhase::Blocked
        )
    }
}

/// Final result of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The actor returned [`Step::Done`]
    Completed,
    /// The task failed; the actor's [`Actor::on_failure`] has seen the fault
    Failed(TaskFault),
}

impl TaskOutcome {
    /// Whether the task completed successfully
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed)
    }

    /// The fault, if the task failed
    pub fn fault(&self) -> Option<&TaskFault> {
        match self {
            TaskOutcome::Completed => None,
            TaskOutcome::Failed(fault) => Some(fault),
        }
    }
}

/// Work that may block, executed on the blocking pool
pub struct BlockingCall {
    op: Box<dyn FnOnce() -> Result<(), BoxError> + Send + 'static>,
}

impl BlockingCall {
    /// Wrap a blocking closure
    pub fn new<F>(op: F) -> Self
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        Self { op: Box::new(op) }
    }

    /// Run the call, turning errors and panics into a fault
    pub(crate) fn invoke(self) -> Result<(), TaskFault> {
        match panic::catch_unwind(AssertUnwindSafe(self.op)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(TaskFault::Blocking(err.to_string())),
            Err(payload) => Err(TaskFault::Blocking(format!(
                "panicked: {}",
                panic_message(&*payload)
            ))),
        }
    }
}

impl fmt::Debug for BlockingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingCall").finish_non_exhaustive()
    }
}

/// What an actor wants after a quantum
#[derive(Debug)]
pub enum Step {
    /// Re-enqueue at the back of the same runner's queue
    Yield,
    /// Run the call on the blocking pool, then resume on any runner
    Block(BlockingCall),
    /// The actor is finished
    Done,
}

impl Step {
    /// Shorthand for `Step::Block(BlockingCall::new(op))`
    pub fn block<F>(op: F) -> Self
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        Step::Block(BlockingCall::new(op))
    }
}

/// An actor body driven one quantum at a time
///
/// `run` must return promptly: the runner thread is occupied until it does.
/// Anything that waits on an external resource belongs in a
/// [`Step::Block`] call.
pub trait Actor: Send + 'static {
    /// Name used in logs
    fn name(&self) -> &str {
        "actor"
    }

    /// Execute one quantum
    fn run(&mut self, ctx: &mut ActorContext<'_>) -> Result<Step, BoxError>;

    /// Called once when the task fails, with the fault that ended it
    fn on_failure(&mut self, _fault: &TaskFault) {}
}

/// Actor backed by a closure, see [`actor_fn`]
pub struct FnActor<F> {
    name: String,
    body: F,
}

/// Build an actor from a closure
pub fn actor_fn<F>(name: impl Into<String>, body: F) -> FnActor<F>
where
    F: FnMut(&mut ActorContext<'_>) -> Result<Step, BoxError> + Send + 'static,
{
    FnActor {
        name: name.into(),
        body,
    }
}

impl<F> Actor for FnActor<F>
where
    F: FnMut(&mut ActorContext<'_>) -> Result<Step, BoxError> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut ActorContext<'_>) -> Result<Step, BoxError> {
        (self.body)(ctx)
    }
}

/// Per-quantum view handed to [`Actor::run`]
pub struct ActorContext<'a> {
    task: &'a ActorTask,
    runner_id: usize,
    quantum: u64,
    blocking_outcome: Option<Result<(), TaskFault>>,
    core: &'a Weak<SchedulerCore>,
}

impl<'a> ActorContext<'a> {
    pub(crate) fn new(
        task: &'a ActorTask,
        runner_id: usize,
        quantum: u64,
        blocking_outcome: Option<Result<(), TaskFault>>,
        core: &'a Weak<SchedulerCore>,
    ) -> Self {
        Self {
            task,
            runner_id,
            quantum,
            blocking_outcome,
            core,
        }
    }

    /// Id of the running task
    pub fn task_id(&self) -> TaskId {
        self.task.id()
    }

    /// Index of the runner executing this quantum
    pub fn runner_id(&self) -> usize {
        self.runner_id
    }

    /// 1-based count of quanta, including this one
    pub fn quantum(&self) -> u64 {
        self.quantum
    }

    /// Result of the blocking call that preceded this quantum
    ///
    /// Returns `None` when the previous quantum did not block, or when the
    /// outcome was already taken. A failed outcome that is never taken fails
    /// the task once this quantum ends.
    pub fn take_blocking_outcome(&mut self) -> Option<Result<(), TaskFault>> {
        self.blocking_outcome.take()
    }

    /// Submit another actor through the scheduler running this one
    pub fn submit_actor<A: Actor>(&self, actor: A) -> SchedulerResult<TaskHandle> {
        match self.core.upgrade() {
            Some(core) => core.submit_actor(actor),
            None => Err(SchedulerError::NotRunning {
                actual: SchedulerState::Terminated,
            }),
        }
    }

    /// Fault from a blocking call the actor left unhandled
    pub(crate) fn into_unhandled_fault(self) -> Option<TaskFault> {
        match self.blocking_outcome {
            Some(Err(fault)) => Some(fault),
            _ => None,
        }
    }
}

/// Snapshot of per-task counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// Quanta executed
    pub quanta: u64,
    /// Quanta that ended in a yield
    pub yields: u64,
    /// Blocking calls handed to the blocking pool
    pub blocking_excursions: u64,
}

const NO_OWNER: usize = usize::MAX;

/// The schedulable unit for one actor
///
/// A task lives in exactly one place at a time: a runner's queue, a runner
/// thread, or the blocking pool. Runners claim it with a compare-and-swap
/// into `Running`, so at most one thread executes its body.
pub struct ActorTask {
    id: TaskId,
    name: String,
    phase: AtomicU8,
    /// Continuation; taken out by the executing runner for each quantum
    body: Mutex<Option<Box<dyn Actor>>>,
    /// Index of the runner the task was last assigned to
    owner: AtomicUsize,
    blocking_outcome: Mutex<Option<Result<(), TaskFault>>>,
    quanta: AtomicU64,
    yields: AtomicU64,
    blocking_excursions: AtomicU64,
    outcome: Completion<TaskOutcome>,
}

impl ActorTask {
    pub(crate) fn new(body: Box<dyn Actor>) -> Self {
        Self {
            id: TaskId::new(),
            name: body.name().to_string(),
            phase: AtomicU8::new(TaskPhase::Submitted as u8),
            body: Mutex::new(Some(body)),
            owner: AtomicUsize::new(NO_OWNER),
            blocking_outcome: Mutex::new(None),
            quanta: AtomicU64::new(0),
            yields: AtomicU64::new(0),
            blocking_excursions: AtomicU64::new(0),
            outcome: Completion::new(),
        }
    }

    /// Task id
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Actor name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current phase
    pub fn phase(&self) -> TaskPhase {
        TaskPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Runner the task was last assigned to
    pub fn owner_runner(&self) -> Option<usize> {
        match self.owner.load(Ordering::Acquire) {
            NO_OWNER => None,
            index => Some(index),
        }
    }

    /// Counter snapshot
    pub fn stats(&self) -> TaskStats {
        TaskStats {
            quanta: self.quanta.load(Ordering::Relaxed),
            yields: self.yields.load(Ordering::Relaxed),
            blocking_excursions: self.blocking_excursions.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn assign_to(&self, runner: usize) {
        self.owner.store(runner, Ordering::Release);
    }

    /// Claim the task for execution. Fails unless the task is in a ready phase.
    pub(crate) fn try_begin_quantum(&self) -> bool {
        let mut current = self.phase.load(Ordering::Acquire);
        loop {
            if !TaskPhase::from_u8(current).is_ready() {
                return false;
            }
            match self.phase.compare_exchange_weak(
                current,
                TaskPhase::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Count a quantum and return its 1-based number
    pub(crate) fn record_quantum(&self) -> u64 {
        self.quanta.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn take_body(&self) -> Option<Box<dyn Actor>> {
        self.body.lock().take()
    }

    /// Park the body and move out of `Running`. Must happen before the task
    /// is handed to a queue or the blocking pool.
    pub(crate) fn park(&self, body: Box<dyn Actor>, phase: TaskPhase) {
        debug_assert!(matches!(phase, TaskPhase::Yielded | TaskPhase::Blocked));
        *self.body.lock() = Some(body);
        match phase {
            TaskPhase::Yielded => self.yields.fetch_add(1, Ordering::Relaxed),
            _ => self.blocking_excursions.fetch_add(1, Ordering::Relaxed),
        };
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub(crate) fn set_blocking_outcome(&self, outcome: Result<(), TaskFault>) {
        *self.blocking_outcome.lock() = Some(outcome);
    }

    pub(crate) fn take_blocking_outcome(&self) -> Option<Result<(), TaskFault>> {
        self.blocking_outcome.lock().take()
    }

    /// Move into a terminal phase. Returns false if the task already finished.
    fn finish(&self, phase: TaskPhase) -> bool {
        self.phase
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                if TaskPhase::from_u8(raw).is_terminal() {
                    None
                } else {
                    Some(phase as u8)
                }
            })
            .is_ok()
    }

    pub(crate) fn complete(&self) -> bool {
        if !self.finish(TaskPhase::Completed) {
            return false;
        }
        self.outcome.complete(TaskOutcome::Completed);
        true
    }

    /// Fail the task and report the fault to the actor
    pub(crate) fn fail(&self, fault: TaskFault, body: Option<Box<dyn Actor>>) -> bool {
        if !self.finish(TaskPhase::Failed) {
            return false;
        }
        if let Some(mut body) = body {
            let reported = panic::catch_unwind(AssertUnwindSafe(|| body.on_failure(&fault)));
            if let Err(payload) = reported {
                tracing::warn!(
                    task = %self.id,
                    actor = %self.name,
                    panic = %panic_message(&*payload),
                    "on_failure panicked"
                );
            }
        }
        self.outcome.complete(TaskOutcome::Failed(fault));
        true
    }

    /// Fail a task that is at rest (queued or parked) because it can no
    /// longer be scheduled
    pub(crate) fn abandon(&self, reason: &'static str) -> bool {
        let body = self.take_body();
        self.fail(TaskFault::Abandoned(reason), body)
    }

    pub(crate) fn outcome(&self) -> &Completion<TaskOutcome> {
        &self.outcome
    }
}

impl fmt::Debug for ActorTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("phase", &self.phase())
            .field("owner", &self.owner_runner())
            .finish()
    }
}

/// Caller-side handle to a submitted task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    task: Arc<ActorTask>,
}

impl TaskHandle {
    pub(crate) fn new(task: Arc<ActorTask>) -> Self {
        Self { task }
    }

    /// Task id
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Actor name
    pub fn name(&self) -> &str {
        self.task.name()
    }

    /// Current phase
    pub fn phase(&self) -> TaskPhase {
        self.task.phase()
    }

    /// Runner the task was last assigned to
    pub fn owner_runner(&self) -> Option<usize> {
        self.task.owner_runner()
    }

    /// Counter snapshot
    pub fn stats(&self) -> TaskStats {
        self.task.stats()
    }

    /// Whether the task reached a terminal phase
    pub fn is_finished(&self) -> bool {
        self.task.outcome().is_complete()
    }

    /// Outcome, if the task already finished
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.task.outcome().get()
    }

    /// Block until the task finishes
    pub fn wait(&self) -> TaskOutcome {
        self.task.outcome().wait()
    }

    /// Block until the task finishes or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        self.task.outcome().wait_timeout(timeout)
    }
}
