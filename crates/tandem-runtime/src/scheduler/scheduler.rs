//! Scheduler lifecycle and task routing

use super::blocking::BlockingTaskExecutor;
use super::latch::Completion;
use super::runner::{ActorTaskRunner, RunnerCloseHandle};
use super::strategy::{RandomAssignment, RunnerAssignmentStrategy};
use super::task::{Actor, ActorTask, BlockingCall, TaskHandle};
use crate::clock::{ActorClock, SystemClock};
use crate::config::{saturating_millis, SchedulerConfig};
use crate::error::{ConfigError, SchedulerError, SchedulerResult};
use crate::metrics::{MetricsRegistry, MetricsSink, RunnerMetricsSnapshot, TextMetricsSink};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Scheduler lifecycle
///
/// Moves strictly forward: `New → Running → Terminating → Terminated`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    /// Constructed, runners not started
    New = 0,
    /// Accepting and executing tasks
    Running = 1,
    /// `stop()` was called; runners are draining
    Terminating = 2,
    /// Every runner thread has exited
    Terminated = 3,
}

impl SchedulerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SchedulerState::New,
            1 => SchedulerState::Running,
            2 => SchedulerState::Terminating,
            _ => SchedulerState::Terminated,
        }
    }
}

/// State shared by the scheduler handle, runner threads, and blocking jobs
pub(crate) struct SchedulerCore {
    state: AtomicU8,
    runners: Box<[ActorTaskRunner]>,
    blocking: BlockingTaskExecutor,
    strategy: Box<dyn RunnerAssignmentStrategy>,
    registry: Arc<MetricsRegistry>,
    shutdown_grace: Duration,
    weak_self: Weak<SchedulerCore>,
}

impl SchedulerCore {
    pub(crate) fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(
        &self,
        from: SchedulerState,
        to: SchedulerState,
        operation: &'static str,
    ) -> SchedulerResult<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| SchedulerError::InvalidState {
                operation,
                actual: SchedulerState::from_u8(actual),
            })
    }

    fn pick_runner(&self) -> &ActorTaskRunner {
        self.strategy.next_runner(&self.runners)
    }

    /// Wrap `actor` in a task and enqueue it on a runner chosen by the strategy
    pub(crate) fn submit_actor<A: Actor>(&self, actor: A) -> SchedulerResult<TaskHandle> {
        let actual = self.state();
        if actual != SchedulerState::Running {
            return Err(SchedulerError::NotRunning { actual });
        }

        let task = Arc::new(ActorTask::new(Box::new(actor)));
        let runner = self.pick_runner();
        task.assign_to(runner.id());
        let handle = TaskHandle::new(Arc::clone(&task));

        if runner.submit(task).is_err() {
            // Lost a race with stop()
            return Err(SchedulerError::RunnerClosed {
                runner: runner.id(),
            });
        }
        trace!(task = %handle.id(), actor = handle.name(), runner = runner.id(), "task submitted");
        Ok(handle)
    }

    /// Route a task back to a runner after its blocking call finished
    pub(crate) fn re_submit(&self, task: Arc<ActorTask>) {
        if self.state() != SchedulerState::Running {
            self.abandon(&task, "scheduler not running");
            return;
        }

        let runner = self.pick_runner();
        task.assign_to(runner.id());
        trace!(task = %task.id(), runner = runner.id(), "task re-submitted");
        if let Err(task) = runner.resubmit(task) {
            runner.abandon(&task, "runner closed");
        }
    }

    /// Hand a blocking call to the pool. Gives the task back if the pool
    /// refuses it.
    pub(crate) fn dispatch_blocking(
        &self,
        task: Arc<ActorTask>,
        call: BlockingCall,
    ) -> Result<(), Arc<ActorTask>> {
        let core = self.weak_self.clone();
        let job_task = Arc::clone(&task);
        let job = move || {
            let outcome = call.invoke();
            if let Err(fault) = &outcome {
                debug!(task = %job_task.id(), %fault, "blocking call failed");
            }
            job_task.set_blocking_outcome(outcome);
            match core.upgrade() {
                Some(core) => core.re_submit(job_task),
                None => {
                    job_task.abandon("scheduler dropped");
                }
            }
        };

        self.blocking.execute(job).map_err(|_| task)
    }

    /// Join the closing runners, then enter `Terminated`
    fn finish_stop(&self, closing: &Mutex<Vec<RunnerCloseHandle>>, done: &ShutdownHandle) {
        let runners = std::mem::take(&mut *closing.lock());
        for runner in runners {
            runner.join();
        }
        match self.transition(
            SchedulerState::Terminating,
            SchedulerState::Terminated,
            "terminate",
        ) {
            Ok(()) => info!("scheduler terminated"),
            Err(err) => error!(error = %err, "unexpected state at end of shutdown"),
        }
        done.latch.complete(());
    }

    /// Fail a task that cannot be scheduled, counting it on its last runner
    fn abandon(&self, task: &ActorTask, reason: &'static str) {
        match task.owner_runner().and_then(|id| self.runners.get(id)) {
            Some(runner) => runner.abandon(task, reason),
            None => {
                task.abandon(reason);
            }
        }
    }
}

/// Multiplexes actors onto a fixed set of runner threads
///
/// Blocking work requested by actors runs on a separate elastic pool so the
/// runners never wait on it.
pub struct Scheduler {
    core: Arc<SchedulerCore>,
    /// Set by the winning `stop()`
    shutdown: Mutex<Option<ShutdownHandle>>,
}

impl Scheduler {
    /// Create a scheduler with `runner_count` runners and default settings
    ///
    /// A count of zero means one runner per CPU.
    pub fn new(runner_count: usize) -> Self {
        Self::assemble(
            SchedulerConfig::default().with_runner_count(runner_count),
            Box::new(RandomAssignment),
            Arc::new(MetricsRegistry::new()),
            Arc::new(SystemClock),
        )
    }

    /// Create a scheduler from a validated configuration
    pub fn with_config(config: SchedulerConfig) -> Result<Self, ConfigError> {
        Self::builder().config(config).build()
    }

    /// Start building a scheduler
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    fn assemble(
        config: SchedulerConfig,
        strategy: Box<dyn RunnerAssignmentStrategy>,
        registry: Arc<MetricsRegistry>,
        clock: Arc<dyn ActorClock>,
    ) -> Self {
        let runner_count = config.resolved_runner_count();
        let core = Arc::new_cyclic(|weak_self: &Weak<SchedulerCore>| {
            let runners = (0..runner_count)
                .map(|id| {
                    ActorTaskRunner::new(
                        id,
                        format!("{}-{}", config.runner_thread_prefix, id),
                        registry.register(format!("runner-{}", id)),
                        Arc::clone(&clock),
                        weak_self.clone(),
                    )
                })
                .collect();

            SchedulerCore {
                state: AtomicU8::new(SchedulerState::New as u8),
                runners,
                blocking: BlockingTaskExecutor::new(
                    &config.blocking,
                    config.blocking_thread_prefix.clone(),
                ),
                strategy,
                registry,
                shutdown_grace: config.shutdown_grace(),
                weak_self: weak_self.clone(),
            }
        });

        debug!(runners = runner_count, "scheduler created");
        Self {
            core,
            shutdown: Mutex::new(None),
        }
    }

    /// Start every runner thread
    ///
    /// Only legal once, from `New`.
    pub fn start(&self) -> SchedulerResult<()> {
        self.core
            .transition(SchedulerState::New, SchedulerState::Running, "start")?;

        for runner in self.core.runners.iter() {
            if let Err(err) = runner.start() {
                error!(runner = runner.id(), error = %err, "failed to start runner");
                return Err(err);
            }
        }
        info!(runners = self.core.runners.len(), "scheduler started");
        Ok(())
    }

    /// Submit an actor for execution
    ///
    /// Fails unless the scheduler is `Running`.
    pub fn submit_actor<A: Actor>(&self, actor: A) -> SchedulerResult<TaskHandle> {
        self.core.submit_actor(actor)
    }

    /// Stop the scheduler
    ///
    /// The blocking pool stops accepting work and every runner drains the
    /// tasks it already queued. Waits up to the grace period for in-flight
    /// blocking calls, then joins the runner threads on a background thread.
    /// The returned handle resolves once the scheduler is `Terminated`.
    pub fn stop(&self) -> SchedulerResult<ShutdownHandle> {
        self.core
            .transition(SchedulerState::Running, SchedulerState::Terminating, "stop")?;
        info!("stopping scheduler");

        let handle = ShutdownHandle::new();
        *self.shutdown.lock() = Some(handle.clone());

        self.core.blocking.shutdown();
        let closing: Vec<RunnerCloseHandle> =
            self.core.runners.iter().map(|runner| runner.close()).collect();

        let grace = self.core.shutdown_grace;
        if !self.core.blocking.await_termination(grace) {
            warn!(
                grace_ms = saturating_millis(grace),
                live = self.core.blocking.live_threads(),
                "blocking tasks still running after shutdown grace period"
            );
        }

        let closing = Arc::new(Mutex::new(closing));
        let spawned = {
            let core = Arc::clone(&self.core);
            let closing = Arc::clone(&closing);
            let done = handle.clone();
            thread::Builder::new()
                .name("scheduler-shutdown".to_string())
                .spawn(move || core.finish_stop(&closing, &done))
        };
        if let Err(err) = spawned {
            warn!(error = %err, "failed to spawn shutdown thread; joining runners inline");
            self.core.finish_stop(&closing, &handle);
        }

        Ok(handle)
    }

    /// Write the per-runner counters to `sink`
    pub fn dump_metrics(&self, sink: &mut dyn MetricsSink) -> io::Result<()> {
        sink.section("Per runner metrics")?;
        for runner in self.core.runners.iter() {
            sink.section(runner.label())?;
            runner.metrics().dump(sink)?;
        }
        Ok(())
    }

    /// Write the textual metrics dump to `out`
    pub fn dump_metrics_to<W: Write>(&self, out: W) -> io::Result<()> {
        let mut sink = TextMetricsSink::new(out);
        self.dump_metrics(&mut sink)
    }

    /// Snapshot every runner's counters, in runner order
    pub fn runner_metrics(&self) -> Vec<RunnerMetricsSnapshot> {
        self.core
            .runners
            .iter()
            .map(|runner| runner.metrics().snapshot())
            .collect()
    }

    /// Registry the runner counters were registered in
    pub fn metrics_registry(&self) -> &Arc<MetricsRegistry> {
        &self.core.registry
    }

    /// Current lifecycle state
    pub fn state(&self) -> SchedulerState {
        self.core.state()
    }

    /// Number of runners
    pub fn runner_count(&self) -> usize {
        self.core.runners.len()
    }

    /// The runners, in index order
    pub fn runners(&self) -> &[ActorTaskRunner] {
        &self.core.runners
    }

    /// The blocking pool
    pub fn blocking_executor(&self) -> &BlockingTaskExecutor {
        &self.core.blocking
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.state() == SchedulerState::Running {
            if let Err(err) = self.stop() {
                debug!(error = %err, "stop on drop lost a race");
            }
        }
        let pending = self.shutdown.lock().take();
        if let Some(handle) = pending {
            handle.wait();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state())
            .field("runners", &self.runner_count())
            .finish()
    }
}

/// Builder for [`Scheduler`]
#[derive(Default)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    strategy: Option<Box<dyn RunnerAssignmentStrategy>>,
    registry: Option<Arc<MetricsRegistry>>,
    clock: Option<Arc<dyn ActorClock>>,
}

impl SchedulerBuilder {
    /// Replace the whole configuration
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of runners (0 = one per CPU)
    pub fn runner_count(mut self, runner_count: usize) -> Self {
        self.config.runner_count = runner_count;
        self
    }

    /// How long `stop()` waits for in-flight blocking calls
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace_ms = saturating_millis(grace);
        self
    }

    /// Runner selection policy (default [`RandomAssignment`])
    pub fn assignment_strategy<S>(mut self, strategy: S) -> Self
    where
        S: RunnerAssignmentStrategy + 'static,
    {
        self.strategy = Some(Box::new(strategy));
        self
    }

    /// Register runner counters in an existing registry
    pub fn metrics_registry(mut self, registry: Arc<MetricsRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Time source for busy-time accounting
    pub fn clock(mut self, clock: Arc<dyn ActorClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and build the scheduler in `New`
    pub fn build(self) -> Result<Scheduler, ConfigError> {
        self.config.validate()?;
        Ok(Scheduler::assemble(
            self.config,
            self.strategy.unwrap_or_else(|| Box::new(RandomAssignment)),
            self.registry.unwrap_or_default(),
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        ))
    }
}

/// Resolves once a stopping scheduler reaches `Terminated`
#[derive(Clone)]
pub struct ShutdownHandle {
    latch: Arc<Completion<()>>,
}

impl ShutdownHandle {
    fn new() -> Self {
        Self {
            latch: Arc::new(Completion::new()),
        }
    }

    /// Block until every runner thread has exited
    pub fn wait(&self) {
        self.latch.wait();
    }

    /// Block up to `timeout`; returns whether shutdown finished
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.latch.wait_timeout(timeout).is_some()
    }

    /// Whether shutdown already finished
    pub fn is_terminated(&self) -> bool {
        self.latch.is_complete()
    }
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
