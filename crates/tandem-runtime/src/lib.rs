//! Tandem actor runtime
//!
//! A cooperative scheduler that multiplexes lightweight actors onto a fixed
//! pool of runner threads:
//! - **Runners**: dedicated threads, each draining its own FIFO run queue
//! - **Blocking pool**: elastic threads for work an actor marks as blocking
//! - **Scheduler**: owns both pools and the start/stop lifecycle
//! - **Metrics**: per-runner counters and a textual dump
//!
//! # Example
//!
//! ```rust,ignore
//! use tandem_runtime::{actor_fn, Scheduler, Step};
//!
//! let scheduler = Scheduler::new(2);
//! scheduler.start()?;
//!
//! let handle = scheduler.submit_actor(actor_fn("hello", |ctx| {
//!     if ctx.quantum() < 3 {
//!         return Ok(Step::Yield);
//!     }
//!     Ok(Step::Done)
//! }))?;
//!
//! assert!(handle.wait().is_completed());
//! scheduler.stop()?.wait();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Time source used for runner busy-time accounting
pub mod clock;

/// Scheduler configuration and TOML loading
pub mod config;

/// Error types
pub mod error;

/// Per-runner counters, registry, and dump sinks
pub mod metrics;

/// Scheduler core: tasks, runners, blocking pool, assignment strategies
pub mod scheduler;

pub use clock::{ActorClock, SystemClock};
pub use config::{BlockingConfig, SchedulerConfig};
pub use error::{
    BlockingRejected, BoxError, ConfigError, SchedulerError, SchedulerResult, TaskFault,
};
pub use metrics::{
    MetricsRegistry, MetricsSink, RunnerMetrics, RunnerMetricsSnapshot, TextMetricsSink,
};
pub use scheduler::{
    actor_fn, Actor, ActorContext, ActorTask, ActorTaskRunner, BlockingCall, BlockingTaskExecutor,
    FnActor, RandomAssignment, RoundRobinAssignment, RunnerAssignmentStrategy, RunnerCloseHandle,
    Scheduler, SchedulerBuilder, SchedulerState, ShutdownHandle, Step, TaskHandle, TaskId,
    TaskOutcome, TaskPhase, TaskStats,
};
