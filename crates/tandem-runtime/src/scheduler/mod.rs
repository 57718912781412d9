//! Actor scheduler: a fixed runner pool plus an elastic blocking pool
//!
//! Runners (one OS thread each) drive actor tasks cooperatively from a FIFO
//! queue. Work an actor marks as blocking is handed to the blocking pool and
//! the task is re-submitted through the assignment strategy once it finishes.

mod blocking;
mod latch;
mod runner;
#[allow(clippy::module_inception)]
mod scheduler;
mod strategy;
mod task;

pub use blocking::BlockingTaskExecutor;
pub use runner::{ActorTaskRunner, RunnerCloseHandle};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerState, ShutdownHandle};
pub use strategy::{RandomAssignment, RoundRobinAssignment, RunnerAssignmentStrategy};
pub use task::{
    actor_fn, Actor, ActorContext, ActorTask, BlockingCall, FnActor, Step, TaskHandle, TaskId,
    TaskOutcome, TaskPhase, TaskStats,
};
