//! Error types for the scheduler, tasks, and configuration

use crate::scheduler::SchedulerState;
use std::any::Any;
use std::io;
use std::path::PathBuf;

/// Error type returned by actor bodies and blocking calls
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Lifecycle and submission errors raised to scheduler callers
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The operation is not legal from the current lifecycle state
    #[error("cannot {operation} scheduler in state {actual:?}")]
    InvalidState {
        /// Operation that was rejected
        operation: &'static str,
        /// State observed when the transition failed
        actual: SchedulerState,
    },

    /// Submission while the scheduler is not running
    #[error("scheduler is not running (state {actual:?})")]
    NotRunning {
        /// State observed at submission time
        actual: SchedulerState,
    },

    /// The runner picked for the task no longer accepts work
    #[error("runner {runner} is closed")]
    RunnerClosed {
        /// Runner index
        runner: usize,
    },

    /// An OS thread could not be spawned
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Scheduler operation result
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Fault that moved a task into the `Failed` phase
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskFault {
    /// The actor body returned an error
    #[error("actor returned an error: {0}")]
    Error(String),

    /// The actor body panicked
    #[error("actor panicked: {0}")]
    Panicked(String),

    /// A blocking call failed or panicked and the actor did not handle it
    #[error("blocking call failed: {0}")]
    Blocking(String),

    /// The task was still pending when the scheduler shut down
    #[error("task abandoned: {0}")]
    Abandoned(&'static str),
}

/// The blocking executor refused a job because it is shut down or could not
/// grow
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("blocking task executor rejected the job")]
pub struct BlockingRejected;

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File that was being read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Config file is not valid TOML for the schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be rendered as TOML
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Values are out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Render a panic payload as text
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
