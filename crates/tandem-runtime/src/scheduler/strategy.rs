//! Runner assignment strategies

use crate::scheduler::ActorTaskRunner;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks the runner that receives a submitted or re-submitted task
///
/// Implementations are called concurrently from any submitting thread and
/// must not assume anything about the runners beyond the slice they are
/// given. The slice is never empty.
pub trait RunnerAssignmentStrategy: Send + Sync {
    /// Choose one runner from `runners`
    fn next_runner<'r>(&self, runners: &'r [ActorTaskRunner]) -> &'r ActorTaskRunner;
}

/// Uniformly random choice, independent of queue depth
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomAssignment;

impl RunnerAssignmentStrategy for RandomAssignment {
    fn next_runner<'r>(&self, runners: &'r [ActorTaskRunner]) -> &'r ActorTaskRunner {
        let offset = rand::thread_rng().gen_range(0..runners.len());
        &runners[offset]
    }
}

/// Cycles through the runners in index order
#[derive(Debug, Default)]
pub struct RoundRobinAssignment {
    cursor: AtomicUsize,
}

impl RoundRobinAssignment {
    /// Start at runner 0
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunnerAssignmentStrategy for RoundRobinAssignment {
    fn next_runner<'r>(&self, runners: &'r [ActorTaskRunner]) -> &'r ActorTaskRunner {
        let offset = self.cursor.fetch_add(1, Ordering::Relaxed) % runners.len();
        &runners[offset]
    }
}
