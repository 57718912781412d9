//! Clock abstraction for runners

use std::time::Instant;

/// Time source consulted by runners around each quantum
pub trait ActorClock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ActorClock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
