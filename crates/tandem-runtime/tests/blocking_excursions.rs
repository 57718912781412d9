//! Integration tests for blocking excursions through the scheduler

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tandem_runtime::{
    actor_fn, ActorTaskRunner, RoundRobinAssignment, RunnerAssignmentStrategy, Scheduler,
    SchedulerState, Step, TaskFault, TaskOutcome,
};

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Always picks runner 0
struct FirstRunner;

impl RunnerAssignmentStrategy for FirstRunner {
    fn next_runner<'r>(&self, runners: &'r [ActorTaskRunner]) -> &'r ActorTaskRunner {
        &runners[0]
    }
}

/// Tracks how many threads are inside one actor at once
#[derive(Default)]
struct Occupancy {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Occupancy {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[test]
fn test_excursion_resumes_exactly_once() {
    init_tracing();
    let scheduler = Scheduler::builder()
        .runner_count(4)
        .assignment_strategy(RoundRobinAssignment::new())
        .build()
        .unwrap();
    scheduler.start().unwrap();

    let occupancy = Arc::new(Occupancy::default());
    let resumed = Arc::new(AtomicUsize::new(0));
    let (body_occ, counter) = (Arc::clone(&occupancy), Arc::clone(&resumed));

    let handle = scheduler
        .submit_actor(actor_fn("excursions", move |ctx| {
            body_occ.enter();
            if ctx.take_blocking_outcome().is_some() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            let step = if ctx.quantum() <= 3 {
                let call_occ = Arc::clone(&body_occ);
                Step::block(move || {
                    call_occ.enter();
                    thread::sleep(Duration::from_millis(10));
                    call_occ.leave();
                    Ok(())
                })
            } else {
                Step::Done
            };
            body_occ.leave();
            Ok(step)
        }))
        .unwrap();

    assert_eq!(handle.wait_timeout(WAIT), Some(TaskOutcome::Completed));
    assert_eq!(resumed.load(Ordering::SeqCst), 3);
    assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);

    let stats = handle.stats();
    assert_eq!(stats.blocking_excursions, 3);
    assert_eq!(stats.quanta, 4);
    let handoffs: u64 = scheduler
        .runner_metrics()
        .iter()
        .map(|m| m.blocking_handoffs)
        .sum();
    assert_eq!(handoffs, 3);

    scheduler.stop().unwrap().wait();
}

#[test]
fn test_blocking_does_not_stall_runner() {
    init_tracing();
    let scheduler = Scheduler::builder()
        .runner_count(1)
        .assignment_strategy(FirstRunner)
        .build()
        .unwrap();
    scheduler.start().unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&events);
    let blocker = scheduler
        .submit_actor(actor_fn("sleeper", move |ctx| {
            if ctx.quantum() == 1 {
                let log = Arc::clone(&log);
                return Ok(Step::block(move || {
                    thread::sleep(Duration::from_millis(200));
                    log.lock().push("blocking done");
                    Ok(())
                }));
            }
            Ok(Step::Done)
        }))
        .unwrap();

    let quick: Vec<_> = (0..10)
        .map(|_| {
            let log = Arc::clone(&events);
            scheduler
                .submit_actor(actor_fn("quick", move |_ctx| {
                    log.lock().push("quick");
                    Ok(Step::Done)
                }))
                .unwrap()
        })
        .collect();
    for handle in &quick {
        assert!(handle.wait_timeout(WAIT).unwrap().is_completed());
    }
    // Every quick task ran while the sleeper was still blocked
    assert!(!blocker.is_finished());

    assert!(blocker.wait_timeout(WAIT).unwrap().is_completed());
    let events = events.lock();
    assert_eq!(events.len(), 11);
    assert_eq!(events.last(), Some(&"blocking done"));

    scheduler.stop().unwrap().wait();
}

#[test]
fn test_blocking_failure_delivered_to_actor() {
    init_tracing();
    let scheduler = Scheduler::new(2);
    scheduler.start().unwrap();

    let seen = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&seen);
    let handle = scheduler
        .submit_actor(actor_fn("recovering", move |ctx| {
            if ctx.quantum() == 1 {
                return Ok(Step::block(|| panic!("driver crashed")));
            }
            *slot.lock() = ctx.take_blocking_outcome();
            Ok(Step::Done)
        }))
        .unwrap();

    assert_eq!(handle.wait_timeout(WAIT), Some(TaskOutcome::Completed));
    assert_eq!(
        *seen.lock(),
        Some(Err(TaskFault::Blocking("panicked: driver crashed".to_string())))
    );

    // The pool thread survived the panic
    let again = scheduler
        .submit_actor(actor_fn("after", |ctx| {
            if ctx.quantum() == 1 {
                Ok(Step::block(|| Ok(())))
            } else {
                Ok(Step::Done)
            }
        }))
        .unwrap();
    assert!(again.wait_timeout(WAIT).unwrap().is_completed());

    scheduler.stop().unwrap().wait();
}

#[test]
fn test_zero_grace_still_terminates() {
    init_tracing();
    let scheduler = Scheduler::builder()
        .runner_count(1)
        .shutdown_grace(Duration::ZERO)
        .build()
        .unwrap();
    scheduler.start().unwrap();

    let in_call = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&in_call);
    let handle = scheduler
        .submit_actor(actor_fn("slow", move |ctx| {
            if ctx.quantum() == 1 {
                let flag = Arc::clone(&flag);
                return Ok(Step::block(move || {
                    flag.store(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(300));
                    Ok(())
                }));
            }
            Ok(Step::Done)
        }))
        .unwrap();

    let deadline = Instant::now() + WAIT;
    while in_call.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    let stopping = Instant::now();
    let shutdown = scheduler.stop().unwrap();
    assert!(stopping.elapsed() < Duration::from_millis(300));
    assert!(shutdown.wait_timeout(WAIT));
    assert_eq!(scheduler.state(), SchedulerState::Terminated);

    // The call finishes after shutdown and the task cannot resume
    assert_eq!(
        handle.wait_timeout(WAIT),
        Some(TaskOutcome::Failed(TaskFault::Abandoned(
            "scheduler not running"
        )))
    );
}

#[test]
fn test_grace_waits_for_blocking_call() {
    init_tracing();
    let scheduler = Scheduler::builder()
        .runner_count(1)
        .shutdown_grace(Duration::from_secs(5))
        .build()
        .unwrap();
    scheduler.start().unwrap();

    let finished = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&finished);
    let (entered_tx, entered_rx) = crossbeam::channel::bounded(1);
    scheduler
        .submit_actor(actor_fn("graceful", move |ctx| {
            if ctx.quantum() == 1 {
                let flag = Arc::clone(&flag);
                let entered_tx = entered_tx.clone();
                return Ok(Step::block(move || {
                    let _ = entered_tx.send(());
                    thread::sleep(Duration::from_millis(100));
                    flag.store(1, Ordering::SeqCst);
                    Ok(())
                }));
            }
            Ok(Step::Done)
        }))
        .unwrap();

    entered_rx.recv_timeout(WAIT).unwrap();
    scheduler.stop().unwrap().wait();
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert!(scheduler.blocking_executor().is_shutdown());
    assert_eq!(scheduler.blocking_executor().live_threads(), 0);
}
