//! `tandem run`: drive a synthetic workload through a scheduler

use crate::StrategyArg;
use anyhow::Context;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tandem_runtime::config::saturating_millis;
use tandem_runtime::{
    Actor, ActorContext, BlockingCall, BoxError, RandomAssignment, RoundRobinAssignment,
    RunnerMetricsSnapshot, Scheduler, Step, TaskOutcome,
};
use tracing::info;

pub struct RunArgs {
    pub config: Option<PathBuf>,
    pub runners: Option<usize>,
    pub actors: usize,
    pub yields: u64,
    pub blocking_ms: u64,
    pub grace_ms: Option<u64>,
    pub strategy: StrategyArg,
    pub json: bool,
}

/// Yields a fixed number of times, then optionally blocks once, then finishes
struct WorkloadActor {
    yields_left: u64,
    blocking: Option<BlockingCall>,
}

impl WorkloadActor {
    fn new(yields: u64, pause: Option<Duration>) -> Self {
        Self {
            yields_left: yields,
            blocking: pause.map(|pause| {
                BlockingCall::new(move || {
                    thread::sleep(pause);
                    Ok(())
                })
            }),
        }
    }
}

impl Actor for WorkloadActor {
    fn name(&self) -> &str {
        "workload"
    }

    fn run(&mut self, ctx: &mut ActorContext<'_>) -> Result<Step, BoxError> {
        if let Some(Err(fault)) = ctx.take_blocking_outcome() {
            return Err(fault.into());
        }
        if self.yields_left > 0 {
            self.yields_left -= 1;
            return Ok(Step::Yield);
        }
        match self.blocking.take() {
            Some(call) => Ok(Step::Block(call)),
            None => Ok(Step::Done),
        }
    }
}

#[derive(Serialize)]
struct RunReport {
    runners: usize,
    actors: usize,
    completed: usize,
    failed: usize,
    elapsed_ms: u64,
    metrics: Vec<RunnerMetricsSnapshot>,
}

pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run_workload(args, &mut out)
}

fn run_workload<W: Write>(args: RunArgs, out: &mut W) -> anyhow::Result<()> {
    let mut config = super::load_config(args.config.as_deref())?;
    if let Some(runners) = args.runners {
        config.runner_count = runners;
    }
    if let Some(grace_ms) = args.grace_ms {
        config.shutdown_grace_ms = grace_ms;
    }

    let builder = Scheduler::builder().config(config);
    let builder = match args.strategy {
        StrategyArg::Random => builder.assignment_strategy(RandomAssignment),
        StrategyArg::RoundRobin => builder.assignment_strategy(RoundRobinAssignment::new()),
    };
    let scheduler = builder.build().context("invalid scheduler configuration")?;
    scheduler.start()?;

    let pause = (args.blocking_ms > 0).then(|| Duration::from_millis(args.blocking_ms));
    info!(
        actors = args.actors,
        yields = args.yields,
        blocking_ms = args.blocking_ms,
        runners = scheduler.runner_count(),
        "submitting workload"
    );

    let started = Instant::now();
    let handles = (0..args.actors)
        .map(|_| scheduler.submit_actor(WorkloadActor::new(args.yields, pause)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut completed = 0;
    let mut failed = 0;
    for handle in &handles {
        match handle.wait() {
            TaskOutcome::Completed => completed += 1,
            TaskOutcome::Failed(_) => failed += 1,
        }
    }
    let elapsed = started.elapsed();

    scheduler.stop()?.wait();

    if args.json {
        let report = RunReport {
            runners: scheduler.runner_count(),
            actors: args.actors,
            completed,
            failed,
            elapsed_ms: saturating_millis(elapsed),
            metrics: scheduler.runner_metrics(),
        };
        serde_json::to_writer_pretty(&mut *out, &report)?;
        writeln!(out)?;
    } else {
        writeln!(
            out,
            "{} actors on {} runners: {} completed, {} failed in {:?}",
            args.actors,
            scheduler.runner_count(),
            completed,
            failed,
            elapsed
        )?;
        scheduler.dump_metrics_to(&mut *out)?;
    }
    Ok(())
}
