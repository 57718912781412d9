use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tandem_runtime::{actor_fn, RoundRobinAssignment, Scheduler, Step};

fn running(runners: usize) -> Scheduler {
    let scheduler = Scheduler::builder()
        .runner_count(runners)
        .assignment_strategy(RoundRobinAssignment::new())
        .build()
        .unwrap();
    scheduler.start().unwrap();
    scheduler
}

fn bench_submit_and_complete(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_complete");
    const TASKS: u64 = 1_000;
    group.throughput(Throughput::Elements(TASKS));

    for runners in [1, 2, 4] {
        let scheduler = running(runners);
        group.bench_with_input(BenchmarkId::new("runners", runners), &runners, |b, _| {
            b.iter(|| {
                let handles: Vec<_> = (0..TASKS)
                    .map(|_| {
                        scheduler
                            .submit_actor(actor_fn("bench", |_ctx| Ok(Step::Done)))
                            .unwrap()
                    })
                    .collect();
                for handle in handles {
                    black_box(handle.wait());
                }
            });
        });
        scheduler.stop().unwrap().wait();
    }
    group.finish();
}

fn bench_yield_round_trips(c: &mut Criterion) {
    let scheduler = running(2);
    c.bench_function("yield_100_quanta", |b| {
        b.iter(|| {
            let handle = scheduler
                .submit_actor(actor_fn("yielder", |ctx| {
                    if ctx.quantum() < 100 {
                        Ok(Step::Yield)
                    } else {
                        Ok(Step::Done)
                    }
                }))
                .unwrap();
            black_box(handle.wait());
        });
    });
    scheduler.stop().unwrap().wait();
}

fn bench_blocking_excursion(c: &mut Criterion) {
    let scheduler = running(2);
    c.bench_function("blocking_excursion", |b| {
        b.iter(|| {
            let handle = scheduler
                .submit_actor(actor_fn("blocker", |ctx| {
                    if ctx.quantum() == 1 {
                        Ok(Step::block(|| Ok(())))
                    } else {
                        Ok(Step::Done)
                    }
                }))
                .unwrap();
            black_box(handle.wait());
        });
    });
    scheduler.stop().unwrap().wait();
}

criterion_group!(
    benches,
    bench_submit_and_complete,
    bench_yield_round_trips,
    bench_blocking_excursion
);
criterion_main!(benches);
