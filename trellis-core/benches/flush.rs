use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use trellis_core::reactive::{Dependency, Tracker};

/// One dependency fanned out to `n` computations, invalidated and
/// flushed per iteration.
fn flush_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush_fan_out");
    for n in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let tracker = Tracker::new();
            let dependency = Dependency::new(&tracker);
            for _ in 0..n {
                let dep = dependency.clone();
                tracker.autorun(move |_| {
                    dep.depend();
                });
            }
            b.iter(|| {
                dependency.changed();
                tracker.flush().unwrap();
                black_box(&tracker);
            });
        });
    }
    group.finish();
}

/// A linear chain where each rerun invalidates the next link, so one
/// flush walks the whole chain to a fixed point.
fn flush_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush_chain");
    for n in [10usize, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let tracker = Tracker::new();
            let dependencies: Vec<Dependency> =
                (0..n).map(|_| Dependency::new(&tracker)).collect();
            for i in 0..n - 1 {
                let this = dependencies[i].clone();
                let next = dependencies[i + 1].clone();
                tracker.autorun(move |c| {
                    this.depend();
                    if !c.first_run() {
                        next.changed();
                    }
                });
            }
            let last = dependencies[n - 1].clone();
            tracker.autorun(move |_| {
                last.depend();
            });
            b.iter(|| {
                dependencies[0].changed();
                tracker.flush().unwrap();
                black_box(&tracker);
            });
        });
    }
    group.finish();
}

/// Subscription churn: depend from a fresh computation, then stop it.
fn subscribe_unsubscribe(c: &mut Criterion) {
    c.bench_function("subscribe_unsubscribe", |b| {
        let tracker = Tracker::new();
        let dependency = Dependency::new(&tracker);
        b.iter(|| {
            let dep = dependency.clone();
            let computation = tracker.autorun(move |_| {
                dep.depend();
            });
            computation.stop();
            black_box(dependency.dependent_count());
        });
    });
}

criterion_group!(benches, flush_fan_out, flush_chain, subscribe_unsubscribe);
criterion_main!(benches);
