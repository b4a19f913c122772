//! Benchmark: read paths of a lifecycle manager.
//!
//! Compares:
//! - a cached read (nothing changed since the last construction)
//! - a replace-discipline read after its input changed
//! - an in-place read after its input changed
//! - tearing down owners with nested instances of varying depth

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use tether_core::reactive::TrackedCell;
use tether_core::resource::{Definition, Hooks, InPlace};
use tether_core::Runtime;

struct Accumulator {
    total: u64,
}

impl InPlace<TrackedCell<u64>> for Accumulator {
    type Output = u64;

    fn modify(&mut self, input: &TrackedCell<u64>, _hooks: &Hooks<'_>) -> anyhow::Result<()> {
        self.total += input.get();
        Ok(())
    }

    fn current(&self) -> u64 {
        self.total
    }
}

fn benchmark_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    let runtime = Runtime::new();
    let owner = runtime.create_owner();
    let input = TrackedCell::new(1u64);

    let replace = Definition::replace(|hooks, input: &TrackedCell<u64>| {
        hooks.on_cleanup(|| {});
        Ok(input.get() + 1)
    });
    let in_place = Definition::in_place(|| Accumulator { total: 0 });

    let replaced = runtime.bind(&replace, owner, {
        let input = input.clone();
        move || input.clone()
    });
    let updated = runtime.bind(&in_place, owner, {
        let input = input.clone();
        move || input.clone()
    });

    group.bench_function("cached", |b| {
        replaced.read().ok();
        b.iter(|| black_box(replaced.read().ok()));
    });

    group.bench_function("replace_after_change", |b| {
        b.iter(|| {
            input.update(|n| n + 1);
            black_box(replaced.read().ok())
        });
    });

    group.bench_function("in_place_after_change", |b| {
        b.iter(|| {
            input.update(|n| n + 1);
            black_box(updated.read().ok())
        });
    });

    group.finish();
}

fn nested(depth: usize) -> Definition<usize, usize> {
    Definition::replace(move |hooks, level: &usize| {
        let level = *level;
        if level + 1 >= depth {
            return Ok(level);
        }
        let child = hooks.embed(&nested(depth), move || level + 1);
        Ok(child.current()?)
    })
}

fn benchmark_teardown(c: &mut Criterion) {
    let mut group = c.benchmark_group("teardown");

    for depth in [1, 4, 16, 64] {
        group.bench_with_input(BenchmarkId::new("nested", depth), &depth, |b, &depth| {
            let runtime = Runtime::new();
            let definition = nested(depth);
            b.iter(|| {
                let owner = runtime.create_owner();
                let resource = runtime.bind(&definition, owner, || 0);
                resource.read().ok();
                black_box(runtime.destroy(owner))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_reads, benchmark_teardown);
criterion_main!(benches);
