//! Benchmarks for change propagation
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ripple_core::reactive::{Derived, Effect, Runtime, Signal};

// =============================================================================
// SIGNAL BENCHMARKS
// =============================================================================

fn bench_signal_set_unobserved(c: &mut Criterion) {
    let rt = Runtime::new();
    let _guard = rt.enter();
    let s = Signal::new(0i64);
    let mut i = 0i64;

    c.bench_function("signal_set_unobserved", |b| {
        b.iter(|| {
            i += 1;
            s.set(black_box(i))
        })
    });
}

fn bench_signal_set_same_value(c: &mut Criterion) {
    let rt = Runtime::new();
    let _guard = rt.enter();
    let s = Signal::new(42i64);
    Effect::render(move || {
        black_box(s.get());
    });

    c.bench_function("signal_set_same_value", |b| {
        b.iter(|| s.set(black_box(42)))
    });
}

// =============================================================================
// DERIVED BENCHMARKS
// =============================================================================

fn bench_derived_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("derived_chain");

    for depth in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, &depth| {
            let rt = Runtime::new();
            let _guard = rt.enter();
            let s = Signal::new(0i64);

            let mut current = Derived::new(move || s.get() + 1);
            for _ in 1..depth {
                let prev = current;
                current = Derived::new(move || prev.get() + 1);
            }

            let mut i = 0i64;
            b.iter(|| {
                i += 1;
                s.set(i);
                black_box(current.get())
            })
        });
    }

    group.finish();
}

// =============================================================================
// EFFECT BENCHMARKS
// =============================================================================

fn bench_wide_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("wide_fanout");

    for width in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("effects", width), &width, |b, &width| {
            let rt = Runtime::new();
            let _guard = rt.enter();
            let s = Signal::new(0i64);
            for _ in 0..width {
                Effect::render(move || {
                    black_box(s.get());
                });
            }

            let mut i = 0i64;
            b.iter(|| {
                i += 1;
                s.set(i);
                rt.run_microtasks()
            })
        });
    }

    group.finish();
}

fn bench_absorbed_fanout(c: &mut Criterion) {
    let rt = Runtime::new();
    let _guard = rt.enter();
    let s = Signal::new(0i64);
    let parity = Derived::new(move || s.get() % 2);
    for _ in 0..100 {
        Effect::render(move || {
            black_box(parity.get());
        });
    }

    let mut i = 0i64;
    c.bench_function("absorbed_fanout", |b| {
        b.iter(|| {
            // Same parity, so every effect is skipped after the derived check
            i += 2;
            s.set(i);
            rt.run_microtasks()
        })
    });
}

criterion_group!(
    signal_benches,
    bench_signal_set_unobserved,
    bench_signal_set_same_value
);

criterion_group!(derived_benches, bench_derived_chain);

criterion_group!(effect_benches, bench_wide_fanout, bench_absorbed_fanout);

criterion_main!(signal_benches, derived_benches, effect_benches);
