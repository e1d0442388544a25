//! Router Benchmarks
//!
//! Routing runs on every free-text request before any backend work starts,
//! so it should stay in the microsecond range.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use subpulse::route;
use subpulse::router::extract_period;

fn bench_single_intent(c: &mut Criterion) {
    c.bench_function("route_single_intent", |b| {
        b.iter(|| route(black_box("payment success rate for the past 3 weeks")));
    });
}

fn bench_multi_intent(c: &mut Criterion) {
    c.bench_function("route_multi_intent", |b| {
        b.iter(|| route(black_box("subscription performance for 7 days and payment rate for 15 days")));
    });
}

fn bench_comparison(c: &mut Criterion) {
    c.bench_function("route_comparison", |b| {
        b.iter(|| route(black_box("compare 7 days, 2 weeks, 1 month and 90 days")));
    });
}

fn bench_period_fallbacks(c: &mut Criterion) {
    c.bench_function("extract_period_fallback", |b| {
        b.iter(|| extract_period(black_box("how did we do this month overall")));
    });
}

criterion_group!(benches, bench_single_intent, bench_multi_intent, bench_comparison, bench_period_fallbacks);
criterion_main!(benches);
