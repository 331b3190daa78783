use std::time::{Duration, Instant};

use super::{BenchError, Converge};
use crate::stats::Distribution;
use crate::workload::Context;

fn fast() -> Converge {
    Converge {
        min_time: Duration::from_millis(2),
        max_time: Duration::from_millis(16),
        confidence: 0.95,
    }
}

fn empty_ctx() -> Context {
    Context::with_capacity(1 << 22).unwrap()
}

#[test]
fn test_converge_two_hits() {
    let mut ctx = empty_ctx();
    let mut trials = 0;
    let value = fast()
        .converge(&mut ctx, || {
            trials += 1;
            0.99
        }, 0.95)
        .unwrap();
    assert_eq!(value, 0.99);
    assert_eq!(trials, 2);
}

#[test]
fn test_converge_fail_stop_is_bounded() {
    // A metric that never moves must terminate on the miss budget, not
    // on wall clock: one stalled trial plus three misses.
    let mut ctx = empty_ctx();
    let mut trials = 0;
    let value = fast()
        .converge(&mut ctx, || {
            trials += 1;
            0.5
        }, 0.95)
        .unwrap();
    assert_eq!(value, 0.5);
    assert_eq!(trials, 4);
}

#[test]
fn test_converge_rides_improvement() {
    let mut ctx = empty_ctx();
    let series = [0.3, 0.5, 0.9, 0.96, 0.97];
    let mut i = 0;
    let value = fast()
        .converge(&mut ctx, || {
            let v = series[i];
            i += 1;
            v
        }, 0.95)
        .unwrap();
    assert_eq!(value, 0.97);
    assert_eq!(i, series.len());
}

#[test]
fn test_converge_escalates_window() {
    // Four stalled trials with doubling after the first: the total
    // wall time stays within the sum of the escalated windows.
    let opts = Converge {
        min_time: Duration::from_millis(10),
        max_time: Duration::from_millis(400),
        confidence: 0.95,
    };
    let mut ctx = empty_ctx();
    let started = Instant::now();
    opts.converge(&mut ctx, || 0.5, 0.95).unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(10 + 10 + 20 + 40));
    assert!(elapsed < Duration::from_millis(10 + 20 + 40 + 80) + Duration::from_secs(1));
}

#[test]
fn test_benchmark_converges_on_stable_summary() {
    let mut ctx = empty_ctx();
    let report = fast()
        .benchmark(&mut ctx, || {
            let mut d = Distribution::<u64>::new();
            for i in 0..1000 {
                d.sample(i);
            }
            d.estimates()
        })
        .unwrap();
    assert_eq!(report.count, 1000);
}

#[test]
fn test_benchmark_rejects_unstable_summary() {
    let mut ctx = empty_ctx();
    let mut flip = false;
    let err = fast()
        .benchmark(&mut ctx, || {
            flip = !flip;
            let offset = if flip { 0 } else { 1_000_000 };
            let mut d = Distribution::<u64>::new();
            for i in 0..1000 {
                d.sample(i + offset);
            }
            d.estimates()
        })
        .unwrap_err();
    match err {
        BenchError::DidNotConverge { value } => assert!(value < 0.95),
        other => panic!("unexpected error: {other}"),
    }
}
