//! Process-level workload scenarios.
//!
//! Everything here that actually forks workloads needs root and a
//! writable cgroup hierarchy, and is `#[ignore]`d so the default test
//! run passes on an unprivileged host. Run them with
//! `cargo test -- --ignored` on a sched_ext machine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use sched_harness::bench::Converge;
use sched_harness::stats::LatencyDistribution;
use sched_harness::sync::Semaphore;
use sched_harness::sys::System;
use sched_harness::workload::{Context, WorkloadOpts};

fn no_sched_ext() -> WorkloadOpts {
    WorkloadOpts {
        sched_ext: false,
        ..WorkloadOpts::default()
    }
}

// The convergence driver's fail-stop property needs no workloads at
// all: a metric pinned below the limit terminates on the miss budget.
#[test]
fn convergence_timeout_is_bounded() {
    let mut ctx = Context::with_capacity(1 << 22).unwrap();
    let opts = Converge::default();
    let started = Instant::now();
    let mut trials = 0;
    let value = opts
        .converge(&mut ctx, || {
            trials += 1;
            0.5
        }, 0.95)
        .unwrap();
    assert_eq!(value, 0.5);
    assert_eq!(trials, 4);
    // One stalled trial at the base window, then three escalating
    // misses: 0.25 + 0.25 + 0.5 + 1.0 seconds of measurement.
    assert!(started.elapsed() < Duration::from_secs_f64(0.25 + 0.5 + 1.0 + 2.0));
}

// Requires root.
#[test]
#[ignore]
fn ping_pong_converges() {
    let mut ctx = Context::create().unwrap();
    let s1 = ctx.alloc(Semaphore::new(10)).unwrap();
    let s2 = ctx.alloc(Semaphore::new(10)).unwrap();

    let running = ctx.running_handle();
    ctx.add_with(no_sched_ext(), move || {
        while running.load(Ordering::Acquire) {
            s1.produce(1, 1);
            s2.consume(1, 1);
        }
        s1.produce(1, 1);
        Ok(())
    })
    .unwrap();
    let running = ctx.running_handle();
    ctx.add_with(no_sched_ext(), move || {
        while running.load(Ordering::Acquire) {
            s2.produce(1, 1);
            s1.consume(1, 1);
        }
        s2.produce(1, 1);
        Ok(())
    })
    .unwrap();

    let mut total = 0;
    let report = Converge::default()
        .benchmark(&mut ctx, || {
            let mut latency = LatencyDistribution::new();
            s1.flush(&mut latency);
            s2.flush(&mut latency);
            total += latency.count();
            latency.estimates()
        })
        .unwrap();

    assert!(total >= 10_000, "only {total} wake samples");
    let p50 = report.quantiles[3].1;
    assert!(p50 >= 100e-9 && p50 <= 100e-6, "p50 {p50}s out of range");
}

// Requires root.
#[test]
#[ignore]
fn worker_fanout_converges() {
    let mut ctx = Context::create().unwrap();
    let workers = System::load().unwrap().logical_cpus() as u32;
    let out = ctx.alloc(Semaphore::default()).unwrap();
    let in_ = ctx.alloc(Semaphore::default()).unwrap();
    let spun = ctx.alloc(AtomicU64::new(0)).unwrap();

    // Coordinator: keep `workers` tokens circulating.
    let running = ctx.running_handle();
    ctx.add_with(no_sched_ext(), move || {
        out.produce(workers, workers);
        while running.load(Ordering::Acquire) {
            in_.consume(1, 1);
            out.produce(1, 1);
        }
        // Leave enough tokens for every worker to drain out.
        out.produce(workers, workers);
        Ok(())
    })
    .unwrap();

    for _ in 0..workers {
        let running = ctx.running_handle();
        ctx.add_with(no_sched_ext(), move || {
            while running.load(Ordering::Acquire) {
                out.consume(1, 1);
                let spin = Instant::now();
                while spin.elapsed() < Duration::from_micros(10) {
                    std::hint::spin_loop();
                }
                spun.fetch_add(1, Ordering::Relaxed);
                in_.produce(1, 1);
            }
            in_.produce(1, 1);
            Ok(())
        })
        .unwrap();
    }

    let started = Instant::now();
    Converge::default()
        .benchmark(&mut ctx, || {
            let mut latency = LatencyDistribution::new();
            out.flush(&mut latency);
            in_.flush(&mut latency);
            latency.estimates()
        })
        .unwrap();

    // Throughput sanity: the wall clock here includes fork and
    // teardown between trials, so assert well under the ideal
    // 0.5 * K / 10µs steady-state rate.
    let rate = spun.load(Ordering::Relaxed) as f64 / started.elapsed().as_secs_f64();
    assert!(
        rate >= 0.5 * workers as f64 * 100_000.0 * 0.01,
        "throughput collapsed: {rate} units/s"
    );
}

// Requires root.
#[test]
#[ignore]
fn herd_broadcast_converges() {
    for herd in [1u32, 2, 4, 8, 16] {
        let mut ctx = Context::create().unwrap();
        let out = ctx.alloc(Semaphore::default()).unwrap();
        let in_ = ctx.alloc(Semaphore::default()).unwrap();

        let running = ctx.running_handle();
        ctx.add_with(no_sched_ext(), move || {
            while running.load(Ordering::Acquire) {
                out.produce(herd, herd);
                in_.consume(herd, 1);
            }
            out.produce(herd, herd);
            Ok(())
        })
        .unwrap();
        for _ in 0..herd {
            let running = ctx.running_handle();
            ctx.add_with(no_sched_ext(), move || {
                while running.load(Ordering::Acquire) {
                    out.consume(1, 1);
                    in_.produce(1, 1);
                }
                in_.produce(1, 1);
                Ok(())
            })
            .unwrap();
        }

        Converge::default()
            .benchmark(&mut ctx, || {
                let mut latency = LatencyDistribution::new();
                out.flush(&mut latency);
                in_.flush(&mut latency);
                latency.estimates()
            })
            .unwrap();
    }
}
