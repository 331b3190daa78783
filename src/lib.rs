//! Correctness and performance test harness for pluggable `sched_ext`
//! CPU schedulers.
//!
//! The harness launches synthetic multi-process workloads against a
//! running scheduler, measures wake-up latencies and placement
//! decisions, and asserts quantitative properties over statistically
//! stable aggregates.
//!
//! Workloads communicate through primitives allocated in a shared,
//! file-backed arena, so the same semaphore word is visible at the
//! same address in every forked child. Each workload runs in its own
//! process, inside a fresh cgroup, opted into the sched_ext scheduling
//! class. The convergence driver repeats trials until the measured
//! distribution stabilizes.
//!
//! ## Example
//!
//! Two workloads ping-pong a token through a pair of semaphores and
//! the benchmark converges on the wake-latency distribution:
//!
//! ```no_run
//! use std::sync::atomic::Ordering;
//!
//! use sched_harness::bench::Converge;
//! use sched_harness::stats::LatencyDistribution;
//! use sched_harness::sync::Semaphore;
//! use sched_harness::workload::Context;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut ctx = Context::create()?;
//! let s1 = ctx.alloc(Semaphore::new(10))?;
//! let s2 = ctx.alloc(Semaphore::new(10))?;
//!
//! let running = ctx.running_handle();
//! ctx.add(move || {
//!     while running.load(Ordering::Acquire) {
//!         s1.produce(1, 1);
//!         s2.consume(1, 1);
//!     }
//!     s1.produce(1, 1); // drain the peer
//!     Ok(())
//! })?;
//! let running = ctx.running_handle();
//! ctx.add(move || {
//!     while running.load(Ordering::Acquire) {
//!         s2.produce(1, 1);
//!         s1.consume(1, 1);
//!     }
//!     s2.produce(1, 1);
//!     Ok(())
//! })?;
//!
//! let report = Converge::default().benchmark(&mut ctx, || {
//!     let mut latency = LatencyDistribution::new();
//!     s1.flush(&mut latency);
//!     s2.flush(&mut latency);
//!     latency.estimates()
//! })?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```
//!
//! Running workloads requires root (cgroup creation and the
//! scheduling-class switch) and a kernel with sched_ext; the
//! statistics and driver layers work anywhere.

pub mod arena;
pub mod bench;
pub mod cgroup;
pub mod clock;
mod ffi;
pub mod proc;
pub mod sched;
pub mod stats;
pub mod sync;
pub mod sys;
pub mod workload;

pub use ffi::SCHED_EXT;
