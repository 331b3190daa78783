//! Monotonic time sources that are safe to place in shared memory.
//!
//! Everything here stores raw `CLOCK_MONOTONIC` nanosecond stamps in
//! atomics, so a stamp written by one process can be read by any fork
//! sibling that shares the mapping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::arena::ArenaSafe;
use crate::ffi::syscall::clock_monotonic_ns;
use crate::stats::LatencyDistribution;


/// Returns the current monotonic clock reading.
pub fn now() -> Duration {
    Duration::from_nanos(clock_monotonic_ns())
}

/// A resettable stopwatch backed by a single atomic stamp.
pub struct Timer {
    start: AtomicU64,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: AtomicU64::new(clock_monotonic_ns()),
        }
    }

    pub fn reset(&self) {
        self.start.store(clock_monotonic_ns(), Ordering::Release);
    }

    /// Time passed since the last reset.
    pub fn elapsed(&self) -> Duration {
        let start = self.start.load(Ordering::Acquire);
        Duration::from_nanos(clock_monotonic_ns().saturating_sub(start))
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl ArenaSafe for Timer {}

/// Cookie handed out by [`WakeTimer::cookie`], consumed by
/// [`WakeTimer::elapsed`].
pub type Cookie = u64;

/// A timer that tolerates being reset while a reading is in flight.
///
/// `reset` advances a monotonic index and stamps the slot `index % S`.
/// A reader first takes a [`cookie`][WakeTimer::cookie], then later asks
/// for the [`elapsed`][WakeTimer::elapsed] time of that cookie. If `S`
/// or more resets happened in between, the slot has been reused and the
/// reading is reported as lost rather than attributed to the wrong
/// reset. Both paths are wait-free.
pub struct WakeTimer<const S: usize> {
    index: AtomicU64,
    slots: [AtomicU64; S],
}

impl<const S: usize> WakeTimer<S> {
    pub fn new() -> Self {
        let now = clock_monotonic_ns();
        let slots = [const { AtomicU64::new(0) }; S];
        for slot in &slots {
            slot.store(now, Ordering::Relaxed);
        }
        Self {
            index: AtomicU64::new(0),
            slots,
        }
    }

    /// Stamps the current time into the next slot.
    pub fn reset(&self) {
        let index = self.index.fetch_add(1, Ordering::AcqRel);
        self.slots[index as usize % S].store(clock_monotonic_ns(), Ordering::Release);
    }

    /// Returns a cookie naming the most recent reset.
    pub fn cookie(&self) -> Cookie {
        self.index.load(Ordering::Acquire)
    }

    /// Time passed since the reset named by `cookie`, or `None` if the
    /// slot has since been reused.
    pub fn elapsed(&self, cookie: Cookie) -> Option<Duration> {
        let stamp = self.slots[cookie as usize % S].load(Ordering::Acquire);
        if self.index.load(Ordering::Acquire) >= cookie + S as u64 {
            return None;
        }
        Some(Duration::from_nanos(
            clock_monotonic_ns().saturating_sub(stamp),
        ))
    }
}

impl<const S: usize> Default for WakeTimer<S> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<const S: usize> ArenaSafe for WakeTimer<S> {}

/// A fixed-capacity ring of duration samples with an atomic write index.
///
/// Writers never block and never fail; once the ring wraps, the oldest
/// samples are overwritten. Quantile summaries are insensitive to that
/// kind of loss, which is what makes the bounded footprint acceptable
/// inside the shared arena.
pub struct SampleRing<const N: usize> {
    index: AtomicU64,
    slots: [AtomicU64; N],
}

impl<const N: usize> SampleRing<N> {
    pub fn new() -> Self {
        Self {
            index: AtomicU64::new(0),
            slots: [const { AtomicU64::new(0) }; N],
        }
    }

    pub fn sample(&self, value: Duration) {
        let index = self.index.fetch_add(1, Ordering::AcqRel);
        self.slots[index as usize % N].store(value.as_nanos() as u64, Ordering::Release);
    }

    /// Drains every valid entry into `dist` and resets the ring.
    ///
    /// Must not race with writers; callers drain between trials, when
    /// no workload can be inside `sample`.
    pub fn flush(&self, dist: &mut LatencyDistribution) {
        let filled = (self.index.load(Ordering::Acquire) as usize).min(N);
        for slot in &self.slots[..filled] {
            dist.sample(Duration::from_nanos(slot.load(Ordering::Acquire)));
        }
        self.index.store(0, Ordering::Release);
    }
}

impl<const N: usize> Default for SampleRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<const N: usize> ArenaSafe for SampleRing<N> {}

/// Formats a duration with a unit that keeps the figure readable.
pub fn fmt_duration(d: Duration) -> String {
    const UNITS: [(u64, &str); 5] = [
        (3_600_000_000_000, "h"),
        (60_000_000_000, "m"),
        (1_000_000_000, "s"),
        (1_000_000, "ms"),
        (1_000, "µs"),
    ];
    let ns = d.as_nanos() as u64;
    for (scale, unit) in UNITS {
        if ns >= 10 * scale {
            return format!("{:.3}{}", ns as f64 / scale as f64, unit);
        }
    }
    format!("{ns}ns")
}
