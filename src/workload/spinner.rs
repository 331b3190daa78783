use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use crate::arena::{ArenaSafe, Shared};
use crate::clock::Timer;
use crate::ffi::syscall::current_cpu;
use crate::workload::Context;

struct SpinState {
    last_cpu: AtomicU32,
}

unsafe impl ArenaSafe for SpinState {}

/// A busy-loop workload that publishes where it last ran.
///
/// Spins until the context stops (or an optional duration passes),
/// continually recording the current CPU. The placement trace is what
/// topology tests read back.
#[derive(Clone, Copy)]
pub struct Spinner {
    state: Shared<SpinState>,
    running: Shared<AtomicBool>,
    duration: Option<Duration>,
}

impl Spinner {
    pub fn new(ctx: &Context) -> io::Result<Self> {
        let state = ctx.alloc(SpinState {
            last_cpu: AtomicU32::new(u32::MAX),
        })?;
        Ok(Self {
            state,
            running: ctx.running_handle(),
            duration: None,
        })
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Spins in place; usable directly as a workload body.
    pub fn spin(&self) -> io::Result<()> {
        let timer = Timer::new();
        while self.running.load(Ordering::Acquire)
            && self.duration.map_or(true, |d| timer.elapsed() < d)
        {
            if let Ok(cpu) = current_cpu() {
                self.state.last_cpu.store(cpu, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// The CPU this spinner last observed itself on, or `u32::MAX`
    /// before the first observation.
    pub fn last_cpu(&self) -> u32 {
        self.state.last_cpu.load(Ordering::Relaxed)
    }
}
