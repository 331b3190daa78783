//! Workload processes and the context that drives them.
//!
//! A [`Context`] owns the shared arena and a set of registered
//! workloads. Each workload runs in its own forked child, bound to a
//! fresh cgroup and opted into the sched_ext scheduling class. A
//! two-semaphore barrier lets [`Context::start`] release every child
//! simultaneously with one broadcast, and unwind cleanly when any
//! child fails to come up.

use std::ffi::CString;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use thiserror::Error;

use crate::arena::{Arena, ArenaSafe, Shared};
use crate::cgroup::CgroupScope;
use crate::ffi::syscall::{prctl_set_name, sched_setscheduler};
use crate::ffi::SCHED_EXT;
use crate::proc::Child;
use crate::sync::Semaphore;

mod spinner;

pub use spinner::Spinner;

/// Default arena capacity: enough for any reasonable workload count.
pub const DEFAULT_CAPACITY: usize = 1 << 30;

/// Why a workload could not be driven to completion.
#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("failed to acquire workload resources: {0}")]
    Resource(#[source] io::Error),
    #[error("failed to enter cgroup: {0}")]
    CgroupEnter(#[source] io::Error),
    #[error("failed to switch scheduling class: {0}")]
    SchedClass(#[source] io::Error),
    #[error("failed to set process name: {0}")]
    SetName(#[source] io::Error),
    #[error("workload body failed: {0}")]
    Body(#[source] io::Error),
    #[error("workload exited without reporting a result")]
    NoResult,
}

// Start/final result slots live in the arena, so they are encoded as
// two atomics: a stage discriminant and the raw errno. The parent
// rehydrates them into a WorkloadError.
const SLOT_EMPTY: u32 = 0;
const SLOT_OK: u32 = 1;
const SLOT_CGROUP: u32 = 2;
const SLOT_SCHED: u32 = 3;
const SLOT_NAME: u32 = 4;
const SLOT_BODY: u32 = 5;

struct ResultSlot {
    stage: AtomicU32,
    errno: AtomicI32,
}

impl ResultSlot {
    fn new() -> Self {
        Self {
            stage: AtomicU32::new(SLOT_EMPTY),
            errno: AtomicI32::new(0),
        }
    }

    fn clear(&self) {
        self.stage.store(SLOT_EMPTY, Ordering::Release);
    }

    fn set_ok(&self) {
        self.stage.store(SLOT_OK, Ordering::Release);
    }

    fn set_err(&self, stage: u32, err: &io::Error) {
        self.errno
            .store(err.raw_os_error().unwrap_or(libc::EIO), Ordering::Relaxed);
        self.stage.store(stage, Ordering::Release);
    }

    fn take(&self) -> Option<Result<(), WorkloadError>> {
        let stage = self.stage.swap(SLOT_EMPTY, Ordering::Acquire);
        if stage == SLOT_EMPTY {
            return None;
        }
        if stage == SLOT_OK {
            return Some(Ok(()));
        }
        let err = io::Error::from_raw_os_error(self.errno.load(Ordering::Relaxed));
        Some(Err(match stage {
            SLOT_CGROUP => WorkloadError::CgroupEnter(err),
            SLOT_SCHED => WorkloadError::SchedClass(err),
            SLOT_NAME => WorkloadError::SetName(err),
            _ => WorkloadError::Body(err),
        }))
    }
}

struct WorkloadShared {
    start: Semaphore,
    start_result: ResultSlot,
    final_result: ResultSlot,
}

unsafe impl ArenaSafe for WorkloadShared {}

impl WorkloadShared {
    fn new() -> Self {
        Self {
            start: Semaphore::default(),
            start_result: ResultSlot::new(),
            final_result: ResultSlot::new(),
        }
    }
}

/// Per-workload configuration.
#[derive(Clone, Debug)]
pub struct WorkloadOpts {
    /// Process name installed with `PR_SET_NAME`.
    pub name: Option<String>,
    /// Priority handed to `sched_setscheduler`; must be 0 for the
    /// sched_ext class.
    pub priority: i32,
    /// Whether the child opts into `SCHED_EXT`. Disable to exercise
    /// workloads under the stock scheduler.
    pub sched_ext: bool,
}

impl Default for WorkloadOpts {
    fn default() -> Self {
        Self {
            name: None,
            priority: 0,
            sched_ext: true,
        }
    }
}

type Body = Box<dyn FnMut() -> io::Result<()> + Send>;

/// One registered workload: a body closure plus the process, cgroup
/// and result plumbing around it.
pub struct WorkloadProcess {
    shared: Shared<WorkloadShared>,
    body: Body,
    opts: WorkloadOpts,
    cgroup: Option<CgroupScope>,
    child: Option<Child>,
}

impl WorkloadProcess {
    /// Forks the workload and waits for its first-stage result.
    fn start(&mut self) -> Result<(), WorkloadError> {
        // The cgroup survives across trials; create it on first use.
        if self.cgroup.is_none() {
            self.cgroup = Some(CgroupScope::create().map_err(WorkloadError::Resource)?);
        }
        let Some(cgroup) = self.cgroup.as_ref() else {
            unreachable!()
        };

        let shared = self.shared;
        shared.start_result.clear();
        shared.final_result.clear();

        let opts = &self.opts;
        let body = &mut self.body;
        let child = Child::run(|| child_main(shared, cgroup, opts, body), 0)
            .map_err(WorkloadError::Resource)?;
        self.child = Some(child);

        shared.start.consume(1, 1);
        let result = shared
            .start_result
            .take()
            .unwrap_or(Err(WorkloadError::NoResult));
        if result.is_err() {
            // The child reported failure before the barrier and has
            // already exited; reap it here so a failed start leaves
            // no child behind.
            if let Some(mut child) = self.child.take() {
                child.wait(true);
            }
        }
        result
    }

    /// Waits for the child and returns the body's result. A child that
    /// died without publishing one reports [`WorkloadError::NoResult`].
    fn join(&mut self) -> Result<(), WorkloadError> {
        if let Some(mut child) = self.child.take() {
            child.wait(true);
            return self
                .shared
                .final_result
                .take()
                .unwrap_or(Err(WorkloadError::NoResult));
        }
        Ok(())
    }
}

// Everything before the start signal reports through the start slot;
// everything after lands in the final slot.
fn child_main(shared: Shared<WorkloadShared>, cgroup: &CgroupScope, opts: &WorkloadOpts, body: &mut Body) {
    let mut fail = |stage: u32, err: io::Error| {
        shared.start_result.set_err(stage, &err);
        shared.start.produce(1, 1);
    };
    if let Err(e) = cgroup.enter() {
        return fail(SLOT_CGROUP, e);
    }
    if opts.sched_ext {
        if let Err(e) = sched_setscheduler(0, SCHED_EXT, opts.priority) {
            return fail(SLOT_SCHED, e);
        }
    }
    if let Some(name) = &opts.name {
        let result = CString::new(name.as_str())
            .map_err(io::Error::other)
            .and_then(|name| prctl_set_name(&name));
        if let Err(e) = result {
            return fail(SLOT_NAME, e);
        }
    }
    shared.start_result.set_ok();
    shared.start.produce(1, 1);

    match body() {
        Ok(()) => shared.final_result.set_ok(),
        Err(e) => shared.final_result.set_err(SLOT_BODY, &e),
    }
}

/// Drives a set of workload processes over shared state.
pub struct Context {
    arena: Arena,
    procs: Vec<WorkloadProcess>,
    running: Shared<AtomicBool>,
    wait_sem: Shared<Semaphore>,
    start_sem: Shared<Semaphore>,
}

impl Context {
    pub fn create() -> io::Result<Self> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> io::Result<Self> {
        let arena = Arena::create("sched-harness", capacity)?;
        let running = arena.alloc(AtomicBool::new(false))?;
        let wait_sem = arena.alloc(Semaphore::default())?;
        let start_sem = arena.alloc(Semaphore::default())?;
        Ok(Self {
            arena,
            procs: Vec::new(),
            running,
            wait_sem,
            start_sem,
        })
    }

    /// Places a value in the shared arena.
    ///
    /// Anything a workload body touches must be allocated here; plain
    /// heap state is copied, not shared, once the workload forks.
    pub fn alloc<T: ArenaSafe>(&self, value: T) -> io::Result<Shared<T>> {
        self.arena.alloc(value)
    }

    /// Registers a workload with default options.
    pub fn add<F>(&mut self, f: F) -> io::Result<()>
    where
        F: FnMut() -> io::Result<()> + Send + 'static,
    {
        self.add_with(WorkloadOpts::default(), f)
    }

    /// Registers a workload. The body runs after the start barrier and
    /// should poll [`running`][Self::running] as its termination check.
    pub fn add_with<F>(&mut self, opts: WorkloadOpts, mut f: F) -> io::Result<()>
    where
        F: FnMut() -> io::Result<()> + Send + 'static,
    {
        let shared = self.arena.alloc(WorkloadShared::new())?;
        let wait_sem = self.wait_sem;
        let start_sem = self.start_sem;
        let body = Box::new(move || {
            // Rendezvous: report in, then hold for the broadcast.
            wait_sem.produce(1, 1);
            start_sem.consume(1, 1);
            f()
        });
        self.procs.push(WorkloadProcess {
            shared,
            body,
            opts,
            cgroup: None,
            child: None,
        });
        Ok(())
    }

    pub fn workloads(&self) -> usize {
        self.procs.len()
    }

    /// Whether a trial is in flight. Workload bodies use this as their
    /// loop condition.
    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// A handle on the running flag that workload closures can carry
    /// across the fork.
    pub fn running_handle(&self) -> Shared<AtomicBool> {
        self.running
    }

    /// Starts every registered workload and releases them together.
    ///
    /// If the k-th workload fails to come up, the k already-running
    /// siblings are walked through the barrier, joined, and the error
    /// is returned with nothing left running.
    pub fn start(&mut self) -> Result<(), WorkloadError> {
        self.running.store(true, Ordering::SeqCst);
        for i in 0..self.procs.len() {
            if let Err(e) = self.procs[i].start() {
                self.running.store(false, Ordering::SeqCst);
                if i > 0 {
                    let started = i as u32;
                    self.wait_sem.consume(started, started);
                    self.start_sem.produce(started, started);
                    for proc in &mut self.procs[..i] {
                        let _ = proc.join();
                    }
                }
                return Err(e);
            }
        }

        // All children have signalled readiness; one broadcast wake
        // releases the whole set simultaneously.
        let n = self.procs.len() as u32;
        self.wait_sem.consume(n, 1);
        self.start_sem.produce(n, n);
        Ok(())
    }

    /// Ends the trial and joins every workload, reporting the first
    /// body failure.
    pub fn stop(&mut self) -> Result<(), WorkloadError> {
        let mut result = Ok(());
        if self.running.swap(false, Ordering::SeqCst) {
            for proc in &mut self.procs {
                let joined = proc.join();
                if result.is_ok() {
                    result = joined;
                }
            }
        }
        result
    }
}
