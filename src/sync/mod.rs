//! Cross-process synchronization primitives.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::arena::ArenaSafe;
use crate::clock::{SampleRing, WakeTimer};
use crate::ffi::syscall::{futex_wait, futex_wake};
use crate::stats::LatencyDistribution;


// Waiter flags packed into the high bits of the count word. The
// remaining low 30 bits carry the amount.
const CONSUMER_WAITER: u32 = 0x8000_0000;
const PRODUCER_WAITER: u32 = 0x4000_0000;
const COUNT_MASK: u32 = !(CONSUMER_WAITER | PRODUCER_WAITER);

/// Number of wake-latency samples retained per semaphore.
const SAMPLES: usize = 64 * 1024;

/// A counting semaphore that blocks and unblocks execution across
/// process boundaries.
///
/// `consume` blocks the caller until the semaphore holds enough count,
/// which arrives through `produce`; if the count is already there the
/// caller never enters the kernel. All operations are lock-free CAS
/// loops over a single word, and sleeping goes through a futex on that
/// word, so the only requirement on callers is that every party maps
/// the semaphore at the same address — which the shared arena
/// guarantees. The type is neither copyable nor movable for the same
/// reason: the word's address is the identity the kernel queues on.
///
/// Both `produce` and `consume` take a wake count, permitting a
/// thundering-herd wake-up where one transition releases many waiters
/// at once.
///
/// Every successful wake stamps [`WakeTimer`] before the futex call,
/// and the woken side records the elapsed time, yielding the
/// wake-to-run latency distribution that the harness is ultimately
/// after. Samples land in a fixed ring; drain it with
/// [`flush`][Semaphore::flush] between trials.
pub struct Semaphore {
    word: AtomicU32,
    max: u32,
    wake: WakeTimer<4>,
    ring: SampleRing<SAMPLES>,
}

unsafe impl ArenaSafe for Semaphore {}

impl Semaphore {
    /// Largest representable amount, also the default bound.
    pub const MAX_AMOUNT: u32 = COUNT_MASK;

    pub fn new(max: u32) -> Self {
        assert!(max <= COUNT_MASK, "semaphore bound exceeds the count field");
        Self {
            word: AtomicU32::new(0),
            max,
            wake: WakeTimer::new(),
            ring: SampleRing::new(),
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Current amount; a racy snapshot, for assertions and draining.
    pub fn amount(&self) -> u32 {
        self.word.load(Ordering::Acquire) & COUNT_MASK
    }

    pub fn reset(&self) {
        self.word.store(0, Ordering::Release);
    }

    /// Takes `n` from the semaphore, sleeping until enough is there.
    ///
    /// On the transition that satisfies a blocked producer, up to
    /// `wake` waiters are released.
    pub fn consume(&self, n: u32, wake: u32) {
        debug_assert!(n <= self.max);
        let mut cur = self.word.load(Ordering::Acquire);
        loop {
            let amount = cur & COUNT_MASK;
            if amount >= n {
                let flags = cur & !COUNT_MASK;
                let has_waiter = cur & PRODUCER_WAITER != 0;
                match self.word.compare_exchange_weak(
                    cur,
                    flags | (amount - n),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        if has_waiter {
                            self.notify(wake);
                        }
                        return;
                    }
                    Err(observed) => cur = observed,
                }
            } else {
                cur = self.wait(cur, CONSUMER_WAITER);
            }
        }
    }

    /// Adds `n` to the semaphore, sleeping while there is no headroom.
    pub fn produce(&self, n: u32, wake: u32) {
        debug_assert!(n <= self.max);
        let mut cur = self.word.load(Ordering::Acquire);
        loop {
            let amount = cur & COUNT_MASK;
            if amount + n <= self.max {
                let flags = cur & !COUNT_MASK;
                let has_waiter = cur & CONSUMER_WAITER != 0;
                match self.word.compare_exchange_weak(
                    cur,
                    flags | (amount + n),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        if has_waiter {
                            self.notify(wake);
                        }
                        return;
                    }
                    Err(observed) => cur = observed,
                }
            } else {
                cur = self.wait(cur, PRODUCER_WAITER);
            }
        }
    }

    /// Drains the recorded wake latencies into `dist`.
    pub fn flush(&self, dist: &mut LatencyDistribution) {
        self.ring.flush(dist);
    }

    fn notify(&self, wake: u32) {
        self.wake.reset();
        if let Err(e) = futex_wake(&self.word, wake) {
            // The word address is always valid, so this cannot fail
            // for any recoverable reason.
            panic!("futex wake failed: {e}");
        }
    }

    // Publishes the waiter flag and sleeps on the word. Returns the
    // freshly observed word for the caller to retry with.
    fn wait(&self, mut cur: u32, flag: u32) -> u32 {
        if cur & flag == 0 {
            match self.word.compare_exchange_weak(
                cur,
                cur | flag,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => cur |= flag,
                // Lost the race; re-evaluate from the top.
                Err(observed) => return observed,
            }
        }
        let cookie = self.wake.cookie();
        match futex_wait(&self.word, cur) {
            Ok(()) => {
                // We actually slept and were woken; attribute the
                // wake-to-run latency unless the timer slot was
                // recycled in the meantime.
                if let Some(elapsed) = self.wake.elapsed(cookie) {
                    self.ring.sample(elapsed);
                }
            }
            Err(e) => match e.raw_os_error() {
                // EAGAIN: the word changed before we could sleep.
                // EINTR: signal; either way, re-check the word.
                Some(libc::EAGAIN) | Some(libc::EINTR) => (),
                _ => panic!("futex wait failed: {e}"),
            },
        }
        self.word.load(Ordering::Acquire)
    }
}

impl Default for Semaphore {
    /// A semaphore bounded only by the width of the count field.
    fn default() -> Self {
        Self::new(Self::MAX_AMOUNT)
    }
}
