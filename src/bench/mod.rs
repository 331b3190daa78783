//! Adaptive convergence driver.
//!
//! Workloads are noisy: a single quiet trial proves nothing and an
//! unbounded retry loop proves it slowly. The driver accepts a
//! measurement only after two consecutive trials cross the threshold,
//! widens the observation window while results fail to improve, and
//! gives up after three consecutive regressions, so both noisy-but-
//! stable and non-convergent workloads terminate in bounded time.

use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::stats::{similarity, QuantileEstimates};
use crate::workload::{Context, WorkloadError};

#[cfg(test)]
mod test;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("failed to drive workload: {0}")]
    Workload(#[from] WorkloadError),
    #[error("benchmark did not converge; confidence is {value}")]
    DidNotConverge { value: f64 },
}

/// Convergence parameters; the configuration surface of the driver.
#[derive(Clone, Debug)]
pub struct Converge {
    /// Initial trial duration.
    pub min_time: Duration,
    /// Upper bound for an escalated trial duration.
    pub max_time: Duration,
    /// Similarity threshold a benchmark must sustain.
    pub confidence: f64,
}

impl Default for Converge {
    fn default() -> Self {
        Self {
            min_time: Duration::from_millis(250),
            max_time: Duration::from_secs(10),
            confidence: 0.95,
        }
    }
}

impl Converge {
    /// Runs trials until `metric` stabilizes at or above `limit`, or
    /// stops making progress. Returns the last observed value.
    ///
    /// Classification per trial: at or above `limit` is a hit (two in
    /// a row terminate); strictly improving on both the previous value
    /// and the running average keeps going at the same window; anything
    /// else is a miss, which doubles the window up to
    /// [`max_time`][Self::max_time]. Three consecutive misses
    /// terminate, so a metric that never improves costs a bounded
    /// number of trials rather than wall-clock patience.
    pub fn converge<M>(
        &self,
        ctx: &mut Context,
        mut metric: M,
        limit: f64,
    ) -> Result<f64, WorkloadError>
    where
        M: FnMut() -> f64,
    {
        let mut delay = self.min_time;
        let mut hit = 0;
        let mut missed = 0;
        let mut last = 0.0;
        let mut total = 0.0;
        let mut count = 0u32;
        loop {
            if missed > 0 {
                delay = (delay * 2).min(self.max_time);
            }
            ctx.start()?;
            thread::sleep(delay);
            ctx.stop()?;

            let next = metric();
            total += next;
            count += 1;
            let avg = total / f64::from(count);
            if next >= limit {
                hit += 1;
                missed = 0;
            } else if next > last && next >= avg {
                hit = 0;
                missed = 0;
            } else {
                missed += 1;
                hit = 0;
            }
            log::debug!(
                "trial {count}: metric {next:.4} (limit {limit:.4}, \
                 window {delay:?}, hit {hit}, missed {missed})"
            );
            if hit >= 2 || missed >= 3 {
                return Ok(next);
            }
            last = next;
        }
    }

    /// Captures a distribution by running the workload until
    /// consecutive summaries agree.
    ///
    /// `summary` materializes the current trial's quantile estimates;
    /// the driver uses the similarity of consecutive summaries as the
    /// convergence metric and fails if it cannot sustain
    /// [`confidence`][Self::confidence].
    pub fn benchmark<S>(&self, ctx: &mut Context, mut summary: S) -> Result<QuantileEstimates, BenchError>
    where
        S: FnMut() -> QuantileEstimates,
    {
        let mut last = summary();
        let value = self.converge(
            ctx,
            || {
                let next = summary();
                let metric = similarity(&last, &next);
                last = next;
                metric
            },
            self.confidence,
        )?;
        if value < self.confidence {
            return Err(BenchError::DidNotConverge { value });
        }
        log::info!("converged:\n{last}");
        Ok(last)
    }
}
