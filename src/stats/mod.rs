//! Quantile summaries of sampled values and distribution comparison.

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use statrs::distribution::{ContinuousCDF, Normal};
use statrs::statistics::{Data, OrderStatistics};

use crate::clock::fmt_duration;


/// Quantile probe points used by every summary.
pub const PROBES: [f64; 7] = [0.001, 0.01, 0.1, 0.5, 0.9, 0.99, 0.999];

/// A domain value that can be folded into a distribution.
pub trait Value: Copy {
    fn into_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
    fn display(self) -> String;
}

impl Value for Duration {
    fn into_f64(self) -> f64 {
        self.as_secs_f64()
    }

    fn from_f64(v: f64) -> Self {
        Duration::from_secs_f64(v.max(0.0))
    }

    fn display(self) -> String {
        fmt_duration(self)
    }
}

impl Value for u64 {
    fn into_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(v: f64) -> Self {
        v.max(0.0) as u64
    }

    fn display(self) -> String {
        self.to_string()
    }
}

impl Value for f64 {
    fn into_f64(self) -> f64 {
        self
    }

    fn from_f64(v: f64) -> Self {
        v
    }

    fn display(self) -> String {
        format!("{self:.3}")
    }
}

/// A collection of samples reduced to quantile estimates on demand.
pub struct Distribution<T> {
    samples: Vec<f64>,
    marker: PhantomData<T>,
}

/// Wake-latency distribution, the common case.
pub type LatencyDistribution = Distribution<Duration>;

impl<T: Value> Distribution<T> {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            marker: PhantomData,
        }
    }

    pub fn sample(&mut self, value: T) {
        self.samples.push(value.into_f64());
    }

    pub fn count(&self) -> u64 {
        self.samples.len() as u64
    }

    /// Estimated value at quantile `tau`, or `None` with no samples.
    pub fn quantile(&self, tau: f64) -> Option<T> {
        if self.samples.is_empty() {
            return None;
        }
        let mut data = Data::new(self.samples.clone());
        Some(T::from_f64(data.quantile(tau)))
    }

    /// Summarizes the samples at the fixed [`PROBES`].
    pub fn estimates(&self) -> QuantileEstimates {
        let quantiles = if self.samples.is_empty() {
            PROBES.iter().map(|&p| (p, 0.0)).collect()
        } else {
            let mut data = Data::new(self.samples.clone());
            PROBES.iter().map(|&p| (p, data.quantile(p))).collect()
        };
        QuantileEstimates {
            count: self.count(),
            quantiles,
        }
    }

    /// Buckets the central 99.8% of the distribution for display.
    pub fn histogram(&self, buckets: usize) -> Histogram<T> {
        let lo = self.quantile(0.001).map_or(0.0, Value::into_f64);
        let hi = self.quantile(0.999).map_or(0.0, Value::into_f64);
        let mut h = Histogram::new(T::from_f64(lo), T::from_f64(hi), buckets);
        if !self.samples.is_empty() {
            let mut data = Data::new(self.samples.clone());
            let mut p = 0.001;
            while p <= 0.999 {
                h.add(T::from_f64(data.quantile(p)));
                p += 0.001;
            }
        }
        h
    }
}

impl<T: Value> Default for Distribution<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sample count plus (probe, value) pairs, sorted by probe.
#[derive(Clone, Debug, PartialEq)]
pub struct QuantileEstimates {
    pub count: u64,
    pub quantiles: Vec<(f64, f64)>,
}

impl fmt::Display for QuantileEstimates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "count: {}", self.count)?;
        for &(p, v) in &self.quantiles {
            writeln!(f, "p{:<5}: {v:.9}", 100.0 * p)?;
        }
        Ok(())
    }
}

/// Similarity of two summaries as a scalar in `[0, 1]`.
///
/// This is a Kolmogorov-Smirnov-flavored distance over the quantile
/// functions: the absolute gap at each probe, weighted by the probe's
/// midpoint-rule share of the quantile axis (the first and last probes
/// take the half-widths out to 0 and 1), normalized by the combined
/// value range. Identical summaries score 1.0 and the score decreases
/// as the centers drift apart.
///
/// Both summaries must use the same probe list; mixing summaries from
/// different probe sets is a programming bug.
pub fn similarity(a: &QuantileEstimates, b: &QuantileEstimates) -> f64 {
    assert_eq!(a.quantiles.len(), b.quantiles.len());
    let n = a.quantiles.len();
    if n == 0 {
        return 1.0;
    }

    let lo = a.quantiles[0].1.min(b.quantiles[0].1);
    let hi = a.quantiles[n - 1].1.max(b.quantiles[n - 1].1);
    let range = hi - lo;
    if range <= 0.0 {
        return 1.0;
    }

    let mut distance = 0.0;
    for i in 0..n {
        let (pa, va) = a.quantiles[i];
        let (pb, vb) = b.quantiles[i];
        assert_eq!(pa, pb);
        let left = if i == 0 { 0.0 } else { (pa + a.quantiles[i - 1].0) / 2.0 };
        let right = if i == n - 1 {
            1.0
        } else {
            (pa + a.quantiles[i + 1].0) / 2.0
        };
        distance += (right - left) * (va - vb).abs() / range;
    }
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Secondary diagnostic: p50-centered interval overlap.
///
/// The p50 stands in for the center and `(p84 - p16) / 2` for the
/// spread, which throws away one-sided outliers that would bias a
/// mean. The spread is damped by `ln(count)` rather than `sqrt(count)`
/// so that large sample counts are not penalized; these are not normal
/// distributions. The score is `z / (z + d)` where `d` is the larger
/// normalized center gap and `z` the normal quantile of `confidence`:
/// 1.0 for identical inputs, monotonically decreasing in the gap.
pub fn interval_similarity<T: Value>(
    a: &Distribution<T>,
    b: &Distribution<T>,
    confidence: f64,
) -> f64 {
    if a.count() < 2 || b.count() < 2 {
        return 1.0;
    }
    let center_a = a.quantile(0.5).map_or(0.0, Value::into_f64);
    let center_b = b.quantile(0.5).map_or(0.0, Value::into_f64);
    let spread = |d: &Distribution<T>| {
        let p16 = d.quantile(0.16).map_or(0.0, Value::into_f64);
        let p84 = d.quantile(0.84).map_or(0.0, Value::into_f64);
        (p84 - p16) / 2.0
    };
    let err_a = spread(a) / (a.count() as f64).ln();
    let err_b = spread(b) / (b.count() as f64).ln();
    let gap = (center_a - center_b).abs();
    let d = (gap / err_a.max(f64::MIN_POSITIVE)).max(gap / err_b.max(f64::MIN_POSITIVE));
    let z = Normal::standard().inverse_cdf(confidence.clamp(0.5 + f64::EPSILON, 1.0 - f64::EPSILON));
    z / (z + d)
}

/// Fixed-width buckets over `[min, max]` with ASCII rendering.
pub struct Histogram<T> {
    min: f64,
    width: f64,
    samples: u64,
    buckets: Vec<u64>,
    marker: PhantomData<T>,
}

impl<T: Value> Histogram<T> {
    pub fn new(min: T, max: T, buckets: usize) -> Self {
        let min = min.into_f64();
        let max = max.into_f64();
        let width = (max - min) / buckets as f64;
        // A degenerate range collapses to a single bucket.
        let buckets = if width > 0.0 { buckets + 1 } else { 1 };
        Self {
            min,
            width,
            samples: 0,
            buckets: vec![0; buckets],
            marker: PhantomData,
        }
    }

    pub fn add(&mut self, value: T) {
        self.samples += 1;
        let index = if self.buckets.len() == 1 {
            0
        } else {
            ((value.into_f64() - self.min) / self.width) as usize
        };
        let last = self.buckets.len() - 1;
        self.buckets[index.min(last)] += 1;
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

impl<T: Value> fmt::Display for Histogram<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const BAR_WIDTH: usize = 30;
        let mut value = self.min;
        for &count in &self.buckets {
            let chars = if self.samples == 0 {
                0
            } else {
                (BAR_WIDTH as f64 * count as f64 / self.samples as f64).ceil() as usize
            };
            writeln!(
                f,
                "[{:#<chars$}{:width$}] {}",
                "",
                "",
                T::from_f64(value).display(),
                width = BAR_WIDTH - chars.min(BAR_WIDTH),
            )?;
            value += self.width;
        }
        Ok(())
    }
}
