//! Risk metrics over a merged loss sample set
//!
//! Percentiles use linear interpolation between order statistics with rank
//! `h = (n - 1) * p`. TVaR is the mean of every sample at or above VaR.
//! Empty input yields all-zero metrics.

use crate::aggregate::LossAccumulator;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Percentile levels reported on every result row
pub const PERCENTILE_LEVELS: [f64; 6] = [0.05, 0.25, 0.50, 0.75, 0.95, 0.99];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct RiskMetrics {
    pub expected_loss: f64,
    pub var_95: f64,
    pub tvar_95: f64,
    pub var_99: f64,
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub p99: f64,
    pub std_dev: f64,
}

impl RiskMetrics {
    /// Metrics for one label. EL comes from the running sum; standard
    /// deviation and quantiles from the exact samples.
    pub fn from_accumulator(acc: &LossAccumulator) -> Self {
        if acc.count == 0 {
            return RiskMetrics::default();
        }
        let sorted = sorted_copy(&acc.samples);
        let mut metrics = quantiles(&sorted);
        metrics.expected_loss = acc.mean();
        metrics.std_dev = population_std_dev(&acc.samples, metrics.expected_loss);
        metrics
    }

    /// Metrics straight from a sample slice
    pub fn from_samples(samples: &[f64]) -> Self {
        let mut acc = LossAccumulator::with_capacity(samples.len());
        for &x in samples {
            acc.record(x);
        }
        Self::from_accumulator(&acc)
    }
}

fn quantiles(sorted: &[f64]) -> RiskMetrics {
    let [p5, p25, p50, p75, p95, p99] = PERCENTILE_LEVELS.map(|p| percentile_sorted(sorted, p));
    RiskMetrics {
        var_95: p95,
        tvar_95: tail_mean(sorted, p95),
        var_99: p99,
        p5,
        p25,
        p50,
        p75,
        p95,
        p99,
        ..Default::default()
    }
}

fn sorted_copy(samples: &[f64]) -> Vec<f64> {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    sorted
}

/// p-th percentile (p in [0, 1]) of an ascending slice
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * p.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            (sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])).min(sorted[hi])
        }
    }
}

/// Two-pass population standard deviation around a known mean
pub fn population_std_dev(samples: &[f64], mean: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let ss: f64 = samples.iter().map(|x| (x - mean) * (x - mean)).sum();
    (ss / samples.len() as f64).sqrt()
}

/// Mean of every sample >= threshold in an ascending slice
pub fn tail_mean(sorted: &[f64], threshold: f64) -> f64 {
    let start = sorted.partition_point(|&x| x < threshold);
    let tail = &sorted[start..];
    if tail.is_empty() {
        return threshold;
    }
    // clamp absorbs summation rounding when the tail is flat
    (tail.iter().sum::<f64>() / tail.len() as f64).max(threshold)
}

/// P(loss > threshold)
pub fn exceedance_probability(samples: &[f64], threshold: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let over = samples.iter().filter(|&&x| x > threshold).count();
    over as f64 / samples.len() as f64
}

/// VaR95 relative to contract value; 0 without a positive contract value
pub fn risk_asymmetry_ratio(var_95: f64, contract_value: Option<f64>) -> f64 {
    match contract_value {
        Some(v) if v > 0.0 => var_95 / v,
        _ => 0.0,
    }
}
