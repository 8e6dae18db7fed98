//! Trial aggregation - fold per-trial losses into mergeable partials
//!
//! Global invariants enforced:
//! - Merging is associative: counts, sums and sums of squares add, maxima take
//!   the max, sample vectors concatenate in merge order
//! - Sample vectors keep trial order, so index i is trial i in every label
//! - Histograms are built only from the merged sample set

use crate::generator::{Breakdown, LossModel, TrialOutcome};
use serde::{Deserialize, Serialize};

/// Running statistics plus the exact samples for one label
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossAccumulator {
    pub count: u64,
    pub sum: f64,
    pub sum_sq: f64,
    pub max: f64,
    pub samples: Vec<f64>,
}

impl LossAccumulator {
    pub fn with_capacity(capacity: usize) -> Self {
        LossAccumulator {
            samples: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    pub fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        if value > self.max {
            self.max = value;
        }
        self.samples.push(value);
    }

    pub fn merge(&mut self, other: LossAccumulator) {
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.max = self.max.max(other.max);
        self.samples.extend(other.samples);
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    /// Streaming population standard deviation from the running moments.
    /// Result rows use the two-pass form over the exact samples instead.
    pub fn std_dev(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        (self.sum_sq / n - mean * mean).max(0.0).sqrt()
    }

    pub fn histogram(&self, bin_count: usize) -> Histogram {
        Histogram::from_samples(&self.samples, self.max, bin_count)
    }
}

/// One variant's accumulators: overall, per failure mode, per party
#[derive(Debug, Clone, PartialEq)]
pub struct VariantAggregate {
    pub overall: LossAccumulator,
    pub by_mode: Vec<LossAccumulator>,
    pub by_party: Vec<LossAccumulator>,
}

impl VariantAggregate {
    fn new(modes: usize, parties: usize, capacity: usize) -> Self {
        VariantAggregate {
            overall: LossAccumulator::with_capacity(capacity),
            by_mode: (0..modes)
                .map(|_| LossAccumulator::with_capacity(capacity))
                .collect(),
            by_party: (0..parties)
                .map(|_| LossAccumulator::with_capacity(capacity))
                .collect(),
        }
    }

    fn record(&mut self, trial: &Breakdown) {
        self.overall.record(trial.total);
        for (acc, v) in self.by_mode.iter_mut().zip(&trial.by_mode) {
            acc.record(*v);
        }
        for (acc, v) in self.by_party.iter_mut().zip(&trial.by_party) {
            acc.record(*v);
        }
    }

    fn merge(&mut self, other: VariantAggregate) {
        self.overall.merge(other.overall);
        for (acc, o) in self.by_mode.iter_mut().zip(other.by_mode) {
            acc.merge(o);
        }
        for (acc, o) in self.by_party.iter_mut().zip(other.by_party) {
            acc.merge(o);
        }
    }
}

/// Partial (or final) aggregate of a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunAggregate {
    pub trials: u64,
    pub unmitigated: VariantAggregate,
    pub mitigated: VariantAggregate,
    /// Per mitigation, summed (linked unmitigated - solo mitigated) loss
    pub mitigation_reduction: Vec<f64>,
}

impl RunAggregate {
    pub fn new(model: &LossModel, capacity: usize) -> Self {
        let modes = model.failure_modes().len();
        let parties = model.parties().len();
        RunAggregate {
            trials: 0,
            unmitigated: VariantAggregate::new(modes, parties, capacity),
            mitigated: VariantAggregate::new(modes, parties, capacity),
            mitigation_reduction: vec![0.0; model.mitigations().len()],
        }
    }

    pub fn record(&mut self, trial: &TrialOutcome) {
        self.trials += 1;
        self.unmitigated.record(&trial.unmitigated);
        self.mitigated.record(&trial.mitigated);
        for (acc, v) in self
            .mitigation_reduction
            .iter_mut()
            .zip(&trial.mitigation_reduction)
        {
            *acc += v;
        }
    }

    pub fn merge(&mut self, other: RunAggregate) {
        self.trials += other.trials;
        self.unmitigated.merge(other.unmitigated);
        self.mitigated.merge(other.mitigated);
        for (acc, v) in self
            .mitigation_reduction
            .iter_mut()
            .zip(other.mitigation_reduction)
        {
            *acc += v;
        }
    }
}

/// Equal-width histogram over [0, max]; `bins` are ascending lower edges
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Histogram {
    pub bins: Vec<f64>,
    pub counts: Vec<u64>,
}

impl Histogram {
    /// Values equal to `max` land in the last bin. With `max == 0` the width
    /// is 1.0 and everything lands in bin 0.
    pub fn from_samples(samples: &[f64], max: f64, bin_count: usize) -> Self {
        let bin_count = bin_count.max(1);
        let width = if max > 0.0 {
            max / bin_count as f64
        } else {
            1.0
        };
        let bins = (0..bin_count).map(|i| i as f64 * width).collect();
        let mut counts = vec![0u64; bin_count];
        for &x in samples {
            let idx = ((x / width).floor().max(0.0) as usize).min(bin_count - 1);
            counts[idx] += 1;
        }
        Histogram { bins, counts }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}
