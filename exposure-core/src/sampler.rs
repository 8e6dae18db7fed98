//! Distribution sampling for frequency and severity calibrations
//!
//! Every calibration is a `(low, mid, high)` triple. Frequencies are always
//! triangular over the annual rate; severities use one of a closed set of
//! families selected per loss scenario.
//!
//! Global invariants enforced:
//! - Pure functions of their inputs and an explicit RNG
//! - Degenerate triples (low = mid = high) never touch the RNG
//! - Draws are never negative

use crate::error::{EngineError, EngineResult};
use rand::Rng;
use rand_distr::{Distribution, LogNormal, Triangular, Uniform};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard normal quantile at 0.95. `high` in a lognormal calibration is the
/// 95th percentile of the per-event loss.
pub const LOGNORMAL_HIGH_Z: f64 = 1.644_853_626_951_472_2;

/// Sigma used when neither tail point carries shape information
const LOGNORMAL_FALLBACK_SIGMA: f64 = 0.5;

/// Sigma floor, keeps near-degenerate calibrations from collapsing
const LOGNORMAL_MIN_SIGMA: f64 = 0.01;

/// Upper bound on any frequency calibration point (events per year)
pub const MAX_ANNUAL_RATE: f64 = 10_000.0;

/// A three-point calibration: low <= mid <= high
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    pub low: f64,
    pub mid: f64,
    pub high: f64,
}

impl Triple {
    pub fn new(low: f64, mid: f64, high: f64) -> Self {
        Triple { low, mid, high }
    }

    pub fn constant(value: f64) -> Self {
        Triple::new(value, value, value)
    }

    pub fn is_degenerate(&self) -> bool {
        self.low == self.mid && self.mid == self.high
    }

    /// Check the triple is finite, non-negative and non-decreasing
    pub fn check(&self, what: &str) -> EngineResult<()> {
        for (name, v) in [("low", self.low), ("mid", self.mid), ("high", self.high)] {
            if !v.is_finite() {
                return Err(EngineError::validation(format!(
                    "{}.{} must be finite (got {})",
                    what, name, v
                )));
            }
            if v < 0.0 {
                return Err(EngineError::validation(format!(
                    "{}.{} must be non-negative (got {})",
                    what, name, v
                )));
            }
        }
        if self.low > self.mid || self.mid > self.high {
            return Err(EngineError::validation(format!(
                "{} must satisfy low <= mid <= high (got {})",
                what, self
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.low, self.mid, self.high)
    }
}

/// Severity distribution family for a loss scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionFamily {
    #[default]
    Lognormal,
    Triangular,
    Uniform,
}

impl DistributionFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionFamily::Lognormal => "lognormal",
            DistributionFamily::Triangular => "triangular",
            DistributionFamily::Uniform => "uniform",
        }
    }
}

/// Fitted lognormal parameters (log-space location and scale)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LognormalFit {
    pub mu: f64,
    pub sigma: f64,
}

/// Fit a lognormal so that its median is `mid` and its 95th percentile is `high`.
///
/// When `high == mid` but `0 < low < mid`, `low` is read as the 5th percentile
/// instead. With no usable tail point sigma falls back to 0.5. Sigma is floored
/// at 0.01. Returns `None` when `mid <= 0` (no positive median exists).
pub fn fit_lognormal(triple: &Triple) -> Option<LognormalFit> {
    if triple.mid <= 0.0 {
        return None;
    }
    let mu = triple.mid.ln();
    let sigma = if triple.high > triple.mid {
        (triple.high.ln() - mu) / LOGNORMAL_HIGH_Z
    } else if triple.low > 0.0 && triple.low < triple.mid {
        (mu - triple.low.ln()) / LOGNORMAL_HIGH_Z
    } else {
        LOGNORMAL_FALLBACK_SIGMA
    };
    Some(LognormalFit {
        mu,
        sigma: sigma.max(LOGNORMAL_MIN_SIGMA),
    })
}

/// A compiled sampler for one calibration, built once per run
#[derive(Debug, Clone)]
pub enum Sampler {
    Constant(f64),
    Triangular(Triangular<f64>),
    Uniform(Uniform<f64>),
    Lognormal(LogNormal<f64>),
}

impl Sampler {
    /// Triangular sampler over an annual rate (mode = mid)
    pub fn frequency(triple: &Triple) -> EngineResult<Self> {
        triple.check("frequency")?;
        if triple.is_degenerate() {
            return Ok(Sampler::Constant(triple.mid));
        }
        triangular(triple)
    }

    /// Severity sampler for the given family
    pub fn severity(family: DistributionFamily, triple: &Triple) -> EngineResult<Self> {
        triple.check("severity")?;
        if triple.is_degenerate() {
            return Ok(Sampler::Constant(triple.mid));
        }
        match family {
            DistributionFamily::Triangular => triangular(triple),
            // low < high here, otherwise the triple would be degenerate
            DistributionFamily::Uniform => Ok(Sampler::Uniform(Uniform::new_inclusive(
                triple.low,
                triple.high,
            ))),
            DistributionFamily::Lognormal => match fit_lognormal(triple) {
                Some(fit) => LogNormal::new(fit.mu, fit.sigma)
                    .map(Sampler::Lognormal)
                    .map_err(|e| {
                        EngineError::validation(format!(
                            "cannot fit lognormal to severity {}: {}",
                            triple, e
                        ))
                    }),
                None => Ok(Sampler::Constant(0.0)),
            },
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            Sampler::Constant(v) => *v,
            Sampler::Triangular(d) => d.sample(rng).max(0.0),
            Sampler::Uniform(d) => d.sample(rng).max(0.0),
            Sampler::Lognormal(d) => d.sample(rng),
        }
    }
}

fn triangular(triple: &Triple) -> EngineResult<Sampler> {
    Triangular::new(triple.low, triple.high, triple.mid)
        .map(Sampler::Triangular)
        .map_err(|e| {
            EngineError::validation(format!("invalid triangular calibration {}: {}", triple, e))
        })
}

/// Draw one annual rate from a triangular frequency calibration
pub fn sample_frequency<R: Rng + ?Sized>(rng: &mut R, triple: &Triple) -> EngineResult<f64> {
    Ok(Sampler::frequency(triple)?.sample(rng))
}

/// Draw one non-negative per-event loss amount
pub fn sample_severity<R: Rng + ?Sized>(
    rng: &mut R,
    family: DistributionFamily,
    triple: &Triple,
) -> EngineResult<f64> {
    Ok(Sampler::severity(family, triple)?.sample(rng))
}
