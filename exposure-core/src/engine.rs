//! Simulation engine - validate, compile, run chunked trials in parallel,
//! and assemble the unmitigated/mitigated run pair
//!
//! Global invariants enforced:
//! - Every check runs before the first draw; failures are fail-fast
//! - Chunk k draws from `ChaCha8Rng::seed_from_u64(seed)` on stream k, so a
//!   (seed, trial index) pair reproduces regardless of thread count
//! - Chunk partials are folded in chunk order (byte-reproducible sums)
//! - Cancellation and deadline are checked between chunks; a tripped run
//!   returns `ResourceExhausted` and produces nothing

use crate::aggregate::RunAggregate;
use crate::error::{EngineError, EngineResult};
use crate::generator::LossModel;
use crate::metrics::{exceedance_probability, risk_asymmetry_ratio};
use crate::mitigation;
use crate::model::EngagementSnapshot;
use crate::run::{result_rows, RunPair, RunStatus, SimulationRun, RUN_SCHEMA_VERSION};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_SIMULATIONS: u64 = 50_000;
pub const DEFAULT_HISTOGRAM_BINS: usize = 50;
pub const DEFAULT_CHUNK_SIZE: usize = 1_024;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub max_simulations: u64,
    pub histogram_bins: usize,
    pub chunk_size: usize,
    /// Master seed; derived from the clock when absent
    pub seed: Option<u64>,
    pub timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_simulations: DEFAULT_MAX_SIMULATIONS,
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            seed: None,
            timeout: None,
        }
    }
}

/// Shared cancellation flag, checked between chunks
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
    cancel: CancelToken,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Engine {
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Check a requested trial count against the configured maximum
    pub fn check_simulations(&self, num_simulations: i64) -> EngineResult<u64> {
        if num_simulations <= 0 {
            return Err(EngineError::validation(format!(
                "num_simulations must be positive (got {})",
                num_simulations
            )));
        }
        let n = num_simulations as u64;
        if n > self.config.max_simulations {
            return Err(EngineError::validation(format!(
                "num_simulations must be at most {} (got {})",
                self.config.max_simulations, n
            )));
        }
        Ok(n)
    }

    /// Run `num_simulations` trials and return the unmitigated and mitigated
    /// runs. Nothing is returned unless every trial completed.
    pub fn run(&self, snapshot: &EngagementSnapshot, num_simulations: i64) -> EngineResult<RunPair> {
        let n = self.check_simulations(num_simulations)?;
        snapshot.validate()?;
        let model = LossModel::compile(snapshot)?;
        let seed = self.config.seed.unwrap_or_else(clock_seed);

        info!(
            engagement_id = snapshot.engagement.id,
            num_simulations = n,
            seed,
            failure_modes = model.failure_modes().len(),
            parties = model.parties().len(),
            mitigations = model.mitigations().len(),
            "starting simulation"
        );
        let started = Instant::now();
        let aggregate = self.simulate(&model, n, seed)?;

        let pair = self.assemble(snapshot, &model, &aggregate, seed);
        info!(
            engagement_id = snapshot.engagement.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            unmitigated_el = pair.unmitigated.expected_loss(),
            mitigated_el = pair.mitigated.expected_loss(),
            "simulation complete"
        );
        Ok(pair)
    }

    /// Run the chunked trials for a compiled model and fold the partials
    pub fn simulate(&self, model: &LossModel, n: u64, seed: u64) -> EngineResult<RunAggregate> {
        let chunk_size = self.config.chunk_size.max(1) as u64;
        let chunks = n.div_ceil(chunk_size);
        let deadline = self.config.timeout.map(|t| Instant::now() + t);

        let partials = (0..chunks)
            .into_par_iter()
            .map(|k| {
                self.check_budget(deadline)?;
                let start = k * chunk_size;
                let len = chunk_size.min(n - start);
                Ok(run_chunk(model, seed, k, len))
            })
            .collect::<EngineResult<Vec<_>>>();

        let partials = match partials {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "simulation aborted");
                return Err(e);
            }
        };

        let mut total = RunAggregate::new(model, n as usize);
        for partial in partials {
            total.merge(partial);
        }
        Ok(total)
    }

    fn check_budget(&self, deadline: Option<Instant>) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::ResourceExhausted(
                "simulation cancelled".to_string(),
            ));
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(EngineError::ResourceExhausted(format!(
                    "simulation exceeded timeout of {}s",
                    self.config.timeout.map_or(0, |t| t.as_secs())
                )));
            }
        }
        Ok(())
    }

    fn assemble(
        &self,
        snapshot: &EngagementSnapshot,
        model: &LossModel,
        aggregate: &RunAggregate,
        seed: u64,
    ) -> RunPair {
        let bins = self.config.histogram_bins;
        let contract_value = snapshot.engagement.contract_value;
        let created_at = unix_now();

        let build = |mitigated: bool| {
            let variant = if mitigated {
                &aggregate.mitigated
            } else {
                &aggregate.unmitigated
            };
            let results = result_rows(model, variant, bins);
            let var_95 = results.first().map_or(0.0, |r| r.metrics.var_95);
            let exceedance = match contract_value {
                Some(v) if v > 0.0 => exceedance_probability(&variant.overall.samples, v),
                _ => 0.0,
            };
            SimulationRun {
                schema_version: RUN_SCHEMA_VERSION,
                id: None,
                engagement_id: snapshot.engagement.id,
                num_simulations: aggregate.trials,
                seed,
                mitigated,
                status: RunStatus::Complete,
                created_at,
                contract_value,
                risk_asymmetry_ratio: risk_asymmetry_ratio(var_95, contract_value),
                contract_exceedance_probability: exceedance,
                results,
                mitigation_impacts: if mitigated {
                    mitigation::analyze(model, aggregate)
                } else {
                    Vec::new()
                },
            }
        };

        RunPair {
            unmitigated: build(false),
            mitigated: build(true),
        }
    }
}

fn run_chunk(model: &LossModel, seed: u64, chunk: u64, len: u64) -> RunAggregate {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(chunk);
    let mut partial = RunAggregate::new(model, len as usize);
    let mut outcome = model.new_outcome();
    for _ in 0..len {
        model.simulate_trial(&mut rng, &mut outcome);
        partial.record(&outcome);
    }
    debug!(chunk, trials = len, "chunk complete");
    partial
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as u64)
}
