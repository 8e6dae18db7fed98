//! Annual loss generation: one Monte Carlo trial over a compiled loss model
//!
//! Global invariants enforced:
//! - Only included failure modes are compiled; excluded ones never draw
//! - Every loss scenario of a failure mode fires on every occurrence
//! - Mitigated loss <= unmitigated loss within every trial (binomial thinning)
//! - The draw sequence is independent of the mitigation set, so unmitigated
//!   results do not move when mitigations change
//! - Compilation order is by id, so the draw sequence is a pure function of
//!   the snapshot and the RNG

use crate::error::{EngineError, EngineResult};
use crate::model::EngagementSnapshot;
use crate::sampler::Sampler;
use rand::Rng;
use rand_distr::{Distribution, Poisson};
use std::collections::BTreeMap;

/// Summed reduction fractions for one failure mode, capped at 1.0
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reduction {
    pub frequency: f64,
    pub severity: f64,
}

impl Reduction {
    fn add(&mut self, frequency: f64, severity: f64) {
        self.frequency += frequency;
        self.severity += severity;
    }

    fn capped(self) -> Self {
        Reduction {
            frequency: self.frequency.min(1.0),
            severity: self.severity.min(1.0),
        }
    }

    /// Probability an occurrence survives the frequency reduction
    fn survival(&self) -> f64 {
        1.0 - self.frequency
    }

    fn retained(&self, amount: f64) -> f64 {
        amount * (1.0 - self.severity)
    }
}

#[derive(Debug, Clone)]
struct ScenarioModel {
    party: usize,
    severity: Sampler,
}

#[derive(Debug, Clone)]
struct ModeModel {
    frequency: Sampler,
    scenarios: Vec<ScenarioModel>,
    combined: Reduction,
    /// (mitigation index, that mitigation's own reduction on this mode)
    solo: Vec<(usize, Reduction)>,
}

/// Attribution key for a compiled row (failure mode or party)
#[derive(Debug, Clone, PartialEq)]
pub struct LabelKey {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MitigationKey {
    pub id: u64,
    pub name: String,
    pub cost: f64,
}

/// Snapshot compiled into samplers and dense indices, built once per run
#[derive(Debug, Clone)]
pub struct LossModel {
    modes: Vec<ModeModel>,
    mode_keys: Vec<LabelKey>,
    party_keys: Vec<LabelKey>,
    mitigations: Vec<MitigationKey>,
}

impl LossModel {
    /// Compile a snapshot. Expects a snapshot that already passed
    /// [`EngagementSnapshot::validate`]; re-checks only what it dereferences.
    pub fn compile(snapshot: &EngagementSnapshot) -> EngineResult<Self> {
        let mut included: Vec<_> = snapshot.included_failure_modes().collect();
        included.sort_by_key(|fm| fm.id);

        let mut mitigations: Vec<_> = snapshot.mitigations.iter().collect();
        mitigations.sort_by_key(|m| m.id);

        // Parties with exposure: referenced by a scenario of an included mode
        let mut party_ids: Vec<u64> = included
            .iter()
            .flat_map(|fm| snapshot.scenarios_for(fm.id))
            .map(|ls| ls.affected_party_id)
            .collect();
        party_ids.sort_unstable();
        party_ids.dedup();

        let party_keys = party_ids
            .iter()
            .map(|&id| LabelKey {
                id,
                name: snapshot
                    .party(id)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| format!("Party {}", id)),
            })
            .collect::<Vec<_>>();
        let party_index: BTreeMap<u64, usize> = party_ids
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        let mut modes = Vec::with_capacity(included.len());
        let mut mode_keys = Vec::with_capacity(included.len());
        for fm in &included {
            let mut scenarios: Vec<_> = snapshot.scenarios_for(fm.id).collect();
            scenarios.sort_by_key(|ls| ls.id);
            if scenarios.is_empty() {
                return Err(EngineError::validation(format!(
                    "included failure mode {} ('{}') has no loss scenarios",
                    fm.id, fm.name
                )));
            }

            let scenarios = scenarios
                .into_iter()
                .map(|ls| {
                    let party = party_index.get(&ls.affected_party_id).copied().ok_or_else(
                        || {
                            EngineError::integrity(format!(
                                "loss scenario {} references missing party {}",
                                ls.id, ls.affected_party_id
                            ))
                        },
                    )?;
                    let severity = Sampler::severity(ls.distribution, &ls.severity())?;
                    Ok(ScenarioModel { party, severity })
                })
                .collect::<EngineResult<Vec<_>>>()?;

            let mut combined = Reduction::default();
            let mut solo = Vec::new();
            for (m_idx, m) in mitigations.iter().enumerate() {
                let mut own = Reduction::default();
                let mut linked = false;
                for link in m.links.iter().filter(|l| l.failure_mode_id == fm.id) {
                    own.add(link.frequency_reduction, link.severity_reduction);
                    linked = true;
                }
                if linked {
                    combined.add(own.frequency, own.severity);
                    solo.push((m_idx, own.capped()));
                }
            }

            modes.push(ModeModel {
                frequency: Sampler::frequency(&fm.frequency())?,
                scenarios,
                combined: combined.capped(),
                solo,
            });
            mode_keys.push(LabelKey {
                id: fm.id,
                name: fm.name.clone(),
            });
        }

        Ok(LossModel {
            modes,
            mode_keys,
            party_keys,
            mitigations: mitigations
                .into_iter()
                .map(|m| MitigationKey {
                    id: m.id,
                    name: m.name.clone(),
                    cost: m.cost,
                })
                .collect(),
        })
    }

    /// Included failure modes in id order
    pub fn failure_modes(&self) -> &[LabelKey] {
        &self.mode_keys
    }

    /// Parties with exposure in id order
    pub fn parties(&self) -> &[LabelKey] {
        &self.party_keys
    }

    /// All mitigations in id order
    pub fn mitigations(&self) -> &[MitigationKey] {
        &self.mitigations
    }

    /// Combined capped reduction applied to the failure mode at `index`
    pub fn combined_reduction(&self, index: usize) -> Option<Reduction> {
        self.modes.get(index).map(|m| m.combined)
    }

    pub fn new_outcome(&self) -> TrialOutcome {
        TrialOutcome {
            unmitigated: Breakdown::new(self.modes.len(), self.party_keys.len()),
            mitigated: Breakdown::new(self.modes.len(), self.party_keys.len()),
            mitigation_reduction: vec![0.0; self.mitigations.len()],
        }
    }

    /// Run one trial, overwriting `out`
    pub fn simulate_trial<R: Rng + ?Sized>(&self, rng: &mut R, out: &mut TrialOutcome) {
        out.reset();
        for (mode_idx, mode) in self.modes.iter().enumerate() {
            let lambda = mode.frequency.sample(rng);
            let occurrences = poisson_count(rng, lambda);
            for _ in 0..occurrences {
                // Always drawn, even without mitigations
                let u: f64 = rng.gen();
                let survives = u < mode.combined.survival();
                for scenario in &mode.scenarios {
                    let x = scenario.severity.sample(rng);
                    out.unmitigated.add(mode_idx, scenario.party, x);
                    if survives {
                        out.mitigated
                            .add(mode_idx, scenario.party, mode.combined.retained(x));
                    }
                    for &(m_idx, own) in &mode.solo {
                        let solo_loss = if u < own.survival() {
                            own.retained(x)
                        } else {
                            0.0
                        };
                        out.mitigation_reduction[m_idx] += x - solo_loss;
                    }
                }
            }
        }
    }
}

/// N ~ Poisson(lambda); zero when lambda is not positive
fn poisson_count<R: Rng + ?Sized>(rng: &mut R, lambda: f64) -> u64 {
    if lambda <= 0.0 {
        return 0;
    }
    match Poisson::new(lambda) {
        Ok(p) => {
            let n: f64 = p.sample(rng);
            n as u64
        }
        Err(_) => 0,
    }
}

/// One variant's loss for a single trial, total plus attribution
#[derive(Debug, Clone, PartialEq)]
pub struct Breakdown {
    pub total: f64,
    pub by_mode: Vec<f64>,
    pub by_party: Vec<f64>,
}

impl Breakdown {
    fn new(modes: usize, parties: usize) -> Self {
        Breakdown {
            total: 0.0,
            by_mode: vec![0.0; modes],
            by_party: vec![0.0; parties],
        }
    }

    fn add(&mut self, mode: usize, party: usize, amount: f64) {
        self.total += amount;
        self.by_mode[mode] += amount;
        self.by_party[party] += amount;
    }

    fn reset(&mut self) {
        self.total = 0.0;
        self.by_mode.iter_mut().for_each(|v| *v = 0.0);
        self.by_party.iter_mut().for_each(|v| *v = 0.0);
    }
}

/// Reusable per-trial buffer
#[derive(Debug, Clone, PartialEq)]
pub struct TrialOutcome {
    pub unmitigated: Breakdown,
    pub mitigated: Breakdown,
    /// Per mitigation: linked unmitigated loss minus solo-mitigated loss
    pub mitigation_reduction: Vec<f64>,
}

impl TrialOutcome {
    fn reset(&mut self) {
        self.unmitigated.reset();
        self.mitigated.reset();
        self.mitigation_reduction.iter_mut().for_each(|v| *v = 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use crate::sampler::{DistributionFamily, Triple};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn degenerate_snapshot() -> EngagementSnapshot {
        let mut s = sample_snapshot();
        s.failure_modes = vec![failure_mode(1, Triple::constant(1.0))];
        s.loss_scenarios = vec![scenario(
            1,
            1,
            10,
            DistributionFamily::Lognormal,
            Triple::constant(5_000.0),
        )];
        s.mitigations = vec![];
        s
    }

    #[test]
    fn test_compile_orders_by_id_and_skips_excluded() {
        let mut s = sample_snapshot();
        s.failure_modes.reverse();
        s.failure_modes[0].is_included = false; // id 2
        let model = LossModel::compile(&s).unwrap();
        let ids: Vec<u64> = model.failure_modes().iter().map(|k| k.id).collect();
        assert_eq!(ids, vec![1]);
        let parties: Vec<u64> = model.parties().iter().map(|k| k.id).collect();
        assert_eq!(parties, vec![10, 20]);
    }

    #[test]
    fn test_party_without_exposure_is_not_compiled() {
        let mut s = sample_snapshot();
        s.parties.push(party(30, "Observer"));
        let model = LossModel::compile(&s).unwrap();
        assert!(model.parties().iter().all(|p| p.id != 30));
    }

    #[test]
    fn test_reductions_sum_and_cap() {
        let model = LossModel::compile(&sample_snapshot()).unwrap();
        // mode 1: 0.3 + 0.9 capped at 1.0; severity 0.2 + 0.0
        let r = model.combined_reduction(0).unwrap();
        assert_eq!(r.frequency, 1.0);
        assert!((r.severity - 0.2).abs() < 1e-12);
        let r2 = model.combined_reduction(1).unwrap();
        assert_eq!(r2, Reduction { frequency: 0.5, severity: 0.5 });
    }

    #[test]
    fn test_degenerate_trial_is_multiple_of_severity() {
        let model = LossModel::compile(&degenerate_snapshot()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut out = model.new_outcome();
        for _ in 0..1_000 {
            model.simulate_trial(&mut rng, &mut out);
            let n = out.unmitigated.total / 5_000.0;
            assert_eq!(n.fract(), 0.0);
            assert_eq!(out.mitigated.total, out.unmitigated.total);
        }
    }

    #[test]
    fn test_mitigated_never_exceeds_unmitigated() {
        let model = LossModel::compile(&sample_snapshot()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut out = model.new_outcome();
        for _ in 0..2_000 {
            model.simulate_trial(&mut rng, &mut out);
            assert!(out.mitigated.total <= out.unmitigated.total);
            for (m, u) in out.mitigated.by_mode.iter().zip(&out.unmitigated.by_mode) {
                assert!(m <= u);
            }
            assert!(out.mitigation_reduction.iter().all(|r| *r >= 0.0));
        }
    }

    #[test]
    fn test_attribution_sums_to_total() {
        let model = LossModel::compile(&sample_snapshot()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut out = model.new_outcome();
        for _ in 0..200 {
            model.simulate_trial(&mut rng, &mut out);
            let by_mode: f64 = out.unmitigated.by_mode.iter().sum();
            let by_party: f64 = out.unmitigated.by_party.iter().sum();
            let tol = 1e-6 * out.unmitigated.total.max(1.0);
            assert!((by_mode - out.unmitigated.total).abs() <= tol);
            assert!((by_party - out.unmitigated.total).abs() <= tol);
        }
    }

    #[test]
    fn test_unmitigated_draws_ignore_mitigation_set() {
        let with = LossModel::compile(&sample_snapshot()).unwrap();
        let mut bare = sample_snapshot();
        bare.mitigations.clear();
        let without = LossModel::compile(&bare).unwrap();

        let mut a = ChaCha8Rng::seed_from_u64(99);
        let mut b = ChaCha8Rng::seed_from_u64(99);
        let mut out_a = with.new_outcome();
        let mut out_b = without.new_outcome();
        for _ in 0..500 {
            with.simulate_trial(&mut a, &mut out_a);
            without.simulate_trial(&mut b, &mut out_b);
            assert_eq!(out_a.unmitigated, out_b.unmitigated);
        }
    }

    #[test]
    fn test_full_frequency_reduction_removes_all_loss() {
        let mut s = degenerate_snapshot();
        s.mitigations = vec![mitigation(1, 10.0, &[(1, 1.0, 0.0)])];
        let model = LossModel::compile(&s).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut out = model.new_outcome();
        for _ in 0..100 {
            model.simulate_trial(&mut rng, &mut out);
            assert_eq!(out.mitigated.total, 0.0);
            assert_eq!(out.mitigation_reduction[0], out.unmitigated.total);
        }
    }

    #[test]
    fn test_zero_rate_never_occurs() {
        let mut s = degenerate_snapshot();
        s.failure_modes[0].frequency_low = 0.0;
        s.failure_modes[0].frequency_mid = 0.0;
        s.failure_modes[0].frequency_high = 0.0;
        let model = LossModel::compile(&s).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut out = model.new_outcome();
        model.simulate_trial(&mut rng, &mut out);
        assert_eq!(out.unmitigated.total, 0.0);
    }
}
