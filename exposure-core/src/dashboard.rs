//! Dashboard - read projection over the latest stored runs
//!
//! Derived on read, never stored.
//!
//! Global invariants enforced:
//! - `contribution_pct` recomputes exactly as 100 * EL / overall EL (0 when
//!   overall EL is 0)
//! - Deterministic ordering: EL descending, ties by id ascending
//! - Party names come from the snapshot, falling back to `Party <id>`

use crate::mitigation::{self, CombinedMitigation};
use crate::model::EngagementSnapshot;
use crate::run::{ResultLabel, SimulationRun};
use crate::store::RunStore;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ScenarioSummary {
    pub failure_mode_id: u64,
    pub name: String,
    pub expected_loss: f64,
    pub var_95: f64,
    pub contribution_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct PartyExposure {
    pub party_id: u64,
    pub party_name: String,
    pub expected_loss: f64,
    pub var_95: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct MitigationSummary {
    pub mitigation_id: u64,
    pub name: String,
    pub cost: f64,
    pub el_reduction: f64,
    pub roi: Option<f64>,
}

/// Headline metrics of one variant's latest run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct VariantSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<u64>,
    pub num_simulations: u64,
    pub seed: u64,
    pub expected_loss: f64,
    pub var_95: f64,
    pub tvar_95: f64,
    pub var_99: f64,
    pub std_dev: f64,
    pub risk_asymmetry_ratio: f64,
    pub contract_exceedance_probability: f64,
    pub histogram_bins: Vec<f64>,
    pub histogram_counts: Vec<u64>,
}

impl VariantSummary {
    fn of(run: &SimulationRun) -> Self {
        let (metrics, bins, counts) = match run.overall() {
            Some(row) => (
                row.metrics,
                row.histogram_bins.clone(),
                row.histogram_counts.clone(),
            ),
            None => Default::default(),
        };
        VariantSummary {
            run_id: run.id,
            num_simulations: run.num_simulations,
            seed: run.seed,
            expected_loss: metrics.expected_loss,
            var_95: metrics.var_95,
            tvar_95: metrics.tvar_95,
            var_99: metrics.var_99,
            std_dev: metrics.std_dev,
            risk_asymmetry_ratio: run.risk_asymmetry_ratio,
            contract_exceedance_probability: run.contract_exceedance_probability,
            histogram_bins: bins,
            histogram_counts: counts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Dashboard {
    pub engagement_id: u64,
    pub engagement_name: String,
    pub currency: String,
    pub contract_value: Option<f64>,
    pub has_results: bool,
    pub unmitigated: Option<VariantSummary>,
    pub mitigated: Option<VariantSummary>,
    pub top_scenarios: Vec<ScenarioSummary>,
    pub party_exposures: Vec<PartyExposure>,
    pub mitigation_summary: Vec<MitigationSummary>,
    pub combined_mitigation: Option<CombinedMitigation>,
}

impl Dashboard {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize dashboard to JSON")
    }
}

/// EL descending, then id ascending
fn by_el_then_id(a: (f64, u64), b: (f64, u64)) -> Ordering {
    b.0.partial_cmp(&a.0)
        .unwrap_or(Ordering::Equal)
        .then(a.1.cmp(&b.1))
}

/// Percentage of overall EL; 0 when overall EL is 0
pub fn contribution_pct(expected_loss: f64, overall_el: f64) -> f64 {
    if overall_el > 0.0 {
        expected_loss / overall_el * 100.0
    } else {
        0.0
    }
}

/// Build a dashboard from already-loaded runs
pub fn assemble(
    snapshot: &EngagementSnapshot,
    unmitigated: Option<&SimulationRun>,
    mitigated: Option<&SimulationRun>,
    has_results: bool,
    top_n: Option<usize>,
) -> Dashboard {
    let engagement = &snapshot.engagement;
    let mut dashboard = Dashboard {
        engagement_id: engagement.id,
        engagement_name: engagement.name.clone(),
        currency: engagement.currency.clone(),
        contract_value: engagement.contract_value,
        has_results,
        unmitigated: unmitigated.map(VariantSummary::of),
        mitigated: mitigated.map(VariantSummary::of),
        top_scenarios: Vec::new(),
        party_exposures: Vec::new(),
        mitigation_summary: Vec::new(),
        combined_mitigation: None,
    };

    if let Some(run) = unmitigated {
        let overall_el = run.expected_loss();

        let mut scenarios: Vec<ScenarioSummary> = run
            .results
            .iter()
            .filter_map(|row| match &row.label {
                ResultLabel::FailureMode { id, name } => Some(ScenarioSummary {
                    failure_mode_id: *id,
                    name: name.clone(),
                    expected_loss: row.metrics.expected_loss,
                    var_95: row.metrics.var_95,
                    contribution_pct: contribution_pct(row.metrics.expected_loss, overall_el),
                }),
                _ => None,
            })
            .collect();
        scenarios.sort_by(|a, b| {
            by_el_then_id(
                (a.expected_loss, a.failure_mode_id),
                (b.expected_loss, b.failure_mode_id),
            )
        });
        if let Some(n) = top_n {
            scenarios.truncate(n);
        }
        dashboard.top_scenarios = scenarios;

        let mut parties: Vec<PartyExposure> = run
            .results
            .iter()
            .filter_map(|row| match &row.label {
                ResultLabel::Party { id, .. } => Some(PartyExposure {
                    party_id: *id,
                    party_name: snapshot
                        .party(*id)
                        .map(|p| p.name.clone())
                        .unwrap_or_else(|| format!("Party {}", id)),
                    expected_loss: row.metrics.expected_loss,
                    var_95: row.metrics.var_95,
                }),
                _ => None,
            })
            .collect();
        parties.sort_by(|a, b| {
            by_el_then_id((a.expected_loss, a.party_id), (b.expected_loss, b.party_id))
        });
        dashboard.party_exposures = parties;
    }

    if let Some(run) = mitigated {
        let mut impacts = run.mitigation_impacts.clone();
        impacts.sort_by_key(|m| m.mitigation_id);
        dashboard.mitigation_summary = impacts
            .iter()
            .map(|m| MitigationSummary {
                mitigation_id: m.mitigation_id,
                name: m.name.clone(),
                cost: m.cost,
                el_reduction: m.el_reduction,
                roi: m.roi,
            })
            .collect();
        if let Some(base) = unmitigated {
            dashboard.combined_mitigation = Some(mitigation::combined(
                &impacts,
                base.expected_loss(),
                run.expected_loss(),
            ));
        }
    }

    dashboard
}

/// Load the latest runs for the snapshot's engagement and assemble
pub fn load(
    store: &dyn RunStore,
    snapshot: &EngagementSnapshot,
    top_n: Option<usize>,
) -> Result<Dashboard> {
    let engagement_id = snapshot.engagement.id;
    let unmitigated = store.latest(engagement_id, false)?;
    let mitigated = store.latest(engagement_id, true)?;
    let has_results = store.has_runs(engagement_id)?;
    Ok(assemble(
        snapshot,
        unmitigated.as_ref(),
        mitigated.as_ref(),
        has_results,
        top_n,
    ))
}
