//! Mitigation impact - expected-loss reduction and ROI per mitigation
//!
//! A mitigation's reduction is measured against the linked failure modes only,
//! with just that mitigation's fractions applied. The combined summary compares
//! overall unmitigated and mitigated expected loss.

use crate::aggregate::RunAggregate;
use crate::generator::LossModel;
use serde::{Deserialize, Serialize};

/// Label used for the all-mitigations summary row
pub const COMBINED_MITIGATION_NAME: &str = "All mitigations (combined)";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct MitigationImpact {
    pub mitigation_id: u64,
    pub name: String,
    pub cost: f64,
    pub el_reduction: f64,
    /// `None` when the mitigation is free
    pub roi: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct CombinedMitigation {
    pub name: String,
    pub total_cost: f64,
    pub el_reduction: f64,
    pub roi: Option<f64>,
}

/// (reduction - cost) / cost, undefined for zero cost
pub fn roi(el_reduction: f64, cost: f64) -> Option<f64> {
    if cost > 0.0 {
        Some((el_reduction - cost) / cost)
    } else {
        None
    }
}

/// Per-mitigation impacts in mitigation id order
pub fn analyze(model: &LossModel, aggregate: &RunAggregate) -> Vec<MitigationImpact> {
    model
        .mitigations()
        .iter()
        .zip(&aggregate.mitigation_reduction)
        .map(|(m, total)| {
            let el_reduction = if aggregate.trials == 0 {
                0.0
            } else {
                total / aggregate.trials as f64
            };
            MitigationImpact {
                mitigation_id: m.id,
                name: m.name.clone(),
                cost: m.cost,
                el_reduction,
                roi: roi(el_reduction, m.cost),
            }
        })
        .collect()
}

/// Summary of every mitigation applied together
pub fn combined(
    impacts: &[MitigationImpact],
    unmitigated_el: f64,
    mitigated_el: f64,
) -> CombinedMitigation {
    let total_cost: f64 = impacts.iter().map(|m| m.cost).sum();
    let el_reduction = unmitigated_el - mitigated_el;
    CombinedMitigation {
        name: COMBINED_MITIGATION_NAME.to_string(),
        total_cost,
        el_reduction,
        roi: roi(el_reduction, total_cost),
    }
}
