//! Simulation runs - the immutable output records of the engine
//!
//! Global invariants enforced:
//! - A run is created only by a successful execution; only `Complete` runs
//!   are ever persisted
//! - Result rows are ordered: overall, failure modes by id, parties by id
//! - Every result's histogram counts sum to `num_simulations`

use crate::aggregate::{LossAccumulator, VariantAggregate};
use crate::generator::LossModel;
use crate::metrics::RiskMetrics;
use crate::mitigation::MitigationImpact;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Schema version for serialized runs
pub const RUN_SCHEMA_VERSION: u32 = 1;

/// Persisted run state. The engine only ever hands out `Complete` runs;
/// `Pending` is part of the stored state machine and is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Complete,
}

/// What a result row is attributed to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultLabel {
    Overall,
    FailureMode { id: u64, name: String },
    Party { id: u64, name: String },
}

impl ResultLabel {
    pub fn display_name(&self) -> &str {
        match self {
            ResultLabel::Overall => "Overall",
            ResultLabel::FailureMode { name, .. } | ResultLabel::Party { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ResultRow {
    pub label: ResultLabel,
    #[serde(flatten)]
    pub metrics: RiskMetrics,
    pub histogram_bins: Vec<f64>,
    pub histogram_counts: Vec<u64>,
}

impl ResultRow {
    pub fn from_accumulator(label: ResultLabel, acc: &LossAccumulator, bins: usize) -> Self {
        let histogram = acc.histogram(bins);
        ResultRow {
            label,
            metrics: RiskMetrics::from_accumulator(acc),
            histogram_bins: histogram.bins,
            histogram_counts: histogram.counts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SimulationRun {
    pub schema_version: u32,
    /// Assigned by the run store; absent until persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub engagement_id: u64,
    pub num_simulations: u64,
    pub seed: u64,
    pub mitigated: bool,
    pub status: RunStatus,
    /// Unix timestamp (seconds)
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_value: Option<f64>,
    pub risk_asymmetry_ratio: f64,
    pub contract_exceedance_probability: f64,
    pub results: Vec<ResultRow>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mitigation_impacts: Vec<MitigationImpact>,
}

impl SimulationRun {
    pub fn overall(&self) -> Option<&ResultRow> {
        self.results
            .iter()
            .find(|r| matches!(r.label, ResultLabel::Overall))
    }

    pub fn expected_loss(&self) -> f64 {
        self.overall().map_or(0.0, |r| r.metrics.expected_loss)
    }

    pub fn failure_mode_rows(&self) -> impl Iterator<Item = &ResultRow> {
        self.results
            .iter()
            .filter(|r| matches!(r.label, ResultLabel::FailureMode { .. }))
    }

    pub fn party_rows(&self) -> impl Iterator<Item = &ResultRow> {
        self.results
            .iter()
            .filter(|r| matches!(r.label, ResultLabel::Party { .. }))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize run to JSON")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let run: SimulationRun =
            serde_json::from_str(json).context("failed to deserialize run from JSON")?;
        if run.schema_version != RUN_SCHEMA_VERSION {
            anyhow::bail!(
                "run schema version mismatch: expected {}, got {}",
                RUN_SCHEMA_VERSION,
                run.schema_version
            );
        }
        Ok(run)
    }
}

/// Build the result rows for one variant
pub fn result_rows(model: &LossModel, variant: &VariantAggregate, bins: usize) -> Vec<ResultRow> {
    let mut rows = Vec::with_capacity(1 + variant.by_mode.len() + variant.by_party.len());
    rows.push(ResultRow::from_accumulator(
        ResultLabel::Overall,
        &variant.overall,
        bins,
    ));
    for (key, acc) in model.failure_modes().iter().zip(&variant.by_mode) {
        rows.push(ResultRow::from_accumulator(
            ResultLabel::FailureMode {
                id: key.id,
                name: key.name.clone(),
            },
            acc,
            bins,
        ));
    }
    for (key, acc) in model.parties().iter().zip(&variant.by_party) {
        rows.push(ResultRow::from_accumulator(
            ResultLabel::Party {
                id: key.id,
                name: key.name.clone(),
            },
            acc,
            bins,
        ));
    }
    rows
}

/// The two runs produced by one execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct RunPair {
    pub unmitigated: SimulationRun,
    pub mitigated: SimulationRun,
}

impl RunPair {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize run pair to JSON")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let pair: RunPair =
            serde_json::from_str(json).context("failed to deserialize run pair from JSON")?;
        for run in [&pair.unmitigated, &pair.mitigated] {
            if run.schema_version != RUN_SCHEMA_VERSION {
                anyhow::bail!(
                    "run schema version mismatch: expected {}, got {}",
                    RUN_SCHEMA_VERSION,
                    run.schema_version
                );
            }
        }
        Ok(pair)
    }
}

/// Write data to file atomically using temp file + rename
pub fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    use std::fs;
    use std::io::Write;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }
    }

    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)
        .with_context(|| format!("failed to create temp file: {}", temp_path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("failed to write to temp file: {}", temp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync temp file: {}", temp_path.display()))?;
    drop(file);

    fs::rename(&temp_path, path)
        .with_context(|| format!("failed to rename temp file to: {}", path.display()))?;

    Ok(())
}
