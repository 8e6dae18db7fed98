//! Engagement snapshot: the frozen entity set the engine consumes
//!
//! Entities are authored elsewhere and arrive here read-only. The engine never
//! writes them back; concurrent edits must produce a new snapshot.
//!
//! Global invariants enforced:
//! - Integrity checks run before validation, validation before sampling
//! - Provenance (`source`, `confidence`) is never read numerically

use crate::error::{EngineError, EngineResult};
use crate::sampler::{DistributionFamily, Triple, MAX_ANNUAL_RATE};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Engagement {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_value: Option<f64>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub industry: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    Buyer,
    Supplier,
    ThirdParty,
    EndUser,
}

/// A grouping key for loss attribution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Party {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<PartyRole>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GoodsService {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    Manual,
    Ai,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureMode {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engagement_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goods_service_id: Option<u64>,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(default = "default_true")]
    pub is_included: bool,
    pub frequency_low: f64,
    pub frequency_mid: f64,
    pub frequency_high: f64,
    #[serde(default)]
    pub source: Source,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_true() -> bool {
    true
}

fn default_confidence() -> f64 {
    0.5
}

impl FailureMode {
    pub fn frequency(&self) -> Triple {
        Triple::new(self.frequency_low, self.frequency_mid, self.frequency_high)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LossScenario {
    pub id: u64,
    pub failure_mode_id: u64,
    #[serde(alias = "party_id")]
    pub affected_party_id: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default = "default_loss_category")]
    pub loss_category: String,
    pub severity_low: f64,
    pub severity_mid: f64,
    pub severity_high: f64,
    #[serde(default, alias = "distribution_type")]
    pub distribution: DistributionFamily,
}

fn default_loss_category() -> String {
    "direct".to_string()
}

impl LossScenario {
    pub fn severity(&self) -> Triple {
        Triple::new(self.severity_low, self.severity_mid, self.severity_high)
    }
}

/// Reduction a mitigation applies to one failure mode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MitigationLink {
    pub failure_mode_id: u64,
    #[serde(default)]
    pub frequency_reduction: f64,
    #[serde(default)]
    pub severity_reduction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Mitigation {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub links: Vec<MitigationLink>,
}

/// Frozen view of one engagement's entities
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EngagementSnapshot {
    pub engagement: Engagement,
    #[serde(default)]
    pub parties: Vec<Party>,
    #[serde(default)]
    pub goods_services: Vec<GoodsService>,
    #[serde(default)]
    pub failure_modes: Vec<FailureMode>,
    #[serde(default)]
    pub loss_scenarios: Vec<LossScenario>,
    #[serde(default)]
    pub mitigations: Vec<Mitigation>,
}

impl EngagementSnapshot {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("failed to parse engagement snapshot")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot: {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("invalid snapshot: {}", path.display()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize engagement snapshot")
    }

    pub fn included_failure_modes(&self) -> impl Iterator<Item = &FailureMode> {
        self.failure_modes.iter().filter(|fm| fm.is_included)
    }

    pub fn scenarios_for(&self, failure_mode_id: u64) -> impl Iterator<Item = &LossScenario> {
        self.loss_scenarios
            .iter()
            .filter(move |ls| ls.failure_mode_id == failure_mode_id)
    }

    pub fn party(&self, id: u64) -> Option<&Party> {
        self.parties.iter().find(|p| p.id == id)
    }

    /// Run every pre-sampling check: referential integrity first, then
    /// calibration and structural validation.
    pub fn validate(&self) -> EngineResult<()> {
        self.check_integrity()?;
        self.check_values()
    }

    fn check_integrity(&self) -> EngineResult<()> {
        unique_ids("party", self.parties.iter().map(|p| p.id))?;
        unique_ids("failure mode", self.failure_modes.iter().map(|f| f.id))?;
        unique_ids("loss scenario", self.loss_scenarios.iter().map(|l| l.id))?;
        unique_ids("mitigation", self.mitigations.iter().map(|m| m.id))?;

        for fm in &self.failure_modes {
            if let Some(owner) = fm.engagement_id {
                if owner != self.engagement.id {
                    return Err(EngineError::integrity(format!(
                        "failure mode {} belongs to engagement {}, not {}",
                        fm.id, owner, self.engagement.id
                    )));
                }
            }
        }

        let party_ids: HashSet<u64> = self.parties.iter().map(|p| p.id).collect();
        let mode_ids: HashSet<u64> = self.failure_modes.iter().map(|f| f.id).collect();

        for ls in &self.loss_scenarios {
            if !mode_ids.contains(&ls.failure_mode_id) {
                return Err(EngineError::integrity(format!(
                    "loss scenario {} references missing failure mode {}",
                    ls.id, ls.failure_mode_id
                )));
            }
            if !party_ids.contains(&ls.affected_party_id) {
                return Err(EngineError::integrity(format!(
                    "loss scenario {} references missing party {}",
                    ls.id, ls.affected_party_id
                )));
            }
        }

        for m in &self.mitigations {
            for link in &m.links {
                if !mode_ids.contains(&link.failure_mode_id) {
                    return Err(EngineError::integrity(format!(
                        "mitigation {} links missing failure mode {}",
                        m.id, link.failure_mode_id
                    )));
                }
            }
        }

        Ok(())
    }

    fn check_values(&self) -> EngineResult<()> {
        let mut scenario_counts: HashMap<u64, usize> = HashMap::new();
        for ls in &self.loss_scenarios {
            *scenario_counts.entry(ls.failure_mode_id).or_default() += 1;
        }

        let mut included = 0usize;
        for fm in self.included_failure_modes() {
            included += 1;
            let freq = fm.frequency();
            freq.check(&format!("failure mode {} frequency", fm.id))?;
            if freq.high > MAX_ANNUAL_RATE {
                return Err(EngineError::validation(format!(
                    "failure mode {} frequency.high must be at most {} events/year (got {})",
                    fm.id, MAX_ANNUAL_RATE, freq.high
                )));
            }
            if scenario_counts.get(&fm.id).copied().unwrap_or(0) == 0 {
                return Err(EngineError::validation(format!(
                    "included failure mode {} ('{}') has no loss scenarios",
                    fm.id, fm.name
                )));
            }
            for ls in self.scenarios_for(fm.id) {
                ls.severity()
                    .check(&format!("loss scenario {} severity", ls.id))?;
            }
        }
        if included == 0 {
            return Err(EngineError::validation(
                "engagement has no included failure modes",
            ));
        }

        for m in &self.mitigations {
            if !m.cost.is_finite() || m.cost < 0.0 {
                return Err(EngineError::validation(format!(
                    "mitigation {} cost must be a non-negative number (got {})",
                    m.id, m.cost
                )));
            }
            for link in &m.links {
                for (name, v) in [
                    ("frequency_reduction", link.frequency_reduction),
                    ("severity_reduction", link.severity_reduction),
                ] {
                    if !(0.0..=1.0).contains(&v) {
                        return Err(EngineError::validation(format!(
                            "mitigation {} {} for failure mode {} must be in [0, 1] (got {})",
                            m.id, name, link.failure_mode_id, v
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

fn unique_ids(kind: &str, ids: impl Iterator<Item = u64>) -> EngineResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(EngineError::integrity(format!("duplicate {} id {}", kind, id)));
        }
    }
    Ok(())
}
