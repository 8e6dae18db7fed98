//! Text rendering for runs, dashboards and run history
//!
//! Global invariants enforced:
//! - Deterministic output ordering (rows render in stored order)
//! - Byte-for-byte identical output for identical inputs
//! - Risk asymmetry is shown only against a positive contract value

use crate::dashboard::Dashboard;
use crate::run::{ResultLabel, RunPair, SimulationRun};
use crate::store::RunSummary;
use anyhow::{Context, Result};

const NAME_WIDTH: usize = 30;

/// Render both runs of a pair as aligned tables
pub fn render_run_text(pair: &RunPair, currency: &str) -> String {
    let mut output = String::new();
    for run in [&pair.unmitigated, &pair.mitigated] {
        render_run_table(&mut output, run, currency);
        output.push('\n');
    }

    if !pair.mitigated.mitigation_impacts.is_empty() {
        output.push_str("Mitigations\n");
        output.push_str(&format!(
            "{:<width$} {:>14} {:>14} {:>8}\n",
            "NAME",
            "COST",
            "EL REDUCTION",
            "ROI",
            width = NAME_WIDTH
        ));
        for m in &pair.mitigated.mitigation_impacts {
            output.push_str(&format!(
                "{} {:>14} {:>14} {:>8}\n",
                truncate_or_pad(&m.name, NAME_WIDTH),
                format_amount(m.cost),
                format_amount(m.el_reduction),
                format_ratio(m.roi),
            ));
        }
    }
    output
}

fn render_run_table(output: &mut String, run: &SimulationRun, currency: &str) {
    output.push_str(&format!(
        "{} run: {} trials, seed {} ({})\n",
        if run.mitigated {
            "Mitigated"
        } else {
            "Unmitigated"
        },
        run.num_simulations,
        run.seed,
        currency
    ));
    output.push_str(&format!(
        "{:<8} {:<width$} {:>14} {:>14} {:>14} {:>14}\n",
        "KIND",
        "LABEL",
        "EL",
        "VAR95",
        "TVAR95",
        "VAR99",
        width = NAME_WIDTH
    ));
    for row in &run.results {
        let kind = match row.label {
            ResultLabel::Overall => "overall",
            ResultLabel::FailureMode { .. } => "mode",
            ResultLabel::Party { .. } => "party",
        };
        output.push_str(&format!(
            "{:<8} {} {:>14} {:>14} {:>14} {:>14}\n",
            kind,
            truncate_or_pad(row.label.display_name(), NAME_WIDTH),
            format_amount(row.metrics.expected_loss),
            format_amount(row.metrics.var_95),
            format_amount(row.metrics.tvar_95),
            format_amount(row.metrics.var_99),
        ));
    }
    if has_contract_value(run.contract_value) {
        output.push_str(&format!(
            "risk asymmetry {:.3}, P(loss > contract) {:.4}\n",
            run.risk_asymmetry_ratio, run.contract_exceedance_probability
        ));
    }
}

/// Render a dashboard as text
pub fn render_dashboard_text(dashboard: &Dashboard) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "{} (engagement {})\n",
        dashboard.engagement_name, dashboard.engagement_id
    ));
    let show_asymmetry = has_contract_value(dashboard.contract_value);
    if let Some(v) = dashboard.contract_value {
        output.push_str(&format!(
            "Contract value: {} {}\n",
            format_amount(v),
            dashboard.currency
        ));
    }
    if !dashboard.has_results {
        output.push_str("No simulation results yet.\n");
        return output;
    }

    for (title, variant) in [
        ("Unmitigated", &dashboard.unmitigated),
        ("Mitigated", &dashboard.mitigated),
    ] {
        if let Some(v) = variant {
            output.push_str(&format!(
                "{:<12} EL {:>14}  VaR95 {:>14}  TVaR95 {:>14}  VaR99 {:>14}",
                title,
                format_amount(v.expected_loss),
                format_amount(v.var_95),
                format_amount(v.tvar_95),
                format_amount(v.var_99),
            ));
            if show_asymmetry {
                output.push_str(&format!("  asym {:.3}", v.risk_asymmetry_ratio));
            }
            output.push('\n');
        }
    }

    if !dashboard.top_scenarios.is_empty() {
        output.push_str("\nTop failure modes\n");
        output.push_str(&format!(
            "{:<width$} {:>14} {:>14} {:>8}\n",
            "NAME",
            "EL",
            "VAR95",
            "SHARE",
            width = NAME_WIDTH
        ));
        for s in &dashboard.top_scenarios {
            output.push_str(&format!(
                "{} {:>14} {:>14} {:>7.1}%\n",
                truncate_or_pad(&s.name, NAME_WIDTH),
                format_amount(s.expected_loss),
                format_amount(s.var_95),
                s.contribution_pct,
            ));
        }
    }

    if !dashboard.party_exposures.is_empty() {
        output.push_str("\nParty exposure\n");
        for p in &dashboard.party_exposures {
            output.push_str(&format!(
                "{} {:>14} {:>14}\n",
                truncate_or_pad(&p.party_name, NAME_WIDTH),
                format_amount(p.expected_loss),
                format_amount(p.var_95),
            ));
        }
    }

    if !dashboard.mitigation_summary.is_empty() || dashboard.combined_mitigation.is_some() {
        output.push_str("\nMitigations\n");
        for m in &dashboard.mitigation_summary {
            output.push_str(&format!(
                "{} {:>14} {:>14} {:>8}\n",
                truncate_or_pad(&m.name, NAME_WIDTH),
                format_amount(m.cost),
                format_amount(m.el_reduction),
                format_ratio(m.roi),
            ));
        }
        if let Some(c) = &dashboard.combined_mitigation {
            output.push_str(&format!(
                "{} {:>14} {:>14} {:>8}\n",
                truncate_or_pad(&c.name, NAME_WIDTH),
                format_amount(c.total_cost),
                format_amount(c.el_reduction),
                format_ratio(c.roi),
            ));
        }
    }

    output
}

/// Render stored run metadata, newest first
pub fn render_history_text(runs: &[RunSummary]) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "{:<6} {:<12} {:>8} {:>20} {:>12} {:>14}\n",
        "ID", "VARIANT", "TRIALS", "SEED", "CREATED", "EL"
    ));
    for r in runs {
        output.push_str(&format!(
            "{:<6} {:<12} {:>8} {:>20} {:>12} {:>14}\n",
            r.id,
            if r.mitigated {
                "mitigated"
            } else {
                "unmitigated"
            },
            r.num_simulations,
            r.seed,
            r.created_at,
            format_amount(r.expected_loss),
        ));
    }
    output
}

/// Render stored run metadata as JSON
pub fn render_history_json(runs: &[RunSummary]) -> Result<String> {
    serde_json::to_string_pretty(runs).context("failed to serialize run history")
}

/// Asymmetry is undefined without a positive contract value
fn has_contract_value(contract_value: Option<f64>) -> bool {
    matches!(contract_value, Some(v) if v > 0.0)
}

fn format_amount(v: f64) -> String {
    format!("{:.2}", v)
}

fn format_ratio(v: Option<f64>) -> String {
    match v {
        Some(r) => format!("{:.2}", r),
        None => "-".to_string(),
    }
}

/// Truncate or pad string to fixed width
fn truncate_or_pad(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        format!("{:<width$}", s, width = width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard;
    use crate::engine::{Engine, EngineConfig};
    use crate::model::fixtures::*;
    use crate::store::{MemoryRunStore, RunStore};

    fn pair() -> RunPair {
        Engine::new(EngineConfig {
            seed: Some(4),
            ..Default::default()
        })
        .run(&sample_snapshot(), 300)
        .unwrap()
    }

    #[test]
    fn test_truncate_or_pad() {
        assert_eq!(truncate_or_pad("abc", 5), "abc  ");
        assert_eq!(truncate_or_pad("abcdefgh", 6), "abc...");
        assert_eq!(truncate_or_pad("ééééééé", 5).chars().count(), 5);
    }

    #[test]
    fn test_run_text_is_deterministic() {
        let p = pair();
        let a = render_run_text(&p, "USD");
        let b = render_run_text(&p, "USD");
        assert_eq!(a, b);
        assert!(a.starts_with("Unmitigated run: 300 trials, seed 4"));
        assert!(a.contains("Mitigated run"));
        assert!(a.contains("FM 1"));
        assert!(a.contains("Mitigations"));
    }

    #[test]
    fn test_dashboard_text_without_results() {
        let store = MemoryRunStore::new();
        let d = dashboard::load(&store, &sample_snapshot(), None).unwrap();
        let text = render_dashboard_text(&d);
        assert!(text.contains("No simulation results yet."));
    }

    #[test]
    fn test_dashboard_text_with_results() {
        let mut store = MemoryRunStore::new();
        store.persist(&pair()).unwrap();
        let d = dashboard::load(&store, &sample_snapshot(), None).unwrap();
        let text = render_dashboard_text(&d);
        assert!(text.contains("Top failure modes"));
        assert!(text.contains("Party exposure"));
        assert!(text.contains("All mitigations (combined)"));
        assert!(text.contains("asym"));
    }

    #[test]
    fn test_asymmetry_hidden_without_contract_value() {
        let mut snapshot = sample_snapshot();
        snapshot.engagement.contract_value = None;
        let engine = Engine::new(EngineConfig {
            seed: Some(4),
            ..Default::default()
        });
        let mut store = MemoryRunStore::new();
        let run = crate::quantify(&mut store, &engine, &snapshot, 300).unwrap();

        let d = dashboard::load(&store, &snapshot, None).unwrap();
        let text = render_dashboard_text(&d);
        assert!(text.contains("Unmitigated"));
        assert!(!text.contains("asym"));
        assert!(!text.contains("Contract value"));

        let run_text = render_run_text(&run, "USD");
        assert!(!run_text.contains("risk asymmetry"));
    }

    #[test]
    fn test_zero_contract_value_hides_asymmetry() {
        assert!(!has_contract_value(Some(0.0)));
        assert!(!has_contract_value(None));
        assert!(has_contract_value(Some(1.0)));
    }

    #[test]
    fn test_history_lists_every_run() {
        let mut store = MemoryRunStore::new();
        store.persist(&pair()).unwrap();
        let text = render_history_text(&store.list(1).unwrap());
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("unmitigated"));

        let json = render_history_json(&store.list(1).unwrap()).unwrap();
        assert!(json.contains("\"mitigated\": true"));
    }
}
