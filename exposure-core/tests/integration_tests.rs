//! End-to-end tests: snapshot JSON -> engine -> store -> dashboard

use exposure_core::generator::LossModel;
use exposure_core::run::{ResultLabel, RunStatus};
use exposure_core::{
    dashboard, quantify, EngagementSnapshot, Engine, EngineConfig, EngineError, MemoryRunStore,
    RunStore, SqliteRunStore,
};
use tempfile::TempDir;

const HOSTING: &str = r#"{
    "engagement": {
        "id": 1,
        "name": "Managed hosting",
        "contract_value": 500000,
        "currency": "EUR",
        "industry": "technology"
    },
    "parties": [
        {"id": 1, "name": "Customer", "role": "buyer"},
        {"id": 2, "name": "Provider", "role": "supplier"},
        {"id": 3, "name": "End users", "role": "end_user"}
    ],
    "goods_services": [
        {"id": 1, "name": "Hosting platform", "category": "infrastructure"}
    ],
    "failure_modes": [
        {"id": 10, "engagement_id": 1, "goods_service_id": 1, "name": "Extended outage",
         "category": "availability",
         "frequency_low": 0.2, "frequency_mid": 0.5, "frequency_high": 1.5},
        {"id": 11, "engagement_id": 1, "name": "Data breach", "category": "security",
         "frequency_low": 0.01, "frequency_mid": 0.05, "frequency_high": 0.2,
         "source": "ai", "confidence": 0.7},
        {"id": 12, "engagement_id": 1, "name": "Late migration", "is_included": false,
         "frequency_low": 1, "frequency_mid": 2, "frequency_high": 3}
    ],
    "loss_scenarios": [
        {"id": 100, "failure_mode_id": 10, "affected_party_id": 1, "name": "Lost revenue",
         "severity_low": 10000, "severity_mid": 50000, "severity_high": 250000},
        {"id": 101, "failure_mode_id": 10, "affected_party_id": 2, "name": "Service credits",
         "loss_category": "contractual",
         "severity_low": 5000, "severity_mid": 20000, "severity_high": 40000,
         "distribution": "triangular"},
        {"id": 110, "failure_mode_id": 11, "affected_party_id": 3, "name": "Notification costs",
         "severity_low": 100000, "severity_mid": 400000, "severity_high": 900000,
         "distribution": "uniform"},
        {"id": 120, "failure_mode_id": 12, "affected_party_id": 1,
         "severity_low": 1000, "severity_mid": 2000, "severity_high": 3000}
    ],
    "mitigations": [
        {"id": 1, "name": "Redundant region", "cost": 15000,
         "links": [{"failure_mode_id": 10, "frequency_reduction": 0.6}]},
        {"id": 2, "name": "Pen testing", "cost": 8000,
         "links": [{"failure_mode_id": 11, "frequency_reduction": 0.3, "severity_reduction": 0.2}]},
        {"id": 3, "name": "Runbooks", "cost": 0,
         "links": [{"failure_mode_id": 10, "severity_reduction": 0.5}]}
    ]
}"#;

fn hosting() -> EngagementSnapshot {
    EngagementSnapshot::from_json(HOSTING).expect("fixture should parse")
}

fn seeded(seed: u64) -> Engine {
    Engine::new(EngineConfig {
        seed: Some(seed),
        ..Default::default()
    })
}

fn degenerate() -> EngagementSnapshot {
    EngagementSnapshot::from_json(
        r#"{
        "engagement": {"id": 5, "name": "Degenerate"},
        "parties": [{"id": 1, "name": "Buyer"}],
        "failure_modes": [
            {"id": 1, "name": "Always once a year",
             "frequency_low": 1, "frequency_mid": 1, "frequency_high": 1}
        ],
        "loss_scenarios": [
            {"id": 1, "failure_mode_id": 1, "affected_party_id": 1,
             "severity_low": 5000, "severity_mid": 5000, "severity_high": 5000}
        ]
    }"#,
    )
    .expect("fixture should parse")
}

#[test]
fn test_degenerate_scenario_expected_loss() {
    let snapshot = degenerate();
    let engine = seeded(2024);
    let model = LossModel::compile(&snapshot).unwrap();
    let agg = engine.simulate(&model, 20_000, 2024).unwrap();

    for x in &agg.unmitigated.overall.samples {
        assert_eq!((x / 5_000.0).fract(), 0.0, "loss {x} is not a multiple of 5000");
    }
    let el = agg.unmitigated.overall.mean();
    assert!((el - 5_000.0).abs() < 150.0, "EL {el} too far from 5000");

    let pair = engine.run(&snapshot, 20_000).unwrap();
    assert_eq!(
        pair.unmitigated.expected_loss(),
        pair.mitigated.expected_loss()
    );
}

#[test]
fn test_result_rows_cover_included_modes_and_exposed_parties() {
    let pair = seeded(1).run(&hosting(), 5_000).unwrap();
    let labels: Vec<_> = pair.unmitigated.results.iter().map(|r| &r.label).collect();
    assert_eq!(labels.len(), 1 + 2 + 3);
    assert_eq!(labels[0], &ResultLabel::Overall);
    assert!(!pair.unmitigated.results.iter().any(|r| matches!(
        r.label,
        ResultLabel::FailureMode { id: 12, .. }
    )));
    assert_eq!(pair.unmitigated.status, RunStatus::Complete);
    assert_eq!(pair.unmitigated.contract_value, Some(500_000.0));
}

#[test]
fn test_histograms_sum_to_trials() {
    let pair = seeded(3).run(&hosting(), 4_321).unwrap();
    for run in [&pair.unmitigated, &pair.mitigated] {
        for row in &run.results {
            assert_eq!(row.histogram_counts.iter().sum::<u64>(), 4_321);
            assert!(row.histogram_bins.windows(2).all(|w| w[0] < w[1]));
        }
    }
}

#[test]
fn test_tail_metric_ordering() {
    let pair = seeded(4).run(&hosting(), 10_000).unwrap();
    for run in [&pair.unmitigated, &pair.mitigated] {
        for row in &run.results {
            let m = &row.metrics;
            assert!(m.var_95 <= m.var_99, "{:?}", row.label);
            assert!(m.tvar_95 >= m.var_95, "{:?}", row.label);
            assert!(m.p5 <= m.p25 && m.p25 <= m.p50 && m.p50 <= m.p75 && m.p75 <= m.p95);
            assert_eq!(m.p95, m.var_95);
            assert_eq!(m.p99, m.var_99);
        }
    }
}

#[test]
fn test_mitigated_never_exceeds_unmitigated_per_trial() {
    let snapshot = hosting();
    let model = LossModel::compile(&snapshot).unwrap();
    let agg = seeded(5).simulate(&model, 10_000, 5).unwrap();
    let unmitigated = &agg.unmitigated.overall.samples;
    let mitigated = &agg.mitigated.overall.samples;
    assert_eq!(unmitigated.len(), mitigated.len());
    for (u, m) in unmitigated.iter().zip(mitigated) {
        assert!(m <= u);
    }
}

#[test]
fn test_fixed_seed_gives_identical_json() {
    let a = seeded(77).run(&hosting(), 3_000).unwrap();
    let b = seeded(77).run(&hosting(), 3_000).unwrap();
    let json = |p: &exposure_core::RunPair| {
        serde_json::to_string(&(
            &p.unmitigated.results,
            &p.mitigated.results,
            &p.mitigated.mitigation_impacts,
        ))
        .unwrap()
    };
    assert_eq!(json(&a), json(&b));

    let c = seeded(78).run(&hosting(), 3_000).unwrap();
    assert_ne!(json(&a), json(&c));
}

#[test]
fn test_mitigation_impacts() {
    let pair = seeded(6).run(&hosting(), 10_000).unwrap();
    let impacts = &pair.mitigated.mitigation_impacts;
    let ids: Vec<u64> = impacts.iter().map(|m| m.mitigation_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    for m in impacts {
        assert!(m.el_reduction >= 0.0);
        match m.roi {
            Some(roi) => assert_eq!(roi, (m.el_reduction - m.cost) / m.cost),
            None => assert_eq!(m.cost, 0.0),
        }
    }
    assert!(impacts[0].el_reduction > 0.0);
    assert!(impacts[2].roi.is_none());
}

#[test]
fn test_validation_errors() {
    let engine = seeded(1);

    match engine.run(&hosting(), 0) {
        Err(EngineError::Validation(_)) => {}
        other => panic!("expected validation error, got {other:?}"),
    }

    let mut none_included = hosting();
    for fm in &mut none_included.failure_modes {
        fm.is_included = false;
    }
    assert!(matches!(
        engine.run(&none_included, 100),
        Err(EngineError::Validation(_))
    ));

    let mut empty_mode = hosting();
    empty_mode.loss_scenarios.retain(|ls| ls.failure_mode_id != 11);
    assert!(matches!(
        engine.run(&empty_mode, 100),
        Err(EngineError::Validation(_))
    ));

    let mut dangling = hosting();
    dangling.loss_scenarios[0].affected_party_id = 99;
    assert!(matches!(
        engine.run(&dangling, 100),
        Err(EngineError::DataIntegrity(_))
    ));
}

#[test]
fn test_quantify_persists_and_dashboard_recomputes() {
    let dir = TempDir::new().unwrap();
    let mut store = SqliteRunStore::open(&dir.path().join("runs.db")).unwrap();
    let snapshot = hosting();

    let pair = quantify(&mut store, &seeded(9), &snapshot, 8_000).unwrap();
    assert!(pair.unmitigated.id.is_some());
    assert!(pair.mitigated.id.is_some());
    assert!(store.has_runs(1).unwrap());

    let d = dashboard(&store, &snapshot, None).unwrap();
    assert!(d.has_results);
    assert_eq!(d.currency, "EUR");

    let stored = store.latest(1, false).unwrap().unwrap();
    let overall = stored.expected_loss();
    for s in &d.top_scenarios {
        let row = stored
            .results
            .iter()
            .find(|r| {
                matches!(r.label, ResultLabel::FailureMode { id, .. } if id == s.failure_mode_id)
            })
            .unwrap();
        assert_eq!(s.expected_loss, row.metrics.expected_loss);
        assert_eq!(s.contribution_pct, row.metrics.expected_loss / overall * 100.0);
    }
    let total_pct: f64 = d.top_scenarios.iter().map(|s| s.contribution_pct).sum();
    assert!((total_pct - 100.0).abs() < 1e-6);

    let names: Vec<&str> = d.party_exposures.iter().map(|p| p.party_name.as_str()).collect();
    assert!(names.contains(&"End users"));

    let combined = d.combined_mitigation.unwrap();
    assert_eq!(combined.total_cost, 23_000.0);
    assert_eq!(
        combined.el_reduction,
        d.unmitigated.unwrap().expected_loss - d.mitigated.unwrap().expected_loss
    );
}

#[test]
fn test_failed_run_persists_nothing() {
    let mut store = MemoryRunStore::new();
    let mut bad = hosting();
    bad.mitigations[0].links[0].frequency_reduction = 2.0;
    assert!(quantify(&mut store, &seeded(1), &bad, 100).is_err());
    assert!(!store.has_runs(1).unwrap());

    let cancelled = seeded(1).with_cancel_token({
        let token = exposure_core::CancelToken::new();
        token.cancel();
        token
    });
    let err = quantify(&mut store, &cancelled, &hosting(), 100).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::ResourceExhausted(_))
    ));
    assert!(!store.has_runs(1).unwrap());
}

#[test]
fn test_risk_asymmetry_uses_contract_value() {
    let pair = seeded(10).run(&hosting(), 5_000).unwrap();
    let var_95 = pair.unmitigated.overall().unwrap().metrics.var_95;
    assert_eq!(pair.unmitigated.risk_asymmetry_ratio, var_95 / 500_000.0);
    assert!((0.0..=1.0).contains(&pair.unmitigated.contract_exceedance_probability));
    assert!(
        pair.mitigated.contract_exceedance_probability
            <= pair.unmitigated.contract_exceedance_probability
    );
}

const TWO_PARTIAL_MITIGATIONS: &str = r#"{
    "engagement": {"id": 7, "name": "Partial mitigations", "contract_value": 10000},
    "parties": [{"id": 1, "name": "Buyer"}],
    "failure_modes": [
        {"id": 1, "name": "Twice a year",
         "frequency_low": 2, "frequency_mid": 2, "frequency_high": 2}
    ],
    "loss_scenarios": [
        {"id": 1, "failure_mode_id": 1, "affected_party_id": 1,
         "severity_low": 1000, "severity_mid": 1000, "severity_high": 1000}
    ],
    "mitigations": [
        {"id": 1, "name": "Monitoring", "cost": 400,
         "links": [{"failure_mode_id": 1, "frequency_reduction": 0.25, "severity_reduction": 0.2}]},
        {"id": 2, "name": "Spare capacity", "cost": 1000,
         "links": [{"failure_mode_id": 1, "frequency_reduction": 0.25}]}
    ]
}"#;

fn assert_close(actual: f64, expected: f64, rel: f64, what: &str) {
    assert!(
        (actual - expected).abs() <= rel * expected,
        "{what}: {actual} not within {rel} of {expected}"
    );
}

#[test]
fn test_partial_mitigations_match_closed_form() {
    // lambda = 2, x = 1000: unmitigated EL = 2000
    // combined f = 0.5, s = 0.2: mitigated EL = 2000 * 0.5 * 0.8 = 800
    // solo 1 (f = 0.25, s = 0.2): 2000 - 2000 * 0.75 * 0.8 = 800
    // solo 2 (f = 0.25, s = 0.0): 2000 - 2000 * 0.75 = 500
    let snapshot = EngagementSnapshot::from_json(TWO_PARTIAL_MITIGATIONS).unwrap();
    let pair = seeded(21).run(&snapshot, 50_000).unwrap();

    assert_close(pair.unmitigated.expected_loss(), 2_000.0, 0.02, "unmitigated EL");
    assert_close(pair.mitigated.expected_loss(), 800.0, 0.03, "mitigated EL");

    let impacts = &pair.mitigated.mitigation_impacts;
    assert_eq!(impacts.len(), 2);
    assert_close(impacts[0].el_reduction, 800.0, 0.03, "solo reduction 1");
    assert_close(impacts[1].el_reduction, 500.0, 0.04, "solo reduction 2");
    assert_close(impacts[0].roi.unwrap(), 1.0, 0.08, "roi 1");
    assert!(impacts[1].roi.unwrap() < 0.0);

    // the combined effect is not the sum of the solo effects
    let combined = pair.unmitigated.expected_loss() - pair.mitigated.expected_loss();
    assert_close(combined, 1_200.0, 0.03, "combined reduction");
}

#[test]
fn test_solo_reduction_ignores_sibling_mitigations() {
    let both = EngagementSnapshot::from_json(TWO_PARTIAL_MITIGATIONS).unwrap();
    let mut alone = both.clone();
    alone.mitigations.retain(|m| m.id == 1);

    let with_sibling = seeded(33).run(&both, 10_000).unwrap();
    let without_sibling = seeded(33).run(&alone, 10_000).unwrap();

    assert_eq!(
        with_sibling.unmitigated.results,
        without_sibling.unmitigated.results
    );
    assert_eq!(
        with_sibling.mitigated.mitigation_impacts[0],
        without_sibling.mitigated.mitigation_impacts[0]
    );
    assert!(with_sibling.mitigated.expected_loss() < without_sibling.mitigated.expected_loss());
}
