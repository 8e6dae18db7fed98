//! Exposure core library - Monte Carlo quantification of contractual risk

#![deny(warnings)]

// Global invariants enforced in this crate:
// - Entity snapshots are read-only inputs; the engine never writes them back
// - All validation happens before the first draw
// - Randomness flows only through explicit, seeded RNG streams
// - Identical snapshot, seed and config yield byte-for-byte identical results
// - Runs are persisted in pairs or not at all

pub mod aggregate;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod error;
pub mod generator;
pub mod metrics;
pub mod mitigation;
pub mod model;
pub mod report;
pub mod run;
pub mod sampler;
pub mod store;

pub use config::ResolvedConfig;
pub use dashboard::Dashboard;
pub use engine::{CancelToken, Engine, EngineConfig};
pub use error::{EngineError, EngineResult};
pub use model::EngagementSnapshot;
pub use run::{RunPair, SimulationRun};
pub use store::{MemoryRunStore, RunStore, SqliteRunStore};

use anyhow::{Context, Result};

/// Run the engine and persist both runs atomically
///
/// Nothing is written when the engine fails. On success the returned pair
/// carries the ids the store assigned.
pub fn quantify(
    store: &mut dyn RunStore,
    engine: &Engine,
    snapshot: &EngagementSnapshot,
    num_simulations: i64,
) -> Result<RunPair> {
    let mut pair = engine.run(snapshot, num_simulations)?;
    let (unmitigated, mitigated) = store.persist(&pair).with_context(|| {
        format!(
            "failed to persist runs for engagement {}",
            snapshot.engagement.id
        )
    })?;
    pair.unmitigated.id = Some(unmitigated);
    pair.mitigated.id = Some(mitigated);
    Ok(pair)
}

/// Assemble the dashboard from the latest stored runs
pub fn dashboard(
    store: &dyn RunStore,
    snapshot: &EngagementSnapshot,
    top_n: Option<usize>,
) -> Result<Dashboard> {
    dashboard::load(store, snapshot, top_n)
}
