//! Run persistence
//!
//! Only this module talks to the database. A run pair is persisted in one
//! transaction: either both runs land or neither does.

use crate::run::{RunPair, RunStatus, SimulationRun};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Metadata row for run listings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct RunSummary {
    pub id: u64,
    pub engagement_id: u64,
    pub mitigated: bool,
    pub num_simulations: u64,
    pub seed: u64,
    pub created_at: u64,
    pub expected_loss: f64,
}

impl RunSummary {
    fn of(id: u64, run: &SimulationRun) -> Self {
        RunSummary {
            id,
            engagement_id: run.engagement_id,
            mitigated: run.mitigated,
            num_simulations: run.num_simulations,
            seed: run.seed,
            created_at: run.created_at,
            expected_loss: run.expected_loss(),
        }
    }
}

pub trait RunStore {
    /// Persist both runs atomically; returns (unmitigated id, mitigated id)
    fn persist(&mut self, pair: &RunPair) -> Result<(u64, u64)>;

    /// Most recent run of one variant for an engagement
    fn latest(&self, engagement_id: u64, mitigated: bool) -> Result<Option<SimulationRun>>;

    fn has_runs(&self, engagement_id: u64) -> Result<bool>;

    /// All runs for an engagement, newest first
    fn list(&self, engagement_id: u64) -> Result<Vec<RunSummary>>;
}

fn ensure_complete(pair: &RunPair) -> Result<()> {
    for run in [&pair.unmitigated, &pair.mitigated] {
        if run.status != RunStatus::Complete {
            anyhow::bail!(
                "refusing to persist {} run for engagement {}: status is {:?}",
                if run.mitigated { "mitigated" } else { "unmitigated" },
                run.engagement_id,
                run.status
            );
        }
    }
    if pair.unmitigated.engagement_id != pair.mitigated.engagement_id {
        anyhow::bail!(
            "run pair spans engagements {} and {}",
            pair.unmitigated.engagement_id,
            pair.mitigated.engagement_id
        );
    }
    Ok(())
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS simulation_runs (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    engagement_id   INTEGER NOT NULL,
    mitigated       INTEGER NOT NULL,
    num_simulations INTEGER NOT NULL,
    seed            INTEGER NOT NULL,
    created_at      INTEGER NOT NULL,
    expected_loss   REAL    NOT NULL,
    payload         TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_runs_engagement
    ON simulation_runs (engagement_id, mitigated, seq);
";

/// SQLite-backed run store
pub struct SqliteRunStore {
    conn: Connection,
}

impl SqliteRunStore {
    /// Open (or create) the run database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create directory: {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open run database: {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("failed to enable WAL mode")?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("failed to create run schema")?;
        Ok(SqliteRunStore { conn })
    }

    fn insert(tx: &rusqlite::Transaction<'_>, run: &SimulationRun) -> Result<u64> {
        let payload = run.to_json()?;
        tx.execute(
            "INSERT INTO simulation_runs
                (engagement_id, mitigated, num_simulations, seed, created_at, expected_loss, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.engagement_id as i64,
                run.mitigated,
                run.num_simulations as i64,
                run.seed as i64,
                run.created_at as i64,
                run.expected_loss(),
                payload,
            ],
        )
        .context("failed to insert run")?;
        Ok(tx.last_insert_rowid() as u64)
    }
}

impl RunStore for SqliteRunStore {
    fn persist(&mut self, pair: &RunPair) -> Result<(u64, u64)> {
        ensure_complete(pair)?;
        let tx = self
            .conn
            .transaction()
            .context("failed to begin transaction")?;
        let unmitigated = Self::insert(&tx, &pair.unmitigated)?;
        let mitigated = Self::insert(&tx, &pair.mitigated)?;
        tx.commit().context("failed to commit run pair")?;
        Ok((unmitigated, mitigated))
    }

    fn latest(&self, engagement_id: u64, mitigated: bool) -> Result<Option<SimulationRun>> {
        let row = self
            .conn
            .query_row(
                "SELECT seq, payload FROM simulation_runs
                 WHERE engagement_id = ?1 AND mitigated = ?2
                 ORDER BY seq DESC LIMIT 1",
                params![engagement_id as i64, mitigated],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .context("failed to query latest run")?;

        match row {
            Some((seq, payload)) => {
                let mut run = SimulationRun::from_json(&payload)
                    .with_context(|| format!("corrupt run payload (seq {})", seq))?;
                run.id = Some(seq as u64);
                Ok(Some(run))
            }
            None => Ok(None),
        }
    }

    fn has_runs(&self, engagement_id: u64) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM simulation_runs WHERE engagement_id = ?1",
                params![engagement_id as i64],
                |row| row.get(0),
            )
            .context("failed to count runs")?;
        Ok(count > 0)
    }

    fn list(&self, engagement_id: u64) -> Result<Vec<RunSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT seq, engagement_id, mitigated, num_simulations, seed, created_at, expected_loss
                 FROM simulation_runs WHERE engagement_id = ?1
                 ORDER BY seq DESC",
            )
            .context("failed to prepare run listing")?;
        let rows = stmt
            .query_map(params![engagement_id as i64], |row| {
                Ok(RunSummary {
                    id: row.get::<_, i64>(0)? as u64,
                    engagement_id: row.get::<_, i64>(1)? as u64,
                    mitigated: row.get(2)?,
                    num_simulations: row.get::<_, i64>(3)? as u64,
                    seed: row.get::<_, i64>(4)? as u64,
                    created_at: row.get::<_, i64>(5)? as u64,
                    expected_loss: row.get(6)?,
                })
            })
            .context("failed to list runs")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read run rows")?;
        Ok(rows)
    }
}

/// In-process run store; nothing survives the process
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: Vec<SimulationRun>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, run: &SimulationRun) -> u64 {
        let id = self.runs.len() as u64 + 1;
        let mut stored = run.clone();
        stored.id = Some(id);
        self.runs.push(stored);
        id
    }
}

impl RunStore for MemoryRunStore {
    fn persist(&mut self, pair: &RunPair) -> Result<(u64, u64)> {
        ensure_complete(pair)?;
        Ok((self.push(&pair.unmitigated), self.push(&pair.mitigated)))
    }

    fn latest(&self, engagement_id: u64, mitigated: bool) -> Result<Option<SimulationRun>> {
        Ok(self
            .runs
            .iter()
            .rev()
            .find(|r| r.engagement_id == engagement_id && r.mitigated == mitigated)
            .cloned())
    }

    fn has_runs(&self, engagement_id: u64) -> Result<bool> {
        Ok(self.runs.iter().any(|r| r.engagement_id == engagement_id))
    }

    fn list(&self, engagement_id: u64) -> Result<Vec<RunSummary>> {
        Ok(self
            .runs
            .iter()
            .rev()
            .filter(|r| r.engagement_id == engagement_id)
            .map(|r| RunSummary::of(r.id.unwrap_or_default(), r))
            .collect())
    }
}
