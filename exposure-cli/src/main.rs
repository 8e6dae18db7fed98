//! Exposure CLI - Monte Carlo contractual risk quantification

#![deny(warnings)]

// Global invariants enforced:
// - stdout carries only the requested output; notes and logs go to stderr
// - Identical snapshot, seed and config yield byte-for-byte identical results

use anyhow::Context;
use clap::{Parser, Subcommand};
use exposure_core::config::{self, ResolvedConfig};
use exposure_core::report::{
    render_dashboard_text, render_history_json, render_history_text, render_run_text,
};
use exposure_core::run::atomic_write;
use exposure_core::{
    quantify, EngagementSnapshot, Engine, EngineError, MemoryRunStore, RunStore, SqliteRunStore,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "exposure")]
#[command(about = "Monte Carlo quantification of contractual risk exposure")]
#[command(version = env!("EXPOSURE_VERSION"))]
struct Cli {
    /// Enable debug logging (overrides RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation for an engagement snapshot and store the results
    Run {
        /// Path to the engagement snapshot JSON
        snapshot: PathBuf,

        /// Number of trials (overrides config file)
        #[arg(long, short = 'n', allow_negative_numbers = true)]
        simulations: Option<i64>,

        /// Master seed (overrides config file)
        #[arg(long)]
        seed: Option<u64>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Run database path (overrides config file)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Do not persist the runs
        #[arg(long)]
        no_persist: bool,

        /// Also write the run pair as JSON to this file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show the dashboard built from the latest stored runs
    Dashboard {
        /// Path to the engagement snapshot JSON
        snapshot: PathBuf,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Run database path (overrides config file)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Show only the top N failure modes (overrides config file)
        #[arg(long)]
        top: Option<usize>,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Validate an engagement snapshot without sampling
    Validate {
        /// Path to the engagement snapshot JSON
        snapshot: PathBuf,
    },
    /// List stored runs for an engagement, newest first
    History {
        /// Engagement id
        engagement: u64,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Run database path (overrides config file)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Validate or show configuration
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config file without running anything
    Validate {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Show the resolved configuration (merged defaults + config file)
    Show {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, PartialEq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            snapshot,
            simulations,
            seed,
            format,
            db,
            no_persist,
            output,
            config: config_path,
        } => {
            let mut resolved = load_config(config_path.as_deref())?;
            if seed.is_some() {
                resolved.seed = seed;
            }
            let snapshot = EngagementSnapshot::load(&snapshot)?;
            let engine = Engine::new(resolved.engine_config());
            let n = simulations.unwrap_or(resolved.default_simulations as i64);

            let mut store: Box<dyn RunStore> = if no_persist {
                Box::new(MemoryRunStore::new())
            } else {
                let path = db.unwrap_or_else(|| resolved.database.clone());
                Box::new(SqliteRunStore::open(&path)?)
            };

            let spinner = spinner(&format!("Simulating {} trials", n));
            let result = quantify(store.as_mut(), &engine, &snapshot, n);
            spinner.finish_and_clear();
            let pair = result.map_err(report_engine_error)?;

            if let Some(path) = output {
                atomic_write(&path, &pair.to_json()?)
                    .with_context(|| format!("failed to write output: {}", path.display()))?;
                eprintln!("Runs written to: {}", path.display());
            }

            match format {
                OutputFormat::Json => println!("{}", pair.to_json()?),
                OutputFormat::Text => {
                    print!("{}", render_run_text(&pair, &snapshot.engagement.currency))
                }
            }
            if no_persist {
                eprintln!("Runs not persisted (--no-persist)");
            }
        }
        Commands::Dashboard {
            snapshot,
            format,
            db,
            top,
            config: config_path,
        } => {
            let resolved = load_config(config_path.as_deref())?;
            let snapshot = EngagementSnapshot::load(&snapshot)?;
            let store = open_existing_store(db.as_deref(), &resolved)?;
            let dashboard = exposure_core::dashboard(&store, &snapshot, top.or(resolved.top_n))?;

            match format {
                OutputFormat::Json => println!("{}", dashboard.to_json()?),
                OutputFormat::Text => print!("{}", render_dashboard_text(&dashboard)),
            }
        }
        Commands::Validate { snapshot: path } => {
            let snapshot = EngagementSnapshot::load(&path)?;
            match snapshot.validate() {
                Ok(()) => {
                    let included = snapshot.included_failure_modes().count();
                    println!(
                        "Snapshot valid: {} ({} included failure mode(s), {} loss scenario(s), {} mitigation(s))",
                        path.display(),
                        included,
                        snapshot.loss_scenarios.len(),
                        snapshot.mitigations.len()
                    );
                }
                Err(e) => {
                    eprintln!("Snapshot invalid [{}]: {}", e.kind(), e);
                    std::process::exit(1);
                }
            }
        }
        Commands::History {
            engagement,
            format,
            db,
            config: config_path,
        } => {
            let resolved = load_config(config_path.as_deref())?;
            let store = open_existing_store(db.as_deref(), &resolved)?;
            let runs = store.list(engagement)?;
            match format {
                OutputFormat::Json => println!("{}", render_history_json(&runs)?),
                OutputFormat::Text => {
                    if runs.is_empty() {
                        eprintln!("No runs stored for engagement {}", engagement);
                    } else {
                        print!("{}", render_history_text(&runs));
                    }
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Validate { path } => {
                let project_root = std::env::current_dir()?;
                match config::load_and_resolve(&project_root, path.as_deref()) {
                    Ok(config) => {
                        if let Some(ref p) = config.config_path {
                            println!("Config valid: {}", p.display());
                        } else {
                            println!("No config file found. Using defaults.");
                        }
                    }
                    Err(e) => {
                        eprintln!("Config validation failed: {:#}", e);
                        std::process::exit(1);
                    }
                }
            }
            ConfigAction::Show { path } => {
                let resolved = load_config(path.as_deref())?;

                println!("Configuration:");
                if let Some(ref p) = resolved.config_path {
                    println!("  Source: {}", p.display());
                } else {
                    println!("  Source: defaults (no config file found)");
                }
                println!();
                println!("Simulation:");
                println!("  max_simulations: {}", resolved.max_simulations);
                println!("  default_simulations: {}", resolved.default_simulations);
                println!("  chunk_size: {}", resolved.chunk_size);
                println!("  histogram_bins: {}", resolved.histogram_bins);
                match resolved.seed {
                    Some(s) => println!("  seed: {}", s),
                    None => println!("  seed: (derived per run)"),
                }
                match resolved.timeout_secs {
                    Some(t) => println!("  timeout_secs: {}", t),
                    None => println!("  timeout_secs: (none)"),
                }
                println!();
                println!("Output:");
                match resolved.top_n {
                    Some(n) => println!("  top_n: {}", n),
                    None => println!("  top_n: (all)"),
                }
                println!("  database: {}", resolved.database.display());
            }
        },
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ResolvedConfig> {
    let root = std::env::current_dir()?;
    let resolved = config::load_and_resolve(&root, path).context("failed to load configuration")?;
    debug!(source = ?resolved.config_path, "configuration resolved");
    Ok(resolved)
}

/// Open the run database; reading commands never create one
fn open_existing_store(
    db: Option<&Path>,
    resolved: &ResolvedConfig,
) -> anyhow::Result<SqliteRunStore> {
    let path = db.unwrap_or(resolved.database.as_path());
    if !path.exists() {
        anyhow::bail!(
            "run database not found: {} (run `exposure run` first)",
            path.display()
        );
    }
    SqliteRunStore::open(path)
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Prefix engine failures with their kind so scripts can tell them apart
fn report_engine_error(err: anyhow::Error) -> anyhow::Error {
    match err.downcast_ref::<EngineError>() {
        Some(engine_err) => anyhow::anyhow!("[{}] {}", engine_err.kind(), engine_err),
        None => err,
    }
}
