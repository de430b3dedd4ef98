//! Command surface for the funnel event generator.
//!
//! Hosts embed the generator through:
//! - [`run_cli`] for full parsed CLI execution, including env file loading.
//! - [`run_command`] for a [`Command`] against resolved [`Settings`] and an
//!   open [`SqliteEventStore`].

pub mod config;
pub mod logging;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use funnel_events_core::{BatchReport, EventBuilder, FunnelEngine, FunnelError, SchemaRegistry};
use funnel_events_store_sqlite::{ExportReport, SqliteEventStore};
use rand::rngs::StdRng;
use rand::SeedableRng;

pub use config::{ConfigError, EnvFile, Settings};

#[derive(Debug, Parser)]
#[command(name = "funnel")]
#[command(about = "Synthetic marketing funnel event generator")]
pub struct Cli {
    /// `KEY=VALUE` file with `DB_NAME`, `NUM_USERS` and `CSV_FILENAME`.
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Overrides the database path derived from `DB_NAME`.
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a batch of users and export the full event table.
    Run(RunArgs),
    /// Generate a batch of users without exporting.
    Generate(GenerateArgs),
    /// Export every stored event to CSV.
    Export(ExportArgs),
    Events {
        #[command(subcommand)]
        command: EventsCommand,
    },
    /// Per-event-type user counts.
    Summary,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[arg(long)]
    users: Option<u64>,
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    #[arg(long)]
    users: Option<u64>,
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum EventsCommand {
    List(EventsListArgs),
}

#[derive(Debug, Args)]
pub struct EventsListArgs {
    #[arg(long)]
    user_id: u64,
}

#[derive(Debug, Clone, serde::Serialize, PartialEq, Eq)]
pub struct RunReport {
    pub db_path: PathBuf,
    pub seed: Option<u64>,
    pub batch: BatchReport,
    pub export: ExportReport,
}

/// Loads settings, installs logging and executes the parsed command.
///
/// # Errors
/// Returns an error when the env file is missing or malformed, a required
/// setting is absent or invalid, the store cannot be opened, or the command
/// fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let env_file = EnvFile::load(&cli.env_file)?;
    let mut settings = Settings::resolve(&env_file)?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }

    logging::init_tracing(&settings.log_level)?;
    tracing::debug!(
        env_file = %cli.env_file.display(),
        db = %settings.db_path.display(),
        "settings resolved"
    );

    let mut store = open_store(&settings.db_path)?;
    run_command(cli.command, &settings, &mut store)
}

/// Executes `command` against an existing store handle.
///
/// # Errors
/// Returns an error when generation, persistence or export fails.
pub fn run_command(
    command: Command,
    settings: &Settings,
    store: &mut SqliteEventStore,
) -> Result<()> {
    match command {
        Command::Run(args) => {
            let report = run_and_export(
                settings,
                store,
                args.users,
                args.seed,
                args.output.as_deref(),
            )?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Generate(args) => {
            let report = generate(settings, store, args.users, args.seed)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Export(args) => {
            let path = args.output.as_deref().unwrap_or(&settings.export_path);
            let report = export(store, path)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Events { command } => run_events(command, store),
        Command::Summary => {
            let summary = store.funnel_summary()?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
    }
}

/// Generates one batch and exports the full event table.
///
/// # Errors
/// Returns an error when the batch aborts or the export cannot be written.
/// A failed batch leaves the export file untouched.
pub fn run_and_export(
    settings: &Settings,
    store: &mut SqliteEventStore,
    users: Option<u64>,
    seed: Option<u64>,
    output: Option<&Path>,
) -> Result<RunReport> {
    let seed = seed.or(settings.seed);
    let batch = generate(settings, store, users, seed)?;
    let written = export(store, output.unwrap_or(&settings.export_path))?;

    Ok(RunReport {
        db_path: settings.db_path.clone(),
        seed,
        batch,
        export: written,
    })
}

/// Runs one progression call for each user id in `1..=users` (default
/// `NUM_USERS`). Users with stored history advance from it; completed users
/// emit nothing.
///
/// # Errors
/// Returns an error on the first user whose progression fails.
pub fn generate(
    settings: &Settings,
    store: &mut SqliteEventStore,
    users: Option<u64>,
    seed: Option<u64>,
) -> Result<BatchReport> {
    let users = users.unwrap_or(settings.num_users);
    let engine = FunnelEngine::new(EventBuilder::new(
        SchemaRegistry::default_funnel(),
        settings.window,
    ));
    let mut rng = make_rng(seed.or(settings.seed));

    engine
        .run_batch(store, &mut rng, users)
        .context("generation failed")
}

fn export(store: &SqliteEventStore, path: &Path) -> Result<ExportReport> {
    let report = store
        .export_csv(path)
        .map_err(|err| FunnelError::Export(format!("{err:#}")))?;
    tracing::info!(
        path = %report.path.display(),
        rows = report.rows,
        "export written"
    );
    Ok(report)
}

fn run_events(command: EventsCommand, store: &SqliteEventStore) -> Result<()> {
    match command {
        EventsCommand::List(args) => {
            if args.user_id == 0 {
                return Err(anyhow!("user_id MUST be >= 1"));
            }
            let events = store.list_user_events(args.user_id)?;
            println!("{}", serde_json::to_string_pretty(&events)?);
            Ok(())
        }
    }
}

fn open_store(path: &Path) -> Result<SqliteEventStore> {
    let store = SqliteEventStore::open(path)
        .with_context(|| format!("failed to open event store {}", path.display()))?;
    store.migrate()?;
    Ok(store)
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}
