//! CLI for the quarterly consolidation engine.
//!
//! Provides commands to condense samples into quarters, backfill empty
//! quarters from the device log, publish quarters to the configured
//! destinations, and summarize the store.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use quarterly::backfill::BackfillMode;
use quarterly::{
    AuditSink, Backfill, Consolidator, EngineConfig, HttpRemoteLog, HttpTransport, LogLocator,
    PermanentLog, Reconciler, SampleStore, SqliteStore, Summary,
};
use tracing_subscriber::EnvFilter;

/// quarterly: Quarter-hour consolidation, backfill and publishing for weather samples.
#[derive(Parser)]
#[command(name = "quarterly", version, about)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, global = true, default_value = "quarterly.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Condense raw samples into new quarters.
    Condense {
        /// Also rebuild thin quarters that now have more samples.
        #[arg(long)]
        recondense: bool,
    },

    /// Search the device log for quarters without data.
    Backfill {
        /// Search every thin quarter and report without writing.
        #[arg(long)]
        diagnostic: bool,
    },

    /// Deliver unacknowledged quarters to the destinations.
    Publish {
        /// Report what would be sent without sending.
        #[arg(long)]
        dry_run: bool,
    },

    /// Condense, recondense, backfill and publish, in that order.
    Run,

    /// Print an overview of the quarter table.
    Summary,
}

/// Everything a command needs, opened from the configuration.
struct Session {
    config: EngineConfig,
    store: SqliteStore,
    audit: PermanentLog,
}

type CmdResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Condense { recondense } => cmd_condense(&cli.config, recondense),
        Commands::Backfill { diagnostic } => cmd_backfill(&cli.config, diagnostic),
        Commands::Publish { dry_run } => cmd_publish(&cli.config, dry_run),
        Commands::Run => cmd_run(&cli.config),
        Commands::Summary => cmd_summary(&cli.config),
    };

    if let Err(e) = result {
        tracing::error!("{e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Loads the configuration and opens the store and the audit log.
fn open_session(config_path: &Path) -> Result<Session, Box<dyn std::error::Error>> {
    let config = EngineConfig::load(config_path)?;
    let store = SqliteStore::open(&config.database)?;
    let mut audit = PermanentLog::open(&config.audit_log, config.program.as_str()).map_err(|e| {
        format!(
            "cannot open audit log '{}': {e}",
            config.audit_log.display()
        )
    })?;
    audit.record(&format!("{} {}", config.program, env!("CARGO_PKG_VERSION")));

    Ok(Session {
        config,
        store,
        audit,
    })
}

fn condense(session: &mut Session, recondense: bool) -> CmdResult {
    let mut consolidator = Consolidator::new(&mut session.store, &mut session.audit);

    let report = consolidator.condense_new()?;
    tracing::debug!(created = report.created, with_data = report.with_data, "condense finished");

    if recondense {
        let report = consolidator.recondense(session.config.recondense_below)?;
        tracing::debug!(rewritten = report.rewritten, "recondense finished");
    }
    Ok(())
}

fn backfill(session: &mut Session, diagnostic: bool) -> CmdResult {
    let log = HttpRemoteLog::new(&session.config.device_url, session.config.http_timeout())?;
    let mut locator = LogLocator::new(log).with_pause(session.config.request_pause());

    let mode = if diagnostic {
        BackfillMode::Diagnostic {
            below: session.config.diagnostic_below,
        }
    } else {
        BackfillMode::Normal
    };

    let report = Backfill::new(&mut session.store, &mut session.audit, &mut locator)
        .with_mode(mode)
        .run()?;
    tracing::debug!(
        candidates = report.candidates,
        recovered = report.recovered,
        missing = report.missing,
        failed = report.failed,
        probes = report.probes,
        "backfill finished"
    );
    Ok(())
}

fn publish(session: &mut Session, dry_run: bool) -> CmdResult {
    let mut transport = HttpTransport::new(session.config.http_timeout())?;

    let report = Reconciler::new(
        &mut session.store,
        &mut session.audit,
        &mut transport,
        &session.config.destinations,
    )
    .with_dry_run(dry_run)
    .reconcile()?;
    tracing::debug!(
        candidates = report.candidates,
        delivered = report.delivered,
        rejected = report.rejected,
        failed = report.failed,
        "publish finished"
    );
    Ok(())
}

/// Implements `quarterly condense [--recondense]`.
fn cmd_condense(config_path: &Path, recondense: bool) -> CmdResult {
    let mut session = open_session(config_path)?;
    condense(&mut session, recondense)?;
    session.audit.flush()?;
    Ok(())
}

/// Implements `quarterly backfill [--diagnostic]`.
fn cmd_backfill(config_path: &Path, diagnostic: bool) -> CmdResult {
    let mut session = open_session(config_path)?;
    backfill(&mut session, diagnostic)?;
    session.audit.flush()?;
    Ok(())
}

/// Implements `quarterly publish [--dry-run]`.
fn cmd_publish(config_path: &Path, dry_run: bool) -> CmdResult {
    let mut session = open_session(config_path)?;
    publish(&mut session, dry_run)?;
    session.audit.flush()?;
    Ok(())
}

/// Implements `quarterly run`.
fn cmd_run(config_path: &Path) -> CmdResult {
    let mut session = open_session(config_path)?;
    condense(&mut session, true)?;
    backfill(&mut session, false)?;
    publish(&mut session, false)?;
    session.audit.record("done");
    session.audit.flush()?;
    Ok(())
}

/// Implements `quarterly summary`.
fn cmd_summary(config_path: &Path) -> CmdResult {
    let config = EngineConfig::load(config_path)?;
    let store = SqliteStore::open(&config.database)?;

    let quarters = store.quarters()?;
    println!();
    print!("{}", Summary::build(&quarters, &config.destinations));
    println!();
    Ok(())
}
