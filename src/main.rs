use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use database::models::TournamentMeta;
use database::{CleanupDatabase, SqliteDatabase, TournamentDatabase};

/// Traits and types used for interacting with the relational store.
mod database;
/// Rank-column gap repair for standings files.
mod gaps;
/// Resolves standings rows into store entities.
mod ingest;
/// Placement parsing and the placements file format.
mod placements;
/// Standings tables, header normalization and CSV I/O.
mod standings;
/// Reconciliation of placements against standings.
mod unify;

/// A thread-safe Error type used throughout the pipeline.
pub type AppError = anyhow::Error;

/// Reconciles SWU tournament results from the competitive hub and melee.gg
/// exports into a normalized SQLite store.
#[derive(Parser)]
#[command(name = "swu-meta", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Unify a placements file with its standings file.
    Unify {
        /// Placements file, e.g. `123456_placements.txt`.
        placements: Option<PathBuf>,
        /// Process every `*_placements.txt` in the directory instead.
        #[arg(long)]
        all: bool,
        /// Directory scanned by --all.
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Import standings CSV exports into the store.
    Import {
        /// Directory containing `*_standings*.csv` files.
        #[arg(default_value = "csv")]
        dir: PathBuf,
    },
    /// Register a hub-sourced tournament in the store.
    AddTournament {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        name: String,
        /// ISO-2 country code.
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        level: Option<String>,
        /// Melee link, e.g. `https://melee.gg/Tournament/View/123456`.
        #[arg(long)]
        link: Option<String>,
    },
    /// Renumber a standings rank column to remove gaps.
    FixGaps {
        input: PathBuf,
        /// Output file; omit to replace the input in place.
        output: Option<PathBuf>,
        /// Data rows after the header to leave untouched.
        #[arg(long, default_value_t = gaps::PROTECTED_PREFIX)]
        skip: usize,
    },
    /// Remove decks referencing unknown leaders/bases from the store.
    Cleanup,
}

#[tokio::main]
async fn main() {
    if let Err(e) = setup_tracing() {
        panic!("Error trying to setup tracing: {}", e);
    }

    if let Err(e) = run(Cli::parse()).await {
        panic!("Error trying to run the pipeline: {}", e);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Command::Unify {
            placements,
            all,
            dir,
        } => {
            if all {
                unify::unify_all(&dir)?;
            } else {
                let Some(placements) = placements else {
                    anyhow::bail!("either a placements file or --all is required");
                };
                unify::unify_file(&placements)?;
            }
        }
        Command::Import { dir } => {
            let db = connect().await?;
            ingest::import_directory(&db, &dir).await?;
        }
        Command::AddTournament {
            date,
            name,
            location,
            level,
            link,
        } => {
            let db = connect().await?;
            let meta = TournamentMeta {
                date,
                name,
                location,
                level,
                link,
            };
            let id = db.register_tournament(&meta).await?;
            info!("tournament registered with id {id}");
        }
        Command::FixGaps { input, output, skip } => {
            gaps::fix_sequence(&input, output.as_deref(), skip)?;
        }
        Command::Cleanup => {
            let db = connect().await?;
            let report = db.remove_unknown_decks().await?;
            info!(
                "updated {} results rows (deck_id -> NULL)",
                report.results_updated
            );
            info!("deleted {} corrupted decks", report.decks_deleted);
            if report.leaders_deleted > 0 || report.bases_deleted > 0 {
                info!(
                    "also removed {} unknown leader(s) and {} unknown base(s) that were no longer referenced",
                    report.leaders_deleted, report.bases_deleted
                );
            }
        }
    }

    Ok(())
}

async fn connect() -> Result<SqliteDatabase, AppError> {
    let db = SqliteDatabase::connect().await?;
    db.migrate().await?;
    Ok(db)
}

/// Sets up the tracing subscriber for the pipeline.
fn setup_tracing() -> Result<(), AppError> {
    if cfg!(debug_assertions) {
        let filter = EnvFilter::from_default_env()
            .add_directive("none".parse()?)
            .add_directive("swu_meta=info".parse()?);

        tracing_subscriber::fmt::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::NONE)
            .pretty()
            .init();

        return Ok(());
    }

    tracing_subscriber::fmt::fmt()
        .with_span_events(FmtSpan::NONE)
        .with_max_level(LevelFilter::INFO)
        .init();

    Ok(())
}
