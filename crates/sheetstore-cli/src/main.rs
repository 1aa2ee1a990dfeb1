//! sheetstore - command line access to spreadsheet-backed stores
//!
//! # Usage
//! ```bash
//! sheetstore --config sheetstore.toml --user ana read transactions
//! sheetstore --location financas.json insert budgets Categoria=Lazer Limite=300
//! sheetstore detect "https://docs.google.com/spreadsheets/d/1abc/edit"
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use sheetstore_core::mapper::{strategy_ids, IDENTITY_STRATEGY};
use sheetstore_core::{
    detect, DataStore, Operation, StoreConfig, StoreManager, TableKind, UserProfile,
};

mod fields;

/// Sheetstore CLI - typed access to spreadsheet documents
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); `SHEETSTORE_*` variables override it
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// User whose store to open
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Open this location directly instead of a configured user
    #[arg(short, long, global = true)]
    location: Option<String>,

    /// Layout strategy for `--location`
    #[arg(long, default_value = IDENTITY_STRATEGY, global = true)]
    strategy: String,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which backend a location maps to
    Detect {
        #[arg(value_name = "LOCATION")]
        target: String,
    },

    /// List the compiled-in layout strategies
    Strategies,

    /// Print a table as JSON records
    Read {
        table: String,
        /// Print coercion warnings to stderr
        #[arg(long)]
        warnings: bool,
        /// Serve the last good snapshot if the backend is down
        #[arg(long)]
        best_effort: bool,
    },

    /// Insert a row from Column=value pairs
    Insert { table: String, fields: Vec<String> },

    /// Update a row from Column=value pairs
    Update {
        table: String,
        id: i64,
        fields: Vec<String>,
    },

    /// Delete a row
    Delete { table: String, id: i64 },

    /// Recompute and persist derived columns
    Recalc,

    /// Drop the cached snapshot and reload it
    Resync,

    /// Check that the backend is reachable
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(cli.verbose)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Detect { target } => {
            println!("{} -> {}", target, detect(target).to_string().cyan());
        }
        Commands::Strategies => {
            for id in strategy_ids() {
                println!("{}", id);
            }
        }
        Commands::Read {
            table,
            warnings,
            best_effort,
        } => {
            let store = open_store(&cli)?;
            let kind = table_kind(table)?;
            let outcome = if *best_effort {
                store.read_best_effort(kind).await?
            } else {
                store.read_detailed(kind).await?
            };
            if outcome.stale {
                eprintln!(
                    "{} serving last good snapshot ({})",
                    "stale:".yellow(),
                    outcome.provenance
                );
            }
            if *warnings {
                for warning in &outcome.warnings {
                    eprintln!("{} {}", "warning:".yellow(), warning);
                }
            }
            println!("{}", serde_json::to_string_pretty(&outcome.table.to_records())?);
        }
        Commands::Insert { table, fields } => {
            let store = open_store(&cli)?;
            let op = Operation::Insert(fields::parse_fields(fields)?);
            report(store.mutate(table_kind(table)?, op).await?);
        }
        Commands::Update { table, id, fields } => {
            let store = open_store(&cli)?;
            let op = Operation::Update {
                id: *id,
                changes: fields::parse_fields(fields)?,
            };
            report(store.mutate(table_kind(table)?, op).await?);
        }
        Commands::Delete { table, id } => {
            let store = open_store(&cli)?;
            report(store.mutate(table_kind(table)?, Operation::Delete { id: *id }).await?);
        }
        Commands::Recalc => {
            let store = open_store(&cli)?;
            let written = store.recalculate_derived().await?;
            if written.is_empty() {
                println!("{}", "derived values already current".green());
            } else {
                let names: Vec<String> = written.iter().map(ToString::to_string).collect();
                println!("{} {}", "recalculated".green(), names.join(", "));
            }
        }
        Commands::Resync => {
            let store = open_store(&cli)?;
            let provenance = store.force_resync().await?;
            println!("{} {}", "resynced at".green(), provenance);
        }
        Commands::Check => {
            let store = open_store(&cli)?;
            let status = store.check_connection().await;
            if status.ok {
                println!("{} {}", "ok".green().bold(), status.detail);
            } else {
                println!("{} {}", "down".red().bold(), status.detail);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn table_kind(name: &str) -> Result<TableKind> {
    name.parse::<TableKind>()
        .with_context(|| format!("tables: {}", table_list()))
}

fn table_list() -> String {
    TableKind::ALL
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn open_store(cli: &Cli) -> Result<Arc<DataStore>> {
    let config = StoreConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let manager = StoreManager::new(config);

    let user_id = match (&cli.user, &cli.location) {
        (Some(user), _) => user.clone(),
        (None, Some(_)) => "local".to_string(),
        (None, None) => match manager.profiles().as_slice() {
            [only] => only.user_id.clone(),
            [] => bail!("no users configured; pass --location or --config"),
            _ => bail!("several users configured; pick one with --user"),
        },
    };
    if let Some(location) = &cli.location {
        manager.register(UserProfile::new(&user_id, location).with_strategy(&cli.strategy))?;
    }

    let store = manager.store_for(&user_id)?;
    tracing::debug!(
        "Opened {} ({} backend, {} layout)",
        store.user_id(),
        store.backend_kind(),
        store.strategy_id()
    );
    Ok(store)
}

fn report(outcome: sheetstore_core::MutationOutcome) {
    let affected: Vec<String> = outcome.affected.iter().map(ToString::to_string).collect();
    println!(
        "{} #{} ({} -> {})",
        "saved".green(),
        outcome.id,
        affected.join(", "),
        outcome.provenance
    );
    for warning in &outcome.warnings {
        eprintln!("{} {}", "warning:".yellow(), warning);
    }
}
