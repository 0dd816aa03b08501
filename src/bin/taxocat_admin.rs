//! taxocat maintenance tool
//!
//! Runs consistency passes and member changes against a persistent
//! catalog graph. Every command prints its report as JSON.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use taxocat::storage::{open_graph, PersistentGraphStore};
use taxocat::{CatalogEngine, CatalogResult, Dimension, EngineConfig, GraphStore};

#[derive(Parser)]
#[command(name = "taxocat-admin")]
#[command(about = "Maintain driver relevance and default relationships of a catalog graph")]
#[command(version)]
struct Cli {
    /// Directory holding the catalog graph
    #[arg(short, long, default_value = "./catalog.taxo")]
    data_dir: PathBuf,

    /// JSON engine configuration (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create missing default relationships (add-only)
    Bootstrap,
    /// Leave exactly one canonical default per pair, deleting all others
    Reconcile {
        /// Confirm the destructive pass
        #[arg(long)]
        yes: bool,
    },
    /// Collapse explicit selections covering every member to wildcards
    Normalize,
    /// Re-apply relevance edges to every entity
    ApplyRelevance,
    /// Add a dimension member and link it to wildcard entities
    AddMember {
        dimension: Dimension,
        key: String,
    },
    /// Remove a dimension member, rewriting entities that named it
    RemoveMember {
        dimension: Dimension,
        key: String,
    },
    /// Rewrite the write-ahead log as a snapshot
    Compact,
}

fn print_json<T: Serialize>(report: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

fn open(cli: &Cli) -> CatalogResult<(Arc<PersistentGraphStore>, CatalogEngine)> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let store = Arc::new(open_graph(&cli.data_dir, None)?);
    let engine = CatalogEngine::new(Arc::clone(&store) as Arc<dyn GraphStore>, config)?;
    Ok((store, engine))
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let (store, engine) = open(&cli)?;
    match cli.command {
        Command::Bootstrap => print_json(&engine.bootstrap_missing()?),
        Command::Reconcile { yes } => {
            if !yes {
                return Err("reconcile deletes non-canonical relationships; re-run with --yes".into());
            }
            print_json(&engine.reconcile_exact()?)
        }
        Command::Normalize => print_json(&engine.normalize_all()?),
        Command::ApplyRelevance => print_json(&engine.apply_relevance_all()?),
        Command::AddMember { dimension, key } => print_json(&engine.add_member(dimension, &key)?),
        Command::RemoveMember { dimension, key } => {
            print_json(&engine.remove_member(dimension, &key)?)
        }
        Command::Compact => print_json(&store.compact()?),
    }
}

fn main() -> ExitCode {
    // Quiet by default; RUST_LOG=info shows pass summaries.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
