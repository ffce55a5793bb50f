use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use mirrordb::{DurabilityMode, MirrorStore, Reconciler, StoreConfig, SyncBatch};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "mirrordb")]
#[command(about = "Inspect and maintain a mirrordb chat cache")]
struct Cli {
    /// Directory holding the snapshot and commit log
    #[arg(long, global = true, default_value = "./mirrordb-data")]
    data_dir: PathBuf,

    /// fsync every commit
    #[arg(long, global = true)]
    sync: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Version, row counts and log size
    Stats,
    /// Print one record
    Get { entity_type: String, id: String },
    /// Print the non-archived rows of an entity type
    Active { entity_type: String },
    /// Print the rows reached through a relation
    Related {
        entity_type: String,
        id: String,
        relation: String,
    },
    /// Apply a JSON sync batch file
    Apply { batch: PathBuf },
    /// Write a snapshot and truncate the commit log
    Checkpoint,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mode = if cli.sync {
        DurabilityMode::Sync
    } else {
        DurabilityMode::Async
    };
    let store = MirrorStore::open(StoreConfig::persistent(&cli.data_dir).durability(mode))
        .await
        .with_context(|| format!("Failed to open cache at {}", cli.data_dir.display()))?;

    let outcome = run(&store, cli.command).await;
    store.close().await.context("Failed to close cache")?;
    outcome
}

async fn run(store: &MirrorStore, command: Command) -> Result<()> {
    match command {
        Command::Stats => print_json(&store.stats()?),
        Command::Get { entity_type, id } => {
            let record = store
                .get(&entity_type, &id)?
                .ok_or_else(|| anyhow!("{} '{}' not found", entity_type, id))?;
            print_json(&record.to_json())
        }
        Command::Active { entity_type } => {
            let rows: Vec<_> = store
                .active(&entity_type)?
                .iter()
                .map(|r| r.to_json())
                .collect();
            print_json(&rows)
        }
        Command::Related {
            entity_type,
            id,
            relation,
        } => {
            let rows: Vec<_> = store
                .related(&entity_type, &id, &relation)?
                .iter()
                .map(|r| r.to_json())
                .collect();
            print_json(&rows)
        }
        Command::Apply { batch } => {
            let batch = read_batch(&batch)?;
            let report = Reconciler::new(store.clone()).apply(batch).await?;
            print_json(&report)
        }
        Command::Checkpoint => {
            store.checkpoint()?;
            println!("Checkpoint written at version {}", store.version()?);
            Ok(())
        }
    }
}

fn read_batch(path: &Path) -> Result<SyncBatch> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch file {}", path.display()))?;
    SyncBatch::from_json(&json).with_context(|| format!("Invalid batch in {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
