// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! `tabula`: inspect and maintain a data directory without running the
//! application that owns it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tabula_store_core::{Indexes, Store};
use tabula_store_db::{Config, DataDirLock, schema};
use tabula_store_disk::{DataLayout, Persister, PersisterConfig};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect and maintain Tabula data directories")]
struct Args {
    /// TOML config file (defaults to $TABULA_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Row counts per collection
    Stats {
        /// Data directory (defaults to the configured one)
        data: Option<PathBuf>,
    },
    /// Print one record as JSON
    Get {
        data: PathBuf,
        collection: String,
        id: String,
    },
    /// Row IDs whose indexed field equals a value
    Slice {
        data: PathBuf,
        /// Index name, e.g. usersByEmail
        index: String,
        /// Parsed as JSON if possible, otherwise taken as a string
        value: String,
    },
    /// Rewrite every index file from the records
    Reindex { data: PathBuf },
    /// Remove temp files left by an interrupted save
    Clean { data: PathBuf },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

/// A persister over `data` with the schema's collections, no auto-save.
fn open_persister(data: &Path) -> (Store, Persister) {
    let store = Store::new();
    let mut config = PersisterConfig::new(data);
    config.collections = schema::collection_configs();
    let persister = Persister::new(&store, config);
    (store, persister)
}

/// Refuse to touch a directory an open database owns.
fn lock(data: &Path) -> Result<DataDirLock> {
    if !data.is_dir() {
        bail!("{} is not a directory", data.display());
    }
    let lock = DataDirLock::acquire(&DataLayout::new(data).lock_path())
        .with_context(|| format!("{} is in use", data.display()))?;
    Ok(lock)
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

async fn stats(data: &Path) -> Result<()> {
    let (store, persister) = open_persister(data);
    persister.load().await?;
    for collection in schema::COLLECTIONS {
        println!("{:<20} {}", collection.name, store.row_count(collection.name));
    }
    println!("{:<20} {}", "(values)", store.values().len());
    Ok(())
}

async fn get(data: &Path, collection: &str, id: &str) -> Result<()> {
    let (store, persister) = open_persister(data);
    persister.load().await?;
    let Some(row) = store.row(collection, id) else {
        bail!("no record {collection}/{id}");
    };
    println!("{}", serde_json::to_string_pretty(&row)?);
    Ok(())
}

async fn slice(data: &Path, index: &str, value: &str) -> Result<()> {
    let (store, persister) = open_persister(data);
    let indexes = Indexes::new(&store);
    schema::register_indexes(&indexes);
    if indexes.index_definition(index).is_none() {
        bail!("unknown index {index}");
    }
    persister.load().await?;
    for row_id in indexes.slice_row_ids(index, parse_value(value)) {
        println!("{row_id}");
    }
    Ok(())
}

async fn reindex(data: &Path) -> Result<()> {
    let _lock = lock(data)?;
    let (_store, persister) = open_persister(data);
    persister.load().await?;
    let written = persister.rebuild_indices().await?;
    info!(files = written, "rebuilt index files");
    println!("{written} index files written");
    Ok(())
}

async fn clean(data: &Path) -> Result<()> {
    let _lock = lock(data)?;
    let (_store, persister) = open_persister(data);
    let removed = persister.clean_temp_files().await?;
    println!("{removed} temp files removed");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    // RUST_LOG wins over the configured level.
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("invalid log level {:?}", config.log_level))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    debug!(?args, "starting");

    match args.command {
        Command::Stats { data } => stats(data.as_deref().unwrap_or(&config.data_path)).await,
        Command::Get {
            data,
            collection,
            id,
        } => get(&data, &collection, &id).await,
        Command::Slice { data, index, value } => slice(&data, &index, &value).await,
        Command::Reindex { data } => reindex(&data).await,
        Command::Clean { data } => clean(&data).await,
    }
}
