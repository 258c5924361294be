//! Polyver CLI - inspect and edit a component's version store.
//!
//! Every command opens the component's store (default
//! `~/.{component}_versions.json`), applies one operation through a
//! `VersionManager`, and lets the manager write the store back.

mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use commands::Command;
use polyver_core::{DylibLoader, ManagerConfig, VersionManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "polyver")]
#[command(about = "Manage side-by-side versions of a native component")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Version store file (defaults to ~/.{component}_versions.json)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let component = args.command.component();
    let config = match args.store {
        Some(path) => ManagerConfig::in_memory().with_store_path(path),
        None => ManagerConfig::persisted(component),
    }
    .with_store_backup(true);

    debug!(
        "Opening {} with store {:?}",
        component,
        config.store_path.as_deref()
    );

    let manager = VersionManager::with_config(component, Arc::new(DylibLoader::default()), config)
        .with_context(|| format!("Failed to open version store for {}", component))?;

    let output = args.command.run(&manager)?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}
