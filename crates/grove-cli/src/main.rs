//! Grove CLI
//!
//! Operator access to a local replica: derive keys, create spaces, and
//! read or write objects and credentials. Everything is stored under the
//! configured data directory; the ledger authority and namespace registry
//! are single-node and live there too.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    common,
    credential::{self, CredentialCommand},
    keys::{self, KeysArgs},
    object::{self, ObjectCommand},
    space::{self, SpaceCommand},
};

#[derive(Parser)]
#[command(name = "grove")]
#[command(about = "Grove - encrypted replicated spaces", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(short, long, global = true, default_value = ".grove/config.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive a space's keys from a recovery phrase
    Keys(KeysArgs),

    /// Space management
    #[command(subcommand)]
    Space(SpaceCommand),

    /// Mutable objects
    #[command(subcommand)]
    Object(ObjectCommand),

    /// Immutable credentials
    #[command(subcommand)]
    Credential(CredentialCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    match cli.command {
        Commands::Keys(args) => keys::run(&args)?,
        Commands::Space(cmd) => {
            let config = common::load_config(&cli.config)?;
            space::run(cmd, config).await?;
        }
        Commands::Object(cmd) => {
            let config = common::load_config(&cli.config)?;
            object::run(cmd, config).await?;
        }
        Commands::Credential(cmd) => {
            let config = common::load_config(&cli.config)?;
            credential::run(cmd, config).await?;
        }
    }

    Ok(())
}
