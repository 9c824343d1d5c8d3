//! tektite-migrate - move an AT Protocol account between PDS instances
//!
//! - `resolve`: check a prospective target server
//! - `migrate`: start or resume a migration and drive it to completion
//! - `status`: show the stored migration, if any
//! - `cancel`: discard the stored migration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod prompt;

#[derive(Parser)]
#[command(name = "tektite-migrate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding the in-flight migration record
    #[arg(long, global = true, env = "TEKTITE_STATE_DIR", default_value = ".tektite")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that a server can receive a migration
    Resolve(commands::resolve::ResolveArgs),

    /// Start or resume a migration
    Migrate(commands::migrate::MigrateArgs),

    /// Show the stored migration
    Status(commands::status::StatusArgs),

    /// Discard the stored migration
    Cancel(commands::status::CancelArgs),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,engine=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Resolve(args) => commands::resolve::execute(args).await,
        Commands::Migrate(args) => commands::migrate::execute(args, &cli.state_dir).await,
        Commands::Status(args) => commands::status::execute(args, &cli.state_dir).await,
        Commands::Cancel(args) => commands::status::cancel(args, &cli.state_dir).await,
    }
}
