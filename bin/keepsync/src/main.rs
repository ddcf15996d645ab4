mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "keepsync")]
#[command(about = "Sync Google Keep notes through linked browser profiles and accounts", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show paths, binaries and linked accounts
    Status,

    /// List linked accounts
    Accounts,

    /// Link a new account
    Link {
        #[command(subcommand)]
        command: LinkCommands,
    },

    /// Sync notes for every linked account once
    Sync,

    /// Print synced notes
    Notes {
        /// Only show notes of this account
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Remove an account, its notes and its browser profile
    Remove {
        /// Account email
        email: String,
    },

    /// Sync periodically until interrupted
    Daemon {
        /// Seconds between syncs (overrides config sync.intervalSecs)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Kill leftover driver and browser processes
    Cleanup,
}

#[derive(Subcommand)]
enum LinkCommands {
    /// Sign in on the Google embedded setup page and capture a token
    Google,
    /// Sign a new browser profile in
    Profile,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Status => {
            commands::status::run().await?;
        }
        Commands::Accounts => {
            commands::accounts::run().await?;
        }
        Commands::Link { command } => match command {
            LinkCommands::Google => {
                commands::link::google().await?;
            }
            LinkCommands::Profile => {
                commands::link::profile().await?;
            }
        },
        Commands::Sync => {
            commands::sync::run().await?;
        }
        Commands::Notes { email } => {
            commands::notes::run(email).await?;
        }
        Commands::Remove { email } => {
            commands::remove::run(&email).await?;
        }
        Commands::Daemon { interval } => {
            commands::daemon::run(interval).await?;
        }
        Commands::Cleanup => {
            commands::cleanup::run().await?;
        }
    }

    Ok(())
}
