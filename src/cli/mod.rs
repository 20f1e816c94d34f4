pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write logs to a file in addition to stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the fetch worker against the pending queue
    Run {
        /// Comma-separated community ids; loads a fresh queue from the
        /// backend instead of reusing the persisted one
        #[arg(short, long)]
        communities: Option<String>,

        /// Configuration profile to use
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Load and persist a fresh queue without running it
    Queue {
        /// Comma-separated community ids
        #[arg(required = true)]
        communities: String,

        /// Configuration profile to use
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Show the persisted worker state
    Status {
        /// Configuration profile to use
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Validate the session's addressing token without running anything
    Validate {
        /// Configuration profile to use
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            communities,
            profile,
        } => {
            info!("Starting fetch run");
            commands::run(communities, profile).await
        }
        Commands::Queue {
            communities,
            profile,
        } => {
            info!("Loading queue for {}", communities);
            commands::queue(communities, profile).await
        }
        Commands::Status { profile } => commands::status(profile).await,
        Commands::Validate { profile } => {
            info!("Validating addressing token");
            commands::validate(profile).await
        }
        Commands::Config { profile, list } => {
            if list {
                commands::list_profiles()
            } else if let Some(profile_name) = profile {
                commands::manage_profile(profile_name)
            } else {
                commands::show_config()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }
}
