use anyhow::Result;
use tracing::{error, info};

mod backend;
mod browser;
mod cli;
mod storage;
mod utils;
mod worker;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = cli::parse_args();

    // Initialize logging
    utils::logging::init_logging(args.verbose, args.log_file.clone())?;

    info!("Starting community-fetcher v{}", env!("CARGO_PKG_VERSION"));

    // Process commands
    match cli::process_command(args).await {
        Ok(_) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            Err(e)
        }
    }
}
