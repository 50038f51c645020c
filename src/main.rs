//! agentbus - command line client for Redis-backed agent messaging.

use clap::Parser;
use std::process::ExitCode;

use agentbus::{logging, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    // Settings before logging: verbose may come from the settings file
    let args = Commands::parse();
    let settings = args.settings();

    let _guard = match logging::init(settings.verbose) {
        Ok((guard, _)) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match args.run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
