//! sendgate server binary entry point.
//!
//! Serves one SSH session over stdin/stdout.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use sendgate_server::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // stderr belongs to the client, so logs only go to a file
    if let Some(path) = cli.log_file.as_deref() {
        if let Err(e) = sendgate_core::init_logging(cli.verbose, path, cli.log_format.into()) {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), root = %cli.root.display(), "sendgate-server starting");

    match sendgate_server::run(&cli).await {
        Ok(status) => ExitCode::from(u8::try_from(status).unwrap_or(u8::MAX)),
        Err(e) => {
            error!(error = %e, "Session failed");
            eprintln!("sendgate-server: {}", e);
            ExitCode::FAILURE
        }
    }
}
