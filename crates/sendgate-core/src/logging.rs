//! File logging.
//!
//! A session's stderr is wired to the remote client, so log records only
//! ever go to a file.

use std::fs::OpenOptions;
use std::path::Path;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{Error, Result};

/// Log record format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Directive used when `RUST_LOG` is unset (0=error ... 4+=trace).
fn default_directive(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    format!("sendgate_core={level},sendgate_server={level},russh_sftp={level}")
}

/// Install the global subscriber, appending records to `path`.
pub fn init_logging(verbosity: u8, path: &Path, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_file(verbosity >= 3)
                    .with_line_number(verbosity >= 3),
            )
            .try_init(),
        LogFormat::Json => registry.with(fmt::layer().json().with_writer(file)).try_init(),
    };
    installed.map_err(|e| Error::Io(std::io::Error::other(e.to_string())))
}
