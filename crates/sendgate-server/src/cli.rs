//! Server CLI implementation.
//!
//! Provides command-line argument parsing for the OpenSSH front-end.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use sendgate_core::GatewayConfig;

/// Log output format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

impl From<CliLogFormat> for sendgate_core::LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => sendgate_core::LogFormat::Text,
            CliLogFormat::Json => sendgate_core::LogFormat::Json,
        }
    }
}

/// sendgate server - file transfer gateway for one SSH session.
///
/// Meant to run as an OpenSSH `ForceCommand` or `Subsystem`; the session
/// is read from stdin/stdout and the `SSH_*` environment.
#[derive(Debug, Parser)]
#[command(
    name = "sendgate-server",
    version,
    about = "sendgate server - scp, sftp and rsync uploads into a directory"
)]
pub struct Cli {
    /// Directory files are stored in
    #[arg(long = "root", env = "SENDGATE_ROOT", value_name = "DIR")]
    pub root: PathBuf,

    /// Extension appended to generated names of piped uploads
    #[arg(long = "pipe-ext", env = "SENDGATE_PIPE_EXT", default_value = "")]
    pub pipe_ext: String,

    /// User allowed to connect (repeatable; default: everyone)
    #[arg(long = "allow-user", action = ArgAction::Append, value_name = "USER")]
    pub allow_users: Vec<String>,

    /// Serve this subsystem instead of the forwarded command
    #[arg(long = "subsystem", value_name = "NAME")]
    pub subsystem: Option<String>,

    /// Do not serve the sftp subsystem
    #[arg(long = "no-sftp")]
    pub no_sftp: bool,

    /// Increase verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Log to file (nothing is logged without one)
    #[arg(long = "log-file", env = "SENDGATE_LOG_FILE", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", default_value = "text")]
    pub log_format: CliLogFormat,
}

impl Cli {
    /// Gateway settings selected by the flags.
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig::new()
            .with_pipe_extension(self.pipe_ext.clone())
            .with_sftp(!self.no_sftp)
    }
}
