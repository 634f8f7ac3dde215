//! sendgate-server: OpenSSH front-end for the sendgate gateway.
//!
//! Provides:
//! - Command-line parsing
//! - Session construction from the sshd environment and standard streams
//! - A local directory storage backend

pub mod backend;
pub mod cli;
pub mod stdio;

pub use backend::LocalDirHandler;
pub use cli::{Cli, CliLogFormat};
pub use stdio::{context_from_env, run, stdio_session};
