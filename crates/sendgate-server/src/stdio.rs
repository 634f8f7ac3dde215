//! Session glue for OpenSSH `ForceCommand` / `Subsystem` invocations.
//!
//! sshd hands the channel over as stdin/stdout/stderr and describes the
//! request in the environment.

use std::io::IsTerminal;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tracing::{debug, info};

use sendgate_core::error::Result;
use sendgate_core::{Gateway, PtyInfo, SFTP_SUBSYSTEM, Session, SessionContext};

use crate::backend::LocalDirHandler;
use crate::cli::Cli;

/// Program names that mean "start the SFTP server".
fn is_sftp_server(program: &str) -> bool {
    program == "internal-sftp" || program.rsplit('/').next() == Some("sftp-server")
}

/// Remote endpoint from `SSH_CONNECTION` (`client_ip client_port server_ip server_port`).
fn parse_connection(value: &str) -> Option<SocketAddr> {
    let mut fields = value.split_whitespace();
    let ip: IpAddr = fields.next()?.parse().ok()?;
    let port: u16 = fields.next()?.parse().ok()?;
    Some(SocketAddr::new(ip, port))
}

/// Build the session context from the sshd environment.
///
/// `subsystem` forces a subsystem request. `var` looks up environment
/// variables; `terminal` reports whether stdin is a terminal.
pub fn context_from_env<F>(subsystem: Option<&str>, var: F, terminal: bool) -> SessionContext
where
    F: Fn(&str) -> Option<String>,
{
    let user = var("USER")
        .or_else(|| var("LOGNAME"))
        .unwrap_or_default();
    let mut ctx = SessionContext::new(user);

    if let Some(addr) = var("SSH_CONNECTION").as_deref().and_then(parse_connection) {
        ctx = ctx.with_remote_addr(addr);
    }

    let original = var("SSH_ORIGINAL_COMMAND").unwrap_or_default();
    if let Some(name) = subsystem {
        ctx = ctx.with_subsystem(name);
    } else if original.split_whitespace().next().is_some_and(is_sftp_server) {
        ctx = ctx.with_subsystem(SFTP_SUBSYSTEM);
    } else if !original.trim().is_empty() {
        ctx = ctx.with_command_line(&original);
    }

    if terminal {
        let dimension = |name: &str, default: u16| {
            var(name).and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        ctx = ctx.with_pty(PtyInfo {
            term: var("TERM").unwrap_or_else(|| "xterm".to_string()),
            cols: dimension("COLUMNS", 80),
            rows: dimension("LINES", 24),
        });
    }
    ctx
}

/// Session over the process's standard streams.
pub fn stdio_session(ctx: SessionContext) -> Session {
    Session::new(
        ctx,
        tokio::io::stdin(),
        tokio::io::stdout(),
        tokio::io::stderr(),
    )
}

/// Serve the single session this process was started for.
///
/// Returns the exit status to report to the client.
pub async fn run(cli: &Cli) -> Result<u32> {
    let handler = LocalDirHandler::new(&cli.root).with_allowed_users(cli.allow_users.clone());
    let gateway = Gateway::builder(Arc::new(handler))
        .config(cli.gateway_config())
        .build();

    let ctx = context_from_env(
        cli.subsystem.as_deref(),
        |name| std::env::var(name).ok(),
        std::io::stdin().is_terminal(),
    );
    info!(
        user = %ctx.user(),
        remote = ?ctx.remote_addr(),
        command = ?ctx.command(),
        subsystem = ?ctx.subsystem(),
        "Serving session"
    );

    let mut session = stdio_session(ctx);
    let result = gateway.handle(&mut session).await;
    let status = session
        .exit_status()
        .unwrap_or(if result.is_err() { 1 } else { 0 });
    debug!(status, "Session done");
    Ok(status)
}
