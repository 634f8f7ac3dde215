//! Per-session middleware selection.

use crate::middleware::Middleware;
use crate::session::SessionContext;

/// Picks the protocol middleware for a session.
///
/// Evaluated once when the session starts; the returned chain follows the
/// fold order of [`Next`](crate::Next) (last element runs first).
pub trait Router: Send + Sync {
    fn route(&self, ctx: &SessionContext) -> Vec<Middleware>;
}

impl<F> Router for F
where
    F: Fn(&SessionContext) -> Vec<Middleware> + Send + Sync,
{
    fn route(&self, ctx: &SessionContext) -> Vec<Middleware> {
        self(ctx)
    }
}

/// Routing by command line and terminal state.
///
/// | session                 | chain           |
/// |-------------------------|-----------------|
/// | `scp ...`               | `[Scp]`         |
/// | `command ls`            | `[List, Auth]`  |
/// | `rsync ...`             | `[Rsync]`       |
/// | anything, no terminal   | `[Pipe, Auth]`  |
/// | anything, terminal      | `[Auth]`        |
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRouter;

impl Router for CommandRouter {
    fn route(&self, ctx: &SessionContext) -> Vec<Middleware> {
        let command = ctx.command();
        match command.first().map(String::as_str) {
            Some("scp") => vec![Middleware::Scp],
            Some("command") if command.len() == 2 && command[1] == "ls" => {
                vec![Middleware::List, Middleware::Auth]
            }
            Some("rsync") => vec![Middleware::Rsync],
            _ if !ctx.has_pty() => vec![Middleware::Pipe, Middleware::Auth],
            _ => vec![Middleware::Auth],
        }
    }
}
