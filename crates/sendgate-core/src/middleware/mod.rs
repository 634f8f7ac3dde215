//! Middleware chain composition.
//!
//! A chain is an ordered `[Middleware]`. The last element is outermost: it
//! runs first and reaches the rest of the chain through [`Next`]. Once the
//! chain is exhausted the gateway's base [`SessionHandler`](crate::SessionHandler)
//! runs.

mod auth;
mod list;
mod logging;
mod metrics;
mod pipe;

use std::any::Any;
use std::fmt;

use futures::future::BoxFuture;
use tracing::error;

use crate::error::Result;
use crate::gateway::Gateway;
use crate::session::Session;
use crate::{rsync, scp, sftp};

/// One composable session handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Middleware {
    /// SCP copy protocol (`scp -t` / `scp -f`).
    Scp,
    /// SFTP request loop; terminal, never calls onward.
    Sftp,
    /// rsync push protocol.
    Rsync,
    /// Whole stdin uploaded as one file.
    Pipe,
    /// `command ls` directory listing.
    List,
    /// Connection validation guard.
    Auth,
    /// Session start/end logging.
    Logging,
    /// Per-protocol counters.
    Metrics,
}

impl Middleware {
    pub fn name(self) -> &'static str {
        match self {
            Middleware::Scp => "scp",
            Middleware::Sftp => "sftp",
            Middleware::Rsync => "rsync",
            Middleware::Pipe => "pipe",
            Middleware::List => "list",
            Middleware::Auth => "auth",
            Middleware::Logging => "logging",
            Middleware::Metrics => "metrics",
        }
    }

    async fn apply(self, gateway: &Gateway, session: &mut Session, next: Next<'_>) -> Result<()> {
        let handler = gateway.handler();
        match self {
            Middleware::Scp => scp::serve(handler, session, next).await,
            Middleware::Sftp => sftp::serve(gateway.shared_handler(), session).await,
            Middleware::Rsync => rsync::serve(handler, gateway.rsync(), session, next).await,
            Middleware::Pipe => {
                pipe::serve(handler, &gateway.config().pipe_extension, session, next).await
            }
            Middleware::List => list::serve(handler, session, next).await,
            Middleware::Auth => auth::serve(handler, session, next).await,
            Middleware::Logging => logging::serve(handler, session, next).await,
            Middleware::Metrics => metrics::serve(gateway.metrics(), session, next).await,
        }
    }
}

impl fmt::Display for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The remainder of a chain, handed to each middleware.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    gateway: &'a Gateway,
    chain: &'a [Middleware],
}

impl<'a> Next<'a> {
    pub(crate) fn new(gateway: &'a Gateway, chain: &'a [Middleware]) -> Self {
        Self { gateway, chain }
    }

    /// Middleware still to run, innermost first.
    pub fn remaining(&self) -> &'a [Middleware] {
        self.chain
    }

    /// Run the rest of the chain, ending in the base handler.
    pub fn run<'s>(self, session: &'s mut Session) -> BoxFuture<'s, Result<()>>
    where
        'a: 's,
    {
        Box::pin(async move {
            match self.chain.split_last() {
                Some((&outer, rest)) => {
                    let next = Next::new(self.gateway, rest);
                    outer.apply(self.gateway, session, next).await
                }
                None => self.gateway.base().handle(session).await,
            }
        })
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("chain", &self.chain).finish()
    }
}

/// Describe a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Report a panic caught inside a protocol engine and end the session.
pub(crate) async fn report_panic(
    session: &mut Session,
    protocol: &str,
    payload: Box<dyn Any + Send>,
) -> Result<()> {
    error!(
        protocol,
        panic = %panic_message(payload.as_ref()),
        "Protocol handler panicked"
    );
    session
        .stderr()
        .write_line(&format!(
            "error running {} middleware, check the flags you are using",
            protocol
        ))
        .await?;
    session.exit(1);
    session.close().await
}
