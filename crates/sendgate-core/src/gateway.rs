//! Session entry point: subsystem dispatch, routing and chain execution.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::handler::TransferHandler;
use crate::metrics::GatewayMetrics;
use crate::middleware::{Middleware, Next};
use crate::router::{CommandRouter, Router};
use crate::rsync::RsyncReceiver;
use crate::session::Session;

/// Subsystem name the SFTP engine is registered under.
pub const SFTP_SUBSYSTEM: &str = "sftp";

/// Innermost handler, reached once every middleware has passed the
/// session on.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    async fn handle(&self, session: &mut Session) -> Result<()>;
}

/// Base handler that does nothing; the gateway closes the session afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

#[async_trait]
impl SessionHandler for NoopHandler {
    async fn handle(&self, _session: &mut Session) -> Result<()> {
        Ok(())
    }
}

/// Assembled gateway shared by every session of a server.
pub struct Gateway {
    handler: Arc<dyn TransferHandler>,
    router: Box<dyn Router>,
    base: Arc<dyn SessionHandler>,
    rsync: Option<Arc<dyn RsyncReceiver>>,
    subsystems: HashMap<String, Vec<Middleware>>,
    uniform: Vec<Middleware>,
    metrics: Arc<GatewayMetrics>,
    config: GatewayConfig,
}

impl Gateway {
    /// Start building a gateway around a capability implementation.
    pub fn builder(handler: Arc<dyn TransferHandler>) -> GatewayBuilder {
        GatewayBuilder::new(handler)
    }

    pub fn handler(&self) -> &dyn TransferHandler {
        self.handler.as_ref()
    }

    pub(crate) fn shared_handler(&self) -> &Arc<dyn TransferHandler> {
        &self.handler
    }

    pub(crate) fn base(&self) -> &dyn SessionHandler {
        self.base.as_ref()
    }

    pub(crate) fn rsync(&self) -> Option<&dyn RsyncReceiver> {
        self.rsync.as_deref()
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Names of the registered subsystems.
    pub fn subsystems(&self) -> impl Iterator<Item = &str> {
        self.subsystems.keys().map(String::as_str)
    }

    /// Full chain a session would run, innermost first.
    ///
    /// Returns `None` for an unregistered subsystem.
    pub fn chain_for(&self, session: &Session) -> Option<Vec<Middleware>> {
        let ctx = session.context();
        let mut chain = match ctx.subsystem() {
            Some(name) => self.subsystems.get(name)?.clone(),
            None => self.router.route(ctx),
        };
        chain.extend_from_slice(&self.uniform);
        Some(chain)
    }

    /// Serve one session to completion.
    ///
    /// A chain error is reported on stderr with exit status 1 unless a
    /// middleware already closed the session. The session is always closed
    /// on return.
    pub async fn handle(&self, session: &mut Session) -> Result<()> {
        let Some(chain) = self.chain_for(session) else {
            let name = session.context().subsystem().unwrap_or_default().to_string();
            warn!(subsystem = %name, "Unknown subsystem requested");
            let err = Error::unsupported(format!("subsystem {}", name));
            session.fail(&err).await;
            return Err(err);
        };
        debug!(chain = ?chain, "Running session chain");

        let result = Next::new(self, &chain).run(session).await;

        match &result {
            Err(err) if !session.is_closed() => session.fail(err).await,
            _ => session.close().await?,
        }
        result
    }
}

/// Builder for [`Gateway`].
pub struct GatewayBuilder {
    handler: Arc<dyn TransferHandler>,
    router: Box<dyn Router>,
    base: Arc<dyn SessionHandler>,
    rsync: Option<Arc<dyn RsyncReceiver>>,
    subsystems: HashMap<String, Vec<Middleware>>,
    uniform: Vec<Middleware>,
    metrics: Option<Arc<GatewayMetrics>>,
    config: GatewayConfig,
}

impl GatewayBuilder {
    fn new(handler: Arc<dyn TransferHandler>) -> Self {
        Self {
            handler,
            router: Box::new(CommandRouter),
            base: Arc::new(NoopHandler),
            rsync: None,
            subsystems: HashMap::new(),
            uniform: Vec::new(),
            metrics: None,
            config: GatewayConfig::default(),
        }
    }

    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default [`CommandRouter`].
    pub fn router(mut self, router: impl Router + 'static) -> Self {
        self.router = Box::new(router);
        self
    }

    /// Install the base handler (e.g. an interactive shell).
    pub fn base(mut self, base: Arc<dyn SessionHandler>) -> Self {
        self.base = base;
        self
    }

    /// Install the rsync receiver engine.
    pub fn rsync(mut self, engine: Arc<dyn RsyncReceiver>) -> Self {
        self.rsync = Some(engine);
        self
    }

    /// Register a subsystem chain.
    pub fn subsystem(mut self, name: impl Into<String>, chain: Vec<Middleware>) -> Self {
        self.subsystems.insert(name.into(), chain);
        self
    }

    /// Append middleware that wraps every session.
    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.uniform.push(middleware);
        self
    }

    /// Share a metrics registry with other gateways.
    pub fn metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Gateway {
        let mut subsystems = self.subsystems;
        if self.config.sftp_enabled {
            subsystems
                .entry(SFTP_SUBSYSTEM.to_string())
                .or_insert_with(|| vec![Middleware::Sftp]);
        }

        let mut uniform = self.uniform;
        uniform.push(Middleware::Metrics);
        if self.config.logging {
            uniform.push(Middleware::Logging);
        }

        Gateway {
            handler: self.handler,
            router: self.router,
            base: self.base,
            rsync: self.rsync,
            subsystems,
            uniform,
            metrics: self.metrics.unwrap_or_default(),
            config: self.config,
        }
    }
}
