//! Session start/end logging.

use std::sync::Arc;
use std::time::Instant;

use tracing::{Instrument, info, warn};

use super::Next;
use crate::error::Result;
use crate::handler::TransferHandler;
use crate::session::Session;

pub(super) async fn serve(
    handler: &dyn TransferHandler,
    session: &mut Session,
    next: Next<'_>,
) -> Result<()> {
    let ctx = Arc::clone(session.context());
    let span = handler.span(&ctx);
    let start = Instant::now();

    span.in_scope(|| {
        info!(
            command = ?ctx.command(),
            subsystem = ?ctx.subsystem(),
            pty = ctx.has_pty(),
            "Session started"
        )
    });

    let result = next.run(session).instrument(span.clone()).await;

    let elapsed_ms = start.elapsed().as_millis() as u64;
    span.in_scope(|| match &result {
        Ok(()) => info!(
            elapsed_ms,
            exit_status = ?session.exit_status(),
            "Session finished"
        ),
        Err(err) => warn!(elapsed_ms, error = %err, "Session failed"),
    });
    result
}
