//! Per-protocol accounting around the rest of the chain.

use std::time::Instant;

use super::Next;
use crate::error::Result;
use crate::metrics::{GatewayMetrics, Protocol};
use crate::session::Session;

pub(super) async fn serve(
    metrics: &GatewayMetrics,
    session: &mut Session,
    next: Next<'_>,
) -> Result<()> {
    let protocol = Protocol::classify(session.context());
    let start = Instant::now();

    let result = next.run(session).await;

    let failed = result.is_err() || session.exit_status().is_some_and(|status| status != 0);
    metrics.record(protocol, start.elapsed(), failed);
    result
}
