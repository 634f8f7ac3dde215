//! Connection validation guard.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::debug;

use super::{Next, report_panic};
use crate::error::Result;
use crate::handler::TransferHandler;
use crate::session::Session;

/// Validate the connection, then pass it on.
///
/// A refusal ends the chain with the capability's error; a panicking
/// capability ends the session like a panicking protocol engine.
pub(super) async fn serve(
    handler: &dyn TransferHandler,
    session: &mut Session,
    next: Next<'_>,
) -> Result<()> {
    let ctx = Arc::clone(session.context());
    match AssertUnwindSafe(handler.validate(&ctx)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            debug!(user = %ctx.user(), error = %err, "Connection refused");
            return Err(err);
        }
        Err(panic) => return report_panic(session, "auth", panic).await,
    }
    next.run(session).await
}
