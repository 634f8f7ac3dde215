//! SFTP subsystem.
//!
//! The request loop is the `russh-sftp` server engine; [`SftpHandler`]
//! maps its requests onto the capability interface.

mod handler;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::handler::TransferHandler;
use crate::session::Session;

pub use handler::SftpHandler;

/// Validate the connection, then serve SFTP until the client disconnects.
pub(crate) async fn serve(handler: &Arc<dyn TransferHandler>, session: &mut Session) -> Result<()> {
    let ctx = Arc::clone(session.context());
    handler.validate(&ctx).await?;

    let Some(mut stream) = session.take_stream() else {
        warn!("SFTP requested on a session without streams");
        return Err(Error::ConnectionClosed);
    };
    let finished = stream.notify_on_drop();

    let engine = SftpHandler::new(Arc::clone(handler), ctx, session.stderr().clone());
    russh_sftp::server::run(stream, engine).await;

    // The engine owns the stream on its own task; it is dropped when the
    // client goes away.
    let _ = finished.await;
    debug!("SFTP session finished");
    Ok(())
}
