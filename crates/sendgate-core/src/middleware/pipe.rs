//! Upload the whole of stdin as one file.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use super::Next;
use crate::error::Result;
use crate::handler::{FileEntry, TransferHandler};
use crate::session::Session;

const PIPE_MODE: u32 = 0o777;

/// Upload name for a command line; `None` asks for a synthesized name.
///
/// Tokens that look like environment assignments (`KEY=value`) are not
/// names.
pub(crate) fn name_from_command(command: &[String]) -> Option<String> {
    let name = command.join(" ").trim().to_string();
    if name.is_empty() || name.contains('=') {
        None
    } else {
        Some(name)
    }
}

pub(super) async fn serve(
    handler: &dyn TransferHandler,
    extension: &str,
    session: &mut Session,
    next: Next<'_>,
) -> Result<()> {
    if session.has_pty() {
        session.exit(0);
        return session.close().await;
    }

    let ctx = Arc::clone(session.context());
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let name = name_from_command(ctx.command())
        .unwrap_or_else(|| format!("{}{}", now.as_nanos(), extension));
    let secs = i64::try_from(now.as_secs()).unwrap_or(i64::MAX);
    debug!(name = %name, "Receiving piped upload");

    let message = {
        let (stdin, _) = session.streams()?;
        let entry = FileEntry::new(name.clone(), name, PIPE_MODE, 0)
            .with_times(secs, secs)
            .with_reader(stdin);
        handler.write(&ctx, entry).await?
    };

    if message.is_empty() {
        return next.run(session).await;
    }
    session
        .write_stdout(format!("{}\r\n", message).as_bytes())
        .await
}
