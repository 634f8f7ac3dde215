//! SCP copy protocol.
//!
//! The client runs `scp -t <dir>` to upload and `scp -f <file>` to download.
//! Control lines and payloads share stdin; every accepted unit is
//! acknowledged with a single zero byte on stdout.

mod sink;
mod source;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::handler::TransferHandler;
use crate::middleware::{Next, report_panic};
use crate::session::{Session, SessionContext};

pub use sink::{Control, parse_control};

/// Acknowledgement byte.
pub(crate) const ACK: u8 = 0;

/// Direction of an SCP transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `-f`: server sends to the client.
    CopyToClient,
    /// `-t`: client sends to the server.
    CopyFromClient,
}

impl Op {
    pub fn flag(self) -> char {
        match self {
            Op::CopyToClient => 'f',
            Op::CopyFromClient => 't',
        }
    }
}

/// What an `scp` command line asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Info {
    /// The command is an `scp` invocation.
    pub ok: bool,
    /// `-r` was given.
    pub recursive: bool,
    /// Server-side path following `-t`/`-f`.
    pub path: String,
    pub op: Option<Op>,
}

/// Parse an `scp` argument vector.
pub fn get_info(command: &[String]) -> Info {
    let mut info = Info::default();
    if command.first().map(String::as_str) != Some("scp") {
        return info;
    }

    for (i, arg) in command.iter().enumerate() {
        let op = match arg.as_str() {
            "-r" => {
                info.recursive = true;
                continue;
            }
            "-f" => Op::CopyToClient,
            "-t" => Op::CopyFromClient,
            _ => continue,
        };
        info.op = Some(op);
        let mut rest = command[i + 1..].iter();
        info.path = match rest.next().map(String::as_str) {
            Some("--") => rest.next().cloned().unwrap_or_default(),
            Some(path) => path.to_string(),
            None => String::new(),
        };
    }

    info.ok = true;
    info
}

pub(crate) async fn serve(
    handler: &dyn TransferHandler,
    session: &mut Session,
    next: Next<'_>,
) -> Result<()> {
    let ctx = Arc::clone(session.context());
    let info = get_info(ctx.command());
    if !info.ok {
        return next.run(session).await;
    }

    let span = handler.span(&ctx);
    let outcome = AssertUnwindSafe(transfer(handler, &ctx, &info, session).instrument(span))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => next.run(session).await,
        Ok(Err(err)) => Err(err),
        Err(panic) => report_panic(session, "scp", panic).await,
    }
}

async fn transfer(
    handler: &dyn TransferHandler,
    ctx: &SessionContext,
    info: &Info,
    session: &mut Session,
) -> Result<()> {
    if info.recursive {
        return Err(Error::RecursiveUnsupported);
    }
    handler.validate(ctx).await?;

    let stderr = session.stderr().clone();
    let (stdin, stdout) = session.streams()?;
    match info.op {
        Some(Op::CopyFromClient) => {
            let failed = sink::copy_from_client(handler, ctx, info, stdin, stdout, &stderr).await?;
            if failed {
                session.exit(1);
            }
            Ok(())
        }
        Some(Op::CopyToClient) => source::copy_to_client(handler, ctx, info, stdin, stdout).await,
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn info_copy_from_client() {
        let info = get_info(&cmd("scp -t /up"));
        assert!(info.ok);
        assert!(!info.recursive);
        assert_eq!(info.op, Some(Op::CopyFromClient));
        assert_eq!(info.path, "/up");
    }

    #[test]
    fn info_copy_to_client_with_extra_flags() {
        let info = get_info(&cmd("scp -v -p -f notes/a.txt"));
        assert_eq!(info.op, Some(Op::CopyToClient));
        assert_eq!(info.path, "notes/a.txt");
        assert_eq!(Op::CopyToClient.flag(), 'f');
    }

    #[test]
    fn info_recursive() {
        let info = get_info(&cmd("scp -r -t /x"));
        assert!(info.recursive);
        assert_eq!(info.path, "/x");
    }

    #[test]
    fn info_skips_option_terminator() {
        let info = get_info(&cmd("scp -t -- /up"));
        assert_eq!(info.path, "/up");
    }

    #[test]
    fn info_missing_path_is_empty() {
        let info = get_info(&cmd("scp -t"));
        assert!(info.ok);
        assert_eq!(info.path, "");
    }

    #[test]
    fn info_without_direction() {
        let info = get_info(&cmd("scp"));
        assert!(info.ok);
        assert_eq!(info.op, None);
    }

    #[test]
    fn info_not_scp() {
        assert_eq!(get_info(&cmd("rsync --server")), Info::default());
        assert_eq!(get_info(&[]), Info::default());
    }
}
