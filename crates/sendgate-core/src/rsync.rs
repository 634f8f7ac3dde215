//! rsync push support.
//!
//! The wire protocol is driven by an external [`RsyncReceiver`] engine. The
//! gateway parses the server-side command line, rejects modes it cannot
//! serve, and hands every received file to the capability through a
//! [`ReceivedFileSink`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{Instrument, debug, warn};

use crate::error::Result;
use crate::handler::{EntryReader, FileEntry, TransferHandler};
use crate::io::BoundedReader;
use crate::middleware::{Next, report_panic};
use crate::path;
use crate::session::{Session, SessionContext, Stderr};

/// Permission bits of files received over rsync.
const RECEIVED_MODE: u32 = 0o600;

/// Server-side options of an `rsync --server` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RsyncOptions {
    pub server: bool,
    /// The client is downloading.
    pub sender: bool,
    pub compress: bool,
    /// `--checksum`: always compare by checksum.
    pub checksum: bool,
    pub recursive: bool,
    /// `--times`: preserve modification times.
    pub preserve_times: bool,
    pub delete: bool,
    /// Capability string following `e` in the short-flag cluster.
    pub capabilities: Option<String>,
    /// Positional arguments (`.` and the destination).
    pub args: Vec<String>,
}

impl RsyncOptions {
    /// Parse the arguments following `rsync`.
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::default();
        let mut positional_only = false;

        for arg in args {
            let arg = arg.as_ref();
            if positional_only || arg == "-" || !arg.starts_with('-') {
                options.args.push(arg.to_string());
                continue;
            }
            if arg == "--" {
                positional_only = true;
                continue;
            }

            if let Some(long) = arg.strip_prefix("--") {
                let name = long.split_once('=').map_or(long, |(name, _)| name);
                match name {
                    "server" => options.server = true,
                    "sender" => options.sender = true,
                    "compress" => options.compress = true,
                    "checksum" => options.checksum = true,
                    "recursive" => options.recursive = true,
                    "times" => options.preserve_times = true,
                    n if n == "delete" || n.starts_with("delete-") => options.delete = true,
                    _ => {}
                }
                continue;
            }

            let cluster = &arg[1..];
            for (i, flag) in cluster.char_indices() {
                match flag {
                    'z' => options.compress = true,
                    'c' => options.checksum = true,
                    'r' => options.recursive = true,
                    't' => options.preserve_times = true,
                    'e' => {
                        options.capabilities = Some(cluster[i + 1..].to_string());
                        break;
                    }
                    _ => {}
                }
            }
        }
        options
    }

    /// Reason this invocation cannot be served, if any.
    pub fn rejection(&self) -> Option<&'static str> {
        if self.sender {
            Some("sending files is currently unsupported")
        } else if self.compress {
            Some("compression is currently unsupported")
        } else if self.checksum {
            Some("checksum is currently unsupported")
        } else if self.args.len() != 2 {
            Some("missing source and destination arguments")
        } else {
            None
        }
    }

    /// Destination directory, relative to the storage root.
    pub fn destination_root(&self) -> String {
        let last = self.args.last().map(String::as_str).unwrap_or_default();
        match last.strip_prefix('/').unwrap_or(last) {
            "" => "/".to_string(),
            root => root.to_string(),
        }
    }
}

/// One file delivered by the receiver engine.
pub struct ReceivedFile<'a> {
    /// Name as sent by the client, possibly with directories.
    pub name: String,
    /// Declared length in bytes.
    pub length: u64,
    /// Modification time, seconds since epoch.
    pub mod_time: i64,
    pub reader: EntryReader<'a>,
}

/// Per-file callback the engine invokes.
#[async_trait]
pub trait ReceivedFileSink: Send {
    /// Skip the file-attribute comparison and receive every file.
    fn bypass_file_list(&self) -> bool;

    /// Store one file. Returns the byte count the engine should account.
    async fn put(&mut self, file: ReceivedFile<'_>) -> Result<u64>;
}

/// External rsync receiver engine.
#[async_trait]
pub trait RsyncReceiver: Send + Sync {
    /// Run the receiving side of the protocol over `input`/`output`,
    /// delivering every file to `sink`.
    async fn receive(
        &self,
        options: &RsyncOptions,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
        sink: &mut dyn ReceivedFileSink,
    ) -> Result<()>;
}

/// Sink that forwards received files to the capability.
pub struct HandlerSink<'a> {
    handler: &'a dyn TransferHandler,
    ctx: &'a SessionContext,
    root: String,
    stderr: Stderr,
    received: u64,
}

impl<'a> HandlerSink<'a> {
    pub fn new(
        handler: &'a dyn TransferHandler,
        ctx: &'a SessionContext,
        root: impl Into<String>,
        stderr: Stderr,
    ) -> Self {
        Self {
            handler,
            ctx,
            root: root.into(),
            stderr,
            received: 0,
        }
    }

    /// Files handed to the capability so far.
    pub fn received(&self) -> u64 {
        self.received
    }
}

#[async_trait]
impl ReceivedFileSink for HandlerSink<'_> {
    fn bypass_file_list(&self) -> bool {
        true
    }

    async fn put(&mut self, file: ReceivedFile<'_>) -> Result<u64> {
        let name = path::base(&file.name);
        let filepath = path::join(["/", self.root.as_str(), name.as_str()]);
        let entry = FileEntry::new(name.clone(), filepath, RECEIVED_MODE, file.length)
            .with_times(file.mod_time, file.mod_time)
            .with_reader(BoundedReader::new(file.reader, file.length));

        self.received += 1;
        match self.handler.write(self.ctx, entry).await {
            Ok(message) if !message.is_empty() => self.stderr.write_line(&message).await?,
            Ok(_) => {}
            Err(err) => {
                warn!(name = %name, error = %err, "Failed to write file");
                self.stderr.write_line(&err.to_string()).await?;
            }
        }
        Ok(0)
    }
}

pub(crate) async fn serve(
    handler: &dyn TransferHandler,
    engine: Option<&dyn RsyncReceiver>,
    session: &mut Session,
    next: Next<'_>,
) -> Result<()> {
    let ctx = Arc::clone(session.context());
    if ctx.command().first().map(String::as_str) != Some("rsync") {
        return next.run(session).await;
    }

    let span = handler.span(&ctx);
    let outcome = AssertUnwindSafe(receive(handler, engine, &ctx, session).instrument(span))
        .catch_unwind()
        .await;

    match outcome {
        Ok(result) => result,
        Err(panic) => report_panic(session, "rsync", panic).await,
    }
}

async fn receive(
    handler: &dyn TransferHandler,
    engine: Option<&dyn RsyncReceiver>,
    ctx: &SessionContext,
    session: &mut Session,
) -> Result<()> {
    handler.validate(ctx).await?;

    let Some(engine) = engine else {
        return reject(session, "rsync is not supported").await;
    };

    // openrsync sends "delete-before" when the client asked for "delete"
    let args = ctx.command()[1..]
        .iter()
        .map(|arg| arg.replace("delete-before", "delete"));
    let options = RsyncOptions::parse(args);
    if let Some(reason) = options.rejection() {
        return reject(session, reason).await;
    }

    let root = options.destination_root();
    debug!(root = %root, options = ?options, "Starting rsync receiver");

    let mut sink = HandlerSink::new(handler, ctx, root, session.stderr().clone());
    let (stdin, stdout) = session.streams()?;
    engine.receive(&options, stdin, stdout, &mut sink).await?;

    debug!(files = sink.received(), "rsync receiver finished");
    Ok(())
}

async fn reject(session: &mut Session, reason: &str) -> Result<()> {
    session
        .stderr()
        .write_line(&format!("error: {}", reason))
        .await?;
    session.exit(1);
    session.close().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> RsyncOptions {
        RsyncOptions::parse(line.split_whitespace())
    }

    #[test]
    fn parse_typical_push() {
        let options = parse("--server -logDtpre.iLsfxCIvu . /blog/");
        assert!(options.server);
        assert!(!options.sender);
        assert!(options.recursive);
        assert!(options.preserve_times);
        assert!(!options.compress);
        assert_eq!(options.capabilities.as_deref(), Some(".iLsfxCIvu"));
        assert_eq!(options.args, [".", "/blog/"]);
        assert_eq!(options.rejection(), None);
    }

    #[test]
    fn capability_string_stops_cluster() {
        // 'z' and 'c' after 'e' belong to the capability string
        let options = parse("--server -re.zc . /x");
        assert!(!options.compress);
        assert!(!options.checksum);
    }

    #[test]
    fn long_options() {
        let options = parse("--server --sender --delete-during --compress --checksum --timeout=30 . x");
        assert!(options.sender);
        assert!(options.delete);
        assert!(options.compress);
        assert!(options.checksum);
        assert_eq!(options.args.len(), 2);
    }

    #[test]
    fn rejections() {
        assert_eq!(
            parse("--server --sender . /x").rejection(),
            Some("sending files is currently unsupported")
        );
        assert_eq!(
            parse("--server -z . /x").rejection(),
            Some("compression is currently unsupported")
        );
        assert_eq!(
            parse("--server -c . /x").rejection(),
            Some("checksum is currently unsupported")
        );
        assert_eq!(
            parse("--server .").rejection(),
            Some("missing source and destination arguments")
        );
    }

    #[test]
    fn destination_root() {
        assert_eq!(parse("--server . /blog").destination_root(), "blog");
        assert_eq!(parse("--server . /").destination_root(), "/");
        assert_eq!(parse("--server . notes/").destination_root(), "notes/");
        assert_eq!(parse("--server").destination_root(), "/");
    }

    #[test]
    fn arguments_after_terminator_are_positional() {
        let options = parse("--server -- -weird /x");
        assert_eq!(options.args, ["-weird", "/x"]);
    }
}
