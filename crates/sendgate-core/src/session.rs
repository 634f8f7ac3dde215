//! Connection-scoped session primitive.
//!
//! The transport library (SSH server, `ForceCommand` stdio glue, tests) builds
//! one [`Session`] per accepted exec/shell/subsystem request and hands it to
//! the gateway. Everything a protocol adapter needs from the connection goes
//! through this type.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::sync::{Mutex, oneshot};
use tracing::debug;

use crate::error::{Error, Result};

/// Boxed input stream of a session.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed output stream of a session.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Buffered stdin, shared between line-oriented parsing and payload reads.
pub type SessionInput = BufReader<BoxedReader>;

/// Terminal attached to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyInfo {
    /// Value of `TERM`.
    pub term: String,
    /// Columns.
    pub cols: u16,
    /// Rows.
    pub rows: u16,
}

/// Negotiated, immutable facts about a connection.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    user: String,
    remote_addr: Option<SocketAddr>,
    public_key: Option<String>,
    command: Vec<String>,
    pty: Option<PtyInfo>,
    subsystem: Option<String>,
    env: HashMap<String, String>,
}

impl SessionContext {
    /// Create a context for `user` with an empty command.
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Self::default()
        }
    }

    /// Set the command argument vector.
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Split a raw command line on whitespace, as the exec request delivers it.
    pub fn with_command_line(self, line: &str) -> Self {
        self.with_command(line.split_whitespace())
    }

    /// Attach a terminal.
    pub fn with_pty(mut self, pty: PtyInfo) -> Self {
        self.pty = Some(pty);
        self
    }

    /// Set the requested subsystem.
    pub fn with_subsystem(mut self, name: impl Into<String>) -> Self {
        self.subsystem = Some(name.into());
        self
    }

    /// Set the peer address.
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Set the authenticated public key (authorized_keys text form).
    pub fn with_public_key(mut self, key: impl Into<String>) -> Self {
        self.public_key = Some(key.into());
        self
    }

    /// Add an environment variable sent by the client.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn public_key(&self) -> Option<&str> {
        self.public_key.as_deref()
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn pty(&self) -> Option<&PtyInfo> {
        self.pty.as_ref()
    }

    pub fn has_pty(&self) -> bool {
        self.pty.is_some()
    }

    pub fn subsystem(&self) -> Option<&str> {
        self.subsystem.as_deref()
    }

    pub fn env(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(String::as_str)
    }
}

/// Cloneable handle to a session's error stream.
///
/// Engines that outlive a borrow of the session (the SFTP request loop)
/// keep a clone of this.
#[derive(Clone)]
pub struct Stderr {
    inner: Arc<Mutex<BoxedWriter>>,
}

impl Stderr {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Write raw bytes and flush.
    pub async fn write_all(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.inner.lock().await;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Write `line` followed by CRLF.
    pub async fn write_line(&self, line: &str) -> Result<()> {
        self.write_all(format!("{}\r\n", line).as_bytes()).await
    }

    async fn shutdown(&self) -> Result<()> {
        self.inner.lock().await.shutdown().await?;
        Ok(())
    }
}

/// One negotiated exec, shell or subsystem request.
pub struct Session {
    ctx: Arc<SessionContext>,
    stdin: Option<SessionInput>,
    stdout: Option<BoxedWriter>,
    stderr: Stderr,
    exit_status: Option<u32>,
    closed: bool,
}

impl Session {
    /// Create a session from its context and the three channel streams.
    pub fn new(
        ctx: SessionContext,
        stdin: impl AsyncRead + Send + Unpin + 'static,
        stdout: impl AsyncWrite + Send + Unpin + 'static,
        stderr: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        let stdin: BoxedReader = Box::new(stdin);
        Self {
            ctx: Arc::new(ctx),
            stdin: Some(BufReader::new(stdin)),
            stdout: Some(Box::new(stdout)),
            stderr: Stderr::new(stderr),
            exit_status: None,
            closed: false,
        }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    pub fn command(&self) -> &[String] {
        self.ctx.command()
    }

    pub fn has_pty(&self) -> bool {
        self.ctx.has_pty()
    }

    pub fn stderr(&self) -> &Stderr {
        &self.stderr
    }

    /// Borrow stdin and stdout at the same time.
    pub fn streams(&mut self) -> Result<(&mut SessionInput, &mut BoxedWriter)> {
        match (self.stdin.as_mut(), self.stdout.as_mut()) {
            (Some(stdin), Some(stdout)) => Ok((stdin, stdout)),
            _ => Err(Error::ConnectionClosed),
        }
    }

    /// Write to stdout and flush.
    pub async fn write_stdout(&mut self, data: &[u8]) -> Result<()> {
        let stdout = self.stdout.as_mut().ok_or(Error::ConnectionClosed)?;
        stdout.write_all(data).await?;
        stdout.flush().await?;
        Ok(())
    }

    /// Move stdin and stdout out as one duplex stream.
    ///
    /// Afterwards only stderr, exit status and close remain usable.
    pub fn take_stream(&mut self) -> Option<SessionStream> {
        let reader = self.stdin.take()?;
        let Some(writer) = self.stdout.take() else {
            self.stdin = Some(reader);
            return None;
        };
        Some(SessionStream {
            reader,
            writer,
            on_drop: None,
        })
    }

    /// Record the exit status reported to the client.
    pub fn exit(&mut self, status: u32) {
        self.exit_status = Some(status);
    }

    pub fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Flush and shut down the output streams.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(stdout) = self.stdout.as_mut() {
            stdout.shutdown().await?;
        }
        self.stderr.shutdown().await
    }

    /// Standard error path: report on stderr, exit 1, close.
    pub async fn fail(&mut self, err: &Error) {
        debug!(error = %err, "Failing session");
        let _ = self.stderr.write_line(&err.to_string()).await;
        self.exit(1);
        let _ = self.close().await;
    }
}

/// Stdin and stdout of a session joined into one duplex stream.
pub struct SessionStream {
    reader: SessionInput,
    writer: BoxedWriter,
    on_drop: Option<oneshot::Sender<()>>,
}

impl SessionStream {
    /// Returns a receiver that resolves once this stream is dropped.
    pub fn notify_on_drop(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.on_drop = Some(tx);
        rx
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        if let Some(tx) = self.on_drop.take() {
            let _ = tx.send(());
        }
    }
}

impl AsyncRead for SessionStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for SessionStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}
