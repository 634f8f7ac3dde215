//! Sessions over in-memory streams.

use std::io;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite};

use sendgate_core::{Session, SessionContext};

/// Cloneable in-memory sink.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().unwrap().clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.inner.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Context for an exec request of `tester` running `line`.
pub fn exec_context(line: &str) -> SessionContext {
    SessionContext::new("tester").with_command_line(line)
}

/// A [`Session`] whose stdout and stderr are captured.
pub struct MockSession {
    session: Session,
    stdout: SharedBuffer,
    stderr: SharedBuffer,
}

impl MockSession {
    /// Session reading `input` as stdin.
    pub fn new(ctx: SessionContext, input: impl Into<Vec<u8>>) -> Self {
        Self::with_reader(ctx, io::Cursor::new(input.into()))
    }

    /// Session reading stdin from `reader`.
    pub fn with_reader(ctx: SessionContext, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        let stdout = SharedBuffer::new();
        let stderr = SharedBuffer::new();
        let session = Session::new(ctx, reader, stdout.clone(), stderr.clone());
        Self {
            session,
            stdout,
            stderr,
        }
    }

    pub fn stdout(&self) -> Vec<u8> {
        self.stdout.contents()
    }

    pub fn stdout_string(&self) -> String {
        self.stdout.to_string_lossy()
    }

    pub fn stderr_string(&self) -> String {
        self.stderr.to_string_lossy()
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

impl Deref for MockSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl DerefMut for MockSession {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}
