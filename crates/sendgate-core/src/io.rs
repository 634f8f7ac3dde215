//! Stream adapters shared by the protocol adapters.
//!
//! - [`BoundedReader`]: stops exactly at a declared size
//! - [`RangeEof`]: turns "range not satisfiable" into end-of-stream
//! - [`DeferredWriteBuffer`]: collects positioned writes, replays them sequentially

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf, Take};

use crate::handler::RandomAccessReader;

/// Truncates reads from `inner` to a fixed total length.
///
/// Once the limit is consumed every read reports end-of-stream, whatever
/// the wrapped stream still holds.
#[derive(Debug)]
pub struct BoundedReader<R>(Take<R>);

impl<R: AsyncRead> BoundedReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self(inner.take(limit))
    }
}

impl<R: AsyncRead> BoundedReader<R> {
    /// Bytes still allowed through.
    pub fn remaining(&self) -> u64 {
        self.0.limit()
    }

    pub fn into_inner(self) -> R {
        self.0.into_inner()
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for BoundedReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

/// Marker error a storage backend wraps in an [`io::Error`] when a ranged
/// read starts beyond the stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("requested range not satisfiable (offset {offset})")]
pub struct RangeNotSatisfiable {
    pub offset: u64,
}

impl From<RangeNotSatisfiable> for io::Error {
    fn from(err: RangeNotSatisfiable) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, err)
    }
}

/// Returns true if `err` carries a [`RangeNotSatisfiable`] fault.
pub fn is_range_not_satisfiable(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.is::<RangeNotSatisfiable>())
}

/// Normalizes range faults of a random-access source into end-of-stream.
pub struct RangeEof<R> {
    inner: R,
}

impl<R> RangeEof<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: RandomAccessReader> RandomAccessReader for RangeEof<R> {
    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        match self.inner.read_at(offset, len).await {
            Err(e) if is_range_not_satisfiable(&e) => Ok(Bytes::new()),
            other => other,
        }
    }
}

#[async_trait]
impl RandomAccessReader for Box<dyn RandomAccessReader> {
    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        (**self).read_at(offset, len).await
    }
}

/// Largest upload a [`DeferredWriteBuffer`] accepts by default.
pub const DEFAULT_BUFFER_LIMIT: usize = 1 << 30;

#[derive(Debug, Default)]
struct BufferState {
    data: Vec<u8>,
    read_pos: usize,
}

/// Offset-addressable accumulation buffer.
///
/// Positioned writes may arrive in any order; writes past the current end
/// zero-extend up to the buffer's limit. The accumulated bytes are read
/// back sequentially through [`DeferredWriteBuffer::reader`], with a cursor
/// independent of write offsets.
#[derive(Debug)]
pub struct DeferredWriteBuffer {
    state: Mutex<BufferState>,
    limit: usize,
}

impl Default for DeferredWriteBuffer {
    fn default() -> Self {
        Self::with_limit(DEFAULT_BUFFER_LIMIT)
    }
}

impl DeferredWriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer that refuses writes ending past `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            limit,
        }
    }

    /// Copy `data` to `offset`, growing the buffer as needed.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<usize> {
        let end = usize::try_from(offset)
            .ok()
            .and_then(|offset| offset.checked_add(data.len()))
            .filter(|end| *end <= self.limit)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("write at offset {} exceeds the {} byte upload limit", offset, self.limit),
                )
            })?;
        let offset = end - data.len();

        let mut state = self.state.lock().unwrap();
        let len = state.data.len();
        if len < end {
            state
                .data
                .try_reserve(end - len)
                .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
            state.data.resize(end, 0);
        }
        state.data[offset..end].copy_from_slice(data);
        Ok(data.len())
    }

    /// Current length (highest written offset).
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequential reader over the accumulated bytes.
    pub fn reader(self: &Arc<Self>) -> DeferredReader {
        DeferredReader {
            buffer: Arc::clone(self),
        }
    }

    fn read_into(&self, buf: &mut ReadBuf<'_>) {
        let mut state = self.state.lock().unwrap();
        let start = state.read_pos.min(state.data.len());
        let n = buf.remaining().min(state.data.len() - start);
        buf.put_slice(&state.data[start..start + n]);
        state.read_pos = start + n;
    }
}

/// Sequential read side of a [`DeferredWriteBuffer`].
pub struct DeferredReader {
    buffer: Arc<DeferredWriteBuffer>,
}

impl AsyncRead for DeferredReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.buffer.read_into(buf);
        Poll::Ready(Ok(()))
    }
}
