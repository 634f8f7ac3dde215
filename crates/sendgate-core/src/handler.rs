//! The capability interface between protocol adapters and storage.
//!
//! Every adapter drives a [`TransferHandler`]; every storage backend
//! implements it once.

use std::fmt;
use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::session::SessionContext;

/// Byte source attached to an incoming [`FileEntry`].
pub type EntryReader<'a> = Box<dyn AsyncRead + Send + Unpin + 'a>;

/// One file observed by a protocol adapter.
///
/// `size` is the size declared by the protocol header and is authoritative
/// for how many bytes the adapter lets the reader yield.
pub struct FileEntry<'a> {
    /// Logical name as sent by the client.
    pub name: String,
    /// Server-side path.
    pub filepath: String,
    /// Permission bits.
    pub mode: u32,
    /// Declared size in bytes.
    pub size: u64,
    /// Modification time, seconds since epoch, 0 if unspecified.
    pub mtime: i64,
    /// Access time, seconds since epoch, 0 if unspecified.
    pub atime: i64,
    /// Contents, present only for incoming files.
    pub reader: Option<EntryReader<'a>>,
}

impl<'a> FileEntry<'a> {
    /// Entry with no timestamps and no reader.
    pub fn new(name: impl Into<String>, filepath: impl Into<String>, mode: u32, size: u64) -> Self {
        Self {
            name: name.into(),
            filepath: filepath.into(),
            mode,
            size,
            mtime: 0,
            atime: 0,
            reader: None,
        }
    }

    pub fn with_times(mut self, mtime: i64, atime: i64) -> Self {
        self.mtime = mtime;
        self.atime = atime;
        self
    }

    pub fn with_reader(mut self, reader: impl AsyncRead + Send + Unpin + 'a) -> Self {
        self.reader = Some(Box::new(reader));
        self
    }

    /// Take the reader out of the entry.
    pub fn take_reader(&mut self) -> Option<EntryReader<'a>> {
        self.reader.take()
    }
}

impl fmt::Debug for FileEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry")
            .field("name", &self.name)
            .field("filepath", &self.filepath)
            .field("mode", &format_args!("{:o}", self.mode))
            .field("size", &self.size)
            .field("mtime", &self.mtime)
            .field("atime", &self.atime)
            .field("reader", &self.reader.is_some())
            .finish()
    }
}

/// Metadata about a stored file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mode: u32,
    /// Modification time, seconds since epoch.
    pub modified: i64,
    pub is_dir: bool,
}

impl FileInfo {
    /// Regular file with mode 0644.
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            mode: 0o644,
            modified: 0,
            is_dir: false,
        }
    }

    /// Directory with mode 0755.
    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            mode: 0o755,
            modified: 0,
            is_dir: true,
        }
    }

    pub fn with_modified(mut self, modified: i64) -> Self {
        self.modified = modified;
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }
}

/// Positioned reads against stored content.
///
/// An empty result means end-of-stream; a short result means the end was
/// reached inside the requested range.
#[async_trait]
pub trait RandomAccessReader: Send + Sync {
    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Bytes>;
}

#[async_trait]
impl RandomAccessReader for Bytes {
    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.len());
        let end = start.saturating_add(len).min(self.len());
        Ok(self.slice(start..end))
    }
}

/// Storage and authorization backend driven by every protocol adapter.
#[async_trait]
pub trait TransferHandler: Send + Sync {
    /// Authorization/quota gate, called once per connection before any
    /// transfer-specific processing.
    async fn validate(&self, ctx: &SessionContext) -> Result<()>;

    /// Persist one file. `Ok` carries an optional human-readable message
    /// (empty when there is nothing to say).
    async fn write(&self, ctx: &SessionContext, entry: FileEntry<'_>) -> Result<String>;

    /// Fetch one file for outbound transfer.
    async fn read(
        &self,
        ctx: &SessionContext,
        path: &str,
    ) -> Result<(FileInfo, Box<dyn RandomAccessReader>)>;

    /// Enumerate a directory. The first element represents the directory
    /// itself.
    async fn list(&self, ctx: &SessionContext, path: &str) -> Result<Vec<FileInfo>>;

    /// Span that adapter-level diagnostics are recorded under.
    fn span(&self, ctx: &SessionContext) -> tracing::Span {
        tracing::info_span!(
            "session",
            user = %ctx.user(),
            remote = ?ctx.remote_addr(),
        )
    }
}
