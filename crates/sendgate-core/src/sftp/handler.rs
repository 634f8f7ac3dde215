//! Request handler behind the SFTP engine.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::handler::{FileEntry, FileInfo, RandomAccessReader, TransferHandler};
use crate::io::{DeferredWriteBuffer, RangeEof};
use crate::middleware::panic_message;
use crate::path;
use crate::session::{SessionContext, Stderr};

const PANIC_MESSAGE: &str = "error running sftp subsystem, check the flags you are using";

/// Mode given to uploads whose open request carries no permissions.
const DEFAULT_FILE_MODE: u32 = 0o644;

const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;

/// Upload in progress: positioned writes collect here until close.
struct PendingWrite {
    path: String,
    mode: u32,
    mtime: i64,
    atime: i64,
    buffer: Arc<DeferredWriteBuffer>,
}

/// Download in progress.
struct OpenRead {
    info: FileInfo,
    reader: RangeEof<Box<dyn RandomAccessReader>>,
}

/// Maps SFTP requests of one session onto a [`TransferHandler`].
///
/// File management requests (rename, remove, mkdir, ...) are accepted and
/// ignored. An upload reaches the capability on CLOSE; handles still open
/// when the client disconnects are discarded.
pub struct SftpHandler {
    handler: Arc<dyn TransferHandler>,
    ctx: Arc<SessionContext>,
    stderr: Stderr,
    version: Option<u32>,
    next_handle: u64,
    writes: HashMap<String, PendingWrite>,
    reads: HashMap<String, OpenRead>,
    /// Directory listings; `None` once returned to the client.
    dirs: HashMap<String, Option<Vec<FileInfo>>>,
}

impl SftpHandler {
    pub fn new(handler: Arc<dyn TransferHandler>, ctx: Arc<SessionContext>, stderr: Stderr) -> Self {
        Self {
            handler,
            ctx,
            stderr,
            version: None,
            next_handle: 0,
            writes: HashMap::new(),
            reads: HashMap::new(),
            dirs: HashMap::new(),
        }
    }

    fn new_handle(&mut self) -> String {
        self.next_handle += 1;
        format!("{:x}", self.next_handle)
    }

    /// Run a capability call, reporting failures on stderr.
    ///
    /// Panics are caught here so a faulty backend cannot take the engine
    /// down.
    async fn guarded<T>(&self, call: impl Future<Output = Result<T>>) -> std::result::Result<T, StatusCode> {
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(self.report(&err).await),
            Err(panic) => {
                error!(panic = %panic_message(panic.as_ref()), "SFTP request panicked");
                let _ = self.stderr.write_line(PANIC_MESSAGE).await;
                Err(StatusCode::Failure)
            }
        }
    }

    /// Attributes of the first entry the capability lists for `raw`.
    async fn stat_path(&self, id: u32, raw: &str) -> std::result::Result<Attrs, StatusCode> {
        let path = normalize(raw);
        let entries = self.guarded(self.handler.list(&self.ctx, &path)).await?;
        let attrs = match entries.first() {
            _ if path == "/" => dir_attributes(),
            Some(first) => attributes(first),
            None => return Err(StatusCode::NoSuchFile),
        };
        Ok(Attrs { id, attrs })
    }

    /// Write `err` to stderr and pick the status sent to the client.
    async fn report(&self, err: &Error) -> StatusCode {
        warn!(error = %err, "SFTP request failed");
        let _ = self.stderr.write_line(&err.to_string()).await;
        status_for(err)
    }
}

impl Drop for SftpHandler {
    fn drop(&mut self) {
        // Uploads never closed by the client are not handed to the capability.
        for (handle, pending) in self.writes.drain() {
            warn!(
                handle = %handle,
                path = %pending.path,
                buffered = pending.buffer.len(),
                "Discarding upload left open at disconnect"
            );
        }
    }
}

/// Absolute, cleaned form of a client path.
pub(crate) fn normalize(raw: &str) -> String {
    let cleaned = path::clean(raw);
    if cleaned == "." {
        "/".to_string()
    } else if cleaned.starts_with('/') {
        cleaned
    } else {
        format!("/{}", cleaned)
    }
}

pub(crate) fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Io(e) => match e.kind() {
            std::io::ErrorKind::NotFound => StatusCode::NoSuchFile,
            std::io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
            _ => StatusCode::Failure,
        },
        Error::Unauthorized { .. } => StatusCode::PermissionDenied,
        Error::InvalidPath { .. } => StatusCode::NoSuchFile,
        Error::Unsupported { .. } => StatusCode::OpUnsupported,
        Error::Protocol { .. } | Error::Parse { .. } | Error::UnhandledInput { .. } => {
            StatusCode::BadMessage
        }
        Error::ConnectionClosed => StatusCode::ConnectionLost,
        _ => StatusCode::Failure,
    }
}

pub(crate) fn attributes(info: &FileInfo) -> FileAttributes {
    let kind = if info.is_dir { S_IFDIR } else { S_IFREG };
    let time = u32::try_from(info.modified).unwrap_or(0);
    let mut attrs = FileAttributes::empty();
    attrs.size = Some(info.size);
    attrs.permissions = Some(kind | (info.mode & 0o7777));
    attrs.mtime = Some(time);
    attrs.atime = Some(time);
    attrs
}

fn dir_attributes() -> FileAttributes {
    attributes(&FileInfo::dir("/"))
}

fn ok_status(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_string(),
        language_tag: "en-US".to_string(),
    }
}

fn entry_name(info: &FileInfo) -> String {
    path::base(info.name.trim_end_matches('/'))
}

impl russh_sftp::server::Handler for SftpHandler {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        version: u32,
        extensions: HashMap<String, String>,
    ) -> std::result::Result<Version, Self::Error> {
        if self.version.is_some() {
            error!("Duplicate SSH_FXP_INIT packet");
            return Err(StatusCode::ConnectionLost);
        }
        self.version = Some(version);
        debug!(version, ?extensions, "SFTP session initialized");
        Ok(Version::new())
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        attrs: FileAttributes,
    ) -> std::result::Result<Handle, Self::Error> {
        let path = normalize(&filename);
        let writing = pflags.intersects(
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::APPEND,
        );

        if writing {
            let pending = PendingWrite {
                path,
                mode: attrs
                    .permissions
                    .map(|p| p & 0o7777)
                    .filter(|p| *p != 0)
                    .unwrap_or(DEFAULT_FILE_MODE),
                mtime: attrs.mtime.map_or(0, i64::from),
                atime: attrs.atime.map_or(0, i64::from),
                buffer: Arc::new(DeferredWriteBuffer::new()),
            };
            let handle = self.new_handle();
            debug!(handle = %handle, path = %pending.path, "Opened for writing");
            self.writes.insert(handle.clone(), pending);
            return Ok(Handle { id, handle });
        }

        if path == "/" {
            return Err(self.report(&Error::InvalidPath { path }).await);
        }
        let (info, reader) = self.guarded(self.handler.read(&self.ctx, &path)).await?;
        let handle = self.new_handle();
        debug!(handle = %handle, path = %path, size = info.size, "Opened for reading");
        self.reads.insert(
            handle.clone(),
            OpenRead {
                info,
                reader: RangeEof::new(reader),
            },
        );
        Ok(Handle { id, handle })
    }

    async fn close(&mut self, id: u32, handle: String) -> std::result::Result<Status, Self::Error> {
        if let Some(pending) = self.writes.remove(&handle) {
            let size = pending.buffer.len() as u64;
            let entry = FileEntry::new(
                path::base(&pending.path),
                pending.path.clone(),
                pending.mode,
                size,
            )
            .with_times(pending.mtime, pending.atime)
            .with_reader(pending.buffer.reader());

            debug!(path = %pending.path, size, "Flushing upload");
            let message = self.guarded(self.handler.write(&self.ctx, entry)).await?;
            if !message.is_empty() {
                let _ = self.stderr.write_line(&message).await;
            }
            return Ok(ok_status(id));
        }

        if self.reads.remove(&handle).is_some() || self.dirs.remove(&handle).is_some() {
            return Ok(ok_status(id));
        }
        Err(StatusCode::BadMessage)
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> std::result::Result<Data, Self::Error> {
        let Some(open) = self.reads.get(&handle) else {
            return Err(StatusCode::BadMessage);
        };
        let call = async {
            open.reader
                .read_at(offset, len as usize)
                .await
                .map_err(Error::from)
        };
        let data = self.guarded(call).await?;
        if data.is_empty() {
            return Err(StatusCode::Eof);
        }
        Ok(Data {
            id,
            data: data.to_vec(),
        })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> std::result::Result<Status, Self::Error> {
        let Some(pending) = self.writes.get(&handle) else {
            return Err(StatusCode::BadMessage);
        };
        match pending.buffer.write_at(offset, &data) {
            Ok(_) => Ok(ok_status(id)),
            Err(e) => Err(self.report(&Error::Io(e)).await),
        }
    }

    async fn fstat(&mut self, id: u32, handle: String) -> std::result::Result<Attrs, Self::Error> {
        let attrs = if let Some(pending) = self.writes.get(&handle) {
            let mut info = FileInfo::file(path::base(&pending.path), pending.buffer.len() as u64)
                .with_mode(pending.mode);
            info.modified = pending.mtime;
            attributes(&info)
        } else if let Some(open) = self.reads.get(&handle) {
            attributes(&open.info)
        } else if self.dirs.contains_key(&handle) {
            dir_attributes()
        } else {
            return Err(StatusCode::BadMessage);
        };
        Ok(Attrs { id, attrs })
    }

    async fn stat(&mut self, id: u32, path: String) -> std::result::Result<Attrs, Self::Error> {
        self.stat_path(id, &path).await
    }

    async fn lstat(&mut self, id: u32, path: String) -> std::result::Result<Attrs, Self::Error> {
        self.stat_path(id, &path).await
    }

    async fn opendir(&mut self, id: u32, path: String) -> std::result::Result<Handle, Self::Error> {
        let path = normalize(&path);
        let mut entries = self.guarded(self.handler.list(&self.ctx, &path)).await?;
        // First entry is the directory itself
        if !entries.is_empty() {
            entries.remove(0);
        }
        let handle = self.new_handle();
        debug!(handle = %handle, path = %path, entries = entries.len(), "Opened directory");
        self.dirs.insert(handle.clone(), Some(entries));
        Ok(Handle { id, handle })
    }

    async fn readdir(&mut self, id: u32, handle: String) -> std::result::Result<Name, Self::Error> {
        let Some(listing) = self.dirs.get_mut(&handle) else {
            return Err(StatusCode::BadMessage);
        };
        match listing.take() {
            Some(entries) if !entries.is_empty() => Ok(Name {
                id,
                files: entries
                    .iter()
                    .map(|info| File::new(entry_name(info), attributes(info)))
                    .collect(),
            }),
            _ => Err(StatusCode::Eof),
        }
    }

    async fn realpath(&mut self, id: u32, path: String) -> std::result::Result<Name, Self::Error> {
        Ok(Name {
            id,
            files: vec![File::new(normalize(&path), FileAttributes::empty())],
        })
    }

    async fn setstat(
        &mut self,
        id: u32,
        _path: String,
        _attrs: FileAttributes,
    ) -> std::result::Result<Status, Self::Error> {
        Ok(ok_status(id))
    }

    async fn fsetstat(
        &mut self,
        id: u32,
        _handle: String,
        _attrs: FileAttributes,
    ) -> std::result::Result<Status, Self::Error> {
        Ok(ok_status(id))
    }

    async fn remove(&mut self, id: u32, filename: String) -> std::result::Result<Status, Self::Error> {
        debug!(path = %filename, "Ignoring remove");
        Ok(ok_status(id))
    }

    async fn mkdir(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> std::result::Result<Status, Self::Error> {
        debug!(path = %path, "Ignoring mkdir");
        Ok(ok_status(id))
    }

    async fn rmdir(&mut self, id: u32, path: String) -> std::result::Result<Status, Self::Error> {
        debug!(path = %path, "Ignoring rmdir");
        Ok(ok_status(id))
    }

    async fn rename(
        &mut self,
        id: u32,
        oldpath: String,
        newpath: String,
    ) -> std::result::Result<Status, Self::Error> {
        debug!(from = %oldpath, to = %newpath, "Ignoring rename");
        Ok(ok_status(id))
    }

    async fn symlink(
        &mut self,
        id: u32,
        linkpath: String,
        targetpath: String,
    ) -> std::result::Result<Status, Self::Error> {
        debug!(link = %linkpath, target = %targetpath, "Ignoring symlink");
        Ok(ok_status(id))
    }
}
