//! Local directory backend.
//!
//! Stores uploads under a root directory and serves downloads and listings
//! from it.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

use sendgate_core::error::{Error, Result};
use sendgate_core::path as vpath;
use sendgate_core::{FileEntry, FileInfo, RandomAccessReader, RangeNotSatisfiable, SessionContext, TransferHandler};

/// Capability backed by a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalDirHandler {
    root: PathBuf,
    allowed_users: Vec<String>,
}

impl LocalDirHandler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            allowed_users: Vec::new(),
        }
    }

    /// Restrict connections to these users. Empty allows everyone.
    pub fn with_allowed_users(mut self, users: Vec<String>) -> Self {
        self.allowed_users = users;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a client path onto the filesystem.
    ///
    /// The path is cleaned as if rooted, so `..` can never climb above the
    /// storage root.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let cleaned = vpath::clean(&format!("/{}", path));
        let relative = cleaned.trim_start_matches('/');
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }
}

fn unix_seconds(time: io::Result<SystemTime>) -> i64 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs() as i64)
}

#[cfg(unix)]
fn permission_bits(meta: &std::fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn permission_bits(_meta: &std::fs::Metadata) -> Option<u32> {
    None
}

fn file_info(name: String, meta: &std::fs::Metadata) -> FileInfo {
    let info = if meta.is_dir() {
        FileInfo::dir(name)
    } else {
        FileInfo::file(name, meta.len())
    };
    let info = info.with_modified(unix_seconds(meta.modified()));
    match permission_bits(meta) {
        Some(mode) => info.with_mode(mode),
        None => info,
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

fn system_time(seconds: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(seconds.max(0) as u64)
}

/// Positioned reads over an open file.
struct LocalFileReader {
    file: Mutex<fs::File>,
    size: u64,
}

#[async_trait]
impl RandomAccessReader for LocalFileReader {
    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        if offset > self.size {
            return Err(RangeNotSatisfiable { offset }.into());
        }

        let len = usize::try_from(self.size - offset).map_or(len, |left| len.min(left));

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buf = BytesMut::zeroed(len);
        let mut filled = 0;
        while filled < len {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf.freeze())
    }
}

#[async_trait]
impl TransferHandler for LocalDirHandler {
    async fn validate(&self, ctx: &SessionContext) -> Result<()> {
        if self.allowed_users.is_empty() || self.allowed_users.iter().any(|u| u == ctx.user()) {
            return Ok(());
        }
        Err(Error::unauthorized(format!(
            "user {} is not allowed to connect",
            ctx.user()
        )))
    }

    async fn write(&self, _ctx: &SessionContext, mut entry: FileEntry<'_>) -> Result<String> {
        let target = self.resolve(&entry.filepath);
        if target == self.root {
            return Err(Error::InvalidPath {
                path: entry.filepath.clone(),
            });
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&target).await?;
        let written = match entry.take_reader() {
            Some(mut reader) => tokio::io::copy(&mut reader, &mut file).await?,
            None => 0,
        };
        file.sync_all().await?;

        if entry.mtime > 0 {
            let atime = if entry.atime > 0 { entry.atime } else { entry.mtime };
            let times = std::fs::FileTimes::new()
                .set_modified(system_time(entry.mtime))
                .set_accessed(system_time(atime));
            let file = file.into_std().await;
            tokio::task::spawn_blocking(move || file.set_times(times))
                .await
                .map_err(|e| Error::Internal {
                    message: e.to_string(),
                })??;
        }
        if entry.mode & 0o7777 != 0 {
            set_mode(&target, entry.mode).await?;
        }

        info!(path = %target.display(), bytes = written, "Stored file");
        Ok(format!("{} ({} bytes)", entry.filepath, written))
    }

    async fn read(
        &self,
        _ctx: &SessionContext,
        path: &str,
    ) -> Result<(FileInfo, Box<dyn RandomAccessReader>)> {
        let target = self.resolve(path);
        let file = fs::File::open(&target).await?;
        let meta = file.metadata().await?;
        let info = file_info(vpath::base(path), &meta);
        debug!(path = %target.display(), size = meta.len(), "Opened file");

        let reader = LocalFileReader {
            file: Mutex::new(file),
            size: meta.len(),
        };
        Ok((info, Box::new(reader)))
    }

    async fn list(&self, _ctx: &SessionContext, path: &str) -> Result<Vec<FileInfo>> {
        let target = self.resolve(path);
        let meta = fs::metadata(&target).await?;
        let own = file_info(vpath::base(path), &meta);
        if !meta.is_dir() {
            return Ok(vec![own]);
        }

        let mut children = Vec::new();
        let mut dir = fs::read_dir(&target).await?;
        while let Some(child) = dir.next_entry().await? {
            let meta = child.metadata().await?;
            children.push(file_info(child.file_name().to_string_lossy().into_owned(), &meta));
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));

        let mut entries = Vec::with_capacity(children.len() + 1);
        entries.push(own);
        entries.extend(children);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sendgate_core::io::is_range_not_satisfiable;
    use tempfile::TempDir;

    fn ctx(user: &str) -> SessionContext {
        SessionContext::new(user)
    }

    #[test]
    fn resolve_stays_under_root() {
        let handler = LocalDirHandler::new("/srv/files");
        assert_eq!(handler.resolve("/"), PathBuf::from("/srv/files"));
        assert_eq!(handler.resolve(""), PathBuf::from("/srv/files"));
        assert_eq!(handler.resolve("/a/b.txt"), PathBuf::from("/srv/files/a/b.txt"));
        assert_eq!(handler.resolve("a/./b.txt"), PathBuf::from("/srv/files/a/b.txt"));
        assert_eq!(handler.resolve("../../etc/passwd"), PathBuf::from("/srv/files/etc/passwd"));
        assert_eq!(handler.resolve("/up/../../x"), PathBuf::from("/srv/files/x"));
    }

    #[tokio::test]
    async fn allow_list() {
        let open = LocalDirHandler::new("/srv");
        assert!(open.validate(&ctx("anyone")).await.is_ok());

        let closed = LocalDirHandler::new("/srv").with_allowed_users(vec!["alice".into()]);
        assert!(closed.validate(&ctx("alice")).await.is_ok());
        let err = closed.validate(&ctx("mallory")).await.unwrap_err();
        assert_eq!(err.to_string(), "user mallory is not allowed to connect");
    }

    #[tokio::test]
    async fn write_creates_parents_and_reports_size() {
        let dir = TempDir::new().unwrap();
        let handler = LocalDirHandler::new(dir.path());

        let entry = FileEntry::new("note.txt", "/up/deep/note.txt", 0o640, 5)
            .with_times(1_700_000_000, 1_700_000_000)
            .with_reader(&b"hello"[..]);
        let message = handler.write(&ctx("tester"), entry).await.unwrap();
        assert_eq!(message, "/up/deep/note.txt (5 bytes)");

        let stored = dir.path().join("up/deep/note.txt");
        assert_eq!(std::fs::read(&stored).unwrap(), b"hello");
        let meta = std::fs::metadata(&stored).unwrap();
        assert_eq!(unix_seconds(meta.modified()), 1_700_000_000);
        #[cfg(unix)]
        assert_eq!(permission_bits(&meta), Some(0o640));
    }

    #[tokio::test]
    async fn write_to_root_is_rejected() {
        let dir = TempDir::new().unwrap();
        let handler = LocalDirHandler::new(dir.path());
        let entry = FileEntry::new("", "/", 0o644, 0);
        assert!(matches!(
            handler.write(&ctx("tester"), entry).await.unwrap_err(),
            Error::InvalidPath { .. }
        ));
    }

    #[tokio::test]
    async fn read_positions_and_range_faults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("data.bin"), b"0123456789").unwrap();
        let handler = LocalDirHandler::new(dir.path());

        let (info, reader) = handler.read(&ctx("tester"), "/data.bin").await.unwrap();
        assert_eq!(info.name, "data.bin");
        assert_eq!(info.size, 10);
        assert!(!info.is_dir);

        assert_eq!(&reader.read_at(2, 3).await.unwrap()[..], b"234");
        assert_eq!(&reader.read_at(8, 100).await.unwrap()[..], b"89");
        assert!(reader.read_at(10, 4).await.unwrap().is_empty());

        let err = reader.read_at(11, 4).await.unwrap_err();
        assert!(is_range_not_satisfiable(&err));
    }

    #[tokio::test]
    async fn read_length_is_capped_at_file_size() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("small.txt"), b"tiny").unwrap();
        let handler = LocalDirHandler::new(dir.path());

        let (_, reader) = handler.read(&ctx("tester"), "/small.txt").await.unwrap();
        let data = reader.read_at(1, u32::MAX as usize).await.unwrap();
        assert_eq!(&data[..], b"iny");
    }

    #[tokio::test]
    async fn read_missing_file() {
        let dir = TempDir::new().unwrap();
        let handler = LocalDirHandler::new(dir.path());
        assert!(matches!(
            handler.read(&ctx("tester"), "/nope").await,
            Err(Error::Io(_))
        ));
    }

    #[tokio::test]
    async fn list_directory_then_children() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bb").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let handler = LocalDirHandler::new(dir.path());

        let entries = handler.list(&ctx("tester"), "/").await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["/", "a.txt", "b.txt", "sub"]);
        assert!(entries[0].is_dir);
        assert_eq!(entries[2].size, 2);
        assert!(entries[3].is_dir);
    }

    #[tokio::test]
    async fn list_file_returns_itself() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("one.txt"), b"1").unwrap();
        let handler = LocalDirHandler::new(dir.path());

        let entries = handler.list(&ctx("tester"), "/one.txt").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "one.txt");
        assert!(!entries[0].is_dir);
    }
}
