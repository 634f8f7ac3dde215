//! In-memory capability for exercising protocol adapters.

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;

use sendgate_core::error::{Error, Result};
use sendgate_core::path;
use sendgate_core::{FileEntry, FileInfo, RandomAccessReader, SessionContext, TransferHandler};

/// A file as the store received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub name: String,
    pub filepath: String,
    pub mode: u32,
    pub size: u64,
    pub mtime: i64,
    pub atime: i64,
    pub contents: Vec<u8>,
}

#[derive(Default)]
struct State {
    calls: Vec<String>,
    writes: Vec<StoredFile>,
    files: HashMap<String, (FileInfo, Bytes)>,
    listings: HashMap<String, Vec<FileInfo>>,
    deny: Option<String>,
    messages: HashMap<String, String>,
    failures: HashMap<String, String>,
    list_failure: Option<String>,
    default_message: String,
    panic_on_write: bool,
    panic_on_validate: bool,
}

/// Capability backed by memory.
///
/// Every call is recorded as `"<op>:<path>"` (or `"validate"`), written
/// files become readable, and responses can be scripted per file name.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a readable file.
    pub fn with_file(self, filepath: &str, contents: impl Into<Bytes>) -> Self {
        let contents = contents.into();
        let info = FileInfo::file(path::base(filepath), contents.len() as u64);
        self.state
            .lock()
            .unwrap()
            .files
            .insert(filepath.to_string(), (info, contents));
        self
    }

    /// Fix the result of `list(path)`.
    pub fn with_listing(self, dir: &str, entries: Vec<FileInfo>) -> Self {
        self.state
            .lock()
            .unwrap()
            .listings
            .insert(dir.to_string(), entries);
        self
    }

    /// Refuse every connection with `message`.
    pub fn deny(self, message: &str) -> Self {
        self.state.lock().unwrap().deny = Some(message.to_string());
        self
    }

    /// Result message for writes of `name`.
    pub fn with_write_message(self, name: &str, message: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .messages
            .insert(name.to_string(), message.to_string());
        self
    }

    /// Result message for every write without a specific one.
    pub fn with_default_message(self, message: &str) -> Self {
        self.state.lock().unwrap().default_message = message.to_string();
        self
    }

    /// Fail writes of `name` with a storage error.
    pub fn fail_write(self, name: &str, message: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(name.to_string(), message.to_string());
        self
    }

    /// Fail every `list` with a storage error.
    pub fn fail_list(self, message: &str) -> Self {
        self.state.lock().unwrap().list_failure = Some(message.to_string());
        self
    }

    /// Panic inside every write.
    pub fn panic_on_write(self) -> Self {
        self.state.lock().unwrap().panic_on_write = true;
        self
    }

    /// Panic inside `validate`.
    pub fn panic_on_validate(self) -> Self {
        self.state.lock().unwrap().panic_on_validate = true;
        self
    }

    /// Recorded calls in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Files received so far, in order.
    pub fn writes(&self) -> Vec<StoredFile> {
        self.state.lock().unwrap().writes.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl TransferHandler for MemoryStore {
    async fn validate(&self, _ctx: &SessionContext) -> Result<()> {
        self.record("validate".to_string());
        let (deny, explode) = {
            let state = self.state.lock().unwrap();
            (state.deny.clone(), state.panic_on_validate)
        };
        if explode {
            panic!("store exploded validating");
        }
        match deny {
            Some(message) => Err(Error::unauthorized(message)),
            None => Ok(()),
        }
    }

    async fn write(&self, _ctx: &SessionContext, mut entry: FileEntry<'_>) -> Result<String> {
        self.record(format!("write:{}", entry.filepath));
        let explode = self.state.lock().unwrap().panic_on_write;
        if explode {
            panic!("store exploded writing {}", entry.filepath);
        }

        let mut contents = Vec::new();
        if let Some(mut reader) = entry.take_reader() {
            reader.read_to_end(&mut contents).await?;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.failures.get(&entry.name) {
            return Err(Error::storage(message.clone()));
        }

        let info = FileInfo::file(path::base(&entry.filepath), contents.len() as u64)
            .with_mode(entry.mode)
            .with_modified(entry.mtime);
        state.files.insert(
            entry.filepath.clone(),
            (info, Bytes::from(contents.clone())),
        );
        state.writes.push(StoredFile {
            name: entry.name.clone(),
            filepath: entry.filepath.clone(),
            mode: entry.mode,
            size: entry.size,
            mtime: entry.mtime,
            atime: entry.atime,
            contents,
        });

        Ok(state
            .messages
            .get(&entry.name)
            .cloned()
            .unwrap_or_else(|| state.default_message.clone()))
    }

    async fn read(
        &self,
        _ctx: &SessionContext,
        filepath: &str,
    ) -> Result<(FileInfo, Box<dyn RandomAccessReader>)> {
        self.record(format!("read:{}", filepath));
        let state = self.state.lock().unwrap();
        match state.files.get(filepath) {
            Some((info, contents)) => Ok((info.clone(), Box::new(contents.clone()))),
            None => Err(io::Error::new(io::ErrorKind::NotFound, filepath.to_string()).into()),
        }
    }

    async fn list(&self, _ctx: &SessionContext, dir: &str) -> Result<Vec<FileInfo>> {
        self.record(format!("list:{}", dir));
        let state = self.state.lock().unwrap();
        if let Some(message) = &state.list_failure {
            return Err(Error::storage(message.clone()));
        }
        if let Some(entries) = state.listings.get(dir) {
            return Ok(entries.clone());
        }
        if let Some((info, _)) = state.files.get(dir) {
            return Ok(vec![info.clone()]);
        }

        let mut children: Vec<FileInfo> = state
            .files
            .iter()
            .filter(|(filepath, _)| path::parent(filepath) == dir)
            .map(|(_, (info, _))| info.clone())
            .collect();
        if children.is_empty() && dir != "/" {
            return Err(io::Error::new(io::ErrorKind::NotFound, dir.to_string()).into());
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));

        let mut entries = vec![FileInfo::dir(path::base(dir))];
        entries.extend(children);
        Ok(entries)
    }
}
