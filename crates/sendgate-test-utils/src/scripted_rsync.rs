//! rsync engine stand-in.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use sendgate_core::Result;
use sendgate_core::rsync::{ReceivedFile, ReceivedFileSink, RsyncOptions, RsyncReceiver};

/// Delivers a fixed list of files to the sink, ignoring the wire.
///
/// Each file's stream carries its contents followed by garbage, so sinks
/// that read past the declared length are caught.
#[derive(Default)]
pub struct ScriptedRsync {
    files: Vec<(String, Vec<u8>, i64)>,
    seen: Mutex<Vec<RsyncOptions>>,
    bypass: Mutex<Vec<bool>>,
}

impl ScriptedRsync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: &str, contents: &[u8], mod_time: i64) -> Self {
        self.files.push((name.to_string(), contents.to_vec(), mod_time));
        self
    }

    /// Options of every run so far.
    pub fn runs(&self) -> Vec<RsyncOptions> {
        self.seen.lock().unwrap().clone()
    }

    /// `bypass_file_list` as reported by the sink of every run.
    pub fn bypass_flags(&self) -> Vec<bool> {
        self.bypass.lock().unwrap().clone()
    }
}

#[async_trait]
impl RsyncReceiver for ScriptedRsync {
    async fn receive(
        &self,
        options: &RsyncOptions,
        _input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
        sink: &mut dyn ReceivedFileSink,
    ) -> Result<()> {
        self.seen.lock().unwrap().push(options.clone());
        self.bypass.lock().unwrap().push(sink.bypass_file_list());

        for (name, contents, mod_time) in &self.files {
            let mut stream = contents.clone();
            stream.extend_from_slice(b"GARBAGE");
            sink.put(ReceivedFile {
                name: name.clone(),
                length: contents.len() as u64,
                mod_time: *mod_time,
                reader: Box::new(std::io::Cursor::new(stream)),
            })
            .await?;
        }
        output.flush().await?;
        Ok(())
    }
}
