//! SFTP sessions through the `russh-sftp` client over an in-memory pipe.

use std::sync::Arc;
use std::time::Duration;

use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags, StatusCode};
use russh_sftp::server::Handler;
use sendgate_core::sftp::SftpHandler;
use sendgate_core::{Error, Gateway, Session, SessionContext, Stderr};
use sendgate_test_utils::{MemoryStore, SharedBuffer};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Start the gateway on one end of a pipe; returns the client end.
fn start(store: &Arc<MemoryStore>, stderr: &SharedBuffer) -> (DuplexStream, JoinHandle<()>) {
    let (client, server) = tokio::io::duplex(256 * 1024);
    let (read, write) = tokio::io::split(server);
    let ctx = SessionContext::new("tester").with_subsystem("sftp");
    let mut session = Session::new(ctx, read, write, stderr.clone());
    let gateway = Gateway::builder(store.clone()).build();

    let task = tokio::spawn(async move {
        let _ = gateway.handle(&mut session).await;
    });
    (client, task)
}

#[tokio::test]
async fn upload_stat_download_and_list() {
    let store = Arc::new(MemoryStore::new().with_default_message("/up/hello.txt stored"));
    let stderr = SharedBuffer::new();
    let (client, server) = start(&store, &stderr);

    tokio::time::timeout(TIMEOUT, async {
        let sftp = SftpSession::new(client).await.unwrap();

        let mut file = sftp.create("up/hello.txt").await.unwrap();
        file.write_all(b"hello sftp").await.unwrap();
        file.shutdown().await.unwrap();

        let writes = store.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].name, "hello.txt");
        assert_eq!(writes[0].filepath, "/up/hello.txt");
        assert_eq!(writes[0].mode, 0o644);
        assert_eq!(writes[0].size, 10);
        assert_eq!(writes[0].contents, b"hello sftp");
        assert_eq!(stderr.to_string_lossy(), "/up/hello.txt stored\r\n");

        let meta = sftp.metadata("/up/hello.txt").await.unwrap();
        assert_eq!(meta.size, Some(10));

        let mut file = sftp.open("/up/hello.txt").await.unwrap();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"hello sftp");

        let names: Vec<String> = sftp
            .read_dir("/up")
            .await
            .unwrap()
            .map(|entry| entry.file_name())
            .collect();
        assert_eq!(names, ["hello.txt"]);
    })
    .await
    .unwrap();

    server.abort();
}

#[tokio::test]
async fn large_upload_spans_many_writes() {
    let store = Arc::new(MemoryStore::new());
    let stderr = SharedBuffer::new();
    let (client, server) = start(&store, &stderr);

    tokio::time::timeout(TIMEOUT, async {
        let sftp = SftpSession::new(client).await.unwrap();

        // Larger than one write request
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut file = sftp.create("/big.bin").await.unwrap();
        file.write_all(&payload).await.unwrap();
        file.shutdown().await.unwrap();

        let writes = store.writes();
        assert_eq!(writes[0].size, payload.len() as u64);
        assert_eq!(writes[0].contents, payload);
    })
    .await
    .unwrap();

    server.abort();
}

#[tokio::test]
async fn failed_upload_is_reported_on_stderr() {
    let store = Arc::new(MemoryStore::new().fail_write("bad.txt", "storage full"));
    let stderr = SharedBuffer::new();
    let (client, server) = start(&store, &stderr);

    tokio::time::timeout(TIMEOUT, async {
        let sftp = SftpSession::new(client).await.unwrap();
        let mut file = sftp.create("/bad.txt").await.unwrap();
        file.write_all(b"x").await.unwrap();
        let _ = file.shutdown().await;

        assert!(store.writes().is_empty());
        assert_eq!(stderr.to_string_lossy(), "storage full\r\n");
    })
    .await
    .unwrap();

    server.abort();
}

#[tokio::test]
async fn missing_file_cannot_be_opened() {
    let store = Arc::new(MemoryStore::new());
    let stderr = SharedBuffer::new();
    let (client, server) = start(&store, &stderr);

    tokio::time::timeout(TIMEOUT, async {
        let sftp = SftpSession::new(client).await.unwrap();
        assert!(sftp.open("/absent.txt").await.is_err());
        assert!(sftp.metadata("/").await.unwrap().is_dir());
    })
    .await
    .unwrap();

    server.abort();
}

#[tokio::test]
async fn denied_connection_never_starts_the_engine() {
    let store = Arc::new(MemoryStore::new().deny("no sftp for you"));
    let stderr = SharedBuffer::new();
    let (_client, server) = tokio::io::duplex(1024);
    let (read, write) = tokio::io::split(server);
    let ctx = SessionContext::new("tester").with_subsystem("sftp");
    let mut session = Session::new(ctx, read, write, stderr.clone());
    let gateway = Gateway::builder(store.clone()).build();

    let err = gateway.handle(&mut session).await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized { .. }));
    assert_eq!(stderr.to_string_lossy(), "no sftp for you\r\n");
    assert_eq!(session.exit_status(), Some(1));
}

fn direct_handler(store: &Arc<MemoryStore>, stderr: &SharedBuffer) -> SftpHandler {
    SftpHandler::new(
        store.clone(),
        Arc::new(SessionContext::new("tester")),
        Stderr::new(stderr.clone()),
    )
}

#[tokio::test]
async fn write_far_past_the_end_is_refused() {
    let store = Arc::new(MemoryStore::new());
    let stderr = SharedBuffer::new();
    let mut handler = direct_handler(&store, &stderr);

    let opened = handler
        .open(1, "/sparse.bin".into(), OpenFlags::WRITE | OpenFlags::CREATE, FileAttributes::empty())
        .await
        .unwrap();
    let status = handler.write(2, opened.handle, 1 << 46, b"x".to_vec()).await;

    assert!(matches!(status, Err(StatusCode::Failure)));
    assert!(stderr.to_string_lossy().contains("upload limit"), "{}", stderr.to_string_lossy());
}

#[tokio::test]
async fn unclosed_upload_is_discarded() {
    let store = Arc::new(MemoryStore::new());
    let stderr = SharedBuffer::new();
    let mut handler = direct_handler(&store, &stderr);

    let opened = handler
        .open(1, "/draft.txt".into(), OpenFlags::WRITE | OpenFlags::CREATE, FileAttributes::empty())
        .await
        .unwrap();
    handler.write(2, opened.handle, 0, b"half".to_vec()).await.unwrap();
    drop(handler);

    assert!(store.writes().is_empty());
    assert_eq!(stderr.to_string_lossy(), "");
}
