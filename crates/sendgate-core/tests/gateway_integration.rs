//! Routing, composition and the non-transfer middleware.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use sendgate_core::{
    Error, FileInfo, Gateway, GatewayConfig, Middleware, Protocol, PtyInfo, Result, Session,
    SessionContext, SessionHandler,
};
use sendgate_test_utils::{MemoryStore, MockSession, exec_context};

#[derive(Default)]
struct CountingBase {
    hits: AtomicUsize,
}

#[async_trait]
impl SessionHandler for CountingBase {
    async fn handle(&self, _session: &mut Session) -> Result<()> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn pty_context() -> SessionContext {
    SessionContext::new("tester").with_pty(PtyInfo {
        term: "xterm-256color".into(),
        cols: 120,
        rows: 40,
    })
}

#[tokio::test]
async fn list_renders_sorted_names() {
    let store = Arc::new(
        MemoryStore::new().with_listing("/", vec![FileInfo::file("b.txt", 3), FileInfo::dir("a")]),
    );
    let gateway = Gateway::builder(store.clone()).build();

    let mut session = MockSession::new(exec_context("command ls"), Vec::new());
    gateway.handle(session.session_mut()).await.unwrap();

    assert_eq!(session.stdout_string(), "a/\r\nb.txt");
    assert_eq!(store.calls(), ["validate", "list:/"]);
}

#[tokio::test]
async fn auth_failure_stops_the_chain() {
    let store = Arc::new(MemoryStore::new().deny("quota exceeded"));
    let gateway = Gateway::builder(store.clone()).build();

    let mut session = MockSession::new(exec_context("command ls"), Vec::new());
    let err = gateway.handle(session.session_mut()).await.unwrap_err();

    assert!(matches!(err, Error::Unauthorized { .. }));
    assert_eq!(session.stderr_string(), "quota exceeded\r\n");
    assert_eq!(session.exit_status(), Some(1));
    assert_eq!(store.calls(), ["validate"]);
    assert!(session.stdout().is_empty());
}

#[tokio::test]
async fn pipe_upload_without_message_falls_through() {
    let store = Arc::new(MemoryStore::new());
    let base = Arc::new(CountingBase::default());
    let gateway = Gateway::builder(store.clone()).base(base.clone()).build();

    let mut session = MockSession::new(exec_context("upload.txt"), b"data".to_vec());
    gateway.handle(session.session_mut()).await.unwrap();

    let writes = store.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].name, "upload.txt");
    assert_eq!(writes[0].filepath, "upload.txt");
    assert_eq!(writes[0].mode, 0o777);
    assert_eq!(writes[0].contents, b"data");
    assert!(writes[0].mtime > 0);

    assert_eq!(base.hits.load(Ordering::SeqCst), 1);
    assert!(session.stdout().is_empty());
}

#[tokio::test]
async fn pipe_upload_message_goes_to_stdout() {
    let store = Arc::new(MemoryStore::new().with_default_message("saved"));
    let base = Arc::new(CountingBase::default());
    let gateway = Gateway::builder(store.clone()).base(base.clone()).build();

    let mut session = MockSession::new(exec_context("upload.txt"), b"data".to_vec());
    gateway.handle(session.session_mut()).await.unwrap();

    assert_eq!(session.stdout_string(), "saved\r\n");
    assert_eq!(base.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn pipe_upload_synthesizes_name() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Gateway::builder(store.clone())
        .config(GatewayConfig::new().with_pipe_extension(".log"))
        .build();

    let mut session = MockSession::new(SessionContext::new("tester"), b"line\n".to_vec());
    gateway.handle(session.session_mut()).await.unwrap();

    let name = &store.writes()[0].name;
    let stem = name.strip_suffix(".log").unwrap();
    assert!(!stem.is_empty() && stem.bytes().all(|b| b.is_ascii_digit()), "{name}");
}

#[tokio::test]
async fn interactive_shell_only_validates() {
    let store = Arc::new(MemoryStore::new());
    let base = Arc::new(CountingBase::default());
    let gateway = Gateway::builder(store.clone()).base(base.clone()).build();

    let mut session = MockSession::new(pty_context(), Vec::new());
    gateway.handle(session.session_mut()).await.unwrap();

    assert_eq!(store.calls(), ["validate"]);
    assert_eq!(base.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pipe_on_a_terminal_exits_cleanly() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Gateway::builder(store.clone())
        .router(|_: &SessionContext| vec![Middleware::Pipe])
        .build();

    let mut session = MockSession::new(pty_context(), b"ignored".to_vec());
    gateway.handle(session.session_mut()).await.unwrap();

    assert_eq!(session.exit_status(), Some(0));
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn unknown_subsystem_is_refused() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Gateway::builder(store.clone()).build();

    let ctx = SessionContext::new("tester").with_subsystem("nope");
    let mut session = MockSession::new(ctx, Vec::new());
    let err = gateway.handle(session.session_mut()).await.unwrap_err();

    assert!(matches!(err, Error::Unsupported { .. }));
    assert_eq!(
        session.stderr_string(),
        "unsupported operation: subsystem nope\r\n"
    );
    assert_eq!(session.exit_status(), Some(1));
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn sftp_can_be_disabled() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Gateway::builder(store)
        .config(GatewayConfig::new().with_sftp(false))
        .build();
    assert_eq!(gateway.subsystems().count(), 0);

    let ctx = SessionContext::new("tester").with_subsystem("sftp");
    let mut session = MockSession::new(ctx, Vec::new());
    assert!(gateway.handle(session.session_mut()).await.is_err());
}

#[tokio::test]
async fn chains_end_with_uniform_middleware() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Gateway::builder(store.clone()).build();
    let session = MockSession::new(exec_context("scp -t /"), Vec::new());
    assert_eq!(
        gateway.chain_for(&session).unwrap(),
        [Middleware::Scp, Middleware::Metrics, Middleware::Logging]
    );

    let quiet = Gateway::builder(store)
        .config(GatewayConfig::new().with_logging(false))
        .middleware(Middleware::Auth)
        .build();
    let session = MockSession::new(exec_context("command ls"), Vec::new());
    assert_eq!(
        quiet.chain_for(&session).unwrap(),
        [Middleware::List, Middleware::Auth, Middleware::Auth, Middleware::Metrics]
    );
}

#[tokio::test]
async fn metrics_count_sessions_per_protocol() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Gateway::builder(store).build();

    let mut ok = MockSession::new(exec_context("scp -t /"), b"C0644 1 a\nA\0".to_vec());
    gateway.handle(ok.session_mut()).await.unwrap();
    let mut bad = MockSession::new(exec_context("scp -r -t /"), Vec::new());
    let _ = gateway.handle(bad.session_mut()).await;
    let mut list = MockSession::new(exec_context("command ls"), Vec::new());
    gateway.handle(list.session_mut()).await.unwrap();

    let metrics = gateway.metrics();
    assert_eq!(metrics.sessions(Protocol::Scp), 2);
    assert_eq!(metrics.failures(Protocol::Scp), 1);
    assert_eq!(metrics.sessions(Protocol::List), 1);
    assert_eq!(metrics.failures(Protocol::List), 0);
    assert_eq!(metrics.snapshot().total_sessions(), 3);
}

#[tokio::test]
async fn listing_failure_ends_the_session() {
    let store = Arc::new(MemoryStore::new().fail_list("bucket unavailable"));
    let gateway = Gateway::builder(store.clone()).build();

    let mut session = MockSession::new(exec_context("command ls"), Vec::new());
    let err = gateway.handle(session.session_mut()).await.unwrap_err();

    assert!(matches!(err, Error::Storage { .. }));
    assert_eq!(session.stderr_string(), "bucket unavailable\r\n");
    assert_eq!(session.exit_status(), Some(1));
    assert!(session.stdout().is_empty());
    assert!(session.is_closed());
}

#[tokio::test]
async fn pipe_write_failure_skips_the_base_handler() {
    let store = Arc::new(MemoryStore::new().fail_write("upload.txt", "disk full"));
    let base = Arc::new(CountingBase::default());
    let gateway = Gateway::builder(store.clone()).base(base.clone()).build();

    let mut session = MockSession::new(exec_context("upload.txt"), b"data".to_vec());
    let err = gateway.handle(session.session_mut()).await.unwrap_err();

    assert!(matches!(err, Error::Storage { .. }));
    assert_eq!(session.stderr_string(), "disk full\r\n");
    assert_eq!(session.exit_status(), Some(1));
    assert_eq!(base.hits.load(Ordering::SeqCst), 0);
    assert!(session.stdout().is_empty());
}

#[tokio::test]
async fn panicking_validation_is_contained() {
    let store = Arc::new(MemoryStore::new().panic_on_validate());
    let base = Arc::new(CountingBase::default());
    let gateway = Gateway::builder(store.clone()).base(base.clone()).build();

    let mut session = MockSession::new(exec_context("command ls"), Vec::new());
    gateway.handle(session.session_mut()).await.unwrap();

    assert_eq!(
        session.stderr_string(),
        "error running auth middleware, check the flags you are using\r\n"
    );
    assert_eq!(session.exit_status(), Some(1));
    assert_eq!(store.calls(), ["validate"]);
    assert_eq!(base.hits.load(Ordering::SeqCst), 0);
}
