//! sendgate-core: multi-protocol file transfer gateway for SSH sessions.
//!
//! This crate provides:
//! - The capability interface storage backends implement ([`TransferHandler`])
//! - Protocol adapters for SCP, SFTP, rsync and raw pipe uploads
//! - Listing and authorization middleware
//! - Per-session routing and middleware composition ([`Gateway`])
//! - Stream adapters (bounded reads, range-to-EOF, deferred writes)
//! - Logging and metrics

pub mod config;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod io;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod path;
pub mod router;
pub mod rsync;
pub mod scp;
pub mod session;
pub mod sftp;

pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use gateway::{Gateway, GatewayBuilder, NoopHandler, SFTP_SUBSYSTEM, SessionHandler};
pub use handler::{EntryReader, FileEntry, FileInfo, RandomAccessReader, TransferHandler};
pub use io::{BoundedReader, DeferredWriteBuffer, RangeEof, RangeNotSatisfiable};
pub use logging::{LogFormat, init_logging};
pub use metrics::{GatewayMetrics, MetricsSnapshot, Protocol};
pub use middleware::{Middleware, Next};
pub use router::{CommandRouter, Router};
pub use rsync::{ReceivedFile, ReceivedFileSink, RsyncOptions, RsyncReceiver};
pub use session::{PtyInfo, Session, SessionContext, Stderr};
