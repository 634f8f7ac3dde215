//! Error types for sendgate-core.

use thiserror::Error;

/// Main error type for gateway operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the session streams or a storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed copy-protocol control line.
    #[error("failed to parse: {line:?}")]
    Parse { line: String },

    /// Control line that no state of the copy protocol accepts.
    #[error("unhandled input: {line:?}")]
    UnhandledInput { line: String },

    /// Recursive copy was requested.
    #[error("recursive not supported")]
    RecursiveUnsupported,

    /// The capability implementation refused the connection.
    #[error("{message}")]
    Unauthorized { message: String },

    /// Operation outside what an adapter supports.
    #[error("unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Path the adapter refuses to act on.
    #[error("invalid path: {path}")]
    InvalidPath { path: String },

    /// Failure reported by the storage backend for one file.
    #[error("{message}")]
    Storage { message: String },

    /// Peer violated a wire protocol.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Session streams are gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// Fault inside the gateway itself (e.g. a caught panic).
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Returns true if this error ends the handling of the connection.
    ///
    /// Non-fatal errors are the per-file kinds: they are collected and
    /// reported while the rest of a batch continues.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Parse { .. }
                | Error::UnhandledInput { .. }
                | Error::RecursiveUnsupported
                | Error::Unauthorized { .. }
                | Error::Unsupported { .. }
                | Error::Protocol { .. }
        )
    }

    /// Shorthand for a storage failure.
    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage {
            message: message.into(),
        }
    }

    /// Shorthand for an authorization failure.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Error::Unauthorized {
            message: message.into(),
        }
    }

    /// Shorthand for an unsupported operation.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Error::Unsupported {
            operation: operation.into(),
        }
    }
}

/// Convenience result type for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;
