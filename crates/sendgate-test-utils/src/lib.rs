//! sendgate-test-utils: Test infrastructure for sendgate.
//!
//! Provides:
//! - MemoryStore: In-memory capability that records every call
//! - MockSession: Session over in-memory streams with captured output
//! - ScriptedRsync: rsync engine that delivers a fixed set of files

mod memory_store;
mod mock_session;
mod scripted_rsync;

pub use memory_store::{MemoryStore, StoredFile};
pub use mock_session::{MockSession, SharedBuffer, exec_context};
pub use scripted_rsync::ScriptedRsync;
