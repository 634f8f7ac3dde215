//! Per-protocol session metrics.
//!
//! Tracks, for every protocol class:
//! - Sessions handled
//! - Failed sessions (chain error or non-zero exit status)
//! - Cumulative handling time

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::session::SessionContext;

/// Protocol class a session is accounted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Scp,
    Sftp,
    Rsync,
    List,
    Pipe,
    Shell,
}

impl Protocol {
    pub const ALL: [Protocol; 6] = [
        Protocol::Scp,
        Protocol::Sftp,
        Protocol::Rsync,
        Protocol::List,
        Protocol::Pipe,
        Protocol::Shell,
    ];

    /// Classify a session the way the default router would serve it.
    pub fn classify(ctx: &SessionContext) -> Self {
        if ctx.subsystem().is_some() {
            return Protocol::Sftp;
        }
        let command = ctx.command();
        match command.first().map(String::as_str) {
            Some("scp") => Protocol::Scp,
            Some("rsync") => Protocol::Rsync,
            Some("command") if command.len() == 2 && command[1] == "ls" => Protocol::List,
            _ if !ctx.has_pty() => Protocol::Pipe,
            _ => Protocol::Shell,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Scp => "scp",
            Protocol::Sftp => "sftp",
            Protocol::Rsync => "rsync",
            Protocol::List => "list",
            Protocol::Pipe => "pipe",
            Protocol::Shell => "shell",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct Counters {
    sessions: AtomicU64,
    failures: AtomicU64,
    busy_micros: AtomicU64,
}

/// Lock-free counters shared by every session of a gateway.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    counters: [Counters; Protocol::ALL.len()],
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished session.
    pub fn record(&self, protocol: Protocol, elapsed: Duration, failed: bool) {
        let counters = &self.counters[protocol.index()];
        counters.sessions.fetch_add(1, Ordering::Relaxed);
        if failed {
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        counters.busy_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn sessions(&self, protocol: Protocol) -> u64 {
        self.counters[protocol.index()]
            .sessions
            .load(Ordering::Relaxed)
    }

    pub fn failures(&self, protocol: Protocol) -> u64 {
        self.counters[protocol.index()]
            .failures
            .load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let protocols = Protocol::ALL
            .iter()
            .map(|&protocol| {
                let counters = &self.counters[protocol.index()];
                let stats = ProtocolStats {
                    sessions: counters.sessions.load(Ordering::Relaxed),
                    failures: counters.failures.load(Ordering::Relaxed),
                    busy: Duration::from_micros(counters.busy_micros.load(Ordering::Relaxed)),
                };
                (protocol, stats)
            })
            .collect();
        MetricsSnapshot { protocols }
    }
}

/// Serializable view of [`GatewayMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub protocols: BTreeMap<Protocol, ProtocolStats>,
}

impl MetricsSnapshot {
    /// Sessions across all protocols.
    pub fn total_sessions(&self) -> u64 {
        self.protocols.values().map(|s| s.sessions).sum()
    }
}

/// Counters of one protocol class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolStats {
    pub sessions: u64,
    pub failures: u64,
    /// Cumulative handling time.
    #[serde(with = "duration_millis")]
    pub busy: Duration,
}

/// Serde helper for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(value.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PtyInfo;

    #[test]
    fn classify_sessions() {
        let ctx = |line: &str| SessionContext::new("u").with_command_line(line);

        assert_eq!(Protocol::classify(&ctx("scp -t /")), Protocol::Scp);
        assert_eq!(Protocol::classify(&ctx("rsync --server")), Protocol::Rsync);
        assert_eq!(Protocol::classify(&ctx("command ls")), Protocol::List);
        assert_eq!(Protocol::classify(&ctx("")), Protocol::Pipe);
        assert_eq!(
            Protocol::classify(&SessionContext::new("u").with_subsystem("sftp")),
            Protocol::Sftp
        );
        assert_eq!(
            Protocol::classify(&SessionContext::new("u").with_pty(PtyInfo {
                term: "xterm".into(),
                cols: 80,
                rows: 24,
            })),
            Protocol::Shell
        );
    }

    #[test]
    fn record_counts_sessions_and_failures() {
        let metrics = GatewayMetrics::new();
        metrics.record(Protocol::Scp, Duration::from_millis(5), false);
        metrics.record(Protocol::Scp, Duration::from_millis(7), true);
        metrics.record(Protocol::Pipe, Duration::ZERO, false);

        assert_eq!(metrics.sessions(Protocol::Scp), 2);
        assert_eq!(metrics.failures(Protocol::Scp), 1);
        assert_eq!(metrics.sessions(Protocol::Sftp), 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_sessions(), 3);
        assert_eq!(snapshot.protocols[&Protocol::Scp].busy, Duration::from_millis(12));
    }

    #[test]
    fn snapshot_serializes_by_protocol_name() {
        let metrics = GatewayMetrics::new();
        metrics.record(Protocol::List, Duration::from_millis(3), false);

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["protocols"]["list"]["sessions"], 1);
        assert_eq!(json["protocols"]["list"]["busy"], 3);
        assert_eq!(json["protocols"]["rsync"]["failures"], 0);

        let back: MetricsSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, metrics.snapshot());
    }

    #[test]
    fn concurrent_recording() {
        let metrics = std::sync::Arc::new(GatewayMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = std::sync::Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.record(Protocol::Sftp, Duration::from_micros(1), false);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.sessions(Protocol::Sftp), 400);
    }
}
