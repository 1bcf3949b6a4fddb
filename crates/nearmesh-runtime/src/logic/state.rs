//! Observable mesh state
//!
//! The logic task is the only writer. Readers hold `watch` receivers for the
//! latest peer list, log, status and statistics, or a `broadcast` receiver for
//! each log entry as it is appended.

use nearmesh_core::{DedupStats, EngineStats, LogEntry, MeshEngine, MeshStatus, PeerSnapshot};
use tokio::sync::{broadcast, watch};

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub engine: EngineStats,
    pub dedup: DedupStats,
}

impl RuntimeStats {
    pub fn of(engine: &MeshEngine) -> Self {
        Self {
            engine: engine.stats(),
            dedup: engine.dedup_stats(),
        }
    }
}

// ----------------------------------------------------------------------------
// Views (read side)
// ----------------------------------------------------------------------------

/// Read-only views handed to the facade
#[derive(Debug, Clone)]
pub struct MeshViews {
    pub peers: watch::Receiver<Vec<PeerSnapshot>>,
    pub log: watch::Receiver<Vec<LogEntry>>,
    pub status: watch::Receiver<MeshStatus>,
    pub stats: watch::Receiver<RuntimeStats>,
    appended: broadcast::Sender<LogEntry>,
}

impl MeshViews {
    /// Stream of log entries appended after this call
    pub fn subscribe_messages(&self) -> broadcast::Receiver<LogEntry> {
        self.appended.subscribe()
    }
}

// ----------------------------------------------------------------------------
// Publisher (write side)
// ----------------------------------------------------------------------------

/// Which views an outcome touched
#[derive(Debug, Clone, Copy, Default)]
pub struct Changes {
    pub peers: bool,
    pub log: bool,
    pub status: bool,
}

pub struct MeshPublisher {
    peers: watch::Sender<Vec<PeerSnapshot>>,
    log: watch::Sender<Vec<LogEntry>>,
    status: watch::Sender<MeshStatus>,
    stats: watch::Sender<RuntimeStats>,
    appended: broadcast::Sender<LogEntry>,
}

impl MeshPublisher {
    /// Seed every view from the engine's current state
    pub fn new(engine: &MeshEngine, broadcast_capacity: usize) -> (Self, MeshViews) {
        let (peers, peers_rx) = watch::channel(engine.peer_snapshot());
        let (log, log_rx) = watch::channel(engine.log_entries().to_vec());
        let (status, status_rx) = watch::channel(engine.status());
        let (stats, stats_rx) = watch::channel(RuntimeStats::of(engine));
        let (appended, _) = broadcast::channel(broadcast_capacity);

        let views = MeshViews {
            peers: peers_rx,
            log: log_rx,
            status: status_rx,
            stats: stats_rx,
            appended: appended.clone(),
        };
        let publisher = Self {
            peers,
            log,
            status,
            stats,
            appended,
        };
        (publisher, views)
    }

    /// Announce one appended entry; no subscribers is fine
    pub fn appended(&self, entry: &LogEntry) {
        let _ = self.appended.send(entry.clone());
    }

    pub fn publish(&self, engine: &MeshEngine, changes: Changes) {
        if changes.peers {
            self.peers.send_replace(engine.peer_snapshot());
        }
        if changes.log {
            // the log only grows, so append what the view has not seen yet
            let entries = engine.log_entries();
            self.log.send_modify(|published| {
                let seen = published.len().min(entries.len());
                published.extend_from_slice(&entries[seen..]);
            });
        }
        if changes.status {
            self.status.send_replace(engine.status());
        }

        let stats = RuntimeStats::of(engine);
        self.stats.send_if_modified(|current| {
            if *current == stats {
                return false;
            }
            *current = stats;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearmesh_core::{ManualTimeSource, MeshConfig};
    use std::sync::Arc;

    #[test]
    fn test_log_view_extends_with_new_entries_only() {
        let mut engine = MeshEngine::new(
            &MeshConfig::for_device("A"),
            Arc::new(ManualTimeSource::starting_at(1_000)),
        )
        .unwrap();
        let (publisher, views) = MeshPublisher::new(&engine, 4);
        let changed = Changes {
            log: true,
            ..Changes::default()
        };

        engine.send_local_message("one", None);
        publisher.publish(&engine, changed);
        engine.send_local_message("two", None);
        engine.send_local_message("three", None);
        publisher.publish(&engine, changed);
        publisher.publish(&engine, changed);

        let log = views.log.borrow().clone();
        assert_eq!(log.as_slice(), engine.log_entries());
        let seqs: Vec<u64> = log.iter().map(|entry| entry.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(views.stats.borrow().engine.messages_originated, 3);
    }
}
