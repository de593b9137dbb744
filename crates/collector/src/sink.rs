#![forbid(unsafe_code)]

use crate::engine::Snapshot;
use tracing::{debug, info};

/// Receives every completed cycle. This is where a metrics exporter plugs in.
pub trait SnapshotSink: Send + Sync {
    fn publish(&self, snapshot: &Snapshot);
}

/// Discards snapshots.
#[derive(Debug, Default)]
pub struct NoopSink;

impl SnapshotSink for NoopSink {
    fn publish(&self, _snapshot: &Snapshot) {}
}

/// Writes each snapshot to the log: a summary at `info`, one event per
/// process at `debug`.
#[derive(Debug, Default)]
pub struct LogSink;

impl SnapshotSink for LogSink {
    fn publish(&self, snapshot: &Snapshot) {
        info!(
            cycle = snapshot.cycle,
            processes = snapshot.processes.len(),
            listen_sockets = snapshot.listen_socket_count(),
            connections = snapshot.connection_count(),
            rules_created = snapshot.traffic.inserted,
            rules_deleted = snapshot.traffic.deleted,
            firewall_failures = snapshot.traffic.failures.len(),
            "snapshot"
        );
        for process in &snapshot.processes {
            let listen: Vec<_> = process.listen_sockets.iter().map(ToString::to_string).collect();
            let connections: Vec<_> = process.connections.iter().map(ToString::to_string).collect();
            debug!(
                pid = process.pid,
                command = %process.command,
                cpu = process.cpu,
                virtual_memory = process.virtual_memory,
                ?listen,
                ?connections,
                "process"
            );
        }
    }
}
