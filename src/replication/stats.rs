//! Replication counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::broadcast::BroadcastReport;

/// Counters shared by an interceptor and its detached broadcasts
#[derive(Debug, Default)]
pub struct ReplicationStats {
    matched: AtomicU64,
    passthrough: AtomicU64,
    fingerprint_failures: AtomicU64,
    duplicates: AtomicU64,
    filtered: AtomicU64,
    broadcasts: AtomicU64,
    shed: AtomicU64,
    peer_deliveries: AtomicU64,
    peer_failures: AtomicU64,
    peer_abandoned: AtomicU64,
}

/// Point-in-time copy of [`ReplicationStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Requests addressed to the replicated method
    pub matched: u64,
    /// Requests for other methods, passed straight through
    pub passthrough: u64,
    /// Matching requests whose payload could not be fingerprinted
    pub fingerprint_failures: u64,
    /// Matching requests already seen (not re-broadcast)
    pub duplicates: u64,
    /// Matching requests rejected by a selective predicate
    pub filtered: u64,
    /// Fan-outs spawned
    pub broadcasts: u64,
    /// Fan-outs dropped because `max_inflight` were already running
    pub shed: u64,
    pub peer_deliveries: u64,
    /// Failed or timed-out peer calls
    pub peer_failures: u64,
    /// Peer calls still pending at the broadcast deadline
    pub peer_abandoned: u64,
}

impl ReplicationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_matched(&self) {
        self.matched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_passthrough(&self) {
        self.passthrough.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fingerprint_failure(&self) {
        self.fingerprint_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_broadcast(&self) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_shed(&self) {
        self.shed.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold the outcome of one fan-out into the peer counters
    pub fn record_report(&self, report: &BroadcastReport) {
        self.peer_deliveries.fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.peer_failures
            .fetch_add((report.failed + report.timed_out) as u64, Ordering::Relaxed);
        self.peer_abandoned.fetch_add(report.abandoned as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            matched: self.matched.load(Ordering::Relaxed),
            passthrough: self.passthrough.load(Ordering::Relaxed),
            fingerprint_failures: self.fingerprint_failures.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            shed: self.shed.load(Ordering::Relaxed),
            peer_deliveries: self.peer_deliveries.load(Ordering::Relaxed),
            peer_failures: self.peer_failures.load(Ordering::Relaxed),
            peer_abandoned: self.peer_abandoned.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_report() {
        let stats = ReplicationStats::new();
        stats.record_broadcast();
        stats.record_report(&BroadcastReport {
            delivered: 2,
            failed: 1,
            timed_out: 1,
            abandoned: 1,
        });

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.broadcasts, 1);
        assert_eq!(snapshot.peer_deliveries, 2);
        assert_eq!(snapshot.peer_failures, 2);
        assert_eq!(snapshot.peer_abandoned, 1);
        assert_eq!(snapshot.duplicates, 0);
        assert_eq!(snapshot.shed, 0);
    }
}
