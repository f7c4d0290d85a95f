//! Fan-out Broadcaster
//!
//! Sends one request to every node in a set, concurrently, under a per-call
//! timeout and an overall deadline. Per-node failures are logged and
//! counted, never retried and never surfaced to the original caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use uuid::Uuid;

use crate::error::Result;
use crate::rpc::{Request, Response};

/// Metadata key naming the node that fanned a request out
pub const REPLICATED_BY: &str = "replicated-by";

/// Outbound side of replication: performs one call against one peer
///
/// Connection lifecycle, pooling and retries belong to the implementor;
/// the broadcaster only bounds each call in time.
#[async_trait]
pub trait PeerCaller: Send + Sync {
    async fn call(&self, peer: &str, request: Request) -> Result<Response>;
}

/// Broadcast tuning
#[derive(Debug, Clone)]
pub struct BroadcastOptions {
    /// Bound on each individual peer call
    pub per_call_timeout: Duration,
    /// Bound on the whole fan-out
    pub deadline: Duration,
    /// Concurrent fan-outs allowed
    pub max_inflight: usize,
    /// Local node id, stamped into outbound metadata
    pub origin: Option<String>,
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self {
            per_call_timeout: Duration::from_secs(5),
            deadline: Duration::from_secs(5),
            max_inflight: 64,
            origin: None,
        }
    }
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Calls still running when the overall deadline hit
    pub abandoned: usize,
}

impl BroadcastReport {
    /// Number of peers a call was launched for
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed + self.timed_out + self.abandoned
    }

    /// Every peer acknowledged the call
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.timed_out == 0 && self.abandoned == 0
    }

    fn record(&mut self, outcome: PeerOutcome) {
        match outcome {
            PeerOutcome::Delivered => self.delivered += 1,
            PeerOutcome::Failed => self.failed += 1,
            PeerOutcome::TimedOut => self.timed_out += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PeerOutcome {
    Delivered,
    Failed,
    TimedOut,
}

/// Concurrent, deadline-bounded fan-out
pub struct Broadcaster {
    caller: Arc<dyn PeerCaller>,
    options: BroadcastOptions,
    permits: Arc<Semaphore>,
}

impl Broadcaster {
    pub fn new(caller: Arc<dyn PeerCaller>, options: BroadcastOptions) -> Self {
        let permits = Arc::new(Semaphore::new(options.max_inflight.max(1)));
        Self {
            caller,
            options,
            permits,
        }
    }

    pub fn options(&self) -> &BroadcastOptions {
        &self.options
    }

    /// Claim a fan-out slot without waiting
    ///
    /// `None` when `max_inflight` fan-outs are already running.
    pub fn try_reserve(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).try_acquire_owned().ok()
    }

    /// Send `request` to every node and wait for all calls or the deadline
    ///
    /// The deadline covers waiting for a fan-out slot too. If no slot frees
    /// up in time every node is counted as abandoned.
    pub async fn broadcast(&self, nodes: &[String], request: Request) -> BroadcastReport {
        if nodes.is_empty() {
            return BroadcastReport::default();
        }
        let deadline = Instant::now() + self.options.deadline;

        match timeout_at(deadline, Arc::clone(&self.permits).acquire_owned()).await {
            Ok(Ok(permit)) => self.broadcast_reserved(permit, deadline, nodes, request).await,
            _ => {
                tracing::warn!(
                    "No fan-out slot within {:?}, abandoning {} peer call(s)",
                    self.options.deadline,
                    nodes.len()
                );
                BroadcastReport {
                    abandoned: nodes.len(),
                    ..BroadcastReport::default()
                }
            }
        }
    }

    /// Fan out under an already claimed slot, finishing by `deadline`
    ///
    /// Each outbound copy gets a fresh request id. The deadline is unrelated
    /// to any inbound call.
    pub async fn broadcast_reserved(
        &self,
        _permit: OwnedSemaphorePermit,
        deadline: Instant,
        nodes: &[String],
        request: Request,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        if nodes.is_empty() {
            return report;
        }

        let mut calls = JoinSet::new();
        for node in nodes {
            let caller = Arc::clone(&self.caller);
            let peer = node.clone();
            let per_call_timeout = self.options.per_call_timeout;

            let mut outbound = request.clone();
            outbound.id = Uuid::new_v4();
            if let Some(origin) = &self.options.origin {
                outbound.metadata.insert(REPLICATED_BY.to_string(), origin.clone());
            }

            calls.spawn(async move {
                match timeout(per_call_timeout, caller.call(&peer, outbound)).await {
                    Ok(Ok(_)) => {
                        tracing::debug!("Replicated to {}", peer);
                        PeerOutcome::Delivered
                    }
                    Ok(Err(e)) if e.is_timeout() => {
                        tracing::warn!("Replication to {} timed out: {}", peer, e);
                        PeerOutcome::TimedOut
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("Replication to {} failed: {}", peer, e);
                        PeerOutcome::Failed
                    }
                    Err(_) => {
                        tracing::warn!("Replication to {} timed out after {:?}", peer, per_call_timeout);
                        PeerOutcome::TimedOut
                    }
                }
            });
        }

        let collected = timeout_at(deadline, async {
            while let Some(joined) = calls.join_next().await {
                match joined {
                    Ok(outcome) => report.record(outcome),
                    Err(e) => {
                        tracing::warn!("Replication task failed: {}", e);
                        report.failed += 1;
                    }
                }
            }
        })
        .await;

        if collected.is_err() {
            report.abandoned = calls.len();
            calls.abort_all();
            tracing::warn!(
                "Broadcast deadline of {:?} reached, abandoned {} peer call(s)",
                self.options.deadline, report.abandoned
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::testing::RecordingCaller;

    fn peers(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn options(per_call_ms: u64, deadline_ms: u64) -> BroadcastOptions {
        BroadcastOptions {
            per_call_timeout: Duration::from_millis(per_call_ms),
            deadline: Duration::from_millis(deadline_ms),
            max_inflight: 4,
            origin: Some("node-1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_delivers_to_every_peer() {
        let caller = Arc::new(RecordingCaller::new());
        let broadcaster = Broadcaster::new(caller.clone(), options(1_000, 2_000));
        let request = Request::new("Storage.Write", vec![1, 2, 3]);

        let report = broadcaster.broadcast(&peers(&["a:1", "b:1", "c:1"]), request.clone()).await;

        assert_eq!(report.delivered, 3);
        assert!(report.is_complete());

        let calls = caller.calls();
        let mut targets: Vec<_> = calls.iter().map(|(peer, _)| peer.clone()).collect();
        targets.sort();
        assert_eq!(targets, peers(&["a:1", "b:1", "c:1"]));

        for (_, sent) in &calls {
            assert_eq!(sent.payload, request.payload);
            assert_ne!(sent.id, request.id);
            assert_eq!(sent.metadata.get(REPLICATED_BY).map(String::as_str), Some("node-1"));
        }
    }

    #[tokio::test]
    async fn test_failed_peer_does_not_block_others() {
        let caller = Arc::new(RecordingCaller::new().failing("b:1"));
        let broadcaster = Broadcaster::new(caller.clone(), options(1_000, 2_000));

        let report = broadcaster
            .broadcast(&peers(&["a:1", "b:1", "c:1"]), Request::new("Storage.Write", vec![]))
            .await;

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.attempted(), 3);
        assert!(!report.is_complete());
        assert_eq!(caller.delivered_to(), vec!["a:1".to_string(), "c:1".to_string()]);
    }

    #[tokio::test]
    async fn test_per_call_timeout() {
        let caller = Arc::new(RecordingCaller::new().hanging("slow:1"));
        let broadcaster = Broadcaster::new(caller.clone(), options(50, 2_000));

        let report = broadcaster
            .broadcast(&peers(&["fast:1", "slow:1"]), Request::new("Storage.Write", vec![]))
            .await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.abandoned, 0);
    }

    #[tokio::test]
    async fn test_deadline_abandons_pending_calls() {
        let caller = Arc::new(RecordingCaller::new().hanging("slow:1"));
        let broadcaster = Broadcaster::new(caller.clone(), options(10_000, 100));

        let started = std::time::Instant::now();
        let report = broadcaster
            .broadcast(&peers(&["fast:1", "slow:1"]), Request::new("Storage.Write", vec![]))
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.abandoned, 1);
    }

    #[tokio::test]
    async fn test_empty_node_set() {
        let caller = Arc::new(RecordingCaller::new());
        let broadcaster = Broadcaster::new(caller.clone(), BroadcastOptions::default());

        let report = broadcaster.broadcast(&[], Request::new("Storage.Write", vec![])).await;

        assert_eq!(report.attempted(), 0);
        assert!(caller.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reserve_respects_max_inflight() {
        let caller = Arc::new(RecordingCaller::new());
        let mut opts = options(1_000, 2_000);
        opts.max_inflight = 1;
        let broadcaster = Broadcaster::new(caller, opts);

        let held = broadcaster.try_reserve();
        assert!(held.is_some());
        assert!(broadcaster.try_reserve().is_none());

        drop(held);
        assert!(broadcaster.try_reserve().is_some());
    }

    #[tokio::test]
    async fn test_waiting_for_a_slot_counts_against_deadline() {
        let caller = Arc::new(RecordingCaller::new());
        let mut opts = options(1_000, 100);
        opts.max_inflight = 1;
        let broadcaster = Broadcaster::new(caller.clone(), opts);
        let _held = broadcaster.try_reserve();

        let started = std::time::Instant::now();
        let report = broadcaster
            .broadcast(&peers(&["a:1", "b:1"]), Request::new("Storage.Write", vec![]))
            .await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(report.abandoned, 2);
        assert!(caller.calls().is_empty());
    }
}
