//! Replication Module
//!
//! Interceptors that copy selected requests to peer nodes after serving
//! them locally, plus the dedup cache and broadcaster they are built from.

pub mod broadcast;
pub mod cache;
pub mod fingerprint;
mod interceptor;
mod selective;
mod stats;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

pub use broadcast::{BroadcastOptions, BroadcastReport, Broadcaster, PeerCaller, REPLICATED_BY};
pub use cache::{DedupCache, DEFAULT_CACHE_CAPACITY};
pub use fingerprint::Fingerprint;
pub use interceptor::ReplicationInterceptor;
pub use selective::SelectiveInterceptor;
pub use stats::{ReplicationStats, StatsSnapshot};

use crate::rpc::Request;

/// Which interceptor a node installs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    /// Fingerprint + dedup cache, safe in a mesh
    #[default]
    Dedup,
    /// Predicate-gated, no dedup; single-hop topologies only
    Selective,
}

impl std::fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicationMode::Dedup => write!(f, "dedup"),
            ReplicationMode::Selective => write!(f, "selective"),
        }
    }
}

/// Configuration for replication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Method identifier to replicate (exact match)
    #[serde(default = "default_method")]
    pub method: String,

    /// Peer addresses, excluding this node
    #[serde(default)]
    pub peers: Vec<String>,

    /// Timeout for each peer call in milliseconds
    #[serde(default = "default_per_call_timeout_ms")]
    pub per_call_timeout_ms: u64,

    /// Overall broadcast deadline in milliseconds
    #[serde(default = "default_broadcast_timeout_ms")]
    pub broadcast_timeout_ms: u64,

    /// Dedup cache high-water mark
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Concurrent fan-outs allowed
    #[serde(default = "default_max_inflight_broadcasts")]
    pub max_inflight_broadcasts: usize,

    #[serde(default)]
    pub mode: ReplicationMode,

    /// Selective mode only: replicate writes whose key starts with this prefix
    #[serde(default)]
    pub key_prefix: Option<String>,
}

fn default_method() -> String {
    "Storage.Write".to_string()
}

fn default_per_call_timeout_ms() -> u64 {
    5000
}

fn default_broadcast_timeout_ms() -> u64 {
    5000
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_max_inflight_broadcasts() -> usize {
    64
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            peers: Vec::new(),
            per_call_timeout_ms: default_per_call_timeout_ms(),
            broadcast_timeout_ms: default_broadcast_timeout_ms(),
            cache_capacity: default_cache_capacity(),
            max_inflight_broadcasts: default_max_inflight_broadcasts(),
            mode: ReplicationMode::default(),
            key_prefix: None,
        }
    }
}

impl ReplicationConfig {
    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    /// Broadcaster settings, stamping `origin` into outbound metadata
    pub fn broadcast_options(&self, origin: impl Into<String>) -> BroadcastOptions {
        BroadcastOptions {
            per_call_timeout: self.per_call_timeout(),
            deadline: self.broadcast_timeout(),
            max_inflight: self.max_inflight_broadcasts,
            origin: Some(origin.into()),
        }
    }

    /// Peer set in the shape the interceptors hold it
    pub fn node_set(&self) -> Arc<[String]> {
        self.peers.clone().into()
    }
}

/// Launch a detached fan-out of `request` and fold its report into `stats`
///
/// The task owns everything it touches and outlives the inbound call. The
/// broadcast deadline starts here. Returns `false` when the fan-out was shed
/// because no slot was free (or no runtime is available); nothing is queued.
pub(crate) fn spawn_fanout(
    broadcaster: &Arc<Broadcaster>,
    nodes: &Arc<[String]>,
    stats: &Arc<ReplicationStats>,
    request: Request,
) -> bool {
    if nodes.is_empty() {
        return true;
    }

    let reserved = tokio::runtime::Handle::try_current()
        .ok()
        .and_then(|runtime| broadcaster.try_reserve().map(|permit| (runtime, permit)));
    let Some((runtime, permit)) = reserved else {
        tracing::warn!(
            "{} fan-out(s) already in flight, shedding {} {}",
            broadcaster.options().max_inflight,
            request.method,
            request.id
        );
        stats.record_shed();
        return false;
    };
    stats.record_broadcast();

    let deadline = Instant::now() + broadcaster.options().deadline;
    let broadcaster = Arc::clone(broadcaster);
    let nodes = Arc::clone(nodes);
    let stats = Arc::clone(stats);
    runtime.spawn(async move {
        let request_id = request.id;
        let report = broadcaster
            .broadcast_reserved(permit, deadline, &nodes, request)
            .await;
        stats.record_report(&report);
        tracing::debug!(
            "Fan-out of {} finished: {}/{} delivered",
            request_id,
            report.delivered,
            report.attempted()
        );
    });
    true
}

/// A fan-out owed to the peers, launched when this guard is dropped
///
/// Held across the local invocation, so the fan-out still happens if the
/// inbound call is abandoned mid-flight (an outer timeout, a dropped
/// connection). When the fan-out is shed, the dedup mark is withdrawn so a
/// later copy of the same write can try again.
pub(crate) struct PendingFanout<'a> {
    broadcaster: &'a Arc<Broadcaster>,
    nodes: &'a Arc<[String]>,
    stats: &'a Arc<ReplicationStats>,
    replica: Option<Request>,
    mark: Option<(&'a DedupCache, Fingerprint)>,
}

impl<'a> PendingFanout<'a> {
    pub(crate) fn new(
        broadcaster: &'a Arc<Broadcaster>,
        nodes: &'a Arc<[String]>,
        stats: &'a Arc<ReplicationStats>,
        replica: Request,
    ) -> Self {
        Self {
            broadcaster,
            nodes,
            stats,
            replica: Some(replica),
            mark: None,
        }
    }

    /// Withdraw `fingerprint` from `cache` if the fan-out is shed
    pub(crate) fn marked(mut self, cache: &'a DedupCache, fingerprint: Fingerprint) -> Self {
        self.mark = Some((cache, fingerprint));
        self
    }
}

impl Drop for PendingFanout<'_> {
    fn drop(&mut self) {
        let Some(replica) = self.replica.take() else {
            return;
        };
        tracing::debug!(
            "Forwarding {} {} to {} peer(s)",
            replica.method,
            replica.id,
            self.nodes.len()
        );

        if !spawn_fanout(self.broadcaster, self.nodes, self.stats, replica) {
            if let Some((cache, fingerprint)) = self.mark {
                cache.remove(&fingerprint);
            }
        }
    }
}
