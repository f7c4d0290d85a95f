//! Replication Interceptor
//!
//! Serves every request locally and forwards the first sighting of each
//! distinct payload of the target method to all peers. A copy arriving
//! from a peer has the same payload, hence the same fingerprint, and is
//! applied locally without being forwarded again.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::broadcast::Broadcaster;
use super::cache::DedupCache;
use super::fingerprint::Fingerprint;
use super::stats::ReplicationStats;
use super::PendingFanout;
use crate::codec::Method;
use crate::error::Result;
use crate::pipeline::{CallContext, Interceptor, Next};
use crate::rpc::{Request, Response};

/// Dedup-guarded, fire-and-forget replication of one method
pub struct ReplicationInterceptor<Req, Resp> {
    method: Method<Req, Resp>,
    nodes: Arc<[String]>,
    cache: Arc<DedupCache>,
    broadcaster: Arc<Broadcaster>,
    stats: Arc<ReplicationStats>,
}

impl<Req, Resp> ReplicationInterceptor<Req, Resp> {
    /// Replicate `method` to `nodes`, with a fresh cache of `cache_capacity`
    pub fn new(
        method: Method<Req, Resp>,
        nodes: impl Into<Arc<[String]>>,
        broadcaster: Arc<Broadcaster>,
        cache_capacity: usize,
    ) -> Self {
        Self::with_cache(method, nodes, broadcaster, Arc::new(DedupCache::new(cache_capacity)))
    }

    /// Replicate `method` to `nodes` using an existing cache
    pub fn with_cache(
        method: Method<Req, Resp>,
        nodes: impl Into<Arc<[String]>>,
        broadcaster: Arc<Broadcaster>,
        cache: Arc<DedupCache>,
    ) -> Self {
        Self {
            method,
            nodes: nodes.into(),
            cache,
            broadcaster,
            stats: Arc::new(ReplicationStats::new()),
        }
    }

    pub fn method(&self) -> &'static str {
        self.method.name()
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn cache(&self) -> &Arc<DedupCache> {
        &self.cache
    }

    pub fn stats(&self) -> &Arc<ReplicationStats> {
        &self.stats
    }
}

impl<Req, Resp> ReplicationInterceptor<Req, Resp>
where
    Req: Serialize + DeserializeOwned,
{
    /// Fingerprint the canonical re-encoding of the decoded payload
    fn fingerprint(&self, request: &Request) -> Result<Fingerprint> {
        let payload = self.method.decode_request(request)?;
        Fingerprint::of(&payload)
    }
}

#[async_trait]
impl<Req, Resp> Interceptor for ReplicationInterceptor<Req, Resp>
where
    Req: Serialize + DeserializeOwned + Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    async fn intercept(&self, ctx: &CallContext, request: Request, next: Next<'_>) -> Result<Response> {
        if !self.method.matches(&request) {
            self.stats.record_passthrough();
            return next.run(ctx, request).await;
        }
        self.stats.record_matched();

        let fingerprint = match self.fingerprint(&request) {
            Ok(fp) => fp,
            Err(e) => {
                tracing::warn!("Cannot fingerprint {} request {}: {}", request.method, request.id, e);
                self.stats.record_fingerprint_failure();
                return next.run(ctx, request).await;
            }
        };

        // From here on the mark and its fan-out stand or fall together
        let pending = if self.cache.check_and_mark(fingerprint) {
            tracing::debug!("{} {} already seen, applying without forwarding", request.method, fingerprint);
            self.stats.record_duplicate();
            None
        } else {
            Some(
                PendingFanout::new(&self.broadcaster, &self.nodes, &self.stats, request.clone())
                    .marked(&self.cache, fingerprint),
            )
        };

        let result = next.run(ctx, request).await;
        drop(pending);

        result
    }
}
