//! Selective Replication Interceptor
//!
//! Forwards requests of one method whose decoded payload satisfies a
//! caller-supplied predicate. There is no dedup cache: every matching
//! arrival is forwarded, including copies that arrived from a peer.
//!
//! Only use this where replicas are never themselves replicating nodes
//! (a single hop from origin to peers). In a mesh where peers also run
//! this interceptor, each forwarded copy is forwarded again and the
//! request loops. Use [`ReplicationInterceptor`](super::ReplicationInterceptor)
//! for multi-hop topologies.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::broadcast::Broadcaster;
use super::stats::ReplicationStats;
use super::PendingFanout;
use crate::codec::Method;
use crate::error::Result;
use crate::pipeline::{CallContext, Interceptor, Next};
use crate::rpc::{Request, Response};

type Predicate<Req> = Arc<dyn Fn(&Req) -> bool + Send + Sync>;

/// Predicate-gated replication without loop prevention
pub struct SelectiveInterceptor<Req, Resp> {
    method: Method<Req, Resp>,
    predicate: Predicate<Req>,
    nodes: Arc<[String]>,
    broadcaster: Arc<Broadcaster>,
    stats: Arc<ReplicationStats>,
}

impl<Req, Resp> SelectiveInterceptor<Req, Resp> {
    pub fn new<F>(
        method: Method<Req, Resp>,
        predicate: F,
        nodes: impl Into<Arc<[String]>>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self
    where
        F: Fn(&Req) -> bool + Send + Sync + 'static,
    {
        Self {
            method,
            predicate: Arc::new(predicate),
            nodes: nodes.into(),
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

    pub fn stats(&self) -> &Arc<ReplicationStats> {
        &self.stats
    }
}

#[async_trait]
impl<Req, Resp> Interceptor for SelectiveInterceptor<Req, Resp>
where
    Req: DeserializeOwned + Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    async fn intercept(&self, ctx: &CallContext, request: Request, next: Next<'_>) -> Result<Response> {
        if !self.method.matches(&request) {
            self.stats.record_passthrough();
            return next.run(ctx, request).await;
        }
        self.stats.record_matched();

        let pending = match self.method.decode_request(&request) {
            Ok(payload) if (self.predicate)(&payload) => Some(PendingFanout::new(
                &self.broadcaster,
                &self.nodes,
                &self.stats,
                request.clone(),
            )),
            Ok(_) => {
                self.stats.record_filtered();
                None
            }
            Err(e) => {
                tracing::warn!("Cannot decode {} request {}: {}", request.method, request.id, e);
                self.stats.record_fingerprint_failure();
                None
            }
        };

        let result = next.run(ctx, request).await;
        drop(pending);

        result
    }
}
