//! Relay Node
//!
//! Wires a store, an RPC server and the configured replication stage into
//! one runnable node.

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpListener;

use crate::api::AppState;
use crate::codec::Method;
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::interceptors::{
    DelayInterceptor, KeyedRequest, LoggingInterceptor, MetadataInterceptor, RejectKeysInterceptor,
    TimeoutInterceptor,
};
use crate::pipeline::{Interceptor, Pipeline};
use crate::replication::{
    Broadcaster, DedupCache, ReplicationInterceptor, ReplicationMode, ReplicationStats,
    SelectiveInterceptor,
};
use crate::rpc::{RpcClient, RpcServer};
use crate::store::{self, MemoryStore};

/// The installed replication interceptor and its observable state
pub struct ReplicationStage {
    pub interceptor: Arc<dyn Interceptor>,
    pub stats: Arc<ReplicationStats>,
    pub cache: Option<Arc<DedupCache>>,
}

impl ReplicationStage {
    /// Resolve the configured method name to a typed stage
    pub fn from_config(config: &RelayConfig, broadcaster: Arc<Broadcaster>) -> Result<Self> {
        let method = config.replication.method.as_str();

        if method == store::WRITE.name() {
            Ok(Self::typed(store::WRITE, config, broadcaster))
        } else if method == store::DELETE.name() {
            Ok(Self::typed(store::DELETE, config, broadcaster))
        } else {
            Err(Error::Config(format!(
                "method {} cannot be replicated (known: {}, {})",
                method,
                store::WRITE.name(),
                store::DELETE.name()
            )))
        }
    }

    fn typed<Req, Resp>(
        method: Method<Req, Resp>,
        config: &RelayConfig,
        broadcaster: Arc<Broadcaster>,
    ) -> Self
    where
        Req: KeyedRequest + Serialize + DeserializeOwned + Send + Sync + 'static,
        Resp: Send + Sync + 'static,
    {
        let replication = &config.replication;

        match replication.mode {
            ReplicationMode::Dedup => {
                let interceptor = ReplicationInterceptor::new(
                    method,
                    replication.node_set(),
                    broadcaster,
                    replication.cache_capacity,
                );
                Self {
                    stats: Arc::clone(interceptor.stats()),
                    cache: Some(Arc::clone(interceptor.cache())),
                    interceptor: Arc::new(interceptor),
                }
            }
            ReplicationMode::Selective => {
                let prefix = replication.key_prefix.clone().unwrap_or_default();
                let interceptor = SelectiveInterceptor::new(
                    method,
                    move |req: &Req| req.key().starts_with(&prefix),
                    replication.node_set(),
                    broadcaster,
                );
                Self {
                    stats: Arc::clone(interceptor.stats()),
                    cache: None,
                    interceptor: Arc::new(interceptor),
                }
            }
        }
    }
}

/// Build the node's chain: the configured front stages, then replication
///
/// Front stages run in the order logging, timeout, delay, metadata, key
/// rejection, so a rejected write is never forwarded and a timed-out call
/// still owes its peers the fan-out.
pub fn build_pipeline(config: &RelayConfig, store: &Arc<MemoryStore>, stage: &ReplicationStage) -> Pipeline {
    let settings = &config.pipeline;
    let mut pipeline = Pipeline::new(Arc::new(Arc::clone(store).router()));

    if settings.log_requests {
        pipeline = pipeline.with(Arc::new(LoggingInterceptor::new(config.node.id.clone())));
    }
    if let Some(limit) = settings.request_timeout() {
        pipeline = pipeline.with(Arc::new(TimeoutInterceptor::new(limit)));
    }
    if let Some(delay) = settings.delay() {
        pipeline = pipeline.with(Arc::new(DelayInterceptor::new(delay)));
    }
    if !settings.metadata.is_empty() {
        pipeline = pipeline.with(Arc::new(MetadataInterceptor::with_entries(settings.metadata.clone())));
    }
    if !settings.rejected_keys.is_empty() {
        let keys = &settings.rejected_keys;
        pipeline = pipeline
            .with(Arc::new(RejectKeysInterceptor::new(store::WRITE, keys.iter().cloned())))
            .with(Arc::new(RejectKeysInterceptor::new(store::READ, keys.iter().cloned())))
            .with(Arc::new(RejectKeysInterceptor::new(store::DELETE, keys.iter().cloned())));
    }

    pipeline.with(Arc::clone(&stage.interceptor))
}

/// A store served over RPC, replicating writes to its peers
pub struct RelayNode {
    config: RelayConfig,
    store: Arc<MemoryStore>,
    stage: ReplicationStage,
    pipeline: Arc<Pipeline>,
    server: RpcServer,
}

impl RelayNode {
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;

        let client = Arc::new(RpcClient::new(
            config.connect_timeout(),
            config.replication.per_call_timeout(),
        ));
        let broadcaster = Arc::new(Broadcaster::new(
            client,
            config.replication.broadcast_options(config.node.id.clone()),
        ));
        let stage = ReplicationStage::from_config(&config, broadcaster)?;

        let store = Arc::new(MemoryStore::new());
        let pipeline = Arc::new(build_pipeline(&config, &store, &stage));
        let server = RpcServer::new(config.node.bind_address.clone(), Arc::clone(&pipeline));

        tracing::info!(
            "Node {} replicates {} ({} mode) to {} peer(s)",
            config.node.id,
            config.replication.method,
            config.replication.mode,
            config.replication.peers.len()
        );

        Ok(Self {
            config,
            store,
            stage,
            pipeline,
            server,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn stats(&self) -> &Arc<ReplicationStats> {
        &self.stage.stats
    }

    pub fn cache(&self) -> Option<&Arc<DedupCache>> {
        self.stage.cache.as_ref()
    }

    /// The chain every inbound call runs through
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// State for the HTTP API
    pub fn app_state(&self) -> AppState {
        AppState {
            node_id: self.config.node.id.clone(),
            method: self.config.replication.method.clone(),
            mode: self.config.replication.mode,
            peers: self.config.replication.peers.clone(),
            stats: Arc::clone(&self.stage.stats),
            cache: self.stage.cache.clone(),
            started_at: Utc::now(),
        }
    }

    /// Bind the configured address and serve until stopped
    pub async fn start(&self) -> Result<()> {
        self.server.start().await
    }

    /// Serve on an already bound listener until stopped
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.server.serve(listener).await
    }

    pub fn stop(&self) {
        self.server.stop();
    }
}
