//! HTTP API Server
//!
//! Read-only status endpoints for a relay node.

use std::sync::Arc;
use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::replication::{DedupCache, ReplicationMode, ReplicationStats, StatsSnapshot};
use crate::error::{Error, Result};

/// Shared application state
pub struct AppState {
    /// Node ID
    pub node_id: String,
    /// Replicated method
    pub method: String,
    /// Installed interceptor
    pub mode: ReplicationMode,
    /// Peer set
    pub peers: Vec<String>,
    /// Replication counters
    pub stats: Arc<ReplicationStats>,
    /// Dedup cache (dedup mode only)
    pub cache: Option<Arc<DedupCache>>,
    /// Process start time
    pub started_at: DateTime<Utc>,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, state: AppState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// Create the router
    fn create_router(state: Arc<AppState>, cors_enabled: bool) -> Router {
        let router = Router::new()
            .route("/health", get(handle_health))
            .route("/status", get(handle_status))
            .route("/stats", get(handle_stats))
            .with_state(state)
            .layer(TraceLayer::new_for_http());

        if cors_enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Start the HTTP server
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let app = Self::create_router(Arc::clone(&self.state), self.config.cors_enabled);

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Response Types ============

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub node_id: String,
}

/// Status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub node_id: String,
    pub method: String,
    pub mode: String,
    pub peers: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
}

/// Stats response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub node_id: String,
    pub replication: StatsSnapshot,
    pub cache: Option<CacheStats>,
}

/// Dedup cache occupancy
#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub evictions: u64,
}

// ============ Handlers ============

async fn handle_health(
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        node_id: state.node_id.clone(),
    })
}

async fn handle_status(
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(StatusResponse {
        node_id: state.node_id.clone(),
        method: state.method.clone(),
        mode: state.mode.to_string(),
        peers: state.peers.clone(),
        started_at: state.started_at,
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
    })
}

async fn handle_stats(
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let cache = state.cache.as_ref().map(|cache| CacheStats {
        entries: cache.len(),
        capacity: cache.capacity(),
        evictions: cache.evictions(),
    });

    Json(StatsResponse {
        node_id: state.node_id.clone(),
        replication: state.stats.snapshot(),
        cache,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::replication::Fingerprint;

    fn state() -> Arc<AppState> {
        let cache = Arc::new(DedupCache::new(8));
        cache.insert(Fingerprint::from_bytes(b"write-1"));

        Arc::new(AppState {
            node_id: "node-1".to_string(),
            method: "Storage.Write".to_string(),
            mode: ReplicationMode::Dedup,
            peers: vec!["10.0.0.2:7654".to_string()],
            stats: Arc::new(ReplicationStats::new()),
            cache: Some(cache),
            started_at: Utc::now(),
        })
    }

    async fn get_json(path: &str) -> serde_json::Value {
        let app = HttpServer::create_router(state(), false);
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let status = get_json("/status").await;
        assert_eq!(status["node_id"], "node-1");
        assert_eq!(status["mode"], "dedup");
        assert_eq!(status["peers"][0], "10.0.0.2:7654");
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let stats = get_json("/stats").await;
        assert_eq!(stats["cache"]["entries"], 1);
        assert_eq!(stats["cache"]["capacity"], 8);
        assert_eq!(stats["replication"]["broadcasts"], 0);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let health = get_json("/health").await;
        assert_eq!(health["healthy"], true);
    }
}
