//! Test doubles for the outbound side of replication.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::broadcast::PeerCaller;
use crate::error::{Error, Result};
use crate::rpc::{Request, Response};

/// Records every outbound call; peers can be made to fail, hang or lag
#[derive(Default)]
pub struct RecordingCaller {
    calls: Mutex<Vec<(String, Request)>>,
    delivered: Mutex<Vec<String>>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    latency: Duration,
}

impl RecordingCaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, peer: &str) -> Self {
        self.failing.insert(peer.to_string());
        self
    }

    pub fn hanging(mut self, peer: &str) -> Self {
        self.hanging.insert(peer.to_string());
        self
    }

    /// Delay applied to every successful call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<(String, Request)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Peers that completed a call, sorted
    pub fn delivered_to(&self) -> Vec<String> {
        let mut peers = self.delivered.lock().unwrap().clone();
        peers.sort();
        peers
    }

    /// Poll until `n` calls were delivered or `within` elapses
    pub async fn wait_for_deliveries(&self, n: usize, within: Duration) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let delivered = self.delivered_to();
            if delivered.len() >= n || tokio::time::Instant::now() >= deadline {
                return delivered;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl PeerCaller for RecordingCaller {
    async fn call(&self, peer: &str, request: Request) -> Result<Response> {
        self.calls.lock().unwrap().push((peer.to_string(), request.clone()));

        if self.hanging.contains(peer) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.contains(peer) {
            return Err(Error::ConnectionFailed {
                address: peer.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.delivered.lock().unwrap().push(peer.to_string());
        Ok(Response::new(request.id, Vec::new()))
    }
}
