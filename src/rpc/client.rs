//! RPC Client
//!
//! TCP client for calling other nodes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;

use super::{read_frame, write_frame, Reply, Request, Response};
use crate::error::{Error, Result};
use crate::replication::PeerCaller;

/// Connection pool entry
struct PoolEntry {
    stream: TcpStream,
    last_used: Instant,
}

/// RPC client for calling peer nodes
pub struct RpcClient {
    /// Connection pool: address -> connection
    pool: RwLock<HashMap<String, Arc<Mutex<PoolEntry>>>>,
    /// Connection timeout
    connect_timeout: Duration,
    /// Request timeout
    request_timeout: Duration,
}

impl RpcClient {
    /// Create a new RPC client
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            pool: RwLock::new(HashMap::new()),
            connect_timeout,
            request_timeout,
        }
    }

    /// Send a request to a peer and wait for its response
    pub async fn send(&self, address: &str, request: Request) -> Result<Response> {
        let result = timeout(self.request_timeout, self.exchange(address, &request)).await;

        match result {
            Ok(Ok(Reply::Success(response))) => Ok(response),
            Ok(Ok(Reply::Failure { code, message, .. })) => Err(Error::Remote { code, message }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }

    /// Send without timeout wrapper
    async fn exchange(&self, address: &str, request: &Request) -> Result<Reply> {
        // Try to reuse an existing connection
        if let Some(entry) = self.get_connection(address).await {
            let mut entry = entry.lock().await;

            match round_trip(&mut entry.stream, request).await {
                Ok(reply) => {
                    entry.last_used = Instant::now();
                    return Ok(reply);
                }
                Err(e) => {
                    // Connection is dead, remove and reconnect
                    tracing::debug!("Pooled connection to {} failed: {}", address, e);
                    drop(entry);
                    self.remove_connection(address).await;
                }
            }
        }

        // Create new connection
        let mut stream = self.connect(address).await?;
        let reply = round_trip(&mut stream, request).await?;
        self.store_connection(address.to_string(), stream).await;

        Ok(reply)
    }

    /// Connect to an address
    async fn connect(&self, address: &str) -> Result<TcpStream> {
        let result = timeout(self.connect_timeout, TcpStream::connect(address)).await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }

    /// Get a connection from the pool
    async fn get_connection(&self, address: &str) -> Option<Arc<Mutex<PoolEntry>>> {
        let pool = self.pool.read().await;
        pool.get(address).cloned()
    }

    /// Store a connection in the pool
    async fn store_connection(&self, address: String, stream: TcpStream) {
        let mut pool = self.pool.write().await;

        pool.insert(address, Arc::new(Mutex::new(PoolEntry {
            stream,
            last_used: Instant::now(),
        })));
    }

    /// Remove a connection from the pool
    async fn remove_connection(&self, address: &str) {
        let mut pool = self.pool.write().await;
        pool.remove(address);
    }

    /// Clean up stale connections
    pub async fn cleanup_stale(&self, max_idle: Duration) {
        let mut pool = self.pool.write().await;
        let now = Instant::now();

        pool.retain(|addr, entry| {
            if let Ok(e) = entry.try_lock() {
                if now.duration_since(e.last_used) > max_idle {
                    tracing::debug!("Removing stale connection to {}", addr);
                    return false;
                }
            }
            true
        });
    }

    /// Close all connections
    pub async fn close_all(&self) {
        let mut pool = self.pool.write().await;
        pool.clear();
    }

    /// Get connection count
    pub async fn connection_count(&self) -> usize {
        self.pool.read().await.len()
    }
}

#[async_trait]
impl PeerCaller for RpcClient {
    async fn call(&self, peer: &str, request: Request) -> Result<Response> {
        self.send(peer, request).await
    }
}

/// Write one request and read its reply
///
/// A reply for a different request means the stream carries a leftover
/// from an abandoned call and cannot be trusted.
async fn round_trip(stream: &mut TcpStream, request: &Request) -> Result<Reply> {
    let (mut reader, mut writer) = stream.split();
    write_frame(&mut writer, request).await?;
    let reply: Reply = read_frame(&mut reader).await?;

    if reply.request_id() != request.id {
        return Err(Error::Network(format!(
            "reply for {} while waiting on {}",
            reply.request_id(),
            request.id
        )));
    }

    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation() {
        let client = RpcClient::new(
            Duration::from_secs(5),
            Duration::from_secs(10),
        );

        assert_eq!(client.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_connection_failure() {
        let client = RpcClient::new(
            Duration::from_millis(100),
            Duration::from_millis(500),
        );

        // Nothing listens on port 1
        let result = client.send("127.0.0.1:1", Request::new("Storage.Read", vec![])).await;
        assert!(result.is_err());
        assert_eq!(client.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_stale_connections_removed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let client = RpcClient::new(Duration::from_secs(1), Duration::from_secs(1));
        let stream = TcpStream::connect(&address).await.unwrap();
        client.store_connection(address.clone(), stream).await;
        assert_eq!(client.connection_count().await, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        client.cleanup_stale(Duration::from_millis(1)).await;
        assert_eq!(client.connection_count().await, 0);
    }
}
