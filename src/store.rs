//! In-memory key/value store
//!
//! The business handler a relay node serves. Writes are plain puts, so
//! applying the same write twice (once locally, once as a peer's copy)
//! leaves the same state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::codec::Method;
use crate::interceptors::KeyedRequest;
use crate::pipeline::Router;

/// `Storage.Write`
pub const WRITE: Method<WriteRequest, WriteResponse> = Method::new("Storage.Write");
/// `Storage.Read`
pub const READ: Method<ReadRequest, ReadResponse> = Method::new("Storage.Read");
/// `Storage.Delete`
pub const DELETE: Method<DeleteRequest, DeleteResponse> = Method::new("Storage.Delete");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {
    /// Whether the key existed before the write
    pub replaced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResponse {
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub existed: bool,
}

impl KeyedRequest for WriteRequest {
    fn key(&self) -> &str {
        &self.key
    }
}

impl KeyedRequest for ReadRequest {
    fn key(&self) -> &str {
        &self.key
    }
}

impl KeyedRequest for DeleteRequest {
    fn key(&self) -> &str {
        &self.key
    }
}

/// Shared in-memory map
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    writes_applied: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, key: String, value: String) -> bool {
        self.writes_applied.fetch_add(1, Ordering::Relaxed);
        self.entries.write().await.insert(key, value).is_some()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Writes applied locally, including repeated ones
    pub fn writes_applied(&self) -> u64 {
        self.writes_applied.load(Ordering::Relaxed)
    }

    /// Routes for the `Storage.*` methods
    pub fn router(self: Arc<Self>) -> Router {
        let writer = Arc::clone(&self);
        let reader = Arc::clone(&self);
        let deleter = self;

        Router::new()
            .route(WRITE, move |req: WriteRequest| {
                let store = Arc::clone(&writer);
                async move {
                    let replaced = store.put(req.key, req.value).await;
                    Ok(WriteResponse { replaced })
                }
            })
            .route(READ, move |req: ReadRequest| {
                let store = Arc::clone(&reader);
                async move {
                    Ok(ReadResponse {
                        value: store.get(&req.key).await,
                    })
                }
            })
            .route(DELETE, move |req: DeleteRequest| {
                let store = Arc::clone(&deleter);
                async move {
                    Ok(DeleteResponse {
                        existed: store.delete(&req.key).await,
                    })
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{CallContext, Handler};

    #[tokio::test]
    async fn test_store_routes() {
        let store = Arc::new(MemoryStore::new());
        let router = Arc::clone(&store).router();
        let ctx = CallContext::new();

        let write = WRITE
            .request(&WriteRequest {
                key: "mykey".into(),
                value: "myvalue".into(),
            })
            .unwrap();
        let response = router.handle(&ctx, write.clone()).await.unwrap();
        assert!(!WRITE.decode_response(&response).unwrap().replaced);

        // Same write again is harmless
        let response = router.handle(&ctx, write).await.unwrap();
        assert!(WRITE.decode_response(&response).unwrap().replaced);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.writes_applied(), 2);

        let read = READ.request(&ReadRequest { key: "mykey".into() }).unwrap();
        let response = router.handle(&ctx, read).await.unwrap();
        assert_eq!(READ.decode_response(&response).unwrap().value.as_deref(), Some("myvalue"));

        let delete = DELETE.request(&DeleteRequest { key: "mykey".into() }).unwrap();
        let response = router.handle(&ctx, delete).await.unwrap();
        assert!(DELETE.decode_response(&response).unwrap().existed);
        assert!(store.is_empty().await);
    }
}
