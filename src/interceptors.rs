//! General-purpose Interceptors
//!
//! Stages a node stacks in front of its replication stage: request logging,
//! a per-call time limit, an artificial delay, metadata stamping and key
//! rejection.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::codec::Method;
use crate::error::{Error, Result};
use crate::pipeline::{CallContext, Interceptor, Next};
use crate::rpc::{Metadata, Request, Response};

/// A request payload addressed by a single key
pub trait KeyedRequest {
    fn key(&self) -> &str;
}

/// Logs each call and its outcome, tagged with a node label
pub struct LoggingInterceptor {
    label: String,
}

impl LoggingInterceptor {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(&self, ctx: &CallContext, request: Request, next: Next<'_>) -> Result<Response> {
        let method = request.method.clone();
        let id = request.id;
        tracing::debug!(
            "[{}] {} {} from {} ({} byte payload)",
            self.label,
            method,
            id,
            ctx.peer().unwrap_or("local"),
            request.payload.len()
        );

        let result = next.run(ctx, request).await;

        match &result {
            Ok(response) => tracing::info!(
                "[{}] {} {} ok in {:?} ({} byte reply)",
                self.label,
                method,
                id,
                ctx.elapsed(),
                response.payload.len()
            ),
            Err(e) => tracing::warn!("[{}] {} {} failed after {:?}: {}", self.label, method, id, ctx.elapsed(), e),
        }
        result
    }
}

/// Fails a call whose remaining chain runs longer than `limit`
///
/// The inner chain is dropped at the limit. Stages behind this one must not
/// rely on running to completion.
pub struct TimeoutInterceptor {
    limit: Duration,
}

impl TimeoutInterceptor {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }
}

#[async_trait]
impl Interceptor for TimeoutInterceptor {
    async fn intercept(&self, ctx: &CallContext, request: Request, next: Next<'_>) -> Result<Response> {
        let method = request.method.clone();

        match tokio::time::timeout(self.limit, next.run(ctx, request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("{} gave up after {:?}", method, self.limit);
                Err(Error::Timeout(format!("{} exceeded {:?}", method, self.limit)))
            }
        }
    }
}

/// Holds every call back for a fixed time before continuing
pub struct DelayInterceptor {
    delay: Duration,
}

impl DelayInterceptor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Interceptor for DelayInterceptor {
    async fn intercept(&self, ctx: &CallContext, request: Request, next: Next<'_>) -> Result<Response> {
        tracing::debug!("Delaying {} {} by {:?}", request.method, request.id, self.delay);

        tokio::select! {
            _ = ctx.cancellation().cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(self.delay) => {}
        }
        next.run(ctx, request).await
    }
}

/// Stamps fixed metadata entries onto every request
///
/// Existing entries with the same key are overwritten. Metadata is not part
/// of a request's fingerprint, so stamping never affects dedup.
pub struct MetadataInterceptor {
    entries: Metadata,
}

impl MetadataInterceptor {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut entries = Metadata::new();
        entries.insert(key.into(), value.into());
        Self { entries }
    }

    pub fn with_entries(entries: Metadata) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl Interceptor for MetadataInterceptor {
    async fn intercept(&self, ctx: &CallContext, mut request: Request, next: Next<'_>) -> Result<Response> {
        for (key, value) in &self.entries {
            request.metadata.insert(key.clone(), value.clone());
        }
        next.run(ctx, request).await
    }
}

/// Refuses calls of one method that address any of a set of keys
///
/// Payloads that do not decode are left for the handler to reject.
pub struct RejectKeysInterceptor<Req, Resp> {
    method: Method<Req, Resp>,
    keys: HashSet<String>,
}

impl<Req, Resp> RejectKeysInterceptor<Req, Resp> {
    pub fn new<I, S>(method: Method<Req, Resp>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl<Req, Resp> Interceptor for RejectKeysInterceptor<Req, Resp>
where
    Req: KeyedRequest + DeserializeOwned + Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    async fn intercept(&self, ctx: &CallContext, request: Request, next: Next<'_>) -> Result<Response> {
        if self.method.matches(&request) {
            if let Ok(payload) = self.method.decode_request(&request) {
                if self.keys.contains(payload.key()) {
                    tracing::warn!("Rejecting {} for key '{}'", request.method, payload.key());
                    return Err(Error::Rejected(format!(
                        "requests for key '{}' are not allowed",
                        payload.key()
                    )));
                }
            }
        }
        next.run(ctx, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;

    use serde::{Deserialize, Serialize};

    use crate::pipeline::{Handler, Pipeline};
    use crate::rpc::ErrorCode;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Put {
        key: String,
    }

    impl KeyedRequest for Put {
        fn key(&self) -> &str {
            &self.key
        }
    }

    const PUT: Method<Put, ()> = Method::new("Storage.Write");

    /// Keeps the last request it was handed
    #[derive(Default)]
    struct Capture {
        last: Mutex<Option<Request>>,
    }

    #[async_trait]
    impl Handler for Capture {
        async fn handle(&self, _ctx: &CallContext, request: Request) -> Result<Response> {
            let response = Response::new(request.id, Vec::new());
            *self.last.lock().unwrap() = Some(request);
            Ok(response)
        }
    }

    fn put(key: &str) -> Request {
        PUT.request(&Put { key: key.to_string() }).unwrap()
    }

    #[tokio::test]
    async fn test_metadata_stamped_before_handler() {
        let capture = Arc::new(Capture::default());
        let pipeline = Pipeline::new(capture.clone())
            .with(Arc::new(MetadataInterceptor::new("customKey", "customValue")));

        let request = put("a").with_metadata("customKey", "old").with_metadata("other", "kept");
        pipeline.dispatch(&CallContext::new(), request).await.unwrap();

        let seen = capture.last.lock().unwrap().clone().unwrap();
        assert_eq!(seen.metadata.get("customKey").map(String::as_str), Some("customValue"));
        assert_eq!(seen.metadata.get("other").map(String::as_str), Some("kept"));
    }

    #[tokio::test]
    async fn test_rejected_key_never_reaches_handler() {
        let capture = Arc::new(Capture::default());
        let pipeline = Pipeline::new(capture.clone()).with(Arc::new(RejectKeysInterceptor::new(PUT, ["foo"])));
        let ctx = CallContext::new();

        let err = pipeline.dispatch(&ctx, put("foo")).await.unwrap_err();
        assert!(matches!(err, Error::Rejected(ref m) if m.contains("'foo'")));
        assert_eq!(err.code(), ErrorCode::Rejected);
        assert!(capture.last.lock().unwrap().is_none());

        pipeline.dispatch(&ctx, put("bar")).await.unwrap();
        assert!(capture.last.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reject_ignores_other_methods() {
        let capture = Arc::new(Capture::default());
        let pipeline = Pipeline::new(capture.clone()).with(Arc::new(RejectKeysInterceptor::new(PUT, ["foo"])));

        // Same payload shape under another method name
        let mut request = put("foo");
        request.method = "Storage.Read".to_string();
        pipeline.dispatch(&CallContext::new(), request).await.unwrap();
        assert!(capture.last.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_timeout_fails_slow_chain() {
        let pipeline = Pipeline::new(Arc::new(Capture::default()))
            .with(Arc::new(TimeoutInterceptor::new(Duration::from_millis(20))))
            .with(Arc::new(DelayInterceptor::new(Duration::from_millis(500))));

        let err = pipeline.dispatch(&CallContext::new(), put("a")).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.code(), ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn test_timeout_passes_fast_chain() {
        let capture = Arc::new(Capture::default());
        let pipeline = Pipeline::new(capture.clone())
            .with(Arc::new(TimeoutInterceptor::new(Duration::from_secs(1))))
            .with(Arc::new(DelayInterceptor::new(Duration::from_millis(10))));

        pipeline.dispatch(&CallContext::new(), put("a")).await.unwrap();
        assert!(capture.last.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delay_stops_on_cancel() {
        let capture = Arc::new(Capture::default());
        let pipeline = Pipeline::new(capture.clone()).with(Arc::new(DelayInterceptor::new(Duration::from_secs(60))));
        let ctx = CallContext::new();

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = pipeline.dispatch(&ctx, put("a")).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(capture.last.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logging_is_transparent() {
        let capture = Arc::new(Capture::default());
        let pipeline = Pipeline::new(capture.clone()).with(Arc::new(LoggingInterceptor::new("node-1")));

        let request = put("a");
        let id = request.id;
        let response = pipeline
            .dispatch(&CallContext::from_peer("10.0.0.9:4000"), request)
            .await
            .unwrap();
        assert_eq!(response.request_id, id);

        let failing = Pipeline::new(capture)
            .with(Arc::new(LoggingInterceptor::new("node-1")))
            .with(Arc::new(RejectKeysInterceptor::new(PUT, ["a"])));
        let err = failing.dispatch(&CallContext::new(), put("a")).await.unwrap_err();
        assert!(matches!(err, Error::Rejected(_)));
    }
}
