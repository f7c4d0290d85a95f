//! Request Pipeline
//!
//! The interception contract: a terminal [`Handler`] wrapped by an ordered
//! list of [`Interceptor`] stages. Each stage receives a [`Next`] that runs
//! the rest of the chain, so stages compose by wrapping one another in
//! registration order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::codec::Method;
use crate::error::{Error, Result};
use crate::rpc::{Request, Response};

/// Per-call context handed down the chain
///
/// The transport cancels the token once the response has been written, so
/// anything that must outlive the call cannot hang off it.
#[derive(Debug, Clone)]
pub struct CallContext {
    peer: Option<String>,
    received_at: Instant,
    cancel: CancellationToken,
}

impl CallContext {
    /// Context for a locally originated call
    pub fn new() -> Self {
        Self {
            peer: None,
            received_at: Instant::now(),
            cancel: CancellationToken::new(),
        }
    }

    /// Context for a call received from `peer`
    pub fn from_peer(peer: impl Into<String>) -> Self {
        Self {
            peer: Some(peer.into()),
            ..Self::new()
        }
    }

    /// Remote address of the caller, if any
    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    /// Time since the call was received
    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Tear the call down
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminal request handler
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &CallContext, request: Request) -> Result<Response>;
}

/// A middleware stage
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Inspect or transform `request`, calling `next` to continue the chain
    async fn intercept(&self, ctx: &CallContext, request: Request, next: Next<'_>) -> Result<Response>;
}

/// The remainder of the chain, as seen from one stage
#[derive(Clone, Copy)]
pub struct Next<'a> {
    interceptors: &'a [Arc<dyn Interceptor>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    /// Run the remaining stages and the terminal handler
    pub async fn run(self, ctx: &CallContext, request: Request) -> Result<Response> {
        match self.interceptors.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    interceptors: rest,
                    handler: self.handler,
                };
                stage.intercept(ctx, request, next).await
            }
            None => self.handler.handle(ctx, request).await,
        }
    }
}

/// Ordered interceptors in front of a terminal handler
pub struct Pipeline {
    interceptors: Vec<Arc<dyn Interceptor>>,
    handler: Arc<dyn Handler>,
}

impl Pipeline {
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self {
            interceptors: Vec::new(),
            handler,
        }
    }

    /// Register a stage; earlier registrations wrap later ones
    pub fn with(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Number of registered stages
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run a request through the whole chain
    ///
    /// A context that is already cancelled is refused before any stage runs.
    pub async fn dispatch(&self, ctx: &CallContext, request: Request) -> Result<Response> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let next = Next {
            interceptors: &self.interceptors,
            handler: self.handler.as_ref(),
        };
        next.run(ctx, request).await
    }
}

type Route = Arc<dyn Fn(Request) -> BoxFuture<'static, Result<Response>> + Send + Sync>;

/// Terminal handler dispatching on the method identifier
#[derive(Default, Clone)]
pub struct Router {
    routes: HashMap<&'static str, Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler for `method`
    pub fn route<Req, Resp, F, Fut>(mut self, method: Method<Req, Resp>, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let route: Route = Arc::new(move |request: Request| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let payload = method.decode_request(&request)?;
                let result = handler(payload).await?;
                method.respond(&request, &result)
            })
        });
        self.routes.insert(method.name(), route);
        self
    }

    /// Registered method names
    pub fn methods(&self) -> Vec<&'static str> {
        let mut methods: Vec<_> = self.routes.keys().copied().collect();
        methods.sort_unstable();
        methods
    }
}

#[async_trait]
impl Handler for Router {
    async fn handle(&self, _ctx: &CallContext, request: Request) -> Result<Response> {
        let route = self
            .routes
            .get(request.method.as_str())
            .cloned()
            .ok_or_else(|| Error::UnknownMethod(request.method.clone()))?;
        route(request).await
    }
}
