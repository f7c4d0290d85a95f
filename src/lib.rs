//! WolfRelay - Replication Interceptor for RPC Servers
//!
//! A middleware stage for an RPC server's request pipeline that serves each
//! request locally and then copies selected writes to a set of peer nodes,
//! without making the caller wait for the copies.
//!
//! # Architecture
//!
//! Requests flow through a [`pipeline::Pipeline`]: ordered interceptors in
//! front of a terminal handler. [`replication::ReplicationInterceptor`]
//! fingerprints the payload of its target method, invokes the rest of the
//! chain, and on the first sighting of a fingerprint hands a copy to a
//! detached [`replication::Broadcaster`]. Peers receiving that copy see the
//! same fingerprint again only if it loops back, and stop there.
//! [`interceptors`] holds the general-purpose stages a node puts in front.
//!
//! # Guarantees
//!
//! Replication is best-effort and fire-and-forget: no acknowledgement, no
//! retries, no ordering across nodes. Only the local handler's outcome is
//! visible to the caller. Handlers are expected to apply repeated writes
//! idempotently.

pub mod api;
pub mod codec;
pub mod config;
pub mod error;
pub mod interceptors;
pub mod node;
pub mod pipeline;
pub mod replication;
pub mod rpc;
pub mod store;

pub use config::RelayConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::codec::Method;
    pub use crate::config::RelayConfig;
    pub use crate::error::{Error, Result};
    pub use crate::interceptors::{
        DelayInterceptor, KeyedRequest, LoggingInterceptor, MetadataInterceptor, RejectKeysInterceptor,
        TimeoutInterceptor,
    };
    pub use crate::node::RelayNode;
    pub use crate::pipeline::{CallContext, Handler, Interceptor, Next, Pipeline, Router};
    pub use crate::replication::{
        Broadcaster, BroadcastOptions, DedupCache, Fingerprint, PeerCaller, ReplicationInterceptor,
        SelectiveInterceptor,
    };
    pub use crate::rpc::{Request, Response, RpcClient, RpcServer};
}
