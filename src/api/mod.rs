//! HTTP API Module
//!
//! Provides status and replication statistics over HTTP.

mod http;

pub use http::{AppState, HttpServer};
