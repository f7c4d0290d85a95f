//! RPC Protocol
//!
//! Defines the envelopes exchanged between nodes and the frame header
//! that wraps them on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request-scoped metadata, appended to by interceptor stages
pub type Metadata = BTreeMap<String, String>;

/// Inbound/outbound request envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Per-call identifier (changes on every hop)
    pub id: Uuid,
    /// Method identifier, e.g. `Storage.Write`
    pub method: String,
    /// bincode-encoded application payload
    pub payload: Vec<u8>,
    /// Request metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl Request {
    /// Create a request with a fresh id and empty metadata
    pub fn new(method: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            payload,
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Successful response envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request this answers
    pub request_id: Uuid,
    /// bincode-encoded application payload
    pub payload: Vec<u8>,
    /// Response metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl Response {
    /// Create a response for the given request
    pub fn new(request_id: Uuid, payload: Vec<u8>) -> Self {
        Self {
            request_id,
            payload,
            metadata: Metadata::new(),
        }
    }
}

/// What the server writes back for every request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reply {
    /// Handler produced a response
    Success(Response),
    /// Handler (or the pipeline) failed
    Failure {
        request_id: Uuid,
        code: ErrorCode,
        message: String,
    },
}

impl Reply {
    /// Id of the request this reply answers
    pub fn request_id(&self) -> Uuid {
        match self {
            Reply::Success(response) => response.request_id,
            Reply::Failure { request_id, .. } => *request_id,
        }
    }
}

/// Error codes for failed calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// No route for the method
    UnknownMethod,
    /// Payload could not be decoded
    InvalidPayload,
    /// Business handler rejected the call
    Handler,
    /// A pipeline stage refused the call
    Rejected,
    /// Timeout
    Timeout,
    /// Node is shutting down
    Unavailable,
    /// Internal error
    Internal,
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Body length
    pub length: u32,
    /// CRC32 of the body
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Largest body we accept (16 MiB)
    pub const MAX_BODY: u32 = 16 * 1024 * 1024;

    /// Create a header describing `data`
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let [l0, l1, l2, l3, c0, c1, c2, c3] = *bytes;
        Self {
            length: u32::from_le_bytes([l0, l1, l2, l3]),
            checksum: u32::from_le_bytes([c0, c1, c2, c3]),
        }
    }
}
