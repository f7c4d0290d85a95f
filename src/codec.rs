//! Typed Methods
//!
//! Binds a method name to its request/response payload types so that
//! encoding and decoding are resolved when a route or interceptor is
//! configured rather than on every call.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::rpc::{Request, Response};

/// Encode a payload with bincode
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode a payload with bincode
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// A method name paired with its request and response types
pub struct Method<Req, Resp> {
    name: &'static str,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> Method<Req, Resp> {
    /// Declare a method
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _types: PhantomData,
        }
    }

    /// Method identifier as it appears on the wire
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether a request targets this method
    pub fn matches(&self, request: &Request) -> bool {
        request.method == self.name
    }
}

impl<Req: Serialize, Resp> Method<Req, Resp> {
    /// Build a request envelope for this method
    pub fn request(&self, payload: &Req) -> Result<Request> {
        Ok(Request::new(self.name, encode(payload)?))
    }
}

impl<Req: DeserializeOwned, Resp> Method<Req, Resp> {
    /// Decode the payload of a request addressed to this method
    pub fn decode_request(&self, request: &Request) -> Result<Req> {
        decode(&request.payload).map_err(|e| Error::InvalidPayload {
            method: self.name.to_string(),
            reason: e.to_string(),
        })
    }
}

impl<Req, Resp: Serialize> Method<Req, Resp> {
    /// Build the response envelope answering `request`
    pub fn respond(&self, request: &Request, payload: &Resp) -> Result<Response> {
        Ok(Response::new(request.id, encode(payload)?))
    }
}

impl<Req, Resp: DeserializeOwned> Method<Req, Resp> {
    /// Decode a response produced by this method
    pub fn decode_response(&self, response: &Response) -> Result<Resp> {
        decode(&response.payload)
    }
}

impl<Req, Resp> Clone for Method<Req, Resp> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Req, Resp> Copy for Method<Req, Resp> {}

impl<Req, Resp> fmt::Debug for Method<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Method").field(&self.name).finish()
    }
}
