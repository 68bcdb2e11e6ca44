//! Unary call response type and the [`IntoResponse`] conversion trait.
//!
//! You should not need to think about this module directly. Build a
//! [`Response`] in your handler and return it, or return anything that
//! converts into one.

use bytes::Bytes;

use crate::metadata::Metadata;
use crate::status::Status;

// ── Response ─────────────────────────────────────────────────────────────────

/// The successful outcome of a unary call: an opaque payload plus response
/// metadata (headers the server wants the caller to see).
///
/// ```rust
/// use conduit::Response;
///
/// Response::new("hello");
///
/// Response::builder()
///     .header("hostname", "node-1")
///     .payload(b"hello".to_vec());
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Response {
    pub(crate) payload: Bytes,
    pub(crate) metadata: Metadata,
}

impl Response {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self { payload: payload.into(), metadata: Metadata::new() }
    }

    /// Builder for responses that carry headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: Vec::new() }
    }

    pub fn payload(&self) -> &Bytes { &self.payload }
    pub fn metadata(&self) -> &Metadata { &self.metadata }
    pub fn metadata_mut(&mut self) -> &mut Metadata { &mut self.metadata }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Terminated by [`payload`](Self::payload),
/// which fails only if a header name or value is not valid metadata.
pub struct ResponseBuilder {
    headers: Vec<(String, String)>,
}

impl ResponseBuilder {
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn payload(self, payload: impl Into<Bytes>) -> Result<Response, Status> {
        Ok(Response {
            payload: payload.into(),
            metadata: Metadata::from_pairs(self.headers)?,
        })
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into a unary [`Response`].
///
/// Implement on your own message types to return them directly from
/// handlers, typically by serialising into the payload.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for Bytes {
    fn into_response(self) -> Response { Response::new(self) }
}

impl IntoResponse for Vec<u8> {
    fn into_response(self) -> Response { Response::new(self) }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::new(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::new(self) }
}
