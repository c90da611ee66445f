//! Response types for marshalled operations.
//!
//! This module provides the [`ApiResponse`] type which wraps a decoded body
//! along with the response status and metadata (headers), and the response
//! side decoders:
//! - [`decode_body`]: Decodes a complete body by a variant's strategy
//! - [`SseDecoder`]: Parses a `text/event-stream` byte stream into events

mod decoder;
mod sse;

pub use decoder::decode_body;
pub use sse::{DecoderState, SseDecoder};

use std::ops::Deref;

use base64::Engine;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde_json::Value;

/// A decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Structured value (JSON, form, XML or record streams).
    Json(Value),
    Text(String),
    Binary(Bytes),
    /// The response carried no body.
    Empty,
}

impl Payload {
    /// Convert into a JSON value.
    ///
    /// Binary payloads become base64 strings, empty payloads become `null`.
    pub fn into_value(self) -> Value {
        match self {
            Payload::Json(value) => value,
            Payload::Text(text) => Value::String(text),
            Payload::Binary(bytes) => {
                Value::String(base64::engine::general_purpose::STANDARD.encode(&bytes))
            }
            Payload::Empty => Value::Null,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Payload::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }
}

/// Response wrapper for marshalled calls.
///
/// Contains the decoded body, the status and the response metadata.
///
/// # Example
///
/// ```ignore
/// let response = marshaller.consume_response(&plan, None, http_response)?;
///
/// // Access the payload directly via Deref
/// if let Some(pet) = response.as_json() {
///     println!("{pet}");
/// }
///
/// // Access response metadata (headers)
/// if let Some(value) = response.metadata().get("x-rate-limit") {
///     println!("Remaining: {value}");
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    inner: T,
    status: StatusCode,
    metadata: Metadata,
}

impl<T> ApiResponse<T> {
    pub fn new(inner: T, status: StatusCode, metadata: Metadata) -> Self {
        Self {
            inner,
            status,
            metadata,
        }
    }

    /// Extract the inner value, discarding status and metadata.
    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Transform the inner value, preserving status and metadata.
    pub fn map<U, F>(self, f: F) -> ApiResponse<U>
    where
        F: FnOnce(T) -> U,
    {
        ApiResponse {
            inner: f(self.inner),
            status: self.status,
            metadata: self.metadata,
        }
    }

    /// Transform the inner value with a fallible function.
    pub fn try_map<U, E, F>(self, f: F) -> Result<ApiResponse<U>, E>
    where
        F: FnOnce(T) -> Result<U, E>,
    {
        Ok(ApiResponse {
            inner: f(self.inner)?,
            status: self.status,
            metadata: self.metadata,
        })
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Decompose into inner value and metadata.
    pub fn into_parts(self) -> (T, Metadata) {
        (self.inner, self.metadata)
    }
}

impl<T> Deref for ApiResponse<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> AsRef<T> for ApiResponse<T> {
    fn as_ref(&self) -> &T {
        &self.inner
    }
}

/// Response metadata wrapper around HTTP headers.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    headers: HeaderMap,
}

impl Metadata {
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Get a header value by name.
    ///
    /// Returns `None` if the header is not present or is not valid UTF-8.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        self.headers.get(key).map(|v| v.as_bytes())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.headers.contains_key(key)
    }

    /// Get all values for a header (for headers that appear multiple times).
    pub fn get_all(&self, key: &str) -> impl Iterator<Item = &str> {
        self.headers
            .get_all(key)
            .iter()
            .filter_map(|v| v.to_str().ok())
    }

    /// The response `Content-Type`, if present.
    pub fn content_type(&self) -> Option<&str> {
        self.get(http::header::CONTENT_TYPE.as_str())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn into_headers(self) -> HeaderMap {
        self.headers
    }

    pub fn iter(&self) -> impl Iterator<Item = (&http::header::HeaderName, &http::header::HeaderValue)> {
        self.headers.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }
}

impl From<HeaderMap> for Metadata {
    fn from(headers: HeaderMap) -> Self {
        Self::new(headers)
    }
}

impl From<Metadata> for HeaderMap {
    fn from(metadata: Metadata) -> Self {
        metadata.headers
    }
}
