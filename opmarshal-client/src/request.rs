//! Request types for marshalled operations.
//!
//! This module contains the request-side output:
//! - [`RequestDescriptor`]: Transport-agnostic description of an HTTP request
//! - [`encode_body`]: Encodes a body value by its plan

mod encoder;

pub use encoder::{BoundarySource, EncodedBody, FixedBoundary, RandomBoundary, encode_body};

use bytes::Bytes;
use http::{HeaderMap, Method};

use crate::ApiError;

/// A fully marshalled request, ready to hand to any HTTP transport.
///
/// `headers` already carries the body `Content-Type` and the rendered
/// `Cookie` header; `cookies` lists the same cookies as name/value pairs for
/// transports that manage cookies themselves.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Absolute URL, including the query string.
    pub url: String,
    pub headers: HeaderMap,
    pub cookies: Vec<(String, String)>,
    pub body: Option<EncodedBody>,
}

impl RequestDescriptor {
    /// The body bytes, empty when the request has no body.
    pub fn body_bytes(&self) -> Bytes {
        self.body
            .as_ref()
            .map(|body| body.bytes.clone())
            .unwrap_or_default()
    }

    /// Convert into an [`http::Request`].
    ///
    /// # Errors
    ///
    /// [`ApiError::Encode`] when the URL is not a valid URI.
    pub fn into_http(self) -> Result<http::Request<Bytes>, ApiError> {
        let body = self.body_bytes();
        let mut request = http::Request::builder()
            .method(self.method)
            .uri(self.url.as_str())
            .body(body)
            .map_err(|e| ApiError::Encode(format!("invalid request: {e}")))?;
        *request.headers_mut() = self.headers;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONTENT_TYPE, HeaderValue};

    #[test]
    fn test_into_http() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let descriptor = RequestDescriptor {
            method: Method::POST,
            url: "https://api.example.com/pets?limit=1".into(),
            headers,
            cookies: Vec::new(),
            body: Some(EncodedBody {
                bytes: Bytes::from_static(b"{}"),
                content_type: "application/json".into(),
            }),
        };

        let request = descriptor.into_http().unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri().path(), "/pets");
        assert_eq!(request.uri().query(), Some("limit=1"));
        assert_eq!(request.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(&request.body()[..], b"{}");
    }

    #[test]
    fn test_into_http_rejects_bad_url() {
        let descriptor = RequestDescriptor {
            method: Method::GET,
            url: "not a url".into(),
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            body: None,
        };
        assert!(descriptor.into_http().is_err());
    }
}
