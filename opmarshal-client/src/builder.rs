//! Marshaller builder.
//!
//! Provides a fluent API for configuring and building a [`Marshaller`].

use std::sync::Arc;

use opmarshal_core::{RuleRegistry, Transform};

use crate::marshaller::Marshaller;
use crate::request::{BoundarySource, RandomBoundary};

/// Builder for creating a [`Marshaller`].
///
/// # Example
///
/// ```
/// use opmarshal_client::{FixedBoundary, MarshallerBuilder};
/// use serde_json::{Value, json};
///
/// let marshaller = MarshallerBuilder::new("https://api.example.com/v1/")
///     .transform("wrap", |v: Value| Ok::<_, opmarshal_core::RuleError>(json!({ "data": v })))
///     .boundary(FixedBoundary("boundary".into()))
///     .build()
///     .unwrap();
/// assert_eq!(marshaller.base_url(), "https://api.example.com/v1");
/// ```
pub struct MarshallerBuilder {
    /// Base URL operation paths are appended to.
    base_url: String,
    registry: RuleRegistry,
    boundary: Arc<dyn BoundarySource>,
    /// Advertise the plan's response media types when the caller sets no preference.
    default_accept: bool,
}

impl std::fmt::Debug for MarshallerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarshallerBuilder")
            .field("base_url", &self.base_url)
            .field("registry", &self.registry)
            .field("default_accept", &self.default_accept)
            .finish_non_exhaustive()
    }
}

impl MarshallerBuilder {
    /// Create a new builder with the given base URL.
    ///
    /// The base URL includes the scheme and host and may carry a path prefix;
    /// a trailing slash is removed.
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            registry: RuleRegistry::new(),
            boundary: Arc::new(RandomBoundary),
            default_accept: true,
        }
    }

    /// Replace the named transform registry.
    pub fn registry(mut self, registry: RuleRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register a named transform, referenced by `Named` encoding rules.
    pub fn transform<T: Transform>(mut self, id: impl Into<String>, transform: T) -> Self {
        self.registry.insert(id, transform);
        self
    }

    /// Set the multipart boundary source.
    ///
    /// Defaults to random boundaries; use [`FixedBoundary`](crate::FixedBoundary)
    /// for reproducible bodies.
    pub fn boundary<B: BoundarySource>(mut self, boundary: B) -> Self {
        self.boundary = Arc::new(boundary);
        self
    }

    /// Whether to send an `Accept` header listing the plan's response media
    /// types when the caller gives no preference. Enabled by default.
    pub fn default_accept(mut self, enabled: bool) -> Self {
        self.default_accept = enabled;
        self
    }

    /// Build the [`Marshaller`].
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::InvalidBaseUrl`] if the base URL is not an
    /// absolute URI with scheme and authority.
    pub fn build(self) -> Result<Marshaller, BuildError> {
        let base_url = self.base_url.trim_end_matches('/').to_owned();
        let uri: http::Uri = base_url
            .parse()
            .map_err(|e: http::uri::InvalidUri| BuildError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(BuildError::InvalidBaseUrl(format!(
                "{base_url}: scheme and host are required"
            )));
        }
        if uri.query().is_some() {
            return Err(BuildError::InvalidBaseUrl(format!(
                "{base_url}: query strings are not allowed"
            )));
        }

        Ok(Marshaller::new(
            base_url,
            self.registry,
            self.boundary,
            self.default_accept,
        ))
    }
}

/// Error type for marshaller building.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}
