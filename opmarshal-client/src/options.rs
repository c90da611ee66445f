//! Per-call arguments.
//!
//! This module provides [`CallArgs`]: the runtime values of one invocation
//! (parameter values, body, security values, extra headers and response
//! preference).

use std::collections::HashMap;

use serde_json::Value;

/// Runtime values for one marshalled call.
///
/// Parameters and security values are keyed by their plan names (parameter
/// name and security scheme id). Security values are pre-computed credentials
/// and are attached verbatim.
///
/// # Example
///
/// ```
/// use opmarshal_client::CallArgs;
/// use serde_json::json;
///
/// let args = CallArgs::new()
///     .param("petId", 42)
///     .param("tags", json!(["a", "b"]))
///     .body(json!({"name": "Rex"}))
///     .security("bearerAuth", "token123")
///     .header("x-request-id", "abc-123")
///     .accept("application/xml");
///
/// assert_eq!(args.get_param("petId"), Some(&json!(42)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub(crate) params: HashMap<String, Value>,
    pub(crate) body: Option<Value>,
    pub(crate) security: HashMap<String, String>,
    /// Extra headers, validated when the request is built.
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) accept: Option<String>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value of a parameter, by its plan name.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Supply the credential for a security scheme id.
    pub fn security(mut self, scheme_id: impl Into<String>, value: impl Into<String>) -> Self {
        self.security.insert(scheme_id.into(), value.into());
        self
    }

    /// Add an extra request header.
    ///
    /// Extra headers never replace headers set by the engine (parameters,
    /// body content type, `Accept`, credentials).
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the response media type preference, in `Accept` header syntax.
    pub fn accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    pub fn get_param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn get_body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn get_accept(&self) -> Option<&str> {
        self.accept.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_args_builder() {
        let args = CallArgs::new()
            .param("id", 1)
            .param("id", 2)
            .param("q", "x")
            .body(json!([1]))
            .header("x-a", "1")
            .header("x-a", "2");

        assert_eq!(args.get_param("id"), Some(&json!(2)));
        assert_eq!(args.get_param("q"), Some(&json!("x")));
        assert_eq!(args.get_body(), Some(&json!([1])));
        assert_eq!(args.headers.len(), 2);
        assert_eq!(args.get_accept(), None);
    }
}
