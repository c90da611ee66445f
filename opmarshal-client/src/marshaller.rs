//! Operation marshaller.
//!
//! This module provides the main [`Marshaller`] type: it turns an
//! [`OperationPlan`] plus [`CallArgs`] into a [`RequestDescriptor`], and a
//! received response back into a decoded payload, an error, or an event
//! stream.

use std::collections::{HashMap, HashSet};
use std::pin::pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{self, Either};
use futures::{Stream, StreamExt};
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue};
use opmarshal_core::{
    ApiKeyLocation, HttpAuthScheme, OperationPlan, ParameterPlan, ResponsePlan, ResponseVariant,
    RuleRegistry, SecurityRequirement, SecurityScheme,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
#[cfg(feature = "tracing")]
use tracing::info_span;

use crate::ApiError;
use crate::builder::MarshallerBuilder;
use crate::cancel::CancelToken;
use crate::error_parser::parse_error_response;
use crate::negotiate::{accept_header, select};
use crate::options::CallArgs;
use crate::param::{SerializedParameter, join_query, serialize};
use crate::request::{BoundarySource, RequestDescriptor, encode_body};
use crate::response::{ApiResponse, Metadata, Payload, SseDecoder, decode_body};
use crate::streaming::Streaming;

const EVENT_STREAM: &str = "text/event-stream";

/// Marshals requests and responses of planned operations.
///
/// A `Marshaller` is immutable and cheap to clone; plans and the transform
/// registry are shared read-only across concurrent calls. It performs no I/O:
/// the caller sends the [`RequestDescriptor`] with any HTTP transport and
/// hands the response back.
///
/// # Example
///
/// ```
/// use http::Method;
/// use opmarshal_client::{CallArgs, Marshaller};
/// use opmarshal_core::{OperationPlan, ParameterPlan, ResponseVariant};
///
/// let plan = OperationPlan::builder("getPet", Method::GET, "/pets/{petId}")
///     .parameter(ParameterPlan::path("petId").build()?)
///     .variant(ResponseVariant::new("application/json"))
///     .build()?;
///
/// let marshaller = Marshaller::builder("https://api.example.com").build().unwrap();
/// let request = marshaller
///     .build_request(&plan, &CallArgs::new().param("petId", 42))
///     .unwrap();
/// assert_eq!(request.url, "https://api.example.com/pets/42");
///
/// let response = http::Response::builder()
///     .header("content-type", "application/json")
///     .body(bytes::Bytes::from_static(br#"{"id":42}"#))
///     .unwrap();
/// let pet = marshaller.consume_response(&plan, None, response).unwrap();
/// assert_eq!(pet.as_json().unwrap()["id"], 42);
/// # Ok::<(), opmarshal_core::PlanError>(())
/// ```
#[derive(Clone)]
pub struct Marshaller {
    base_url: String,
    registry: RuleRegistry,
    boundary: Arc<dyn BoundarySource>,
    default_accept: bool,
}

impl std::fmt::Debug for Marshaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Marshaller")
            .field("base_url", &self.base_url)
            .field("registry", &self.registry)
            .field("default_accept", &self.default_accept)
            .finish_non_exhaustive()
    }
}

/// Request parts collected from parameters and credentials.
#[derive(Default)]
struct Collected {
    segments: HashMap<String, String>,
    query: Vec<(String, String)>,
    fragment: Option<String>,
    headers: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
}

impl Collected {
    fn add(&mut self, wire_name: &str, serialized: SerializedParameter) {
        match serialized {
            SerializedParameter::PathSegment(segment) => {
                self.segments.insert(wire_name.to_owned(), segment);
            }
            SerializedParameter::QueryEntries(entries) => self.query.extend(entries),
            SerializedParameter::HeaderValue(value) => self.headers.push((wire_name.to_owned(), value)),
            SerializedParameter::CookieValues(pairs) => self.cookies.extend(pairs),
            SerializedParameter::QueryFragment(fragment) => self.fragment = Some(fragment),
        }
    }

    /// Add a credential header, replacing any parameter header of the same name.
    fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_owned(), value));
    }
}

impl Marshaller {
    /// Create a new [`MarshallerBuilder`] with the given base URL.
    pub fn builder<S: Into<String>>(base_url: S) -> MarshallerBuilder {
        MarshallerBuilder::new(base_url)
    }

    pub(crate) fn new(
        base_url: String,
        registry: RuleRegistry,
        boundary: Arc<dyn BoundarySource>,
        default_accept: bool,
    ) -> Self {
        Self {
            base_url,
            registry,
            boundary,
            default_accept,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Build the request for one invocation of `plan`.
    ///
    /// # Errors
    ///
    /// Fails before any request exists when a parameter or the body cannot
    /// be encoded, a required value is missing, or no security alternative
    /// is satisfied by the supplied credentials.
    pub fn build_request(&self, plan: &OperationPlan, args: &CallArgs) -> Result<RequestDescriptor, ApiError> {
        #[cfg(feature = "tracing")]
        let _span = info_span!(
            "api.request",
            operation = %plan.operation_id(),
            http.method = %plan.method(),
            otel.kind = "client",
        )
        .entered();

        let mut collected = Collected::default();
        for parameter in plan.parameters() {
            if let Some(serialized) = serialize(parameter, args.params.get(parameter.name()), &self.registry)? {
                collected.add(parameter.wire_name(), serialized);
            }
        }
        if let Some(requirement) = satisfied_requirement(plan, args)? {
            self.attach_security(requirement, args, &mut collected)?;
        }

        let url = self.url(plan.path(), &collected)?;

        let body = match (plan.body(), args.body.as_ref().filter(|v| !v.is_null())) {
            (Some(body_plan), Some(value)) => Some(encode_body(body_plan, value, &self.registry, self.boundary.as_ref())?),
            (Some(body_plan), None) if body_plan.is_required() => {
                return Err(ApiError::MissingRequiredParameter { name: "body".into() });
            }
            (None, Some(_)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(operation = %plan.operation_id(), "ignoring body for operation without a body plan");
                None
            }
            _ => None,
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &collected.headers {
            headers.append(header_name(name)?, header_value(name, value)?);
        }
        if let Some(body) = &body {
            headers.insert(CONTENT_TYPE, header_value("content-type", &body.content_type)?);
        }
        if let Some(accept) = self.accept(plan, args) {
            headers.insert(ACCEPT, header_value("accept", &accept)?);
        }
        if !collected.cookies.is_empty() {
            let rendered = collected
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            headers.insert(COOKIE, header_value("cookie", &rendered)?);
        }

        let engine_owned: HashSet<HeaderName> = headers.keys().cloned().collect();
        for (name, value) in &args.headers {
            let name = header_name(name)?;
            if engine_owned.contains(&name) {
                #[cfg(feature = "tracing")]
                tracing::debug!(header = %name, "extra header ignored, already set by the request plan");
                continue;
            }
            let value = header_value(name.as_str(), value)?;
            headers.append(name, value);
        }

        Ok(RequestDescriptor {
            method: plan.method().clone(),
            url,
            headers,
            cookies: collected.cookies,
            body,
        })
    }

    /// Decode a complete response of a non-streaming operation.
    ///
    /// `accept` is the preference the request was sent with; it selects the
    /// response variant. Non-success statuses become
    /// [`ApiError::DeclaredError`] or [`ApiError::UndeclaredStatus`].
    pub fn consume_response(
        &self,
        plan: &OperationPlan,
        accept: Option<&str>,
        response: http::Response<Bytes>,
    ) -> Result<ApiResponse<Payload>, ApiError> {
        #[cfg(feature = "tracing")]
        let _span = info_span!(
            "api.response",
            operation = %plan.operation_id(),
            http.status_code = response.status().as_u16(),
            otel.kind = "client",
        )
        .entered();

        let (parts, body) = response.into_parts();
        let content_type = content_type(&parts.headers);
        if !parts.status.is_success() {
            return Err(parse_error_response(
                plan,
                parts.status,
                content_type.as_deref(),
                body,
                &self.registry,
            ));
        }

        let ResponsePlan::Variants(variants) = plan.responses() else {
            return Err(ApiError::InvalidPlan(format!(
                "operation `{}` responds with an event stream, use consume_stream",
                plan.operation_id()
            )));
        };
        let payload = if variants.is_empty() {
            let generic = ResponseVariant::new(content_type.as_deref().unwrap_or("application/octet-stream"));
            decode_body(&generic, body, content_type.as_deref(), &self.registry)?
        } else {
            let variant = select(variants, accept)?;
            decode_body(variant, body, content_type.as_deref(), &self.registry)?
        };
        Ok(ApiResponse::new(payload, parts.status, Metadata::new(parts.headers)))
    }

    /// Like [`consume_response`](Self::consume_response), deserializing the
    /// payload into `T`.
    pub fn consume_response_as<T: DeserializeOwned>(
        &self,
        plan: &OperationPlan,
        accept: Option<&str>,
        response: http::Response<Bytes>,
    ) -> Result<ApiResponse<T>, ApiError> {
        self.consume_response(plan, accept, response)?
            .try_map(|payload| serde_json::from_value(payload.into_value()).map_err(|e| ApiError::Decode(e.to_string())))
    }

    /// Consume the response of an event-stream operation.
    ///
    /// A success response is returned as a lazy stream of event values. A
    /// non-success body is collected and mapped through the operation's
    /// error mappings.
    pub async fn consume_stream<S, E>(
        &self,
        plan: &OperationPlan,
        response: http::Response<S>,
        cancel: CancelToken,
    ) -> Result<Streaming<SseDecoder<S>>, ApiError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::error::Error + Send + Sync + 'static,
    {
        let ResponsePlan::Sse(sse) = plan.responses() else {
            return Err(ApiError::InvalidPlan(format!(
                "operation `{}` does not respond with an event stream",
                plan.operation_id()
            )));
        };

        let (parts, mut body) = response.into_parts();
        if !parts.status.is_success() {
            let mut collected = Vec::new();
            let mut cancelled = pin!(cancel.cancelled());
            loop {
                match future::select(cancelled.as_mut(), body.next()).await {
                    Either::Left(_) => return Err(ApiError::Cancelled),
                    Either::Right((Some(chunk), _)) => {
                        collected.extend_from_slice(&chunk.map_err(ApiError::transport)?);
                    }
                    Either::Right((None, _)) => break,
                }
            }
            return Err(parse_error_response(
                plan,
                parts.status,
                content_type(&parts.headers).as_deref(),
                Bytes::from(collected),
                &self.registry,
            ));
        }

        #[cfg(feature = "tracing")]
        if !content_type(&parts.headers)
            .and_then(|ct| opmarshal_core::MediaType::parse(&ct))
            .is_some_and(|media| media.is_event_stream())
        {
            tracing::warn!(
                operation = %plan.operation_id(),
                "event-stream operation answered without a text/event-stream content type"
            );
        }

        Ok(Streaming::new(SseDecoder::new(
            body,
            sse.clone(),
            self.registry.clone(),
            cancel,
        )))
    }

    fn accept(&self, plan: &OperationPlan, args: &CallArgs) -> Option<String> {
        if let Some(accept) = &args.accept {
            return Some(accept.clone());
        }
        if !self.default_accept {
            return None;
        }
        match plan.responses() {
            ResponsePlan::Sse(_) => Some(EVENT_STREAM.to_owned()),
            ResponsePlan::Variants(variants) => accept_header(variants),
        }
    }

    fn url(&self, template: &str, collected: &Collected) -> Result<String, ApiError> {
        let mut url = self.base_url.clone();
        if !template.starts_with('/') {
            url.push('/');
        }

        let mut rest = template;
        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start..].find('}') else {
                break;
            };
            let name = &rest[start + 1..start + len];
            let segment = collected
                .segments
                .get(name)
                .ok_or_else(|| ApiError::MissingRequiredParameter { name: name.to_owned() })?;
            url.push_str(&rest[..start]);
            url.push_str(segment);
            rest = &rest[start + len + 1..];
        }
        url.push_str(rest);

        let mut query = join_query(&collected.query);
        if let Some(fragment) = collected.fragment.as_deref().filter(|f| !f.is_empty()) {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(fragment);
        }
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }
        Ok(url)
    }

    fn attach_security(
        &self,
        requirement: &SecurityRequirement,
        args: &CallArgs,
        collected: &mut Collected,
    ) -> Result<(), ApiError> {
        for scheme in requirement.schemes() {
            let Some(credential) = args.security.get(&scheme.id) else {
                continue;
            };
            match &scheme.scheme {
                SecurityScheme::Http { scheme } => {
                    let prefix = match scheme {
                        HttpAuthScheme::Bearer => "Bearer",
                        HttpAuthScheme::Basic => "Basic",
                    };
                    collected.set_header(AUTHORIZATION.as_str(), format!("{prefix} {credential}"));
                }
                SecurityScheme::ApiKey { name, location } => {
                    let parameter = match location {
                        ApiKeyLocation::Header => ParameterPlan::header(name.as_str()),
                        ApiKeyLocation::Query => ParameterPlan::query(name.as_str()),
                        ApiKeyLocation::Cookie => ParameterPlan::cookie(name.as_str()),
                    }
                    .build()?;
                    let value = Value::String(credential.clone());
                    match serialize(&parameter, Some(&value), &self.registry)? {
                        Some(SerializedParameter::HeaderValue(value)) => {
                            collected.set_header(parameter.wire_name(), value);
                        }
                        Some(serialized) => collected.add(parameter.wire_name(), serialized),
                        None => {}
                    }
                }
            }
        }
        Ok(())
    }
}

/// The first security alternative whose credentials are all supplied.
///
/// `Ok(None)` when the operation declares no security or an anonymous
/// alternative is the first satisfied one.
fn satisfied_requirement<'a>(
    plan: &'a OperationPlan,
    args: &CallArgs,
) -> Result<Option<&'a SecurityRequirement>, ApiError> {
    if plan.security().is_empty() {
        return Ok(None);
    }
    plan.security()
        .iter()
        .find(|requirement| {
            requirement
                .schemes()
                .iter()
                .all(|scheme| args.security.contains_key(&scheme.id))
        })
        .map(|requirement| (!requirement.is_anonymous()).then_some(requirement))
        .ok_or_else(|| ApiError::MissingSecurityValue {
            operation: plan.operation_id().to_owned(),
        })
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

fn header_name(name: &str) -> Result<HeaderName, ApiError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| ApiError::Encode(format!("invalid header name `{name}`: {e}")))
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|e| ApiError::Encode(format!("invalid value for header `{name}`: {e}")))
}
