//! Operation plans.
//!
//! An [`OperationPlan`] is the immutable, pre-computed description of how to
//! marshal one API operation: its parameters, request body and response
//! representations. Plans are produced once by the contract-analysis stage
//! (either through the builders in this module or deserialized from JSON),
//! validated on construction, and then shared read-only by every call.
//!
//! # Example
//!
//! ```
//! use http::Method;
//! use opmarshal_core::{OperationPlan, ParameterPlan, ResponseVariant, Style};
//!
//! let plan = OperationPlan::builder("getPet", Method::GET, "/pets/{petId}")
//!     .parameter(ParameterPlan::path("petId").build()?)
//!     .parameter(ParameterPlan::query("fields").style(Style::Form).explode(false).build()?)
//!     .variant(ResponseVariant::new("application/json").mark_default())
//!     .build()?;
//!
//! assert_eq!(plan.parameters().len(), 2);
//! # Ok::<(), opmarshal_core::PlanError>(())
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use http::Method;
use serde::{Deserialize, Deserializer};

use crate::error::PlanError;
use crate::media::MediaType;
use crate::record::RecordDelimiter;
use crate::rule::EncodingRule;

// ============================================================================
// Parameters
// ============================================================================

/// Where a parameter travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Path,
    Query,
    Header,
    Cookie,
    /// The whole query string, encoded as one value by its content type.
    #[serde(rename = "querystring")]
    QueryString,
}

impl Location {
    pub fn as_str(&self) -> &'static str {
        match self {
            Location::Path => "path",
            Location::Query => "query",
            Location::Header => "header",
            Location::Cookie => "cookie",
            Location::QueryString => "querystring",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameter serialization style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Style {
    Simple,
    Label,
    Matrix,
    Form,
    SpaceDelimited,
    PipeDelimited,
    DeepObject,
}

impl Style {
    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Simple => "simple",
            Style::Label => "label",
            Style::Matrix => "matrix",
            Style::Form => "form",
            Style::SpaceDelimited => "spaceDelimited",
            Style::PipeDelimited => "pipeDelimited",
            Style::DeepObject => "deepObject",
        }
    }

    /// The style used when a plan does not declare one.
    ///
    /// `None` for [`Location::QueryString`], which has no style.
    pub fn default_for(location: Location) -> Option<Style> {
        match location {
            Location::Path | Location::Header => Some(Style::Simple),
            Location::Query | Location::Cookie => Some(Style::Form),
            Location::QueryString => None,
        }
    }

    /// Whether this style may be used for parameters in `location`.
    pub fn is_allowed_in(&self, location: Location) -> bool {
        match location {
            Location::Path => matches!(self, Style::Simple | Style::Label | Style::Matrix),
            Location::Query => matches!(
                self,
                Style::Form | Style::SpaceDelimited | Style::PipeDelimited | Style::DeepObject
            ),
            Location::Header => matches!(self, Style::Simple),
            Location::Cookie => matches!(self, Style::Form),
            Location::QueryString => false,
        }
    }

    /// Space- and pipe-delimited styles have no exploded form.
    pub fn allows_explode(&self) -> bool {
        !matches!(self, Style::SpaceDelimited | Style::PipeDelimited)
    }

    /// Whether `explode` defaults to true for this style.
    pub fn explodes_by_default(&self) -> bool {
        matches!(self, Style::Form | Style::DeepObject)
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one parameter is serialized.
///
/// Only constructible through [`ParameterPlanBuilder::build`] (or
/// deserialization, which runs the same validation), so every instance is a
/// legal `(location, style, explode, allowReserved)` combination.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "ParameterPlanBuilder")]
pub struct ParameterPlan {
    name: String,
    wire_name: String,
    location: Location,
    style: Option<Style>,
    explode: bool,
    allow_reserved: bool,
    required: bool,
    content_type: Option<String>,
    encoding_override: Option<EncodingRule>,
}

impl ParameterPlan {
    pub fn path(name: impl Into<String>) -> ParameterPlanBuilder {
        ParameterPlanBuilder::new(name, Location::Path)
    }

    pub fn query(name: impl Into<String>) -> ParameterPlanBuilder {
        ParameterPlanBuilder::new(name, Location::Query)
    }

    pub fn header(name: impl Into<String>) -> ParameterPlanBuilder {
        ParameterPlanBuilder::new(name, Location::Header)
    }

    pub fn cookie(name: impl Into<String>) -> ParameterPlanBuilder {
        ParameterPlanBuilder::new(name, Location::Cookie)
    }

    /// A whole-query-string parameter encoded by `content_type`.
    pub fn querystring(name: impl Into<String>, content_type: impl Into<String>) -> ParameterPlanBuilder {
        ParameterPlanBuilder::new(name, Location::QueryString).content_type(content_type)
    }

    /// The argument name callers supply the value under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name used on the wire.
    pub fn wire_name(&self) -> &str {
        &self.wire_name
    }

    pub fn location(&self) -> Location {
        self.location
    }

    /// The serialization style; `None` only for querystring parameters.
    pub fn style(&self) -> Option<Style> {
        self.style
    }

    pub fn explode(&self) -> bool {
        self.explode
    }

    pub fn allow_reserved(&self) -> bool {
        self.allow_reserved
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Normalized media type for content-encoded parameters.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn encoding_override(&self) -> Option<&EncodingRule> {
        self.encoding_override.as_ref()
    }
}

/// Unvalidated parameter description.
///
/// This is also the wire shape of a parameter when plans are shipped as JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterPlanBuilder {
    name: String,
    wire_name: Option<String>,
    #[serde(rename = "in")]
    location: Location,
    style: Option<Style>,
    explode: Option<bool>,
    allow_reserved: Option<bool>,
    required: Option<bool>,
    content_type: Option<String>,
    encoding_override: Option<EncodingRule>,
}

impl ParameterPlanBuilder {
    pub fn new(name: impl Into<String>, location: Location) -> Self {
        Self {
            name: name.into(),
            wire_name: None,
            location,
            style: None,
            explode: None,
            allow_reserved: None,
            required: None,
            content_type: None,
            encoding_override: None,
        }
    }

    /// Use a different name on the wire than the argument name.
    pub fn wire_name(mut self, wire_name: impl Into<String>) -> Self {
        self.wire_name = Some(wire_name.into());
        self
    }

    pub fn style(mut self, style: Style) -> Self {
        self.style = Some(style);
        self
    }

    pub fn explode(mut self, explode: bool) -> Self {
        self.explode = Some(explode);
        self
    }

    pub fn allow_reserved(mut self, allow_reserved: bool) -> Self {
        self.allow_reserved = Some(allow_reserved);
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn encoding_override(mut self, rule: EncodingRule) -> Self {
        self.encoding_override = Some(rule);
        self
    }

    /// Validate and freeze the parameter.
    pub fn build(self) -> Result<ParameterPlan, PlanError> {
        let wire_name = self.wire_name.unwrap_or_else(|| self.name.clone());
        let content_type = self
            .content_type
            .map(|ct| parse_media(&ct).map(|media| media.essence().to_owned()))
            .transpose()?;

        let Some(default_style) = Style::default_for(self.location) else {
            if self.style.is_some() || self.explode.is_some() || self.allow_reserved.is_some() {
                return Err(PlanError::InvalidEncodingRule(format!(
                    "querystring parameter `{}` cannot declare style, explode or allowReserved",
                    self.name
                )));
            }
            let Some(content_type) = content_type else {
                return Err(PlanError::InvalidEncodingRule(format!(
                    "querystring parameter `{}` requires a content type",
                    self.name
                )));
            };
            return Ok(ParameterPlan {
                name: self.name,
                wire_name,
                location: self.location,
                style: None,
                explode: false,
                allow_reserved: false,
                required: self.required.unwrap_or(false),
                content_type: Some(content_type),
                encoding_override: self.encoding_override,
            });
        };

        let required = match (self.location, self.required) {
            (Location::Path, Some(false)) => return Err(PlanError::OptionalPathParameter(self.name)),
            (Location::Path, _) => true,
            (_, required) => required.unwrap_or(false),
        };

        let style = self.style.unwrap_or(default_style);
        if !style.is_allowed_in(self.location) {
            return Err(PlanError::UnsupportedStyleForLocation {
                name: self.name,
                style,
                location: self.location,
            });
        }

        let explode = self.explode.unwrap_or_else(|| style.explodes_by_default());
        check_explode(&self.name, style, explode)?;

        Ok(ParameterPlan {
            name: self.name,
            wire_name,
            location: self.location,
            style: Some(style),
            explode,
            allow_reserved: self.allow_reserved.unwrap_or(false),
            required,
            content_type,
            encoding_override: self.encoding_override,
        })
    }
}

impl TryFrom<ParameterPlanBuilder> for ParameterPlan {
    type Error = PlanError;

    fn try_from(builder: ParameterPlanBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

fn check_explode(name: &str, style: Style, explode: bool) -> Result<(), PlanError> {
    if explode && !style.allows_explode() {
        return Err(PlanError::InvalidEncodingRule(format!(
            "`{name}`: style `{style}` cannot be exploded"
        )));
    }
    if style == Style::DeepObject && !explode {
        return Err(PlanError::InvalidEncodingRule(format!(
            "`{name}`: style `deepObject` is only defined with explode=true"
        )));
    }
    Ok(())
}

fn parse_media(value: &str) -> Result<MediaType, PlanError> {
    MediaType::parse(value).ok_or_else(|| PlanError::InvalidMediaType(value.to_owned()))
}

// ============================================================================
// Request bodies
// ============================================================================

/// How a request body is encoded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyPlan {
    format: BodyFormat,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    transform: Option<EncodingRule>,
}

impl BodyPlan {
    pub fn new(format: BodyFormat) -> Self {
        Self {
            format,
            required: false,
            transform: None,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Apply `rule` to the raw body value before format serialization.
    pub fn transform(mut self, rule: EncodingRule) -> Self {
        self.transform = Some(rule);
        self
    }

    pub fn format(&self) -> &BodyFormat {
        &self.format
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn pre_encoding(&self) -> Option<&EncodingRule> {
        self.transform.as_ref()
    }
}

/// Request body wire formats.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "format", rename_all = "camelCase")]
pub enum BodyFormat {
    Json,
    /// `application/x-www-form-urlencoded`, with per-property rules.
    UrlEncoded {
        #[serde(default)]
        fields: HashMap<String, FieldRule>,
    },
    /// `multipart/form-data`, with per-part rules.
    Multipart {
        #[serde(default)]
        parts: HashMap<String, PartRule>,
    },
    Xml {
        root: String,
        #[serde(default)]
        rules: XmlRules,
    },
    /// Newline-delimited JSON records.
    JsonLines,
    /// RFC 7464 JSON text sequence.
    JsonSeq,
}

impl BodyFormat {
    /// The content type of the encoded body, without multipart boundary.
    pub fn content_type(&self) -> &'static str {
        match self {
            BodyFormat::Json => "application/json",
            BodyFormat::UrlEncoded { .. } => "application/x-www-form-urlencoded",
            BodyFormat::Multipart { .. } => "multipart/form-data",
            BodyFormat::Xml { .. } => "application/xml",
            BodyFormat::JsonLines => "application/jsonl",
            BodyFormat::JsonSeq => "application/json-seq",
        }
    }
}

/// Encoding of one `application/x-www-form-urlencoded` property.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldRule {
    /// Encode the property as a document of this media type instead of styling it.
    pub content_type: Option<String>,
    pub style: Option<Style>,
    pub explode: Option<bool>,
    pub allow_reserved: bool,
}

/// Encoding of one multipart part.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartRule {
    /// Part-level content type.
    pub content_type: Option<String>,
    /// Extra part headers.
    pub headers: Vec<(String, String)>,
    pub filename: Option<String>,
}

/// XML serialization rules.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct XmlRules {
    /// Namespace declared on the root element.
    pub namespace: Option<String>,
    /// Prefix for the root namespace.
    pub prefix: Option<String>,
    /// Per-property rules, keyed by property name.
    pub properties: HashMap<String, XmlPropertyRule>,
}

impl XmlRules {
    pub fn property(&self, name: &str) -> Option<&XmlPropertyRule> {
        self.properties.get(name)
    }
}

/// XML rules for one property.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct XmlPropertyRule {
    /// Element or attribute name, if different from the property name.
    pub rename: Option<String>,
    /// Serialize as an attribute of the enclosing element.
    pub attribute: bool,
    /// Wrap array items in an element named after the property.
    pub wrapped: bool,
    /// Element name of array items (defaults to the property name).
    pub item_name: Option<String>,
}

// ============================================================================
// Responses
// ============================================================================

/// Shape of the decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueKind {
    #[default]
    Json,
    Text,
    Binary,
}

/// How a response body is decoded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "strategy", rename_all = "camelCase")]
pub enum DecodeStrategy {
    /// Hand the body over untouched (text or bytes per [`ValueKind`]).
    Passthrough,
    /// Decode by the declared content type, then apply an optional rule.
    Generic {
        #[serde(default)]
        rule: Option<EncodingRule>,
    },
    Xml {
        #[serde(default)]
        rules: XmlRules,
    },
    /// Split into records and JSON-decode each.
    RecordStream { delimiter: RecordDelimiter },
}

impl Default for DecodeStrategy {
    fn default() -> Self {
        DecodeStrategy::Generic { rule: None }
    }
}

/// One negotiable response representation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseVariant {
    media_type: String,
    #[serde(default)]
    value_kind: ValueKind,
    #[serde(default)]
    decode: DecodeStrategy,
    #[serde(default)]
    is_default: bool,
}

impl ResponseVariant {
    /// A JSON-kind variant with generic decoding.
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            value_kind: ValueKind::default(),
            decode: DecodeStrategy::default(),
            is_default: false,
        }
    }

    pub fn with_value_kind(mut self, kind: ValueKind) -> Self {
        self.value_kind = kind;
        self
    }

    pub fn with_decode(mut self, decode: DecodeStrategy) -> Self {
        self.decode = decode;
        self
    }

    pub fn mark_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// The normalized media type (after the plan is built).
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn value_kind(&self) -> ValueKind {
        self.value_kind
    }

    pub fn decode(&self) -> &DecodeStrategy {
        &self.decode
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }
}

/// Server-Sent Events payload emission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SseMode {
    /// Emit only the joined `data` payload of each event.
    #[default]
    DataOnly,
    /// Emit `{ data, event, id, retry }` records.
    FullEvent,
}

/// How a `text/event-stream` response is consumed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SsePlan {
    mode: SseMode,
    decode: Option<EncodingRule>,
}

impl SsePlan {
    pub fn new(mode: SseMode) -> Self {
        Self { mode, decode: None }
    }

    /// Apply `rule` to each event's joined data.
    pub fn with_decode(mut self, rule: EncodingRule) -> Self {
        self.decode = Some(rule);
        self
    }

    pub fn mode(&self) -> SseMode {
        self.mode
    }

    pub fn decode(&self) -> Option<&EncodingRule> {
        self.decode.as_ref()
    }
}

/// Response handling of an operation: negotiated variants or one event stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponsePlan {
    Variants(Vec<ResponseVariant>),
    Sse(SsePlan),
}

impl Default for ResponsePlan {
    fn default() -> Self {
        ResponsePlan::Variants(Vec::new())
    }
}

/// Which response statuses an [`ErrorMapping`] covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum StatusMatch {
    /// A single status code, e.g. `404`.
    Exact(u16),
    /// A status class, e.g. `4XX` is `Range(4)`.
    Range(u8),
    /// Any status not matched otherwise.
    Default,
}

impl StatusMatch {
    pub fn matches(&self, status: u16) -> bool {
        match self {
            StatusMatch::Exact(code) => *code == status,
            StatusMatch::Range(class) => status / 100 == u16::from(*class),
            StatusMatch::Default => true,
        }
    }

    /// Lower is more specific.
    pub fn precedence(&self) -> u8 {
        match self {
            StatusMatch::Exact(_) => 0,
            StatusMatch::Range(_) => 1,
            StatusMatch::Default => 2,
        }
    }
}

impl FromStr for StatusMatch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("default") {
            return Ok(StatusMatch::Default);
        }
        let bytes = s.as_bytes();
        if bytes.len() == 3 && bytes[1..].eq_ignore_ascii_case(b"xx") && (b'1'..=b'5').contains(&bytes[0]) {
            return Ok(StatusMatch::Range(bytes[0] - b'0'));
        }
        match s.parse::<u16>() {
            Ok(code) if (100..=599).contains(&code) => Ok(StatusMatch::Exact(code)),
            _ => Err(format!("invalid status match `{s}`")),
        }
    }
}

impl TryFrom<String> for StatusMatch {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for StatusMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusMatch::Exact(code) => write!(f, "{code}"),
            StatusMatch::Range(class) => write!(f, "{class}XX"),
            StatusMatch::Default => f.write_str("default"),
        }
    }
}

/// Declared representation(s) of a non-success response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMapping {
    status: StatusMatch,
    #[serde(default)]
    variants: Vec<ResponseVariant>,
}

impl ErrorMapping {
    pub fn new(status: StatusMatch) -> Self {
        Self {
            status,
            variants: Vec::new(),
        }
    }

    pub fn variant(mut self, variant: ResponseVariant) -> Self {
        self.variants.push(variant);
        self
    }

    pub fn status(&self) -> StatusMatch {
        self.status
    }

    pub fn variants(&self) -> &[ResponseVariant] {
        &self.variants
    }
}

// ============================================================================
// Security
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    Header,
    Query,
    Cookie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpAuthScheme {
    Bearer,
    Basic,
}

/// How a pre-computed credential is attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SecurityScheme {
    ApiKey {
        name: String,
        #[serde(rename = "in")]
        location: ApiKeyLocation,
    },
    Http { scheme: HttpAuthScheme },
}

/// A security scheme together with the id its value is supplied under.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SecuritySchemeRef {
    pub id: String,
    #[serde(flatten)]
    pub scheme: SecurityScheme,
}

/// One alternative of an operation's security: all schemes must be satisfied.
///
/// An empty requirement allows anonymous access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecurityRequirement(Vec<SecuritySchemeRef>);

impl SecurityRequirement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheme(mut self, id: impl Into<String>, scheme: SecurityScheme) -> Self {
        self.0.push(SecuritySchemeRef {
            id: id.into(),
            scheme,
        });
        self
    }

    pub fn schemes(&self) -> &[SecuritySchemeRef] {
        &self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }
}

// ============================================================================
// Operations
// ============================================================================

/// The complete, validated marshalling plan of one operation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "OperationPlanBuilder")]
pub struct OperationPlan {
    operation_id: String,
    method: Method,
    path: String,
    parameters: Vec<ParameterPlan>,
    body: Option<BodyPlan>,
    responses: ResponsePlan,
    errors: Vec<ErrorMapping>,
    security: Vec<SecurityRequirement>,
}

impl OperationPlan {
    pub fn builder(
        operation_id: impl Into<String>,
        method: Method,
        path: impl Into<String>,
    ) -> OperationPlanBuilder {
        OperationPlanBuilder::new(operation_id, method, path)
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The path template, e.g. `/pets/{petId}`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Parameters in declaration order.
    pub fn parameters(&self) -> &[ParameterPlan] {
        &self.parameters
    }

    pub fn body(&self) -> Option<&BodyPlan> {
        self.body.as_ref()
    }

    pub fn responses(&self) -> &ResponsePlan {
        &self.responses
    }

    pub fn errors(&self) -> &[ErrorMapping] {
        &self.errors
    }

    pub fn security(&self) -> &[SecurityRequirement] {
        &self.security
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.responses, ResponsePlan::Sse(_))
    }

    /// The most specific error mapping covering `status`.
    pub fn error_mapping(&self, status: u16) -> Option<&ErrorMapping> {
        self.errors
            .iter()
            .filter(|mapping| mapping.status.matches(status))
            .min_by_key(|mapping| mapping.status.precedence())
    }
}

/// Unvalidated operation description; also the JSON shape of a plan.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPlanBuilder {
    operation_id: String,
    #[serde(deserialize_with = "deserialize_method")]
    method: Method,
    path: String,
    #[serde(default)]
    parameters: Vec<ParameterPlan>,
    #[serde(default)]
    body: Option<BodyPlan>,
    #[serde(default)]
    responses: ResponsePlan,
    #[serde(default)]
    errors: Vec<ErrorMapping>,
    #[serde(default)]
    security: Vec<SecurityRequirement>,
    #[serde(skip)]
    mixed_responses: bool,
}

impl OperationPlanBuilder {
    pub fn new(operation_id: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            method,
            path: path.into(),
            parameters: Vec::new(),
            body: None,
            responses: ResponsePlan::default(),
            errors: Vec::new(),
            security: Vec::new(),
            mixed_responses: false,
        }
    }

    pub fn parameter(mut self, parameter: ParameterPlan) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn body(mut self, body: BodyPlan) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a negotiable response variant.
    pub fn variant(mut self, variant: ResponseVariant) -> Self {
        match &mut self.responses {
            ResponsePlan::Variants(variants) => variants.push(variant),
            ResponsePlan::Sse(_) => self.mixed_responses = true,
        }
        self
    }

    /// Consume the response as a Server-Sent Events stream.
    pub fn sse(mut self, plan: SsePlan) -> Self {
        if matches!(&self.responses, ResponsePlan::Variants(v) if !v.is_empty()) {
            self.mixed_responses = true;
        }
        self.responses = ResponsePlan::Sse(plan);
        self
    }

    pub fn error(mut self, mapping: ErrorMapping) -> Self {
        self.errors.push(mapping);
        self
    }

    pub fn security(mut self, requirement: SecurityRequirement) -> Self {
        self.security.push(requirement);
        self
    }

    /// Validate the plan and freeze it.
    pub fn build(self) -> Result<OperationPlan, PlanError> {
        let id = self.operation_id;
        if self.mixed_responses {
            return Err(PlanError::InvalidEncodingRule(format!(
                "operation `{id}` mixes negotiated variants with an event stream"
            )));
        }

        check_parameters(&id, &self.path, &self.parameters)?;
        if let Some(body) = &self.body {
            check_body(body)?;
        }

        let responses = match self.responses {
            ResponsePlan::Variants(variants) => ResponsePlan::Variants(normalize_variants(&id, variants)?),
            sse @ ResponsePlan::Sse(_) => sse,
        };
        let errors = self
            .errors
            .into_iter()
            .map(|mapping| {
                Ok(ErrorMapping {
                    status: mapping.status,
                    variants: normalize_variants(&id, mapping.variants)?,
                })
            })
            .collect::<Result<Vec<_>, PlanError>>()?;

        Ok(OperationPlan {
            operation_id: id,
            method: self.method,
            path: self.path,
            parameters: self.parameters,
            body: self.body,
            responses,
            errors,
            security: self.security,
        })
    }
}

impl TryFrom<OperationPlanBuilder> for OperationPlan {
    type Error = PlanError;

    fn try_from(builder: OperationPlanBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

fn deserialize_method<'de, D>(deserializer: D) -> Result<Method, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes()).map_err(serde::de::Error::custom)
}

/// Placeholder names of a path template, in order (`/a/{x}/{y}` yields `x`, `y`).
pub fn template_placeholders(template: &str) -> impl Iterator<Item = &str> {
    template.split('{').skip(1).filter_map(|rest| rest.split_once('}').map(|(name, _)| name))
}

fn check_parameters(id: &str, path: &str, parameters: &[ParameterPlan]) -> Result<(), PlanError> {
    let mut seen = HashSet::new();
    for parameter in parameters {
        let key = match parameter.location {
            Location::Header => parameter.wire_name.to_ascii_lowercase(),
            _ => parameter.wire_name.clone(),
        };
        if !seen.insert((parameter.location, key)) {
            return Err(PlanError::DuplicateParameter {
                name: parameter.wire_name.clone(),
                location: parameter.location,
            });
        }
    }

    let querystrings = parameters
        .iter()
        .filter(|p| p.location == Location::QueryString)
        .count();
    let has_query = parameters.iter().any(|p| p.location == Location::Query);
    if querystrings > 1 || (querystrings == 1 && has_query) {
        return Err(PlanError::ConflictingQueryMechanisms(id.to_owned()));
    }

    let placeholders: Vec<&str> = template_placeholders(path).collect();
    for placeholder in &placeholders {
        let bound = parameters
            .iter()
            .filter(|p| p.location == Location::Path && p.wire_name == *placeholder)
            .count();
        if bound != 1 || placeholders.iter().filter(|p| *p == placeholder).count() != 1 {
            return Err(PlanError::UnboundPathTemplate((*placeholder).to_owned()));
        }
    }
    if let Some(unbound) = parameters
        .iter()
        .find(|p| p.location == Location::Path && !placeholders.contains(&p.wire_name.as_str()))
    {
        return Err(PlanError::UnboundPathTemplate(unbound.wire_name.clone()));
    }
    Ok(())
}

fn check_body(body: &BodyPlan) -> Result<(), PlanError> {
    match &body.format {
        BodyFormat::UrlEncoded { fields } => {
            for (name, rule) in fields {
                if let Some(content_type) = &rule.content_type {
                    parse_media(content_type)?;
                }
                let style = rule.style.unwrap_or(Style::Form);
                if !style.is_allowed_in(Location::Query) {
                    return Err(PlanError::UnsupportedStyleForLocation {
                        name: name.clone(),
                        style,
                        location: Location::Query,
                    });
                }
                check_explode(name, style, rule.explode.unwrap_or_else(|| style.explodes_by_default()))?;
            }
        }
        BodyFormat::Multipart { parts } => {
            for rule in parts.values() {
                if let Some(content_type) = &rule.content_type {
                    parse_media(content_type)?;
                }
            }
        }
        BodyFormat::Xml { root, .. } if root.trim().is_empty() => {
            return Err(PlanError::InvalidEncodingRule("XML body requires a root element name".into()));
        }
        BodyFormat::Json | BodyFormat::Xml { .. } | BodyFormat::JsonLines | BodyFormat::JsonSeq => {}
    }
    Ok(())
}

/// Normalize media types, collapse duplicates to the first declared, and
/// reject more than one default.
fn normalize_variants(id: &str, variants: Vec<ResponseVariant>) -> Result<Vec<ResponseVariant>, PlanError> {
    let mut out: Vec<ResponseVariant> = Vec::with_capacity(variants.len());
    for mut variant in variants {
        variant.media_type = parse_media(&variant.media_type)?.essence().to_owned();
        if out.iter().any(|v| v.media_type == variant.media_type) {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                operation = %id,
                media_type = %variant.media_type,
                "collapsing duplicate response variant"
            );
            continue;
        }
        out.push(variant);
    }
    if out.iter().filter(|v| v.is_default).count() > 1 {
        return Err(PlanError::MultipleDefaultVariants(id.to_owned()));
    }
    Ok(out)
}
