//! Parameter serialization.
//!
//! Encodes argument values into path segments, query entries, header values
//! and cookie pairs according to a [`ParameterPlan`]:
//!
//! ```text
//! path   simple      explode=false  [1,2,3]          -> 1,2,3
//! path   label       explode=true   {"a":1,"b":2}    -> .a=1.b=2
//! path   matrix      explode=true   ["x","y"]        -> ;id=x;id=y
//! query  form        explode=true   {"a":1,"b":2}    -> a=1&b=2
//! query  deepObject                 {"a":1}          -> id[a]=1
//! ```
//!
//! Query entries and cookie pairs come out already percent-encoded; header
//! values are never percent-encoded.

use std::borrow::Cow;
use std::collections::HashMap;

use opmarshal_core::{FieldRule, Location, MediaType, ParameterPlan, RuleRegistry, Style};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde_json::{Map, Value};

use crate::error::ApiError;

/// Everything except RFC 3986 unreserved characters.
const STRICT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// [`STRICT`] with the RFC 3986 gen-delims and sub-delims passed through.
const RESERVED: &AsciiSet = &STRICT
    .remove(b':')
    .remove(b'/')
    .remove(b'?')
    .remove(b'#')
    .remove(b'[')
    .remove(b']')
    .remove(b'@')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=');

/// A serialized parameter, ready to be merged into a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializedParameter {
    /// Replaces the `{wireName}` placeholder of the path template.
    PathSegment(String),
    /// `(key, value)` pairs appended to the query string.
    QueryEntries(Vec<(String, String)>),
    HeaderValue(String),
    /// `(name, value)` cookie pairs.
    CookieValues(Vec<(String, String)>),
    /// A pre-built query string fragment, appended verbatim.
    QueryFragment(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Escape {
    Strict,
    Reserved,
    Raw,
}

impl Escape {
    fn apply(self, text: &str) -> Cow<'_, str> {
        match self {
            Escape::Strict => utf8_percent_encode(text, STRICT).into(),
            Escape::Reserved => utf8_percent_encode(text, RESERVED).into(),
            Escape::Raw => Cow::Borrowed(text),
        }
    }

    fn for_query(allow_reserved: bool) -> Self {
        if allow_reserved {
            Escape::Reserved
        } else {
            Escape::Strict
        }
    }
}

/// A value broken into escaped text items.
enum Shape {
    Scalar(String),
    Array(Vec<String>),
    Object(Vec<(String, String)>),
}

impl Shape {
    fn of(value: &Value, escape: Escape) -> Self {
        let text = |v: &Value| escape.apply(&scalar_text(v)).into_owned();
        match value {
            Value::Array(items) => Shape::Array(items.iter().map(text).collect()),
            Value::Object(map) => Shape::Object(
                map.iter()
                    .map(|(k, v)| (escape.apply(k).into_owned(), text(v)))
                    .collect(),
            ),
            other => Shape::Scalar(text(other)),
        }
    }
}

/// Text form of a value: strings raw, other scalars as JSON text, nested
/// composites as compact JSON.
pub(crate) fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Serialize one parameter value.
///
/// Returns `Ok(None)` for an absent or null optional value.
///
/// # Errors
///
/// - [`ApiError::MissingRequiredParameter`] when a required value (every
///   path parameter) is absent or null
/// - [`ApiError::InvalidEncodingRule`] when the value shape has no form in
///   the parameter's style, e.g. an array under `deepObject`
///
/// # Example
///
/// ```
/// use opmarshal_client::{SerializedParameter, serialize_parameter};
/// use opmarshal_core::{ParameterPlan, RuleRegistry};
/// use serde_json::json;
///
/// let plan = ParameterPlan::path("ids").build()?;
/// let out = serialize_parameter(&plan, Some(&json!([1, 2, 3])), &RuleRegistry::new()).unwrap();
/// assert_eq!(out, Some(SerializedParameter::PathSegment("1,2,3".into())));
/// # Ok::<(), opmarshal_core::PlanError>(())
/// ```
pub fn serialize(
    plan: &ParameterPlan,
    value: Option<&Value>,
    registry: &RuleRegistry,
) -> Result<Option<SerializedParameter>, ApiError> {
    let value = match value {
        Some(value) if !value.is_null() => value,
        _ if plan.is_required() => {
            return Err(ApiError::MissingRequiredParameter {
                name: plan.name().to_owned(),
            });
        }
        _ => return Ok(None),
    };

    let mut value = Cow::Borrowed(value);
    if let Some(rule) = plan.encoding_override() {
        let transformed = registry
            .apply(rule, value.into_owned())
            .map_err(ApiError::from_encode_rule)?;
        value = Cow::Owned(transformed);
    }

    if let Some(content_type) = plan
        .content_type()
        .filter(|_| plan.location() != Location::QueryString)
    {
        value = Cow::Owned(Value::String(encode_content(content_type, &value)?));
    }

    let name = plan.wire_name();
    let explode = plan.explode();
    let style = plan.style().unwrap_or(Style::Simple);
    let serialized = match plan.location() {
        Location::Path => SerializedParameter::PathSegment(path_segment(name, style, explode, &value)),
        Location::Header => SerializedParameter::HeaderValue(simple(&value, explode, Escape::Raw)),
        Location::Query => SerializedParameter::QueryEntries(query_entries(
            name,
            style,
            explode,
            Escape::for_query(plan.allow_reserved()),
            &value,
        )?),
        Location::Cookie => SerializedParameter::CookieValues(query_entries(
            name,
            Style::Form,
            explode,
            Escape::Strict,
            &value,
        )?),
        Location::QueryString => SerializedParameter::QueryFragment(encode_querystring(
            plan.content_type().unwrap_or("application/x-www-form-urlencoded"),
            &value,
        )?),
    };
    Ok(Some(serialized))
}

fn path_segment(name: &str, style: Style, explode: bool, value: &Value) -> String {
    let name = Escape::Strict.apply(name);
    match style {
        Style::Label => match Shape::of(value, Escape::Strict) {
            Shape::Scalar(v) => format!(".{v}"),
            Shape::Array(items) => format!(".{}", items.join(".")),
            Shape::Object(pairs) => format!(".{}", join_pairs(&pairs, explode, ".")),
        },
        Style::Matrix => match Shape::of(value, Escape::Strict) {
            Shape::Scalar(v) => format!(";{name}={v}"),
            Shape::Array(items) if explode => items.iter().map(|item| format!(";{name}={item}")).collect(),
            Shape::Array(items) => format!(";{name}={}", items.join(",")),
            Shape::Object(pairs) if explode => pairs.iter().map(|(k, v)| format!(";{k}={v}")).collect(),
            Shape::Object(pairs) => format!(";{}", join_pairs(&pairs, false, ",")),
        },
        _ => simple(value, explode, Escape::Strict),
    }
}

fn simple(value: &Value, explode: bool, escape: Escape) -> String {
    match Shape::of(value, escape) {
        Shape::Scalar(v) => v,
        Shape::Array(items) => items.join(","),
        Shape::Object(pairs) => join_pairs(&pairs, explode, ","),
    }
}

/// `k=v` pairs when exploded, otherwise alternating `k,v` items.
fn join_pairs(pairs: &[(String, String)], explode: bool, separator: &str) -> String {
    if explode {
        pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(separator)
    } else {
        pairs
            .iter()
            .flat_map(|(k, v)| [k.as_str(), v.as_str()])
            .collect::<Vec<_>>()
            .join(separator)
    }
}

fn query_entries(
    name: &str,
    style: Style,
    explode: bool,
    escape: Escape,
    value: &Value,
) -> Result<Vec<(String, String)>, ApiError> {
    let key = Escape::Strict.apply(name).into_owned();
    let entries = match (style, Shape::of(value, escape)) {
        (Style::DeepObject, Shape::Object(pairs)) => pairs
            .into_iter()
            .map(|(k, v)| (format!("{key}[{k}]"), v))
            .collect(),
        (Style::DeepObject, _) => {
            return Err(ApiError::InvalidEncodingRule(format!(
                "`{name}`: deepObject requires an object value"
            )));
        }
        (Style::SpaceDelimited | Style::PipeDelimited, Shape::Object(_)) => {
            return Err(ApiError::InvalidEncodingRule(format!(
                "`{name}`: style `{style}` has no object form"
            )));
        }
        (Style::SpaceDelimited, Shape::Array(items)) => vec![(key, items.join("%20"))],
        (Style::PipeDelimited, Shape::Array(items)) => vec![(key, items.join("|"))],
        (_, Shape::Scalar(v)) => vec![(key, v)],
        (_, Shape::Array(items)) if explode => items.into_iter().map(|item| (key.clone(), item)).collect(),
        (_, Shape::Array(items)) => vec![(key, items.join(","))],
        (_, Shape::Object(pairs)) if explode => pairs,
        (_, Shape::Object(pairs)) => vec![(key, join_pairs(&pairs, false, ","))],
    };
    Ok(entries)
}

/// Join encoded `(key, value)` entries into `k=v&k=v`.
pub(crate) fn join_query(entries: &[(String, String)]) -> String {
    entries
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Encode a value as a document of `content_type`, as text.
pub(crate) fn encode_content(content_type: &str, value: &Value) -> Result<String, ApiError> {
    let media = MediaType::parse(content_type)
        .ok_or_else(|| ApiError::InvalidEncodingRule(format!("invalid media type `{content_type}`")))?;
    if media.is_json() {
        serde_json::to_string(value).map_err(|e| ApiError::Encode(e.to_string()))
    } else if media.is_form() {
        form_urlencode(value, &HashMap::new())
    } else if media.is_text() {
        Ok(scalar_text(value))
    } else {
        Err(ApiError::InvalidEncodingRule(format!(
            "cannot encode a parameter as `{media}`"
        )))
    }
}

fn encode_querystring(content_type: &str, value: &Value) -> Result<String, ApiError> {
    let is_form = MediaType::parse(content_type).is_some_and(|media| media.is_form());
    if is_form {
        form_urlencode(value, &HashMap::new())
    } else {
        let text = encode_content(content_type, value)?;
        Ok(Escape::Strict.apply(&text).into_owned())
    }
}

/// Encode an object as `application/x-www-form-urlencoded`.
///
/// Each property is serialized like a query parameter, styled by its
/// [`FieldRule`] (form, exploded, when it has none). Null properties are
/// skipped.
pub(crate) fn form_urlencode(value: &Value, fields: &HashMap<String, FieldRule>) -> Result<String, ApiError> {
    let Value::Object(map) = value else {
        return Err(ApiError::InvalidEncodingRule(
            "form-urlencoded content requires an object value".into(),
        ));
    };

    let mut entries = Vec::with_capacity(map.len());
    for (name, field) in map {
        if field.is_null() {
            continue;
        }
        let rule = fields.get(name);
        let style = rule.and_then(|r| r.style).unwrap_or(Style::Form);
        let explode = rule
            .and_then(|r| r.explode)
            .unwrap_or_else(|| style.explodes_by_default());
        let escape = Escape::for_query(rule.is_some_and(|r| r.allow_reserved));

        let encoded;
        let field = match rule.and_then(|r| r.content_type.as_deref()) {
            Some(content_type) => {
                encoded = Value::String(encode_content(content_type, field)?);
                &encoded
            }
            None => field,
        };
        entries.extend(query_entries(name, style, explode, escape, field)?);
    }
    Ok(join_query(&entries))
}

/// Decode `application/x-www-form-urlencoded` text into an object of strings.
///
/// Repeated keys collect into arrays; `+` decodes to a space.
pub(crate) fn form_urldecode(text: &str) -> Result<Value, ApiError> {
    let decode = |raw: &str| -> Result<String, ApiError> {
        let raw = raw.replace('+', " ");
        percent_decode_str(&raw)
            .decode_utf8()
            .map(Cow::into_owned)
            .map_err(|e| ApiError::Decode(format!("form field is not UTF-8: {e}")))
    };

    let mut map = Map::new();
    for pair in text.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let (key, value) = (decode(key)?, Value::String(decode(value)?));
        match map.get_mut(&key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key, value);
            }
        }
    }
    Ok(Value::Object(map))
}
