//! Response body decoding.
//!
//! This module provides [`decode_body`]: Turns a complete response body into a
//! [`Payload`] following a [`ResponseVariant`]'s decode strategy.

use bytes::Bytes;
use opmarshal_core::{
    DecodeStrategy, EncodingRule, MediaType, RecordDelimiter, ResponseVariant, RuleRegistry,
    ValueKind, XmlRules, split_records,
};
use serde_json::Value;

use crate::ApiError;
use crate::param::form_urldecode;
use crate::response::Payload;
use crate::xml::from_xml;

/// Decode `body` according to `variant`.
///
/// `content_type` is the response's `Content-Type`; when absent the variant's
/// media type is used. An empty body decodes to [`Payload::Empty`], except
/// under a record stream strategy, where it is an empty array.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use opmarshal_client::{Payload, decode_body};
/// use opmarshal_core::{ResponseVariant, RuleRegistry};
/// use serde_json::json;
///
/// let variant = ResponseVariant::new("application/json");
/// let payload = decode_body(
///     &variant,
///     Bytes::from_static(br#"{"id":1}"#),
///     None,
///     &RuleRegistry::new(),
/// )
/// .unwrap();
/// assert_eq!(payload, Payload::Json(json!({"id": 1})));
/// ```
pub fn decode_body(
    variant: &ResponseVariant,
    body: Bytes,
    content_type: Option<&str>,
    registry: &RuleRegistry,
) -> Result<Payload, ApiError> {
    if body.is_empty() && !matches!(variant.decode(), DecodeStrategy::RecordStream { .. }) {
        return Ok(Payload::Empty);
    }
    let kind = variant.value_kind();
    match variant.decode() {
        DecodeStrategy::Passthrough => by_kind(kind, body),
        DecodeStrategy::Generic { rule } => {
            let media = content_type
                .and_then(MediaType::parse)
                .or_else(|| MediaType::parse(variant.media_type()));
            let payload = match kind {
                ValueKind::Json => by_media_type(media.as_ref(), body)?,
                other => by_kind(other, body)?,
            };
            match rule {
                Some(rule) => apply_rule(rule, kind, payload, registry),
                None => Ok(payload),
            }
        }
        DecodeStrategy::Xml { rules } => from_xml(&body, rules).map(Payload::Json),
        DecodeStrategy::RecordStream { delimiter } => decode_records(&body, *delimiter),
    }
}

fn by_kind(kind: ValueKind, body: Bytes) -> Result<Payload, ApiError> {
    match kind {
        ValueKind::Binary => Ok(Payload::Binary(body)),
        ValueKind::Text => utf8(body).map(Payload::Text),
        ValueKind::Json => serde_json::from_slice(&body)
            .map(Payload::Json)
            .map_err(|e| ApiError::Decode(e.to_string())),
    }
}

fn by_media_type(media: Option<&MediaType>, body: Bytes) -> Result<Payload, ApiError> {
    let Some(media) = media else {
        return by_kind(ValueKind::Json, body);
    };
    if media.is_json() {
        by_kind(ValueKind::Json, body)
    } else if media.is_form() {
        form_urldecode(&utf8(body)?).map(Payload::Json)
    } else if media.is_xml() {
        from_xml(&body, &XmlRules::default()).map(Payload::Json)
    } else if media.is_text() {
        utf8(body).map(Payload::Text)
    } else {
        Ok(Payload::Binary(body))
    }
}

fn apply_rule(
    rule: &EncodingRule,
    kind: ValueKind,
    payload: Payload,
    registry: &RuleRegistry,
) -> Result<Payload, ApiError> {
    let value = registry
        .apply(rule, payload.into_value())
        .map_err(ApiError::from_decode_rule)?;
    Ok(match (kind, value) {
        (ValueKind::Text, Value::String(text)) => Payload::Text(text),
        (_, value) => Payload::Json(value),
    })
}

fn decode_records(body: &[u8], delimiter: RecordDelimiter) -> Result<Payload, ApiError> {
    split_records(body, delimiter)
        .enumerate()
        .map(|(index, fragment)| {
            serde_json::from_slice(fragment).map_err(|e| ApiError::MalformedRecordStream {
                index,
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<Value>, _>>()
        .map(|records| Payload::Json(Value::Array(records)))
}

fn utf8(body: Bytes) -> Result<String, ApiError> {
    String::from_utf8(body.to_vec()).map_err(|e| ApiError::Decode(e.to_string()))
}
