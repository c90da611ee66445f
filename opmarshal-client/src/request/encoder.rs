//! Request body encoding.
//!
//! This module provides [`encode_body`]: Serializes a body value by its
//! [`BodyPlan`], and the [`BoundarySource`] seam for multipart boundaries.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use opmarshal_core::{BodyFormat, BodyPlan, MediaType, PartRule, RecordDelimiter, RuleRegistry, XmlRules, frame_records};
use serde_json::Value;

use crate::ApiError;
use crate::param::{form_urlencode, scalar_text};
use crate::xml::to_xml;

/// An encoded request body.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBody {
    pub bytes: Bytes,
    /// Full `Content-Type`, including the multipart boundary.
    pub content_type: String,
}

/// Source of multipart boundaries.
pub trait BoundarySource: Send + Sync + 'static {
    fn next_boundary(&self) -> String;
}

/// Random alphanumeric boundaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomBoundary;

impl BoundarySource for RandomBoundary {
    fn next_boundary(&self) -> String {
        format!(
            "opmarshal-{:016x}{:016x}",
            rand::random::<u64>(),
            rand::random::<u64>()
        )
    }
}

/// A fixed boundary, for reproducible output.
#[derive(Debug, Clone)]
pub struct FixedBoundary(pub String);

impl BoundarySource for FixedBoundary {
    fn next_boundary(&self) -> String {
        self.0.clone()
    }
}

impl fmt::Debug for dyn BoundarySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BoundarySource")
    }
}

/// Encode `value` as the body described by `plan`.
///
/// The plan's pre-encoding rule is applied to the raw value first.
///
/// # Errors
///
/// - [`ApiError::InvalidEncodingRule`] when the value shape does not fit the
///   format (a non-object form or multipart body) or a part rule sets a
///   reserved header
/// - [`ApiError::Encode`] when serialization fails
///
/// # Example
///
/// ```
/// use opmarshal_client::{RandomBoundary, encode_body};
/// use opmarshal_core::{BodyFormat, BodyPlan, RuleRegistry};
/// use serde_json::json;
///
/// let plan = BodyPlan::new(BodyFormat::JsonSeq);
/// let body = encode_body(&plan, &json!([{"x": 1}, {"x": 2}]), &RuleRegistry::new(), &RandomBoundary).unwrap();
/// assert_eq!(&body.bytes[..], b"\x1e{\"x\":1}\x1e{\"x\":2}");
/// assert_eq!(body.content_type, "application/json-seq");
/// ```
pub fn encode_body(
    plan: &BodyPlan,
    value: &Value,
    registry: &RuleRegistry,
    boundary: &dyn BoundarySource,
) -> Result<EncodedBody, ApiError> {
    let transformed;
    let value = match plan.pre_encoding() {
        Some(rule) => {
            transformed = registry
                .apply(rule, value.clone())
                .map_err(ApiError::from_encode_rule)?;
            &transformed
        }
        None => value,
    };

    let format = plan.format();
    let (bytes, content_type) = match format {
        BodyFormat::Json => (to_json(value)?, format.content_type().to_owned()),
        BodyFormat::UrlEncoded { fields } => (
            form_urlencode(value, fields)?.into_bytes(),
            format.content_type().to_owned(),
        ),
        BodyFormat::Multipart { parts } => {
            let boundary = boundary.next_boundary();
            let bytes = multipart(value, parts, &boundary)?;
            (bytes, format!("{}; boundary={boundary}", format.content_type()))
        }
        BodyFormat::Xml { root, rules } => (to_xml(value, root, rules)?, format.content_type().to_owned()),
        BodyFormat::JsonLines => (records(value, RecordDelimiter::Newline)?, format.content_type().to_owned()),
        BodyFormat::JsonSeq => (
            records(value, RecordDelimiter::RecordSeparator)?,
            format.content_type().to_owned(),
        ),
    };
    Ok(EncodedBody {
        bytes: Bytes::from(bytes),
        content_type,
    })
}

fn to_json(value: &Value) -> Result<Vec<u8>, ApiError> {
    serde_json::to_vec(value).map_err(|e| ApiError::Encode(e.to_string()))
}

fn records(value: &Value, delimiter: RecordDelimiter) -> Result<Vec<u8>, ApiError> {
    let items = match value {
        Value::Array(items) => items.iter().map(to_json).collect::<Result<Vec<_>, _>>()?,
        single => vec![to_json(single)?],
    };
    Ok(frame_records(items, delimiter))
}

fn multipart(value: &Value, parts: &HashMap<String, PartRule>, boundary: &str) -> Result<Vec<u8>, ApiError> {
    let Value::Object(fields) = value else {
        return Err(ApiError::InvalidEncodingRule(
            "multipart content requires an object value".into(),
        ));
    };

    let mut out = Vec::new();
    for (name, field) in fields {
        let rule = parts.get(name);
        if let Some((header, _)) = rule
            .into_iter()
            .flat_map(|rule| &rule.headers)
            .find(|(header, _)| is_reserved_part_header(header))
        {
            return Err(ApiError::InvalidEncodingRule(format!(
                "part `{name}` cannot set the `{header}` header"
            )));
        }

        let items = match field {
            Value::Null => continue,
            Value::Array(items) if rule.and_then(|r| r.content_type.as_deref()).is_none() => {
                items.iter().collect::<Vec<_>>()
            }
            single => vec![single],
        };
        for item in items {
            let content_type = match rule.and_then(|r| r.content_type.as_deref()) {
                Some(content_type) => content_type.to_owned(),
                None if item.is_object() || item.is_array() => "application/json".to_owned(),
                None => "text/plain".to_owned(),
            };

            out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            out.extend_from_slice(format!("Content-Disposition: form-data; name=\"{}\"", quote(name)?).as_bytes());
            if let Some(filename) = rule.and_then(|r| r.filename.as_deref()) {
                out.extend_from_slice(format!("; filename=\"{}\"", quote(filename)?).as_bytes());
            }
            out.extend_from_slice(format!("\r\nContent-Type: {}\r\n", header_line(&content_type)?).as_bytes());
            for (header, value) in rule.map(|r| r.headers.as_slice()).unwrap_or_default() {
                out.extend_from_slice(format!("{}: {}\r\n", header_line(header)?, header_line(value)?).as_bytes());
            }
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(&part_body(name, &content_type, item)?);
            out.extend_from_slice(b"\r\n");
        }
    }
    out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    Ok(out)
}

fn is_reserved_part_header(header: &str) -> bool {
    header.eq_ignore_ascii_case("content-type") || header.eq_ignore_ascii_case("content-disposition")
}

fn part_body(name: &str, content_type: &str, value: &Value) -> Result<Vec<u8>, ApiError> {
    let media = MediaType::parse(content_type)
        .ok_or_else(|| ApiError::InvalidEncodingRule(format!("invalid media type `{content_type}`")))?;
    if media.is_json() {
        to_json(value)
    } else if media.is_form() {
        Ok(form_urlencode(value, &HashMap::new())?.into_bytes())
    } else if media.is_xml() {
        to_xml(value, name, &XmlRules::default())
    } else {
        Ok(scalar_text(value).into_bytes())
    }
}

/// Quoted-string content for a `Content-Disposition` parameter.
fn quote(value: &str) -> Result<String, ApiError> {
    Ok(header_line(value)?.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Part header text must stay on one line.
fn header_line(value: &str) -> Result<&str, ApiError> {
    if value.contains(['\r', '\n']) {
        return Err(ApiError::InvalidEncodingRule(format!(
            "multipart header text {value:?} contains a line break"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opmarshal_core::{EncodingRule, ErrorKind, FieldRule, Style};
    use serde_json::json;

    fn encode(plan: &BodyPlan, value: Value) -> Result<EncodedBody, ApiError> {
        encode_body(plan, &value, &RuleRegistry::new(), &FixedBoundary("XyZ".into()))
    }

    fn text(body: &EncodedBody) -> &str {
        std::str::from_utf8(&body.bytes).unwrap()
    }

    #[test]
    fn test_json_body() {
        let body = encode(&BodyPlan::new(BodyFormat::Json), json!({"name": "Rex", "age": 3})).unwrap();
        assert_eq!(text(&body), r#"{"name":"Rex","age":3}"#);
        assert_eq!(body.content_type, "application/json");
    }

    #[test]
    fn test_form_body_with_field_rules() {
        let mut fields = HashMap::new();
        fields.insert(
            "tags".to_string(),
            FieldRule {
                style: Some(Style::PipeDelimited),
                explode: Some(false),
                ..Default::default()
            },
        );
        fields.insert(
            "meta".to_string(),
            FieldRule {
                content_type: Some("application/json".into()),
                ..Default::default()
            },
        );
        let plan = BodyPlan::new(BodyFormat::UrlEncoded { fields });
        let body = encode(&plan, json!({"name": "a b", "tags": ["x", "y"], "meta": {"k": 1}})).unwrap();
        assert_eq!(text(&body), "name=a%20b&tags=x|y&meta=%7B%22k%22%3A1%7D");
        assert_eq!(body.content_type, "application/x-www-form-urlencoded");
    }

    #[test]
    fn test_form_body_requires_object() {
        let plan = BodyPlan::new(BodyFormat::UrlEncoded { fields: HashMap::new() });
        let err = encode(&plan, json!([1, 2])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEncodingRule);
    }

    #[test]
    fn test_multipart_body() {
        let mut parts = HashMap::new();
        parts.insert(
            "file".to_string(),
            PartRule {
                content_type: Some("application/octet-stream".into()),
                headers: vec![("X-Checksum".into(), "abc".into())],
                filename: Some("a.txt".into()),
            },
        );
        let plan = BodyPlan::new(BodyFormat::Multipart { parts });
        let body = encode(
            &plan,
            json!({"id": 7, "tags": ["a", "b"], "meta": {"k": true}, "file": "raw", "skip": null}),
        )
        .unwrap();

        assert_eq!(body.content_type, "multipart/form-data; boundary=XyZ");
        let expected = concat!(
            "--XyZ\r\nContent-Disposition: form-data; name=\"id\"\r\nContent-Type: text/plain\r\n\r\n7\r\n",
            "--XyZ\r\nContent-Disposition: form-data; name=\"tags\"\r\nContent-Type: text/plain\r\n\r\na\r\n",
            "--XyZ\r\nContent-Disposition: form-data; name=\"tags\"\r\nContent-Type: text/plain\r\n\r\nb\r\n",
            "--XyZ\r\nContent-Disposition: form-data; name=\"meta\"\r\nContent-Type: application/json\r\n\r\n{\"k\":true}\r\n",
            "--XyZ\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n",
            "Content-Type: application/octet-stream\r\nX-Checksum: abc\r\n\r\nraw\r\n",
            "--XyZ--\r\n",
        );
        assert_eq!(text(&body), expected);
    }

    #[test]
    fn test_multipart_rejects_content_type_part_header() {
        let mut parts = HashMap::new();
        parts.insert(
            "file".to_string(),
            PartRule {
                headers: vec![("content-type".into(), "image/png".into())],
                ..Default::default()
            },
        );
        let plan = BodyPlan::new(BodyFormat::Multipart { parts });
        let err = encode(&plan, json!({"file": "x"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEncodingRule);
    }

    #[test]
    fn test_multipart_rejects_line_breaks_in_part_headers() {
        let plan = BodyPlan::new(BodyFormat::Multipart { parts: HashMap::new() });
        let err = encode(&plan, json!({"a\r\nX-Injected: 1": "x"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEncodingRule);

        let mut parts = HashMap::new();
        parts.insert(
            "file".to_string(),
            PartRule {
                filename: Some("a.txt\r\n\r\n--XyZ".into()),
                ..Default::default()
            },
        );
        let plan = BodyPlan::new(BodyFormat::Multipart { parts });
        let err = encode(&plan, json!({"file": "x"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEncodingRule);

        let mut parts = HashMap::new();
        parts.insert(
            "file".to_string(),
            PartRule {
                headers: vec![("X-Note".into(), "a\nb".into())],
                ..Default::default()
            },
        );
        let plan = BodyPlan::new(BodyFormat::Multipart { parts });
        let err = encode(&plan, json!({"file": "x"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEncodingRule);

        // Quotes and backslashes are still escaped, not rejected.
        let mut parts = HashMap::new();
        parts.insert(
            "file".to_string(),
            PartRule {
                filename: Some("say \"hi\".txt".into()),
                ..Default::default()
            },
        );
        let plan = BodyPlan::new(BodyFormat::Multipart { parts });
        let body = encode(&plan, json!({"file": "x"})).unwrap();
        assert!(text(&body).contains("filename=\"say \\\"hi\\\".txt\""));
    }

    #[test]
    fn test_random_boundaries_differ() {
        let plan = BodyPlan::new(BodyFormat::Multipart { parts: HashMap::new() });
        let value = json!({"a": "b"});
        let first = encode_body(&plan, &value, &RuleRegistry::new(), &RandomBoundary).unwrap();
        let second = encode_body(&plan, &value, &RuleRegistry::new(), &RandomBoundary).unwrap();
        assert!(first.content_type.starts_with("multipart/form-data; boundary=opmarshal-"));
        assert_ne!(first.content_type, second.content_type);
    }

    #[test]
    fn test_xml_body() {
        let plan = BodyPlan::new(BodyFormat::Xml {
            root: "pet".into(),
            rules: XmlRules::default(),
        });
        let body = encode(&plan, json!({"id": 1})).unwrap();
        assert!(text(&body).ends_with("<pet><id>1</id></pet>"));
        assert_eq!(body.content_type, "application/xml");
    }

    #[test]
    fn test_record_streams() {
        let seq = encode(&BodyPlan::new(BodyFormat::JsonSeq), json!([{"x": 1}, {"x": 2}])).unwrap();
        assert_eq!(&seq.bytes[..], b"\x1e{\"x\":1}\x1e{\"x\":2}");

        let lines = encode(&BodyPlan::new(BodyFormat::JsonLines), json!([{"x": 1}, {"x": 2}])).unwrap();
        assert_eq!(text(&lines), "{\"x\":1}\n{\"x\":2}");
        assert_eq!(lines.content_type, "application/jsonl");

        let single = encode(&BodyPlan::new(BodyFormat::JsonLines), json!({"x": 1})).unwrap();
        assert_eq!(text(&single), "{\"x\":1}");
    }

    #[test]
    fn test_bodies_decode_back() {
        use crate::response::{Payload, decode_body};
        use opmarshal_core::{DecodeStrategy, RecordDelimiter, ResponseVariant};

        let decode = |body: EncodedBody, variant: ResponseVariant| {
            decode_body(&variant, body.bytes, Some(&body.content_type), &RuleRegistry::new()).unwrap()
        };

        let value = json!({"name": "Rex", "tags": ["a", "b"]});
        let body = encode(&BodyPlan::new(BodyFormat::Json), value.clone()).unwrap();
        assert_eq!(decode(body, ResponseVariant::new("application/json")), Payload::Json(value));

        let value = json!({"name": "Rex Jr", "tags": ["a", "b"]});
        let form = BodyPlan::new(BodyFormat::UrlEncoded { fields: HashMap::new() });
        let body = encode(&form, value.clone()).unwrap();
        assert_eq!(
            decode(body, ResponseVariant::new("application/x-www-form-urlencoded")),
            Payload::Json(value)
        );

        let records = json!([{"x": 1}, {"x": 2}]);
        for (format, delimiter, media) in [
            (BodyFormat::JsonSeq, RecordDelimiter::RecordSeparator, "application/json-seq"),
            (BodyFormat::JsonLines, RecordDelimiter::Newline, "application/jsonl"),
        ] {
            let body = encode(&BodyPlan::new(format), records.clone()).unwrap();
            let variant = ResponseVariant::new(media).with_decode(DecodeStrategy::RecordStream { delimiter });
            assert_eq!(decode(body, variant), Payload::Json(records.clone()));
        }
    }

    #[test]
    fn test_pre_encoding_rule() {
        let plan = BodyPlan::new(BodyFormat::Json).transform(EncodingRule::JsonString);
        let body = encode(&plan, json!({"a": 1})).unwrap();
        assert_eq!(text(&body), r#""{\"a\":1}""#);

        let registry = RuleRegistry::new().with("wrap", |v: Value| Ok::<_, opmarshal_core::RuleError>(json!({"data": v})));
        let plan = BodyPlan::new(BodyFormat::Json).transform(EncodingRule::Named { id: "wrap".into() });
        let body = encode_body(&plan, &json!(1), &registry, &RandomBoundary).unwrap();
        assert_eq!(&body.bytes[..], br#"{"data":1}"#);

        let plan = BodyPlan::new(BodyFormat::Json).transform(EncodingRule::Named { id: "nope".into() });
        let err = encode(&plan, json!(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEncodingRule);
    }
}
