//! Encoding rules: declarative `Value -> Value` transforms.
//!
//! An [`EncodingRule`] is attached to a plan at a fixed point of the
//! pipeline (a parameter before styling, a body before format
//! serialization, an SSE payload after joining). Built-in rules are applied
//! directly; [`EncodingRule::Named`] rules are resolved through a
//! [`RuleRegistry`] supplied by the embedding application.
//!
//! # Example
//!
//! ```
//! use opmarshal_core::{EncodingRule, RuleRegistry, RuleError};
//! use serde_json::{json, Value};
//!
//! let registry = RuleRegistry::new().with("upper", |value: Value| match value {
//!     Value::String(s) => Ok(Value::String(s.to_uppercase())),
//!     other => Err(RuleError::ExpectedString { rule: "upper", found: other.to_string() }),
//! });
//!
//! let rule = EncodingRule::Named { id: "upper".into() };
//! assert_eq!(registry.apply(&rule, json!("abc")).unwrap(), json!("ABC"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::Deserialize;
use serde_json::Value;

use crate::compression::CompressionEncoding;

/// Declarative description of a value transform.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EncodingRule {
    /// Leave the value unchanged.
    Identity,
    /// Base64-encode a string (UTF-8 bytes); non-strings are encoded as their JSON text.
    #[serde(rename_all = "camelCase")]
    Base64 {
        #[serde(default)]
        url_safe: bool,
    },
    /// Decode a base64 string back into a UTF-8 string.
    #[serde(rename_all = "camelCase")]
    Base64Decode {
        #[serde(default)]
        url_safe: bool,
    },
    /// Compress a string and base64-encode the result.
    Compress { encoding: CompressionEncoding },
    /// Base64-decode and decompress into a UTF-8 string.
    Decompress { encoding: CompressionEncoding },
    /// Replace any value with its compact JSON text.
    JsonString,
    /// Parse a string as JSON.
    ParseJson,
    /// Apply rules left to right.
    Chain { rules: Vec<EncodingRule> },
    /// Resolve the transform by id in the [`RuleRegistry`].
    Named { id: String },
}

/// Errors raised while applying an encoding rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    /// A named rule is not registered.
    #[error("unknown encoding rule `{0}`")]
    UnknownRule(String),

    /// The rule only accepts string input.
    #[error("rule `{rule}` expects a string, found {found}")]
    ExpectedString { rule: &'static str, found: String },

    #[error("base64 decoding failed: {0}")]
    Base64(String),

    #[error("{encoding} codec failed: {message}")]
    Codec { encoding: &'static str, message: String },

    #[error("JSON conversion failed: {0}")]
    Json(String),

    /// Failure reported by a registered transform.
    #[error("{0}")]
    Custom(String),
}

/// A registered transform.
///
/// Implemented for any `Fn(Value) -> Result<Value, RuleError>` closure.
pub trait Transform: Send + Sync + 'static {
    fn apply(&self, value: Value) -> Result<Value, RuleError>;
}

impl<F> Transform for F
where
    F: Fn(Value) -> Result<Value, RuleError> + Send + Sync + 'static,
{
    fn apply(&self, value: Value) -> Result<Value, RuleError> {
        self(value)
    }
}

/// Registry resolving [`EncodingRule::Named`] ids to transforms.
///
/// The registry is immutable once handed to a marshaller and can be shared
/// across threads; clones share the registered transforms.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    named: HashMap<String, Arc<dyn Transform>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform under `id`, replacing any previous one.
    pub fn with<T: Transform>(mut self, id: impl Into<String>, transform: T) -> Self {
        self.insert(id, transform);
        self
    }

    pub fn insert<T: Transform>(&mut self, id: impl Into<String>, transform: T) {
        self.named.insert(id.into(), Arc::new(transform));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.named.contains_key(id)
    }

    /// Check that every named rule reachable from `rule` is registered.
    pub fn check(&self, rule: &EncodingRule) -> Result<(), RuleError> {
        match rule {
            EncodingRule::Named { id } if !self.contains(id) => Err(RuleError::UnknownRule(id.clone())),
            EncodingRule::Chain { rules } => rules.iter().try_for_each(|rule| self.check(rule)),
            _ => Ok(()),
        }
    }

    /// Apply `rule` to `value`.
    pub fn apply(&self, rule: &EncodingRule, value: Value) -> Result<Value, RuleError> {
        match rule {
            EncodingRule::Identity => Ok(value),
            EncodingRule::Base64 { url_safe } => {
                let raw = into_text(value);
                Ok(Value::String(base64_engine(*url_safe).encode(raw)))
            }
            EncodingRule::Base64Decode { url_safe } => {
                let text = expect_string("base64Decode", value)?;
                let bytes = decode_base64(&text, *url_safe)?;
                let text = String::from_utf8(bytes).map_err(|e| RuleError::Base64(e.to_string()))?;
                Ok(Value::String(text))
            }
            EncodingRule::Compress { encoding } => {
                let raw = into_text(value);
                let compressed = encoding
                    .compress(raw.as_bytes())
                    .map_err(|e| codec_error(*encoding, e))?;
                Ok(Value::String(STANDARD.encode(compressed)))
            }
            EncodingRule::Decompress { encoding } => {
                let text = expect_string("decompress", value)?;
                let compressed = decode_base64(&text, false)?;
                let bytes = encoding
                    .decompress(&compressed)
                    .map_err(|e| codec_error(*encoding, e))?;
                let text = String::from_utf8(bytes.to_vec()).map_err(|e| codec_error(*encoding, e))?;
                Ok(Value::String(text))
            }
            EncodingRule::JsonString => serde_json::to_string(&value)
                .map(Value::String)
                .map_err(|e| RuleError::Json(e.to_string())),
            EncodingRule::ParseJson => {
                let text = expect_string("parseJson", value)?;
                serde_json::from_str(&text).map_err(|e| RuleError::Json(e.to_string()))
            }
            EncodingRule::Chain { rules } => rules
                .iter()
                .try_fold(value, |value, rule| self.apply(rule, value)),
            EncodingRule::Named { id } => {
                let transform = self
                    .named
                    .get(id)
                    .ok_or_else(|| RuleError::UnknownRule(id.clone()))?;
                transform.apply(value)
            }
        }
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&str> = self.named.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("RuleRegistry").field("named", &ids).finish()
    }
}

fn base64_engine(url_safe: bool) -> &'static base64::engine::GeneralPurpose {
    if url_safe { &URL_SAFE_NO_PAD } else { &STANDARD }
}

fn decode_base64(text: &str, url_safe: bool) -> Result<Vec<u8>, RuleError> {
    base64_engine(url_safe)
        .decode(text.trim())
        .map_err(|e| RuleError::Base64(e.to_string()))
}

fn into_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn expect_string(rule: &'static str, value: Value) -> Result<String, RuleError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(RuleError::ExpectedString {
            rule,
            found: other.to_string(),
        }),
    }
}

fn codec_error(encoding: CompressionEncoding, err: impl fmt::Display) -> RuleError {
    RuleError::Codec {
        encoding: encoding.as_str(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_and_json_string() {
        let registry = RuleRegistry::new();
        let value = json!({"a": [1, 2]});
        assert_eq!(registry.apply(&EncodingRule::Identity, value.clone()).unwrap(), value);
        assert_eq!(
            registry.apply(&EncodingRule::JsonString, value).unwrap(),
            json!("{\"a\":[1,2]}")
        );
    }

    #[test]
    fn test_parse_json_requires_string() {
        let registry = RuleRegistry::new();
        assert_eq!(
            registry.apply(&EncodingRule::ParseJson, json!("[1,true]")).unwrap(),
            json!([1, true])
        );
        let err = registry.apply(&EncodingRule::ParseJson, json!(5)).unwrap_err();
        assert!(matches!(err, RuleError::ExpectedString { rule: "parseJson", .. }));
    }

    #[test]
    fn test_base64_roundtrip() {
        let registry = RuleRegistry::new();
        let encoded = registry
            .apply(&EncodingRule::Base64 { url_safe: false }, json!("hello?"))
            .unwrap();
        assert_eq!(encoded, json!("aGVsbG8/"));
        let url = registry
            .apply(&EncodingRule::Base64 { url_safe: true }, json!("hello?"))
            .unwrap();
        assert_eq!(url, json!("aGVsbG8_"));
        let decoded = registry
            .apply(&EncodingRule::Base64Decode { url_safe: false }, encoded)
            .unwrap();
        assert_eq!(decoded, json!("hello?"));
    }

    #[test]
    fn test_chain_applies_in_order() {
        let registry = RuleRegistry::new();
        let rule = EncodingRule::Chain {
            rules: vec![EncodingRule::JsonString, EncodingRule::Base64 { url_safe: false }],
        };
        assert_eq!(registry.apply(&rule, json!(1)).unwrap(), json!("MQ=="));
    }

    #[test]
    fn test_named_rules() {
        let registry = RuleRegistry::new()
            .with("wrap", |value: Value| Ok::<_, RuleError>(json!({ "wrapped": value })));
        let rule = EncodingRule::Named { id: "wrap".into() };
        assert_eq!(registry.apply(&rule, json!(3)).unwrap(), json!({"wrapped": 3}));

        let missing = EncodingRule::Named { id: "nope".into() };
        assert_eq!(
            registry.apply(&missing, json!(3)).unwrap_err(),
            RuleError::UnknownRule("nope".into())
        );
        assert!(registry.check(&EncodingRule::Chain { rules: vec![rule, missing] }).is_err());
    }

    #[test]
    fn test_identity_compression_roundtrip() {
        let registry = RuleRegistry::new();
        let compress = EncodingRule::Compress {
            encoding: CompressionEncoding::Identity,
        };
        let packed = registry.apply(&compress, json!("abc")).unwrap();
        assert_eq!(packed, json!("YWJj"));
        let unpacked = registry
            .apply(
                &EncodingRule::Decompress {
                    encoding: CompressionEncoding::Identity,
                },
                packed,
            )
            .unwrap();
        assert_eq!(unpacked, json!("abc"));
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_gzip_compression_rule_roundtrip() {
        let registry = RuleRegistry::new();
        let encoding = CompressionEncoding::from_name("gzip").unwrap();
        let rule = EncodingRule::Chain {
            rules: vec![
                EncodingRule::Compress { encoding },
                EncodingRule::Decompress { encoding },
            ],
        };
        let text = "repeat ".repeat(20);
        assert_eq!(registry.apply(&rule, json!(text.clone())).unwrap(), json!(text));
    }

    #[test]
    fn test_deserialize_rules() {
        let rule: EncodingRule = serde_json::from_value(json!({
            "kind": "chain",
            "rules": [
                {"kind": "jsonString"},
                {"kind": "base64", "urlSafe": true},
                {"kind": "named", "id": "sign"},
                {"kind": "compress", "encoding": "identity"}
            ]
        }))
        .unwrap();
        assert_eq!(
            rule,
            EncodingRule::Chain {
                rules: vec![
                    EncodingRule::JsonString,
                    EncodingRule::Base64 { url_safe: true },
                    EncodingRule::Named { id: "sign".into() },
                    EncodingRule::Compress {
                        encoding: CompressionEncoding::Identity
                    },
                ]
            }
        );
    }
}
