//! Client-side error types.
//!
//! This module provides [`ApiError`], the error type of every marshalling call.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use opmarshal_core::{ErrorKind, PlanError, RuleError};

use crate::response::Payload;

/// Errors raised while building a request or consuming a response.
///
/// Every variant maps to one [`ErrorKind`] through [`ApiError::kind`], so
/// callers can branch on the category without matching messages.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ApiError {
    /// A required parameter (or the required body, named `body`) has no value.
    #[error("missing required parameter `{name}`")]
    MissingRequiredParameter { name: String },

    /// None of the operation's security alternatives has all its values.
    #[error("operation `{operation}` requires security values that were not supplied")]
    MissingSecurityValue { operation: String },

    #[error("{0}")]
    UnsupportedStyleForLocation(String),

    /// The value shape or an encoding rule cannot be applied.
    #[error("invalid encoding rule: {0}")]
    InvalidEncodingRule(String),

    /// The plan cannot drive the requested call.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Negotiation produced no candidate and no default exists.
    #[error("no response variant matches `{0}`")]
    NoMatchingResponseVariant(String),

    /// A record of a JSON Lines / JSON text sequence body failed to decode.
    #[error("malformed record stream: record {index}: {reason}")]
    MalformedRecordStream { index: usize, reason: String },

    /// An event stream reached a state the decoder cannot represent.
    ///
    /// Wire input alone never produces it: invalid UTF-8 is replaced and
    /// unknown fields are ignored.
    #[error("malformed event stream: {0}")]
    MalformedSseFrame(String),

    /// Failure passed through from the transport.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// A non-success response matched a declared error mapping.
    #[error("declared error response ({status})")]
    DeclaredError { status: StatusCode, payload: Payload },

    /// A non-success response with no matching error mapping.
    #[error("undeclared response status {status}")]
    UndeclaredStatus { status: StatusCode, body: Bytes },

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl ApiError {
    /// Wrap a transport failure, keeping it as the error source.
    pub fn transport<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ApiError::Transport(TransportError::new(err))
    }

    /// The category of this error.
    ///
    /// # Example
    ///
    /// ```
    /// use opmarshal_client::ApiError;
    /// use opmarshal_core::ErrorKind;
    ///
    /// let err = ApiError::MissingRequiredParameter { name: "petId".into() };
    /// assert_eq!(err.kind(), ErrorKind::MissingRequiredParameter);
    /// ```
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::MissingRequiredParameter { .. } => ErrorKind::MissingRequiredParameter,
            ApiError::MissingSecurityValue { .. } => ErrorKind::MissingSecurityValue,
            ApiError::UnsupportedStyleForLocation(_) => ErrorKind::UnsupportedStyleForLocation,
            ApiError::InvalidEncodingRule(_) => ErrorKind::InvalidEncodingRule,
            ApiError::InvalidPlan(_) => ErrorKind::InvalidPlan,
            ApiError::NoMatchingResponseVariant(_) => ErrorKind::NoMatchingResponseVariant,
            ApiError::MalformedRecordStream { .. } => ErrorKind::MalformedRecordStream,
            ApiError::MalformedSseFrame(_) => ErrorKind::MalformedSseFrame,
            ApiError::Transport(_) => ErrorKind::TransportFailure,
            ApiError::DeclaredError { .. } => ErrorKind::DeclaredError,
            ApiError::UndeclaredStatus { .. } => ErrorKind::UndeclaredStatus,
            ApiError::Encode(_) => ErrorKind::Encode,
            ApiError::Decode(_) => ErrorKind::Decode,
            ApiError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// The response status, for declared and undeclared error responses.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::DeclaredError { status, .. } | ApiError::UndeclaredStatus { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// The decoded payload of a declared error response.
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            ApiError::DeclaredError { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// Map a rule failure raised while encoding a request.
    pub(crate) fn from_encode_rule(err: RuleError) -> Self {
        match err {
            RuleError::UnknownRule(_) => ApiError::InvalidEncodingRule(err.to_string()),
            other => ApiError::Encode(other.to_string()),
        }
    }

    /// Map a rule failure raised while decoding a response.
    pub(crate) fn from_decode_rule(err: RuleError) -> Self {
        match err {
            RuleError::UnknownRule(_) => ApiError::InvalidEncodingRule(err.to_string()),
            other => ApiError::Decode(other.to_string()),
        }
    }
}

impl From<PlanError> for ApiError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::UnsupportedStyleForLocation { .. } => {
                ApiError::UnsupportedStyleForLocation(err.to_string())
            }
            PlanError::InvalidEncodingRule(message) => ApiError::InvalidEncodingRule(message),
            other => ApiError::InvalidPlan(other.to_string()),
        }
    }
}

/// Opaque transport failure.
///
/// Cloneable so [`ApiError`] stays `Clone`; the original error is kept as the
/// [`source`](StdError::source).
#[derive(Clone)]
pub struct TransportError(Arc<dyn StdError + Send + Sync>);

impl TransportError {
    pub fn new<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self(Arc::new(err))
    }

    pub fn get_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }
}

impl fmt::Debug for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.get_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opmarshal_core::{Location, Style};

    #[test]
    fn test_error_kinds() {
        assert_eq!(ApiError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            ApiError::MalformedRecordStream {
                index: 1,
                reason: "eof".into()
            }
            .kind(),
            ErrorKind::MalformedRecordStream
        );
        let declared = ApiError::DeclaredError {
            status: StatusCode::NOT_FOUND,
            payload: Payload::Empty,
        };
        assert_eq!(declared.kind(), ErrorKind::DeclaredError);
        assert_eq!(declared.status(), Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_transport_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = ApiError::transport(io);
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert_eq!(err.to_string(), "transport error: reset by peer");

        let ApiError::Transport(inner) = err else {
            panic!("expected transport error");
        };
        let source = inner.source().unwrap();
        assert!(source.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn test_from_plan_error() {
        let err: ApiError = PlanError::UnsupportedStyleForLocation {
            name: "h".into(),
            style: Style::Form,
            location: Location::Header,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::UnsupportedStyleForLocation);

        let err: ApiError = PlanError::InvalidEncodingRule("pipe".into()).into();
        assert_eq!(err.kind(), ErrorKind::InvalidEncodingRule);

        let err: ApiError = PlanError::MultipleDefaultVariants("op".into()).into();
        assert_eq!(err.kind(), ErrorKind::InvalidPlan);
    }

    #[test]
    fn test_rule_errors_by_direction() {
        let unknown = RuleError::UnknownRule("x".into());
        assert_eq!(
            ApiError::from_encode_rule(unknown.clone()).kind(),
            ErrorKind::InvalidEncodingRule
        );
        assert_eq!(
            ApiError::from_decode_rule(unknown).kind(),
            ErrorKind::InvalidEncodingRule
        );
        let json = RuleError::Json("eof".into());
        assert_eq!(ApiError::from_encode_rule(json.clone()).kind(), ErrorKind::Encode);
        assert_eq!(ApiError::from_decode_rule(json).kind(), ErrorKind::Decode);
    }
}
