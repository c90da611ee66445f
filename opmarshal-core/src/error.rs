//! Error taxonomy shared by the plan layer and the client.
//!
//! - [`ErrorKind`]: The stable, pattern-matchable category of every engine error
//! - [`PlanError`]: Failures raised while constructing or applying a plan

use std::fmt;

use crate::plan::{Location, Style};

/// Category of an engine error.
///
/// Every error surfaced by the engine maps to exactly one kind, so callers can
/// branch on the category (e.g. a [`DeclaredError`](ErrorKind::DeclaredError)
/// business failure versus a [`TransportFailure`](ErrorKind::TransportFailure))
/// without inspecting messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingRequiredParameter,
    MissingSecurityValue,
    UnsupportedStyleForLocation,
    InvalidEncodingRule,
    InvalidPlan,
    NoMatchingResponseVariant,
    MalformedRecordStream,
    MalformedSseFrame,
    TransportFailure,
    DeclaredError,
    UndeclaredStatus,
    Encode,
    Decode,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingRequiredParameter => "missing_required_parameter",
            ErrorKind::MissingSecurityValue => "missing_security_value",
            ErrorKind::UnsupportedStyleForLocation => "unsupported_style_for_location",
            ErrorKind::InvalidEncodingRule => "invalid_encoding_rule",
            ErrorKind::InvalidPlan => "invalid_plan",
            ErrorKind::NoMatchingResponseVariant => "no_matching_response_variant",
            ErrorKind::MalformedRecordStream => "malformed_record_stream",
            ErrorKind::MalformedSseFrame => "malformed_sse_frame",
            ErrorKind::TransportFailure => "transport_failure",
            ErrorKind::DeclaredError => "declared_error",
            ErrorKind::UndeclaredStatus => "undeclared_status",
            ErrorKind::Encode => "encode",
            ErrorKind::Decode => "decode",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plan construction and validation errors.
///
/// Raised by the smart constructors in [`crate::plan`]; a plan that builds
/// successfully can always be serialized.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// The parameter's style is not legal for its location.
    #[error("parameter `{name}`: style `{style}` is not allowed in {location}")]
    UnsupportedStyleForLocation {
        name: String,
        style: Style,
        location: Location,
    },

    /// An encoding rule or style/explode combination is invalid.
    #[error("invalid encoding rule: {0}")]
    InvalidEncodingRule(String),

    /// A path parameter was declared optional.
    #[error("path parameter `{0}` must be required")]
    OptionalPathParameter(String),

    /// The same wire name was declared twice in one location.
    #[error("parameter `{name}` declared twice in {location}")]
    DuplicateParameter { name: String, location: Location },

    /// More than one querystring parameter, or querystring mixed with query parameters.
    #[error("operation `{0}` mixes querystring and query parameter mechanisms")]
    ConflictingQueryMechanisms(String),

    /// A path template placeholder has no path parameter, or vice versa.
    #[error("path template placeholder `{{{0}}}` is not bound to exactly one path parameter")]
    UnboundPathTemplate(String),

    /// More than one response variant in a group is marked as default.
    #[error("operation `{0}` declares more than one default response variant")]
    MultipleDefaultVariants(String),

    /// A media type could not be parsed.
    #[error("invalid media type `{0}`")]
    InvalidMediaType(String),
}

impl PlanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlanError::UnsupportedStyleForLocation { .. } => ErrorKind::UnsupportedStyleForLocation,
            PlanError::InvalidEncodingRule(_) => ErrorKind::InvalidEncodingRule,
            PlanError::OptionalPathParameter(_)
            | PlanError::DuplicateParameter { .. }
            | PlanError::ConflictingQueryMechanisms(_)
            | PlanError::UnboundPathTemplate(_)
            | PlanError::MultipleDefaultVariants(_)
            | PlanError::InvalidMediaType(_) => ErrorKind::InvalidPlan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_names() {
        assert_eq!(ErrorKind::MalformedSseFrame.as_str(), "malformed_sse_frame");
        assert_eq!(ErrorKind::TransportFailure.to_string(), "transport_failure");
    }

    #[test]
    fn test_plan_error_kind() {
        let err = PlanError::UnsupportedStyleForLocation {
            name: "id".into(),
            style: Style::DeepObject,
            location: Location::Header,
        };
        assert_eq!(err.kind(), ErrorKind::UnsupportedStyleForLocation);
        assert_eq!(
            err.to_string(),
            "parameter `id`: style `deepObject` is not allowed in header"
        );
        assert_eq!(
            PlanError::ConflictingQueryMechanisms("search".into()).kind(),
            ErrorKind::InvalidPlan
        );
    }
}
