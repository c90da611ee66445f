//! Error response parsing.
//!
//! Maps a non-success response onto the operation's declared error
//! mappings, producing [`ApiError::DeclaredError`] or
//! [`ApiError::UndeclaredStatus`].

use bytes::Bytes;
use http::StatusCode;
use opmarshal_core::{OperationPlan, ResponseVariant, RuleRegistry};

use crate::ApiError;
use crate::negotiate::select;
use crate::response::decode_body;

/// Parse a non-success response.
///
/// The most specific mapping for `status` wins (exact code, then status
/// class, then `default`). Its payload variant is chosen by the response
/// `Content-Type` and decoded; a mapping without variants decodes the body
/// by its content type. Decode failures are returned as-is.
pub(crate) fn parse_error_response(
    plan: &OperationPlan,
    status: StatusCode,
    content_type: Option<&str>,
    body: Bytes,
    registry: &RuleRegistry,
) -> ApiError {
    let Some(mapping) = plan.error_mapping(status.as_u16()) else {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            operation = plan.operation_id(),
            status = status.as_u16(),
            "response status has no declared error mapping"
        );
        return ApiError::UndeclaredStatus { status, body };
    };

    let generic;
    let variant = if mapping.variants().is_empty() {
        generic = ResponseVariant::new(content_type.unwrap_or("application/json"));
        &generic
    } else {
        match select(mapping.variants(), content_type) {
            Ok(variant) => variant,
            Err(err) => return err,
        }
    };

    match decode_body(variant, body, content_type, registry) {
        Ok(payload) => ApiError::DeclaredError { status, payload },
        Err(err) => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Payload;
    use http::Method;
    use opmarshal_core::{ErrorKind, ErrorMapping, StatusMatch, ValueKind};
    use serde_json::json;

    fn plan() -> OperationPlan {
        OperationPlan::builder("getPet", Method::GET, "/pets/{id}")
            .parameter(opmarshal_core::ParameterPlan::path("id").build().unwrap())
            .error(
                ErrorMapping::new(StatusMatch::Exact(404))
                    .variant(ResponseVariant::new("application/json"))
                    .variant(ResponseVariant::new("text/plain").with_value_kind(ValueKind::Text)),
            )
            .error(ErrorMapping::new(StatusMatch::Range(4)).variant(ResponseVariant::new("application/json")))
            .error(ErrorMapping::new(StatusMatch::Default))
            .build()
            .unwrap()
    }

    fn parse(status: u16, content_type: Option<&str>, body: &'static [u8]) -> ApiError {
        parse_error_response(
            &plan(),
            StatusCode::from_u16(status).unwrap(),
            content_type,
            Bytes::from_static(body),
            &RuleRegistry::new(),
        )
    }

    #[test]
    fn test_exact_mapping_selects_variant_by_content_type() {
        let err = parse(404, Some("application/json"), br#"{"message":"no pet"}"#);
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(err.payload(), Some(&Payload::Json(json!({"message": "no pet"}))));

        let err = parse(404, Some("text/plain; charset=utf-8"), b"no pet");
        assert_eq!(err.payload(), Some(&Payload::Text("no pet".into())));
    }

    #[test]
    fn test_range_mapping() {
        let err = parse(409, Some("application/json"), br#"{"code":1}"#);
        assert_eq!(err.kind(), ErrorKind::DeclaredError);
        assert_eq!(err.status(), Some(StatusCode::CONFLICT));
        assert_eq!(err.payload(), Some(&Payload::Json(json!({"code": 1}))));
    }

    #[test]
    fn test_default_mapping_decodes_by_content_type() {
        let err = parse(503, Some("text/plain"), b"busy");
        assert_eq!(err.kind(), ErrorKind::DeclaredError);
        assert_eq!(err.payload(), Some(&Payload::Text("busy".into())));

        let err = parse(500, None, b"");
        assert_eq!(err.payload(), Some(&Payload::Empty));
    }

    #[test]
    fn test_undeclared_status() {
        let plan = OperationPlan::builder("listPets", Method::GET, "/pets")
            .error(ErrorMapping::new(StatusMatch::Exact(404)))
            .build()
            .unwrap();
        let err = parse_error_response(
            &plan,
            StatusCode::INTERNAL_SERVER_ERROR,
            Some("text/plain"),
            Bytes::from_static(b"boom"),
            &RuleRegistry::new(),
        );
        match err {
            ApiError::UndeclaredStatus { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(&body[..], b"boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_declared_payload_decode_failure() {
        let err = parse(404, Some("application/json"), b"{");
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
