//! Response variant negotiation.
//!
//! Picks the response variant to decode from the declared variants and an
//! `Accept`-style preference. Pure: no decoding, no side effects.

use opmarshal_core::{MediaType, ResponseVariant};

use crate::ApiError;

/// Specificity of a match between a preference token and a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Score {
    Any = 1,
    Type = 2,
    Exact = 3,
}

/// Parse an `Accept`-style preference into its media ranges.
///
/// Tokens with `q=0` are dropped; malformed tokens are ignored.
fn preference_tokens(accept: &str) -> Vec<MediaType> {
    accept
        .split(',')
        .filter(|token| !excluded(token))
        .filter_map(MediaType::parse)
        .collect()
}

fn excluded(token: &str) -> bool {
    token.split(';').skip(1).any(|param| {
        let Some((key, value)) = param.split_once('=') else {
            return false;
        };
        key.trim().eq_ignore_ascii_case("q") && value.trim().parse::<f32>().is_ok_and(|q| q <= 0.0)
    })
}

fn score(token: &MediaType, variant: &MediaType) -> Option<Score> {
    if token.is_wildcard() || variant.is_wildcard() {
        Some(Score::Any)
    } else if token.type_() != variant.type_() {
        None
    } else if token.is_type_wildcard() || variant.is_type_wildcard() {
        Some(Score::Type)
    } else if token.subtype() == variant.subtype() {
        Some(Score::Exact)
    } else {
        None
    }
}

fn fallback(variants: &[ResponseVariant]) -> Option<&ResponseVariant> {
    variants.iter().find(|v| v.is_default()).or_else(|| variants.first())
}

/// Select the variant to decode for a preference.
///
/// An absent or empty preference selects the default variant (or the first
/// declared). Otherwise each variant scores by the most specific token it
/// matches (exact, then `type/*`, then `*/*`); the highest score wins and
/// ties go to a tied default variant, else to the first declared. When no
/// token matches, the default (or first) variant is returned.
///
/// # Errors
///
/// [`ApiError::NoMatchingResponseVariant`] when `variants` is empty.
///
/// # Example
///
/// ```
/// use opmarshal_client::select_variant;
/// use opmarshal_core::ResponseVariant;
///
/// let variants = vec![
///     ResponseVariant::new("application/json").mark_default(),
///     ResponseVariant::new("application/xml"),
/// ];
/// let chosen = select_variant(&variants, Some("text/html, application/xml;q=0.9")).unwrap();
/// assert_eq!(chosen.media_type(), "application/xml");
/// ```
pub fn select<'a>(variants: &'a [ResponseVariant], accept: Option<&str>) -> Result<&'a ResponseVariant, ApiError> {
    let Some(fallback) = fallback(variants) else {
        return Err(ApiError::NoMatchingResponseVariant(
            accept.unwrap_or_default().to_owned(),
        ));
    };
    let tokens = match accept.map(str::trim) {
        Some(accept) if !accept.is_empty() => preference_tokens(accept),
        _ => return Ok(fallback),
    };

    let mut best: Option<(Score, &ResponseVariant)> = None;
    for variant in variants {
        let Some(media) = MediaType::parse(variant.media_type()) else {
            continue;
        };
        let Some(found) = tokens.iter().filter_map(|token| score(token, &media)).max() else {
            continue;
        };
        best = match best {
            Some((score, current)) if score > found => Some((score, current)),
            Some((score, current)) if score == found && !variant.is_default() => Some((score, current)),
            _ => Some((found, variant)),
        };
    }

    match best {
        Some((_, variant)) => Ok(variant),
        None => {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                accept = accept.unwrap_or_default(),
                fallback = fallback.media_type(),
                "no response variant matches preference, using fallback"
            );
            Ok(fallback)
        }
    }
}

/// Render the `Accept` header value advertising every declared variant.
pub fn accept_header(variants: &[ResponseVariant]) -> Option<String> {
    let mut types: Vec<&str> = Vec::with_capacity(variants.len());
    for variant in variants {
        if !types.contains(&variant.media_type()) {
            types.push(variant.media_type());
        }
    }
    (!types.is_empty()).then(|| types.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opmarshal_core::ErrorKind;

    fn variants() -> Vec<ResponseVariant> {
        vec![
            ResponseVariant::new("application/json").mark_default(),
            ResponseVariant::new("application/xml"),
            ResponseVariant::new("text/plain"),
        ]
    }

    fn chosen(variants: &[ResponseVariant], accept: Option<&str>) -> String {
        select(variants, accept).unwrap().media_type().to_owned()
    }

    #[test]
    fn test_no_preference_selects_default() {
        let variants = variants();
        assert_eq!(chosen(&variants, None), "application/json");
        assert_eq!(chosen(&variants, Some("")), "application/json");
        assert_eq!(chosen(&variants, Some("*/*")), "application/json");
    }

    #[test]
    fn test_no_default_selects_first() {
        let variants = vec![
            ResponseVariant::new("application/xml"),
            ResponseVariant::new("application/json"),
        ];
        assert_eq!(chosen(&variants, None), "application/xml");
        assert_eq!(chosen(&variants, Some("*/*")), "application/xml");
    }

    #[test]
    fn test_exact_match_wins() {
        let variants = variants();
        assert_eq!(
            chosen(&variants, Some("text/html, application/xml;q=0.9")),
            "application/xml"
        );
        assert_eq!(chosen(&variants, Some("Text/Plain; charset=utf-8")), "text/plain");
    }

    #[test]
    fn test_specificity_beats_order() {
        let variants = variants();
        assert_eq!(chosen(&variants, Some("*/*, text/plain")), "text/plain");
        assert_eq!(chosen(&variants, Some("text/*")), "text/plain");
    }

    #[test]
    fn test_type_wildcard_tie_prefers_default_then_order() {
        let variants = variants();
        assert_eq!(chosen(&variants, Some("application/*")), "application/json");

        let no_default = vec![
            ResponseVariant::new("application/xml"),
            ResponseVariant::new("application/json"),
        ];
        assert_eq!(chosen(&no_default, Some("application/*")), "application/xml");
    }

    #[test]
    fn test_q_zero_is_excluded() {
        let variants = variants();
        assert_eq!(
            chosen(&variants, Some("application/json;q=0, application/xml")),
            "application/xml"
        );
    }

    #[test]
    fn test_unmatched_falls_back() {
        let variants = variants();
        assert_eq!(chosen(&variants, Some("image/png")), "application/json");
    }

    #[test]
    fn test_wildcard_variant() {
        let variants = vec![
            ResponseVariant::new("application/json"),
            ResponseVariant::new("image/*"),
        ];
        assert_eq!(chosen(&variants, Some("image/png")), "image/*");
    }

    #[test]
    fn test_empty_variants() {
        let err = select(&[], Some("application/json")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMatchingResponseVariant);
    }

    #[test]
    fn test_accept_header() {
        assert_eq!(
            accept_header(&variants()).as_deref(),
            Some("application/json, application/xml, text/plain")
        );
        assert_eq!(accept_header(&[]), None);
    }
}
