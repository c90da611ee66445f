//! Media type normalization.
//!
//! Plans and negotiation compare media types by their essence: the
//! lowercased `type/subtype` with every parameter stripped.

use std::fmt;

/// A normalized media type essence (`type/subtype`, lowercase, no parameters).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaType {
    essence: String,
    slash: usize,
}

impl MediaType {
    /// Parse and normalize a media type or media range.
    ///
    /// Returns `None` when the value has no `type/subtype` shape.
    ///
    /// ```
    /// use opmarshal_core::MediaType;
    ///
    /// let media = MediaType::parse("Application/JSON; charset=utf-8").unwrap();
    /// assert_eq!(media.essence(), "application/json");
    /// assert!(MediaType::parse("json").is_none());
    /// ```
    pub fn parse(value: &str) -> Option<Self> {
        let essence = value
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let slash = essence.find('/')?;
        let (ty, subtype) = (&essence[..slash], &essence[slash + 1..]);
        if ty.is_empty() || subtype.is_empty() || subtype.contains('/') {
            return None;
        }
        if ty == "*" && subtype != "*" {
            return None;
        }
        Some(Self { essence, slash })
    }

    pub fn essence(&self) -> &str {
        &self.essence
    }

    /// The top-level type (`application` in `application/json`).
    pub fn type_(&self) -> &str {
        &self.essence[..self.slash]
    }

    pub fn subtype(&self) -> &str {
        &self.essence[self.slash + 1..]
    }

    /// The structured syntax suffix (`json` in `application/problem+json`).
    pub fn suffix(&self) -> Option<&str> {
        self.subtype().rsplit_once('+').map(|(_, suffix)| suffix)
    }

    pub fn is_wildcard(&self) -> bool {
        self.essence == "*/*"
    }

    pub fn is_type_wildcard(&self) -> bool {
        self.subtype() == "*" && self.type_() != "*"
    }

    pub fn is_json(&self) -> bool {
        self.essence == "application/json" || self.suffix() == Some("json")
    }

    pub fn is_form(&self) -> bool {
        self.essence == "application/x-www-form-urlencoded"
    }

    pub fn is_xml(&self) -> bool {
        matches!(self.essence.as_str(), "application/xml" | "text/xml") || self.suffix() == Some("xml")
    }

    pub fn is_text(&self) -> bool {
        self.type_() == "text"
    }

    pub fn is_event_stream(&self) -> bool {
        self.essence == "text/event-stream"
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.essence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_parameters() {
        let media = MediaType::parse(" text/Event-Stream ;charset=UTF-8").unwrap();
        assert_eq!(media.essence(), "text/event-stream");
        assert!(media.is_event_stream());
        assert!(media.is_text());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(MediaType::parse("").is_none());
        assert!(MediaType::parse("application/").is_none());
        assert!(MediaType::parse("/json").is_none());
        assert!(MediaType::parse("*/json").is_none());
        assert!(MediaType::parse("a/b/c").is_none());
    }

    #[test]
    fn test_wildcards() {
        assert!(MediaType::parse("*/*").unwrap().is_wildcard());
        let ranged = MediaType::parse("application/*").unwrap();
        assert!(ranged.is_type_wildcard());
        assert!(!ranged.is_wildcard());
    }

    #[test]
    fn test_structured_suffix() {
        let problem = MediaType::parse("application/problem+json").unwrap();
        assert_eq!(problem.suffix(), Some("json"));
        assert!(problem.is_json());
        assert!(MediaType::parse("application/atom+xml").unwrap().is_xml());
        assert!(!MediaType::parse("application/octet-stream").unwrap().is_json());
    }
}
