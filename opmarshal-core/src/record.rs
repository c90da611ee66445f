//! Record-stream framing.
//!
//! Two delimiter-based framings carry a sequence of JSON texts in one body:
//!
//! ```text
//! JSON Lines:          {"x":1}\n{"x":2}
//! JSON text sequence:  <RS>{"x":1}<RS>{"x":2}
//! ```
//!
//! where `<RS>` is the ASCII Record Separator (0x1E).

use serde::Deserialize;

/// ASCII Record Separator, the prefix of every JSON text sequence record.
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Delimiter between records of a record stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordDelimiter {
    /// `\n`, as used by JSON Lines / NDJSON.
    Newline,
    /// 0x1E, as used by JSON text sequences (RFC 7464).
    RecordSeparator,
}

impl RecordDelimiter {
    pub fn as_byte(&self) -> u8 {
        match self {
            RecordDelimiter::Newline => b'\n',
            RecordDelimiter::RecordSeparator => RECORD_SEPARATOR,
        }
    }
}

/// Concatenate encoded records with the given framing.
///
/// Newline framing joins records with `\n`; record-separator framing
/// prefixes each record with 0x1E. Neither adds a trailing delimiter.
pub fn frame_records<I, R>(records: I, delimiter: RecordDelimiter) -> Vec<u8>
where
    I: IntoIterator<Item = R>,
    R: AsRef<[u8]>,
{
    let mut out = Vec::new();
    for (index, record) in records.into_iter().enumerate() {
        match delimiter {
            RecordDelimiter::Newline => {
                if index > 0 {
                    out.push(b'\n');
                }
            }
            RecordDelimiter::RecordSeparator => out.push(RECORD_SEPARATOR),
        }
        out.extend_from_slice(record.as_ref());
    }
    out
}

/// Split a record stream into its non-empty fragments.
///
/// Each fragment has surrounding ASCII whitespace trimmed (which also drops
/// the `\r` of CRLF line endings and the `\n` that terminates RFC 7464
/// records); fragments that are empty after trimming are discarded.
pub fn split_records(data: &[u8], delimiter: RecordDelimiter) -> impl Iterator<Item = &[u8]> {
    data.split(move |byte| *byte == delimiter.as_byte())
        .map(<[u8]>::trim_ascii)
        .filter(|fragment| !fragment.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_json_seq() {
        let framed = frame_records([br#"{"x":1}"#, br#"{"x":2}"#], RecordDelimiter::RecordSeparator);
        assert_eq!(framed, b"\x1e{\"x\":1}\x1e{\"x\":2}");
    }

    #[test]
    fn test_frame_json_lines() {
        let framed = frame_records(["1", "2", "3"], RecordDelimiter::Newline);
        assert_eq!(framed, b"1\n2\n3");
    }

    #[test]
    fn test_frame_empty() {
        let framed = frame_records(Vec::<Vec<u8>>::new(), RecordDelimiter::Newline);
        assert!(framed.is_empty());
    }

    #[test]
    fn test_split_discards_empty_fragments() {
        let data = b"\x1e{\"a\":1}\n\x1e\x1e  \x1e{\"a\":2}\n";
        let fragments: Vec<&[u8]> = split_records(data, RecordDelimiter::RecordSeparator).collect();
        assert_eq!(fragments, vec![&b"{\"a\":1}"[..], &b"{\"a\":2}"[..]]);
    }

    #[test]
    fn test_split_crlf_lines() {
        let data = b"1\r\n\r\n2\r\n";
        let fragments: Vec<&[u8]> = split_records(data, RecordDelimiter::Newline).collect();
        assert_eq!(fragments, vec![&b"1"[..], &b"2"[..]]);
    }
}
