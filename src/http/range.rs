//! Single byte-range requests (RFC 9110 §14.1.2).
//!
//! Only one `bytes=` range per request is supported; anything else is
//! reported as a [`RangeError`] and answered with `416`.

use thiserror::Error;

/// Errors produced while negotiating a `Range` header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("unsupported range unit in `{0}`")]
    UnsupportedUnit(String),

    #[error("malformed range `{0}`")]
    Malformed(String),

    #[error("multiple ranges are not supported")]
    MultipleRanges,

    #[error("range not satisfiable for a {len}-byte body")]
    Unsatisfiable { len: u64 },
}

/// An inclusive byte range resolved against a known body length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// `Content-Range` header value for a body of `total` bytes.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Parses `header` and resolves it against a body of `len` bytes.
///
/// Accepts `bytes=a-b`, `bytes=a-` and `bytes=-n`. An end past the body is
/// clamped to the last byte.
pub fn parse_range(header: &str, len: u64) -> Result<ByteRange, RangeError> {
    let header = header.trim();
    let spec = header
        .strip_prefix("bytes=")
        .ok_or_else(|| RangeError::UnsupportedUnit(header.to_owned()))?;

    if spec.contains(',') {
        return Err(RangeError::MultipleRanges);
    }

    let malformed = || RangeError::Malformed(header.to_owned());
    let (first, last) = spec.trim().split_once('-').ok_or_else(malformed)?;
    let parse = |s: &str| s.trim().parse::<u64>().map_err(|_| malformed());

    let range = match (first.trim().is_empty(), last.trim().is_empty()) {
        (true, true) => return Err(malformed()),
        (true, false) => {
            let suffix = parse(last)?;
            if suffix == 0 || len == 0 {
                return Err(RangeError::Unsatisfiable { len });
            }
            ByteRange {
                start: len.saturating_sub(suffix),
                end: len - 1,
            }
        }
        (false, true) => ByteRange {
            start: parse(first)?,
            end: len.saturating_sub(1),
        },
        (false, false) => {
            let (start, end) = (parse(first)?, parse(last)?);
            if end < start {
                return Err(malformed());
            }
            ByteRange {
                start,
                end: end.min(len.saturating_sub(1)),
            }
        }
    };

    if len == 0 || range.start >= len {
        return Err(RangeError::Unsatisfiable { len });
    }
    Ok(range)
}
