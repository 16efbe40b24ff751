//! Content-Encoding negotiation and compression.
//!
//! Only the codings [`flate2`] can produce are supported. `Accept-Encoding`
//! tokens with `q=0` are treated as refusals; other quality values are not
//! ranked, the server's preference order decides.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};

/// A response content coding the server can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentEncoding {
    Gzip,
    Deflate,
}

impl ContentEncoding {
    /// The token used in `Accept-Encoding` / `Content-Encoding` headers.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
        }
    }

    /// Compresses `body` with this coding.
    ///
    /// `deflate` is the zlib-wrapped format as required by RFC 9110 §8.4.1.2.
    pub fn compress(self, body: &[u8]) -> io::Result<Vec<u8>> {
        let out = Vec::with_capacity(body.len() / 2 + 16);
        match self {
            Self::Gzip => {
                let mut encoder = GzEncoder::new(out, Compression::default());
                encoder.write_all(body)?;
                encoder.finish()
            }
            Self::Deflate => {
                let mut encoder = ZlibEncoder::new(out, Compression::default());
                encoder.write_all(body)?;
                encoder.finish()
            }
        }
    }
}

impl fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a coding name is not one we can produce.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported content encoding `{0}`")]
pub struct UnknownEncoding(pub String);

impl FromStr for ContentEncoding {
    type Err = UnknownEncoding;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Ok(Self::Gzip),
            "deflate" => Ok(Self::Deflate),
            other => Err(UnknownEncoding(other.to_owned())),
        }
    }
}

/// Picks the first coding in `preference` that the client accepts.
///
/// Returns `None` when there is no `Accept-Encoding` header or none of the
/// supported codings is acceptable.
pub fn negotiate(
    accept_encoding: Option<&str>,
    preference: &[ContentEncoding],
) -> Option<ContentEncoding> {
    let header = accept_encoding?;
    let accepted: Vec<(String, bool)> = header
        .split(',')
        .filter_map(|token| {
            let mut parts = token.split(';');
            let name = parts.next()?.trim().to_ascii_lowercase();
            if name.is_empty() {
                return None;
            }
            let refused = parts.any(|p| {
                p.trim()
                    .strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            });
            Some((name, !refused))
        })
        .collect();

    let accepts = |coding: ContentEncoding| {
        let exact = accepted.iter().find(|(name, _)| {
            name == coding.as_str() || (coding == ContentEncoding::Gzip && name == "x-gzip")
        });
        match exact {
            Some((_, ok)) => *ok,
            None => accepted.iter().any(|(name, ok)| name == "*" && *ok),
        }
    };

    preference.iter().copied().find(|&coding| accepts(coding))
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::{GzDecoder, ZlibDecoder};

    use super::*;

    const PREF: [ContentEncoding; 2] = [ContentEncoding::Gzip, ContentEncoding::Deflate];

    #[test]
    fn no_header_no_coding() {
        assert_eq!(negotiate(None, &PREF), None);
    }

    #[test]
    fn server_preference_wins() {
        assert_eq!(
            negotiate(Some("deflate, gzip"), &PREF),
            Some(ContentEncoding::Gzip)
        );
        assert_eq!(
            negotiate(Some("deflate, gzip"), &[ContentEncoding::Deflate]),
            Some(ContentEncoding::Deflate)
        );
    }

    #[test]
    fn q_zero_refuses() {
        assert_eq!(
            negotiate(Some("gzip;q=0, deflate"), &PREF),
            Some(ContentEncoding::Deflate)
        );
        assert_eq!(negotiate(Some("*, gzip;q=0, deflate;q=0"), &PREF), None);
    }

    #[test]
    fn wildcard_accepts_anything() {
        assert_eq!(negotiate(Some("*"), &PREF), Some(ContentEncoding::Gzip));
    }

    #[test]
    fn unsupported_only_is_none() {
        assert_eq!(negotiate(Some("br, identity"), &PREF), None);
    }

    #[test]
    fn parse_names() {
        assert_eq!("GZIP".parse::<ContentEncoding>(), Ok(ContentEncoding::Gzip));
        assert!("br".parse::<ContentEncoding>().is_err());
    }

    #[test]
    fn gzip_and_deflate_decode_back() {
        let body = b"{\"name\":\"world\"}".repeat(20);

        let mut out = Vec::new();
        GzDecoder::new(&ContentEncoding::Gzip.compress(&body).unwrap()[..])
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, body);

        out.clear();
        ZlibDecoder::new(&ContentEncoding::Deflate.compress(&body).unwrap()[..])
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, body);
    }
}
