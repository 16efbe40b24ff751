//! HTTP/1.1 primitives: [`Method`], [`StatusCode`], [`Headers`],
//! [`Request`] and [`Response`], plus the pieces the response cache needs:
//! RFC 1123 dates ([`date`]), content codings ([`encoding`]) and byte
//! ranges ([`range`]).

use std::fmt;

pub mod date;
pub mod encoding;
pub mod headers;
pub mod range;
pub mod request;
pub mod response;

pub use encoding::ContentEncoding;
pub use headers::Headers;
pub use request::Request;
pub use response::Response;

macro_rules! status_codes {
    ($($variant:ident = $code:literal => $reason:literal,)+) => {
        /// Response status codes this crate produces.
        ///
        /// ```
        /// use apigate::http::StatusCode;
        ///
        /// assert_eq!(StatusCode::NotModified.as_u16(), 304);
        /// assert_eq!(StatusCode::PartialContent.to_string(), "206 Partial Content");
        /// ```
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum StatusCode {
            $($variant = $code,)+
        }

        impl StatusCode {
            pub fn canonical_reason(self) -> &'static str {
                match self {
                    $(Self::$variant => $reason,)+
                }
            }
        }
    };
}

status_codes! {
    Ok = 200 => "OK",
    Created = 201 => "Created",
    Accepted = 202 => "Accepted",
    NoContent = 204 => "No Content",
    PartialContent = 206 => "Partial Content",
    NotModified = 304 => "Not Modified",
    BadRequest = 400 => "Bad Request",
    Unauthorized = 401 => "Unauthorized",
    Forbidden = 403 => "Forbidden",
    NotFound = 404 => "Not Found",
    MethodNotAllowed = 405 => "Method Not Allowed",
    PayloadTooLarge = 413 => "Payload Too Large",
    UnsupportedMediaType = 415 => "Unsupported Media Type",
    RangeNotSatisfiable = 416 => "Range Not Satisfiable",
    InternalServerError = 500 => "Internal Server Error",
    ServiceUnavailable = 503 => "Service Unavailable",
}

impl StatusCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn is_success(self) -> bool {
        (200..300).contains(&self.as_u16())
    }

    pub fn is_server_error(self) -> bool {
        self.as_u16() >= 500
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

/// Request method. Anything unrecognised is kept verbatim in `Custom`.
///
/// ```
/// use apigate::http::Method;
///
/// let method: Method = "HEAD".parse().unwrap();
/// assert!(method.is_cacheable());
/// assert_eq!(method.to_string(), "HEAD");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Custom(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Custom(s) => s,
        }
    }

    /// GET and HEAD; the only methods whose responses are cached.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Self::Get | Self::Head)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            other => Self::Custom(other.to_owned()),
        })
    }
}
