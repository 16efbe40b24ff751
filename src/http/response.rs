//! Outbound responses and their HTTP/1.1 wire encoding.
//!
//! Bodies are [`Bytes`], so a cached payload goes out without a copy.

use bytes::{BufMut, Bytes, BytesMut};

use super::headers::names;
use super::{Headers, StatusCode};

const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// A response under construction.
///
/// Builder methods consume `self`; the `set_*`/`add_*` forms work through
/// `&mut` for filters that decorate a response they were handed.
///
/// ```
/// use apigate::http::{Response, StatusCode};
///
/// let wire = Response::new(StatusCode::Ok)
///     .content_type("application/json")
///     .body(r#"{"status":"ok"}"#)
///     .into_bytes();
///
/// let text = std::str::from_utf8(&wire).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    keep_alive: bool,
    /// Answering a HEAD: encode headers as for GET, skip the body.
    head_only: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: true,
            head_only: false,
        }
    }

    pub fn not_modified() -> Self {
        Self::new(StatusCode::NotModified)
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_header(name, value);
        self
    }

    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.set_header(names::CONTENT_TYPE, content_type);
        self
    }

    #[must_use]
    pub fn body(self, body: impl Into<String>) -> Self {
        self.body_bytes(body.into())
    }

    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.set_body(body);
        self
    }

    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn head_only(mut self) -> Self {
        self.head_only = true;
        self
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_ref(&self) -> &Bytes {
        &self.body
    }

    /// Encodes status line, headers and body.
    ///
    /// A non-empty body without a `Content-Type` is sent as UTF-8 text.
    /// `Connection` and `Content-Length` are written last, after the
    /// caller's headers. `204` and `304` carry neither a body nor a
    /// `Content-Length`.
    pub fn into_bytes(self) -> BytesMut {
        let Self {
            status,
            headers,
            body,
            keep_alive,
            head_only,
        } = self;

        let bodiless = matches!(status, StatusCode::NoContent | StatusCode::NotModified);
        let mut out = BytesMut::with_capacity(96 + headers.len() * 48 + body.len());

        let status_line = format!("HTTP/1.1 {} {}\r\n", status.as_u16(), status.canonical_reason());
        out.put_slice(status_line.as_bytes());

        for (name, value) in headers.iter() {
            put_field(&mut out, name, value);
        }
        if !bodiless && !body.is_empty() && !headers.contains(names::CONTENT_TYPE) {
            put_field(&mut out, names::CONTENT_TYPE, DEFAULT_CONTENT_TYPE);
        }
        put_field(
            &mut out,
            "Connection",
            if keep_alive { "keep-alive" } else { "close" },
        );
        if !bodiless {
            put_field(&mut out, "Content-Length", &body.len().to_string());
        }
        out.put_slice(b"\r\n");

        if !head_only && !bodiless {
            out.put(body);
        }
        out
    }
}

fn put_field(out: &mut BytesMut, name: &str, value: &str) {
    out.put_slice(name.as_bytes());
    out.put_slice(b": ");
    out.put_slice(value.as_bytes());
    out.put_slice(b"\r\n");
}
