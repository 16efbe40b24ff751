//! Inbound requests, parsed with [`httparse`] or built in-process.

use std::collections::HashMap;

use bytes::Bytes;
use thiserror::Error;

use super::headers::names;
use super::{Headers, Method};

/// Query-string key carrying a JSONP callback name.
pub const JSONP_CALLBACK_PARAM: &str = "callback";

const MAX_HEADERS: usize = 64;

#[derive(Debug, Error)]
pub enum RequestError {
    /// The header block has not fully arrived yet.
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// One HTTP/1.x request.
///
/// ```
/// use apigate::http::request::Request;
///
/// let raw = b"GET /api/Hello.csv?name=Ada HTTP/1.1\r\nAccept-Encoding: gzip\r\n\r\n";
/// let (request, _body_offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.path(), "/api/Hello.csv");
/// assert_eq!(request.raw_url(), "/api/Hello.csv?name=Ada");
/// assert_eq!(request.query_param("name"), Some("Ada"));
/// assert_eq!(request.accept_encoding(), Some("gzip"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    params: HashMap<String, String>,
    /// Minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Parses the request at the front of `buf`.
    ///
    /// Returns the request and the offset its body starts at. The body holds
    /// at most `Content-Length` bytes of what is already buffered; callers
    /// wait for the rest before dispatching.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut slots);

        let httparse::Status::Complete(body_offset) = parsed.parse(buf)? else {
            return Err(RequestError::Incomplete);
        };

        let method = parsed.method.ok_or(RequestError::MissingField { field: "method" })?;
        let target = parsed.path.ok_or(RequestError::MissingField { field: "path" })?;
        let version = parsed
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut headers = Headers::with_capacity(parsed.headers.len());
        for field in parsed.headers.iter() {
            if let Ok(value) = std::str::from_utf8(field.value) {
                headers.insert(field.name, value);
            }
        }

        let mut request = Self::from_parts(method, target, headers);
        request.version = version;

        let available = &buf[body_offset..];
        let take = request
            .content_length()
            .map_or(0, |len| len.min(available.len()));
        request.body = Bytes::copy_from_slice(&available[..take]);
        Ok((request, body_offset))
    }

    /// An in-process HTTP/1.1 request with an empty body. `target` is the
    /// path with an optional `?query`.
    pub fn from_parts(method: &str, target: &str, headers: Headers) -> Self {
        let method = match method.parse::<Method>() {
            Ok(m) => m,
            Err(never) => match never {},
        };

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_owned())),
            None => (target, None),
        };
        let params = query.as_deref().map(parse_query_string).unwrap_or_default();

        Self {
            method,
            path: path.to_owned(),
            query,
            params,
            version: 1,
            headers,
            body: Bytes::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path plus `?query` as received. Cache keys are built from this.
    pub fn raw_url(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{q}", self.path),
            None => self.path.clone(),
        }
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// `?callback=` value, unless empty.
    pub fn jsonp_callback(&self) -> Option<&str> {
        self.query_param(JSONP_CALLBACK_PARAM)
            .filter(|cb| !cb.is_empty())
    }

    pub fn accept_encoding(&self) -> Option<&str> {
        self.headers.get(names::ACCEPT_ENCODING)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// HTTP/1.1 keeps the connection open unless told otherwise; HTTP/1.0
    /// only with an explicit `Connection: keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }
}

/// `a=1&b=two+words` into a map. `+` becomes a space; no percent-decoding.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key.replace('+', " "), value.replace('+', " "))
        })
        .collect()
}
