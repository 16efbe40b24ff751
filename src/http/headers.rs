//! Ordered, case-insensitive header fields.

/// Header names the caching and negotiation layers read or write.
pub mod names {
    pub const ACCEPT_ENCODING: &str = "Accept-Encoding";
    pub const ACCEPT_RANGES: &str = "Accept-Ranges";
    pub const CACHE_CONTROL: &str = "Cache-Control";
    pub const CONTENT_ENCODING: &str = "Content-Encoding";
    pub const CONTENT_RANGE: &str = "Content-Range";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const IF_MODIFIED_SINCE: &str = "If-Modified-Since";
    pub const LAST_MODIFIED: &str = "Last-Modified";
    pub const ORIGIN: &str = "Origin";
    pub const RANGE: &str = "Range";
    pub const VARY: &str = "Vary";
}

/// Header fields in arrival order. A name may repeat; lookups ignore case.
///
/// ```
/// use apigate::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Vary", "Origin");
/// headers.insert("vary", "Cookie");
///
/// assert_eq!(headers.get("VARY"), Some("Origin"));
/// assert_eq!(headers.get_all("Vary").count(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    fn matching<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + use<'a, 'n> {
        self.fields
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Appends a field, keeping earlier ones with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Replaces every field called `name` with one `name: value` field.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.fields.push((name, value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.matching(name).next()
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.matching(name)
    }

    /// First value for `name` that is not blank, trimmed.
    pub fn get_non_empty(&self, name: &str) -> Option<&str> {
        self.matching(name).map(str::trim).find(|v| !v.is_empty())
    }

    /// Drops every field called `name`; `true` if there was one.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.fields.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.matching(name).next().is_some()
    }

    /// Number of fields, counting repeats.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}
