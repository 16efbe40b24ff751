//! Response formats. The dispatcher looks a `.ext` suffix up in
//! [`ContentTypes`] to pick the response content type; the matching
//! serializer renders the operation's result.
//!
//! | Extension | Content type                  | Feature        |
//! |-----------|-------------------------------|----------------|
//! | `json`    | `application/json`            | [`Format::Json`] |
//! | `csv`     | `text/csv`                    | [`Format::Csv`]  |
//! | `text`    | `text/plain`                  | [`Format::Text`] |
//!
//! Additional formats are added with [`ContentTypes::register`].

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

/// Well-known MIME types.
pub mod mime {
    pub const JSON: &str = "application/json";
    pub const CSV: &str = "text/csv";
    pub const TEXT: &str = "text/plain";
    pub const HTML: &str = "text/html";
    pub const XML: &str = "application/xml";
}

/// Errors raised while serializing a result.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("no serializer registered for content type `{content_type}`")]
    Unsupported { content_type: String },

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV serialization failed: {0}")]
    Csv(String),
}

/// Bit set describing the wire format a request was negotiated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RequestAttributes(u32);

impl RequestAttributes {
    pub const NONE: Self = Self(0);
    pub const JSON: Self = Self(1 << 0);
    pub const CSV: Self = Self(1 << 1);
    pub const TEXT: Self = Self(1 << 2);
    pub const HTML: Self = Self(1 << 3);
    pub const XML: Self = Self(1 << 4);
    pub const FORMAT_OTHER: Self = Self(1 << 5);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// The "feature" a format belongs to, used to gate formats per host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    Csv,
    Text,
    Html,
    Xml,
    Other,
}

impl Format {
    pub fn attributes(self) -> RequestAttributes {
        match self {
            Self::Json => RequestAttributes::JSON,
            Self::Csv => RequestAttributes::CSV,
            Self::Text => RequestAttributes::TEXT,
            Self::Html => RequestAttributes::HTML,
            Self::Xml => RequestAttributes::XML,
            Self::Other => RequestAttributes::FORMAT_OTHER,
        }
    }
}

/// Renders a JSON value as response bytes.
pub type Serializer = Arc<dyn Fn(&Value) -> Result<Vec<u8>, FormatError> + Send + Sync>;

/// One registered format.
#[derive(Clone)]
pub struct ContentFormat {
    extension: String,
    content_type: String,
    feature: Format,
    attributes: RequestAttributes,
    serializer: Serializer,
}

impl ContentFormat {
    pub fn new<F>(extension: &str, content_type: &str, feature: Format, serializer: F) -> Self
    where
        F: Fn(&Value) -> Result<Vec<u8>, FormatError> + Send + Sync + 'static,
    {
        Self {
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
            content_type: content_type.to_owned(),
            feature,
            attributes: feature.attributes(),
            serializer: Arc::new(serializer),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn feature(&self) -> Format {
        self.feature
    }

    pub fn attributes(&self) -> RequestAttributes {
        self.attributes
    }
}

impl fmt::Debug for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentFormat")
            .field("extension", &self.extension)
            .field("content_type", &self.content_type)
            .field("feature", &self.feature)
            .finish_non_exhaustive()
    }
}

/// Registry of response formats, keyed by extension and by content type.
#[derive(Debug, Clone)]
pub struct ContentTypes {
    formats: Vec<ContentFormat>,
}

impl Default for ContentTypes {
    fn default() -> Self {
        let mut types = Self::empty();
        types.register(ContentFormat::new("json", mime::JSON, Format::Json, to_json));
        types.register(ContentFormat::new("csv", mime::CSV, Format::Csv, to_csv));
        types.register(ContentFormat::new("text", mime::TEXT, Format::Text, to_text));
        types
    }
}

impl ContentTypes {
    /// A registry with no formats at all.
    pub fn empty() -> Self {
        Self {
            formats: Vec::new(),
        }
    }

    /// Adds a format, replacing an existing registration for the same extension.
    pub fn register(&mut self, format: ContentFormat) {
        self.formats.retain(|f| f.extension != format.extension);
        self.formats.push(format);
    }

    /// Looks up a format by extension (without the dot, case-insensitive).
    pub fn by_extension(&self, extension: &str) -> Option<&ContentFormat> {
        let extension = extension.trim_start_matches('.');
        self.formats
            .iter()
            .find(|f| f.extension.eq_ignore_ascii_case(extension))
    }

    /// Looks up a format by content type, ignoring parameters such as `charset`.
    pub fn by_content_type(&self, content_type: &str) -> Option<&ContentFormat> {
        let essence = essence(content_type);
        self.formats
            .iter()
            .find(|f| f.content_type.eq_ignore_ascii_case(essence))
    }

    /// The dotted extension used for `content_type` in cache keys, e.g. `.json`.
    ///
    /// Unregistered types fall back to their MIME subtype.
    pub fn extension_for(&self, content_type: &str) -> String {
        match self.by_content_type(content_type) {
            Some(format) => format!(".{}", format.extension),
            None => {
                let essence = essence(content_type);
                let subtype = essence.rsplit('/').next().unwrap_or(essence);
                let subtype = subtype.rsplit('+').next().unwrap_or(subtype);
                format!(".{}", subtype.to_ascii_lowercase())
            }
        }
    }

    /// Serializes `value` as `content_type`.
    pub fn serialize(&self, content_type: &str, value: &Value) -> Result<Bytes, FormatError> {
        let format = self
            .by_content_type(content_type)
            .ok_or_else(|| FormatError::Unsupported {
                content_type: content_type.to_owned(),
            })?;
        (format.serializer)(value).map(Bytes::from)
    }
}

/// `text/csv; charset=utf-8` → `text/csv`
pub fn essence(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or(content_type).trim()
}

/// Whether `content_type` is JSON (ignoring parameters).
pub fn is_json(content_type: &str) -> bool {
    essence(content_type).eq_ignore_ascii_case(mime::JSON)
}

fn to_json(value: &Value) -> Result<Vec<u8>, FormatError> {
    Ok(serde_json::to_vec(value)?)
}

fn to_text(value: &Value) -> Result<Vec<u8>, FormatError> {
    Ok(match value {
        Value::String(s) => s.clone().into_bytes(),
        other => serde_json::to_vec_pretty(other)?,
    })
}

/// Arrays of objects become a header row plus one row per element; a single
/// object is a one-row table; scalars are written as a lone cell.
fn to_csv(value: &Value) -> Result<Vec<u8>, FormatError> {
    let rows: Vec<&serde_json::Map<String, Value>> = match value {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_object()
                    .ok_or_else(|| FormatError::Csv("array elements must be objects".into()))
            })
            .collect::<Result<_, _>>()?,
        Value::Object(map) => vec![map],
        scalar => return Ok(format!("{}\r\n", csv_cell(scalar)).into_bytes()),
    };

    let mut columns: Vec<&str> = Vec::new();
    for row in &rows {
        for key in row.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut out = String::new();
    out.push_str(
        &columns
            .iter()
            .map(|c| csv_escape(c))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push_str("\r\n");
    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| row.get(*c).map(csv_cell).unwrap_or_default())
            .collect();
        out.push_str(&cells.join(","));
        out.push_str("\r\n");
    }
    Ok(out.into_bytes())
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => csv_escape(s),
        other => csv_escape(&other.to_string()),
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn lookup_by_extension_is_case_insensitive() {
        let types = ContentTypes::default();
        let csv = types.by_extension("CSV").unwrap();
        assert_eq!(csv.content_type(), mime::CSV);
        assert_eq!(csv.feature(), Format::Csv);
        assert!(csv.attributes().contains(RequestAttributes::CSV));
        assert!(types.by_extension("yaml").is_none());
    }

    #[test]
    fn lookup_by_content_type_ignores_params() {
        let types = ContentTypes::default();
        let json = types.by_content_type("application/json; charset=utf-8").unwrap();
        assert_eq!(json.extension(), "json");
    }

    #[test]
    fn extension_for_unregistered_uses_subtype() {
        let types = ContentTypes::default();
        assert_eq!(types.extension_for(mime::JSON), ".json");
        assert_eq!(types.extension_for("application/vnd.acme+msgpack"), ".msgpack");
        assert_eq!(types.extension_for(mime::HTML), ".html");
    }

    #[test]
    fn register_replaces_same_extension() {
        let mut types = ContentTypes::default();
        types.register(ContentFormat::new(".json", "application/vnd.api+json", Format::Json, to_json));
        assert_eq!(types.by_extension("json").unwrap().content_type(), "application/vnd.api+json");
        assert!(types.by_content_type(mime::JSON).is_none());
    }

    #[test]
    fn csv_table_from_objects() {
        let types = ContentTypes::default();
        let out = types
            .serialize(mime::CSV, &json!([{"name": "a", "n": 1}, {"name": "b,c", "extra": true}]))
            .unwrap();
        assert_eq!(
            std::str::from_utf8(&out).unwrap(),
            "n,name,extra\r\n1,a,\r\n,\"b,c\",true\r\n"
        );
    }

    #[test]
    fn csv_rejects_nested_arrays() {
        let types = ContentTypes::default();
        let err = types.serialize(mime::CSV, &json!([[1, 2]])).unwrap_err();
        assert!(matches!(err, FormatError::Csv(_)));
    }

    #[test]
    fn unsupported_content_type() {
        let types = ContentTypes::default();
        let err = types.serialize(mime::XML, &json!({})).unwrap_err();
        assert!(matches!(err, FormatError::Unsupported { .. }));
    }

    #[test]
    fn text_writes_strings_raw() {
        let types = ContentTypes::default();
        let out = types.serialize(mime::TEXT, &json!("hi")).unwrap();
        assert_eq!(&out[..], b"hi");
    }
}
