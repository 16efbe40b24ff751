//! Application configuration loaded from TOML.
//!
//! Every section and field is optional; omitted values take the defaults
//! shown below.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [api]
//! base_path = "/api"
//! default_content_type = "application/json"
//!
//! [cache]
//! default_expires_in_secs = 600
//! default_max_age_secs = 600
//! disable_caching = false
//! compression = ["gzip", "deflate"]
//! max_entries = 10000
//!
//! [cors]
//! allowed_origins = ["*"]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::formats::mime;
use crate::http::encoding::UnknownEncoding;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    UnknownEncoding(#[from] UnknownEncoding),

    #[error("{feature} Plugin must be registered to use [{attribute}]")]
    FeatureNotRegistered {
        feature: &'static str,
        attribute: &'static str,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    /// CORS is off unless the section is present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsSettings>,
}

impl AppConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load config from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Mount point of the operation dispatcher.
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Content type used when the request path carries no `.ext` suffix.
    #[serde(default = "default_content_type")]
    pub default_content_type: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            default_content_type: default_content_type(),
        }
    }
}

fn default_base_path() -> String {
    "/api".to_string()
}

fn default_content_type() -> String {
    mime::JSON.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// TTL for entries whose operation sets no duration.
    #[serde(default = "default_ten_minutes")]
    pub default_expires_in_secs: u64,

    /// `max-age` used when an entry has a last-modified time but no max-age.
    #[serde(default = "default_ten_minutes")]
    pub default_max_age_secs: u64,

    #[serde(default)]
    pub disable_caching: bool,

    /// Content codings offered to clients, most preferred first.
    #[serde(default = "default_compression")]
    pub compression: Vec<String>,

    /// Entry limit for the in-process store.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_expires_in_secs: default_ten_minutes(),
            default_max_age_secs: default_ten_minutes(),
            disable_caching: false,
            compression: default_compression(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_max_entries() -> usize {
    crate::cache::store::DEFAULT_MAX_ENTRIES
}

fn default_ten_minutes() -> u64 {
    600
}

fn default_compression() -> Vec<String> {
    vec!["gzip".to_string(), "deflate".to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorsSettings {
    #[serde(default = "default_origins")]
    pub allowed_origins: Vec<String>,

    #[serde(default = "default_methods")]
    pub allowed_methods: Vec<String>,

    #[serde(default = "default_headers")]
    pub allowed_headers: Vec<String>,

    #[serde(default)]
    pub allow_credentials: bool,

    /// Preflight cache lifetime sent as `Access-Control-Max-Age`.
    #[serde(default = "default_cors_max_age")]
    pub max_age_secs: u64,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            allowed_origins: default_origins(),
            allowed_methods: default_methods(),
            allowed_headers: default_headers(),
            allow_credentials: false,
            max_age_secs: default_cors_max_age(),
        }
    }
}

fn default_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_headers() -> Vec<String> {
    vec!["Content-Type".to_string(), "Authorization".to_string()]
}

fn default_cors_max_age() -> u64 {
    86_400
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.api.base_path, "/api");
        assert_eq!(config.api.default_content_type, "application/json");
        assert_eq!(config.cache.default_expires_in_secs, 600);
        assert_eq!(config.cache.compression, vec!["gzip", "deflate"]);
        assert_eq!(config.cache.max_entries, 10_000);
        assert!(config.cors.is_none());
    }

    #[test]
    fn partial_sections_override_fields() {
        let config = AppConfig::from_toml_str(
            r#"
            [api]
            base_path = "/v1"

            [cache]
            disable_caching = true
            compression = []

            [cors]
            allowed_origins = ["https://app.example.com"]
            "#,
        )
        .unwrap();
        assert_eq!(config.api.base_path, "/v1");
        assert_eq!(config.api.default_content_type, "application/json");
        assert!(config.cache.disable_caching);
        assert!(config.cache.compression.is_empty());
        assert_eq!(config.cache.default_max_age_secs, 600);

        let cors = config.cors.unwrap();
        assert_eq!(cors.allowed_origins, vec!["https://app.example.com"]);
        assert_eq!(cors.max_age_secs, 86_400);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = AppConfig::from_toml_str("[cache\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = AppConfig::load("/nonexistent/apigate.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn feature_not_registered_message() {
        let err = ConfigError::FeatureNotRegistered {
            feature: "HttpCacheFeature",
            attribute: "CacheResponse",
        };
        assert_eq!(
            err.to_string(),
            "HttpCacheFeature Plugin must be registered to use [CacheResponse]"
        );
    }
}
