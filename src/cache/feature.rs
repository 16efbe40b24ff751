//! The HTTP response caching feature: feature-wide defaults plus the stores
//! cached responses live in.
//!
//! A [`HttpCacheFeature`] must be handed to every operation that caches its
//! responses; there is no global registry to fall back on.

use std::sync::Arc;
use std::time::Duration;

use super::info::{CacheInfo, cache_control_header};
use super::store::{CacheStore, MemoryCacheStore};
use crate::config::{CacheSettings, ConfigError};
use crate::http::{ContentEncoding, encoding};

pub const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(10 * 60);

pub struct HttpCacheFeature {
    default_expires_in: Duration,
    default_max_age: Duration,
    disable_caching: bool,
    compression: Vec<ContentEncoding>,
    shared: Arc<dyn CacheStore>,
    local: Arc<dyn CacheStore>,
}

impl HttpCacheFeature {
    /// A feature with default settings, caching into `shared`.
    pub fn new(shared: Arc<dyn CacheStore>) -> Self {
        Self {
            default_expires_in: DEFAULT_EXPIRES_IN,
            default_max_age: DEFAULT_MAX_AGE,
            disable_caching: false,
            compression: vec![ContentEncoding::Gzip, ContentEncoding::Deflate],
            shared,
            local: Arc::new(MemoryCacheStore::new()),
        }
    }

    /// A feature configured from the `[cache]` section.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownEncoding`] when `compression` names a coding
    /// that cannot be produced.
    pub fn from_settings(
        settings: &CacheSettings,
        shared: Arc<dyn CacheStore>,
    ) -> Result<Self, ConfigError> {
        let compression = settings
            .compression
            .iter()
            .map(|name| name.parse::<ContentEncoding>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            default_expires_in: Duration::from_secs(settings.default_expires_in_secs),
            default_max_age: Duration::from_secs(settings.default_max_age_secs),
            disable_caching: settings.disable_caching,
            compression,
            ..Self::new(shared)
        })
    }

    /// Replaces the process-local store used by `local_cache` operations.
    #[must_use]
    pub fn with_local_store(mut self, local: Arc<dyn CacheStore>) -> Self {
        self.local = local;
        self
    }

    #[must_use]
    pub fn disable_caching(mut self, disable: bool) -> Self {
        self.disable_caching = disable;
        self
    }

    #[must_use]
    pub fn default_expires_in(mut self, ttl: Duration) -> Self {
        self.default_expires_in = ttl;
        self
    }

    #[must_use]
    pub fn default_max_age(mut self, max_age: Duration) -> Self {
        self.default_max_age = max_age;
        self
    }

    /// Codings offered to clients, most preferred first. Empty disables compression.
    #[must_use]
    pub fn compression(mut self, preference: Vec<ContentEncoding>) -> Self {
        self.compression = preference;
        self
    }

    pub fn is_disabled(&self) -> bool {
        self.disable_caching
    }

    pub fn expires_in(&self, info: &CacheInfo) -> Duration {
        info.expires_in.unwrap_or(self.default_expires_in)
    }

    /// The store an entry lives in: the local one for `local_cache` entries.
    pub fn store(&self, local: bool) -> &dyn CacheStore {
        if local {
            self.local.as_ref()
        } else {
            self.shared.as_ref()
        }
    }

    /// `Cache-Control` for a cached response. An entry with a known
    /// last-modified time but no `max_age` gets the default max-age.
    pub fn build_cache_control_header(&self, info: &CacheInfo) -> Option<String> {
        let max_age = info
            .max_age
            .or_else(|| info.last_modified.map(|_| self.default_max_age));
        cache_control_header(max_age, info.cache_control)
    }

    /// The coding a response should use given the request's `Accept-Encoding`.
    pub fn compression_type(&self, accept_encoding: Option<&str>) -> Option<ContentEncoding> {
        encoding::negotiate(accept_encoding, &self.compression)
    }
}

impl std::fmt::Debug for HttpCacheFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCacheFeature")
            .field("default_expires_in", &self.default_expires_in)
            .field("default_max_age", &self.default_max_age)
            .field("disable_caching", &self.disable_caching)
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}
