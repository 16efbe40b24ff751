//! The description of one cacheable response instance.

use std::ops::BitOr;
use std::time::{Duration, SystemTime};

use crate::http::ContentEncoding;

/// `Cache-Control` response directives as a flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CacheControl(u8);

impl CacheControl {
    pub const NONE: Self = Self(0);
    pub const PUBLIC: Self = Self(1 << 0);
    pub const PRIVATE: Self = Self(1 << 1);
    pub const MUST_REVALIDATE: Self = Self(1 << 2);
    pub const NO_CACHE: Self = Self(1 << 3);
    pub const NO_STORE: Self = Self(1 << 4);
    pub const NO_TRANSFORM: Self = Self(1 << 5);
    pub const PROXY_REVALIDATE: Self = Self(1 << 6);

    /// Directives in the order they are written to the header.
    const DIRECTIVES: [(Self, &'static str); 7] = [
        (Self::PUBLIC, "public"),
        (Self::PRIVATE, "private"),
        (Self::MUST_REVALIDATE, "must-revalidate"),
        (Self::NO_CACHE, "no-cache"),
        (Self::NO_STORE, "no-store"),
        (Self::NO_TRANSFORM, "no-transform"),
        (Self::PROXY_REVALIDATE, "proxy-revalidate"),
    ];

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for CacheControl {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Builds a `Cache-Control` value: `max-age=N` first, then every set
/// directive, comma-joined. Returns `None` when there is nothing to say.
pub fn cache_control_header(max_age: Option<Duration>, flags: CacheControl) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    if let Some(max_age) = max_age {
        parts.push(format!("max-age={}", max_age.as_secs()));
    }
    parts.extend(
        CacheControl::DIRECTIVES
            .iter()
            .filter(|(flag, _)| flags.contains(*flag))
            .map(|(_, name)| (*name).to_owned()),
    );
    (!parts.is_empty()).then(|| parts.join(", "))
}

/// Everything needed to look up, validate and store one cached response.
///
/// The storage key is always derived from `key_base` and `key_modifiers`;
/// it is never stored on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInfo {
    /// `res:` followed by the raw request URL.
    pub key_base: String,
    /// Format extension plus `+`-joined variation modifiers.
    pub key_modifiers: String,
    /// Entry TTL; `None` falls back to the feature default.
    pub expires_in: Option<Duration>,
    pub max_age: Option<Duration>,
    pub cache_control: CacheControl,
    /// Advisory last-modified time, used only to default `max-age`.
    pub last_modified: Option<SystemTime>,
    pub vary_by_user: bool,
    pub local_cache: bool,
    pub no_compression: bool,
}

impl CacheInfo {
    pub fn new(key_base: impl Into<String>, key_modifiers: impl Into<String>) -> Self {
        Self {
            key_base: key_base.into(),
            key_modifiers: key_modifiers.into(),
            expires_in: None,
            max_age: None,
            cache_control: CacheControl::NONE,
            last_modified: None,
            vary_by_user: false,
            local_cache: false,
            no_compression: false,
        }
    }

    pub fn cache_key(&self) -> String {
        format!("{}{}", self.key_base, self.key_modifiers)
    }

    /// Key of the timestamp record written next to the body.
    pub fn last_modified_key(&self) -> String {
        format!("date:{}", self.cache_key())
    }

    /// Key the body is stored under for a given content encoding.
    pub fn storage_key(&self, encoding: Option<ContentEncoding>) -> String {
        match encoding {
            Some(encoding) => format!("{}.{}", self.cache_key(), encoding),
            None => self.cache_key(),
        }
    }

    /// Whether clients get HTTP caching headers and conditional validation.
    pub fn does_http_caching(&self) -> bool {
        self.max_age.is_some() || !self.cache_control.is_none()
    }
}
