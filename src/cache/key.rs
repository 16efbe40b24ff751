//! Per-operation cache options and cache-key derivation.
//!
//! Key layout:
//!
//! ```text
//! res:{raw_url}{.ext}[+jsonp:{cb}][+user:{id}][+role:{role}]*[+{header}:{value}]*
//! ```
//!
//! `+` and `%` inside user ids and header values are percent-encoded.

use std::borrow::Cow;
use std::time::{Duration, SystemTime};

use super::info::{CacheControl, CacheInfo};
use crate::{
    context::Session,
    formats::{self, ContentTypes},
    http::{Headers, Method},
};

/// Cache options attached to one operation.
///
/// ```
/// use apigate::cache::{CacheControl, CacheResponse};
///
/// let options = CacheResponse::new()
///     .duration_secs(300)
///     .max_age_secs(60)
///     .cache_control(CacheControl::PUBLIC)
///     .vary_by_roles(["Admin"]);
/// assert_eq!(options.duration().map(|d| d.as_secs()), Some(300));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CacheResponse {
    duration: Option<Duration>,
    max_age: Option<Duration>,
    cache_control: CacheControl,
    vary_by_user: bool,
    vary_by_roles: Vec<String>,
    vary_by_headers: Vec<String>,
    local_cache: bool,
    no_compression: bool,
    last_modified: Option<SystemTime>,
    priority: i32,
}

impl CacheResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry TTL in seconds. `0` means "use the feature default".
    #[must_use]
    pub fn duration_secs(mut self, secs: u64) -> Self {
        self.duration = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    /// `Cache-Control: max-age` in seconds. Setting it, even to `0`, turns on
    /// HTTP validation.
    #[must_use]
    pub fn max_age_secs(mut self, secs: u64) -> Self {
        self.max_age = Some(Duration::from_secs(secs));
        self
    }

    #[must_use]
    pub fn cache_control(mut self, flags: CacheControl) -> Self {
        self.cache_control = flags;
        self
    }

    #[must_use]
    pub fn vary_by_user(mut self, vary: bool) -> Self {
        self.vary_by_user = vary;
        self
    }

    #[must_use]
    pub fn vary_by_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vary_by_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn vary_by_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vary_by_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Keep entries in the process-local store instead of the shared one.
    #[must_use]
    pub fn local_cache(mut self, local: bool) -> Self {
        self.local_cache = local;
        self
    }

    #[must_use]
    pub fn no_compression(mut self, off: bool) -> Self {
        self.no_compression = off;
        self
    }

    #[must_use]
    pub fn last_modified(mut self, at: SystemTime) -> Self {
        self.last_modified = Some(at);
        self
    }

    /// Position of the cache filter in the operation's request chain.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    pub fn priority_value(&self) -> i32 {
        self.priority
    }
}

/// The request facts key derivation depends on.
#[derive(Clone, Copy)]
pub struct KeyInputs<'a> {
    pub method: &'a Method,
    pub raw_url: &'a str,
    pub response_content_type: &'a str,
    pub jsonp_callback: Option<&'a str>,
    pub session: Option<&'a dyn Session>,
    pub headers: &'a Headers,
}

/// Computes the [`CacheInfo`] for one request, or `None` when the method is
/// not cacheable. Pure: identical inputs always give identical keys.
pub fn derive_cache_info(
    options: &CacheResponse,
    inputs: &KeyInputs<'_>,
    content_types: &ContentTypes,
) -> Option<CacheInfo> {
    if !inputs.method.is_cacheable() {
        return None;
    }

    let mut modifiers: Vec<String> = Vec::new();

    if let Some(callback) = inputs.jsonp_callback {
        if formats::is_json(inputs.response_content_type) {
            modifiers.push(format!("jsonp:{}", sanitize_var_name(callback)));
        }
    }

    if options.vary_by_user {
        let id = inputs.session.and_then(|s| s.session_id()).unwrap_or("");
        modifiers.push(format!("user:{}", escape_modifier(id)));
    }

    if let Some(session) = inputs.session {
        modifiers.extend(
            options
                .vary_by_roles
                .iter()
                .filter(|role| session.has_role(role))
                .map(|role| format!("role:{role}")),
        );
    }

    for name in &options.vary_by_headers {
        if let Some(value) = inputs.headers.get_non_empty(name) {
            modifiers.push(format!("{name}:{}", escape_modifier(value)));
        }
    }

    let mut key_modifiers = content_types.extension_for(inputs.response_content_type);
    for modifier in modifiers {
        key_modifiers.push('+');
        key_modifiers.push_str(&modifier);
    }

    Some(CacheInfo {
        key_base: format!("res:{}", inputs.raw_url),
        key_modifiers,
        expires_in: options.duration,
        max_age: options.max_age,
        cache_control: options.cache_control,
        last_modified: options.last_modified,
        vary_by_user: options.vary_by_user,
        local_cache: options.local_cache,
        no_compression: options.no_compression,
    })
}

/// Percent-encodes `%` and the `+` modifier separator, so a caller-supplied
/// value cannot spell out further modifiers.
fn escape_modifier(value: &str) -> Cow<'_, str> {
    if !value.contains(['+', '%']) {
        return Cow::Borrowed(value);
    }
    Cow::Owned(value.replace('%', "%25").replace('+', "%2B"))
}

/// Replaces every character outside `[A-Za-z0-9_]` with `_`.
pub fn sanitize_var_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::UserSession;
    use crate::formats::mime;

    fn inputs<'a>(
        method: &'a Method,
        headers: &'a Headers,
        session: Option<&'a dyn Session>,
    ) -> KeyInputs<'a> {
        KeyInputs {
            method,
            raw_url: "/api/Hello?name=x",
            response_content_type: mime::JSON,
            jsonp_callback: None,
            session,
            headers,
        }
    }

    #[test]
    fn bare_extension_without_modifiers() {
        let headers = Headers::new();
        let info = derive_cache_info(
            &CacheResponse::new(),
            &inputs(&Method::Get, &headers, None),
            &ContentTypes::default(),
        )
        .unwrap();
        assert_eq!(info.key_base, "res:/api/Hello?name=x");
        assert_eq!(info.key_modifiers, ".json");
    }

    #[test]
    fn non_cacheable_methods_bypass() {
        let headers = Headers::new();
        for method in [Method::Post, Method::Put, Method::Delete, Method::Options] {
            assert!(
                derive_cache_info(
                    &CacheResponse::new(),
                    &inputs(&method, &headers, None),
                    &ContentTypes::default(),
                )
                .is_none()
            );
        }
        assert!(
            derive_cache_info(
                &CacheResponse::new(),
                &inputs(&Method::Head, &headers, None),
                &ContentTypes::default(),
            )
            .is_some()
        );
    }

    #[test]
    fn modifiers_follow_fixed_order() {
        let mut headers = Headers::new();
        headers.insert("X-Tenant", "acme");
        headers.insert("X-Empty", "  ");
        let session = UserSession::new("u1").with_role("Admin").with_role("Editor");
        let options = CacheResponse::new()
            .vary_by_user(true)
            .vary_by_roles(["Editor", "Missing", "Admin"])
            .vary_by_headers(["X-Tenant", "X-Empty", "X-Absent"]);

        let mut inputs = inputs(&Method::Get, &headers, Some(&session));
        inputs.jsonp_callback = Some("my.cb-1");

        let info = derive_cache_info(&options, &inputs, &ContentTypes::default()).unwrap();
        assert_eq!(
            info.key_modifiers,
            ".json+jsonp:my_cb_1+user:u1+role:Editor+role:Admin+X-Tenant:acme"
        );
    }

    #[test]
    fn header_values_cannot_forge_modifiers() {
        let options = CacheResponse::new().vary_by_headers(["A", "B"]);

        let mut forged = Headers::new();
        forged.insert("A", "x+B:y");
        let mut split = Headers::new();
        split.insert("A", "x");
        split.insert("B", "y");

        let key = |headers: &Headers| {
            derive_cache_info(
                &options,
                &inputs(&Method::Get, headers, None),
                &ContentTypes::default(),
            )
            .unwrap()
            .key_modifiers
        };
        assert_eq!(key(&split), ".json+A:x+B:y");
        assert_eq!(key(&forged), ".json+A:x%2BB:y");

        let mut literal = Headers::new();
        literal.insert("A", "x%2BB:y");
        assert_eq!(key(&literal), ".json+A:x%252BB:y");
    }

    #[test]
    fn jsonp_ignored_for_non_json() {
        let headers = Headers::new();
        let mut inputs = inputs(&Method::Get, &headers, None);
        inputs.response_content_type = mime::CSV;
        inputs.jsonp_callback = Some("cb");
        let info =
            derive_cache_info(&CacheResponse::new(), &inputs, &ContentTypes::default()).unwrap();
        assert_eq!(info.key_modifiers, ".csv");
    }

    #[test]
    fn roles_skipped_without_session() {
        let headers = Headers::new();
        let options = CacheResponse::new().vary_by_roles(["Admin"]);
        let info = derive_cache_info(
            &options,
            &inputs(&Method::Get, &headers, None),
            &ContentTypes::default(),
        )
        .unwrap();
        assert_eq!(info.key_modifiers, ".json");
    }

    #[test]
    fn vary_by_user_discriminates_sessions() {
        let headers = Headers::new();
        let a = UserSession::new("a");
        let b = UserSession::new("b");
        let types = ContentTypes::default();

        let shared = CacheResponse::new();
        let key_a = derive_cache_info(&shared, &inputs(&Method::Get, &headers, Some(&a)), &types)
            .unwrap()
            .cache_key();
        let key_b = derive_cache_info(&shared, &inputs(&Method::Get, &headers, Some(&b)), &types)
            .unwrap()
            .cache_key();
        assert_eq!(key_a, key_b);

        let per_user = CacheResponse::new().vary_by_user(true);
        let key_a = derive_cache_info(&per_user, &inputs(&Method::Get, &headers, Some(&a)), &types)
            .unwrap()
            .cache_key();
        let key_b = derive_cache_info(&per_user, &inputs(&Method::Get, &headers, Some(&b)), &types)
            .unwrap()
            .cache_key();
        assert_ne!(key_a, key_b);
    }

    #[test]
    fn anonymous_user_gets_empty_id() {
        let headers = Headers::new();
        let options = CacheResponse::new().vary_by_user(true);
        let info = derive_cache_info(
            &options,
            &inputs(&Method::Get, &headers, None),
            &ContentTypes::default(),
        )
        .unwrap();
        assert_eq!(info.key_modifiers, ".json+user:");
        assert!(info.vary_by_user);
    }

    #[test]
    fn policy_fields_are_copied() {
        let headers = Headers::new();
        let options = CacheResponse::new()
            .duration_secs(0)
            .max_age_secs(30)
            .cache_control(CacheControl::PRIVATE)
            .local_cache(true)
            .no_compression(true);
        let info = derive_cache_info(
            &options,
            &inputs(&Method::Get, &headers, None),
            &ContentTypes::default(),
        )
        .unwrap();
        assert_eq!(info.expires_in, None);
        assert_eq!(info.max_age, Some(Duration::from_secs(30)));
        assert_eq!(info.cache_control, CacheControl::PRIVATE);
        assert!(info.local_cache && info.no_compression);
    }

    #[test]
    fn sanitizes_callback_names() {
        assert_eq!(sanitize_var_name("jQuery_123"), "jQuery_123");
        assert_eq!(sanitize_var_name("a.b(c)"), "a_b_c_");
    }
}
