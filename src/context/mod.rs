//! Per-request state shared by the dispatcher, filters and handlers.
//!
//! The router builds one [`Context`] per request. Besides the request it
//! carries the caller's [`Session`], the negotiated response content type
//! and a cancellation token. Stages hand data to later stages through
//! [`Extensions`]; the cache filter leaves its
//! [`CacheInfo`](crate::cache::CacheInfo) there for the write-back stage.

use std::{
    any::{Any, TypeId},
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Instant,
};

use tokio_util::sync::CancellationToken;

use crate::Request;

type AnyItem = Box<dyn Any + Send + Sync>;

/// One slot per Rust type.
#[derive(Default)]
pub struct Extensions {
    items: HashMap<TypeId, AnyItem>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, dropping any earlier item of type `T`.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.items.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.items.get(&TypeId::of::<T>())?.downcast_ref()
    }

    /// Takes the `T` out, leaving the slot empty.
    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        let item = self.items.remove(&TypeId::of::<T>())?;
        item.downcast().ok().map(|boxed: Box<T>| *boxed)
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.items.contains_key(&TypeId::of::<T>())
    }
}

/// `:name` captures of the matched route.
#[derive(Default, Debug, Clone)]
pub struct PathParams {
    captures: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.captures.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.captures.get(name).map(String::as_str)
    }
}

/// The narrow view of an authenticated caller that cache-key derivation needs.
///
/// Implement this over whatever session or claims type the host uses.
pub trait Session: Send + Sync {
    /// Stable identifier of the caller's session, if one was issued.
    fn session_id(&self) -> Option<&str>;

    /// Whether the caller holds `role`.
    fn has_role(&self, role: &str) -> bool;
}

/// A plain in-memory session: an id plus a role set.
#[derive(Debug, Clone, Default)]
pub struct UserSession {
    id: Option<String>,
    roles: BTreeSet<String>,
}

impl UserSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            roles: BTreeSet::new(),
        }
    }

    /// A session without an id (e.g. roles granted to an anonymous caller).
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }
}

impl Session for UserSession {
    fn session_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// Per-request context.
pub struct Context {
    request: Arc<Request>,
    params: PathParams,
    extensions: Extensions,
    session: Option<Arc<dyn Session>>,
    response_content_type: Option<String>,
    cancellation: CancellationToken,
    started_at: Instant,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self::with_params(request, PathParams::new())
    }

    /// A context carrying the router's path captures.
    pub fn with_params(request: Request, params: PathParams) -> Self {
        Self {
            request: Arc::new(request),
            params,
            extensions: Extensions::new(),
            session: None,
            response_content_type: None,
            cancellation: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// A shared handle to the request, for handlers that outlive the borrow.
    pub fn request_arc(&self) -> Arc<Request> {
        Arc::clone(&self.request)
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// The authenticated caller, if a pre-request filter resolved one.
    pub fn session(&self) -> Option<&dyn Session> {
        self.session.as_deref()
    }

    pub fn session_arc(&self) -> Option<Arc<dyn Session>> {
        self.session.clone()
    }

    pub fn set_session(&mut self, session: Arc<dyn Session>) {
        self.session = Some(session);
    }

    /// Content type the response will be serialized as.
    ///
    /// Set by the dispatcher; falls back to `application/json` when a context
    /// did not pass through content negotiation.
    pub fn response_content_type(&self) -> &str {
        self.response_content_type
            .as_deref()
            .unwrap_or(crate::formats::mime::JSON)
    }

    pub fn set_response_content_type(&mut self, content_type: impl Into<String>) {
        self.response_content_type = Some(content_type.into());
    }

    /// Signal tripped when the request is abandoned (client gone, server
    /// shutting down). Cache store reads observe it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Replace the cancellation signal, typically with a child of the
    /// server's shutdown token.
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancellation = token;
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Headers;

    #[test]
    fn extensions_round_trip_by_type() {
        let mut ext = Extensions::new();
        ext.insert(42u32);
        ext.insert(String::from("hello"));
        assert_eq!(ext.get::<u32>(), Some(&42));
        assert_eq!(ext.remove::<String>().as_deref(), Some("hello"));
        assert!(!ext.contains::<String>());
        assert!(ext.contains::<u32>());
    }

    #[test]
    fn user_session_roles() {
        let session = UserSession::new("abc").with_role("RoleA");
        assert_eq!(session.session_id(), Some("abc"));
        assert!(session.has_role("RoleA"));
        assert!(!session.has_role("RoleB"));
        assert_eq!(UserSession::anonymous().session_id(), None);
    }

    #[test]
    fn response_content_type_defaults_to_json() {
        let mut ctx = Context::new(Request::from_parts("GET", "/", Headers::new()));
        assert_eq!(ctx.response_content_type(), "application/json");
        ctx.set_response_content_type("text/csv");
        assert_eq!(ctx.response_content_type(), "text/csv");
    }
}
