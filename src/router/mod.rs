//! Request routing.
//!
//! [`Router`] first offers every request to its mounted [`HandlerFactory`]s
//! (the API dispatcher is one), then falls back to explicit routes:
//!
//! | Pattern              | Example match              | Captured params              |
//! |----------------------|----------------------------|------------------------------|
//! | `/health`            | `/health`                  | *(none)*                     |
//! | `/users/:id`         | `/users/42`                | `id → "42"`                  |
//! | `/static/*`          | `/static/css/site.css`     | `wildcard → "/css/site.css"` |
//!
//! Empty segments (and so trailing slashes) are ignored. The first match
//! wins.

use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::context::{Context, PathParams};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased async handler.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Blanket conversion for `async fn(Context) -> Response` style handlers.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

/// A catch-all that decides per request whether it handles it.
///
/// Returning `None` declines the request and lets routing continue.
pub trait HandlerFactory: Send + Sync {
    fn handler_for(&self, method: &Method, path: &str) -> Option<Handler>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture(String),
}

/// A route path split into segments. A trailing `/*` makes it a prefix
/// pattern whose remainder is captured as `wildcard`.
#[derive(Debug, Clone)]
struct Pattern {
    segments: Vec<Segment>,
    wildcard: bool,
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        let (body, wildcard) = match pattern.strip_suffix("/*") {
            Some(prefix) => (prefix, true),
            None => (pattern, false),
        };
        let segments = segments(body)
            .map(|part| match part.strip_prefix(':') {
                Some(name) => Segment::Capture(name.to_owned()),
                None => Segment::Literal(part.to_owned()),
            })
            .collect();
        Self { segments, wildcard }
    }

    fn matches(&self, path: &str) -> Option<PathParams> {
        let mut params = PathParams::new();
        let mut parts = segments(path);
        let mut consumed = 0;

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(lit) if lit != part => return None,
                Segment::Literal(_) => {}
                Segment::Capture(name) => params.insert(name.as_str(), part),
            }
            consumed += 1;
        }

        if self.wildcard {
            // Rest of the raw path after the matched segments, leading slash kept.
            let rest = nth_segment_offset(path, consumed).map_or("", |at| &path[at..]);
            params.insert("wildcard", rest);
            return Some(params);
        }
        parts.next().is_none().then_some(params)
    }
}

/// Byte offset of the `/` that starts segment `n` (zero-based) in `path`.
fn nth_segment_offset(path: &str, n: usize) -> Option<usize> {
    let mut seen = 0;
    let bytes = path.as_bytes();
    for (i, window) in bytes.windows(2).enumerate() {
        if window[0] == b'/' && window[1] != b'/' {
            if seen == n {
                return Some(i);
            }
            seen += 1;
        }
    }
    None
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

/// Method + path router with mountable catch-alls.
///
/// # Examples
///
/// ```rust,no_run
/// use apigate::{Response, Router, StatusCode};
///
/// let mut router = Router::new();
/// router.get("/health", |_ctx| async { Response::new(StatusCode::Ok).body("ok") });
/// ```
#[derive(Default)]
pub struct Router {
    factories: Vec<Arc<dyn HandlerFactory>>,
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts a catch-all. Factories are consulted before explicit routes,
    /// in mount order.
    pub fn mount(&mut self, factory: Arc<dyn HandlerFactory>) -> &mut Self {
        self.factories.push(factory);
        self
    }

    pub fn route(&mut self, method: Method, path: &str, handler: impl IntoHandler) -> &mut Self {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(path),
            handler,
        });
        self
    }

    pub fn get(&mut self, path: &str, handler: impl IntoHandler) -> &mut Self {
        self.route(Method::Get, path, handler)
    }

    pub fn post(&mut self, path: &str, handler: impl IntoHandler) -> &mut Self {
        self.route(Method::Post, path, handler)
    }

    /// Number of explicit routes (mounted factories are not counted).
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.factories.is_empty()
    }

    /// Routes `request` with a fresh cancellation token.
    pub async fn handle(&self, request: Request) -> Response {
        self.dispatch(request, CancellationToken::new()).await
    }

    /// Routes `request`; `cancellation` becomes the context's abandon signal.
    ///
    /// `HEAD` falls back to the `GET` route of the same path when no `HEAD`
    /// route exists. Unmatched requests get `404 Not Found`.
    pub async fn dispatch(&self, request: Request, cancellation: CancellationToken) -> Response {
        let method = request.method().clone();
        let path = request.path().to_owned();

        let mut found = self
            .factories
            .iter()
            .find_map(|factory| factory.handler_for(&method, &path))
            .map(|handler| (handler, PathParams::new()));

        if found.is_none() {
            found = self.find_route(&method, &path);
        }
        if found.is_none() && method == Method::Head {
            found = self.find_route(&Method::Get, &path);
        }

        let Some((handler, params)) = found else {
            return Response::new(StatusCode::NotFound);
        };

        let mut ctx = Context::with_params(request, params);
        ctx.set_cancellation(cancellation);
        handler(ctx).await
    }

    fn find_route(&self, method: &Method, path: &str) -> Option<(Handler, PathParams)> {
        self.routes.iter().find_map(|route| {
            if &route.method != method {
                return None;
            }
            route
                .pattern
                .matches(path)
                .map(|params| (Arc::clone(&route.handler), params))
        })
    }
}
