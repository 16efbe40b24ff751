use crate::{
    Error, Method, Request, Response, StatusCode,
    config::CorsSettings,
    context::Context,
    filter::{BoxFuture, ResponseFilter},
    http::headers::names,
};

/// Cross-Origin Resource Sharing.
///
/// - [`preflight`](Self::preflight) answers `OPTIONS` requests; the API
///   dispatcher routes preflights here when the feature is registered.
/// - As a [`ResponseFilter`] it adds `Access-Control-*` headers to actual
///   responses for allowed origins.
///
/// Requests without an `Origin` header, or from an origin that is not
/// allowed, get no `Access-Control-Allow-Origin`. When a specific origin is
/// echoed back `Vary: Origin` is added; the wildcard origin never adds it.
///
/// # Examples
///
/// ```rust
/// use apigate::security::CorsFeature;
///
/// let cors = CorsFeature::new()
///     .with_origins(["https://app.example.com"])
///     .allow_method("PATCH")
///     .allow_header("X-Request-ID");
/// ```
#[derive(Debug, Clone)]
pub struct CorsFeature {
    allowed_origins: Vec<String>,
    allowed_methods: Vec<String>,
    allowed_headers: Vec<String>,
    allow_credentials: bool,
    max_age_secs: u64,
}

impl Default for CorsFeature {
    fn default() -> Self {
        Self::new()
    }
}

impl CorsFeature {
    /// Permissive defaults: every origin, common methods and headers.
    pub fn new() -> Self {
        Self::from_settings(&CorsSettings::default())
    }

    pub fn from_settings(settings: &CorsSettings) -> Self {
        Self {
            allowed_origins: settings.allowed_origins.clone(),
            allowed_methods: settings.allowed_methods.clone(),
            allowed_headers: settings.allowed_headers.clone(),
            allow_credentials: settings.allow_credentials,
            max_age_secs: settings.max_age_secs,
        }
    }

    /// Replaces the origin allow-list. `"*"` permits every origin.
    #[must_use]
    pub fn with_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn allow_method(mut self, method: impl Into<String>) -> Self {
        self.allowed_methods.push(method.into());
        self
    }

    #[must_use]
    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        self.allowed_headers.push(header.into());
        self
    }

    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    /// The `Access-Control-Allow-Origin` value for `origin`, if it is allowed.
    fn allow_origin(&self, origin: &str) -> Option<String> {
        if self.allowed_origins.iter().any(|o| o == "*") {
            Some("*".to_owned())
        } else if self.allowed_origins.iter().any(|o| o == origin) {
            Some(origin.to_owned())
        } else {
            None
        }
    }

    fn decorate(&self, request: &Request, response: &mut Response) {
        let Some(allow_origin) = request
            .headers()
            .get(names::ORIGIN)
            .and_then(|origin| self.allow_origin(origin))
        else {
            return;
        };

        response.set_header("Access-Control-Allow-Origin", &allow_origin);
        response.set_header(
            "Access-Control-Allow-Methods",
            self.allowed_methods.join(", "),
        );
        response.set_header(
            "Access-Control-Allow-Headers",
            self.allowed_headers.join(", "),
        );
        if self.allow_credentials {
            response.set_header("Access-Control-Allow-Credentials", "true");
        }
        if allow_origin != "*" {
            response.add_header(names::VARY, "Origin");
        }
    }

    /// `204 No Content` answer to a CORS preflight.
    pub fn preflight(&self, request: &Request) -> Response {
        let mut response = Response::new(StatusCode::NoContent);
        self.decorate(request, &mut response);
        if response.headers().contains("Access-Control-Allow-Origin") {
            response.set_header("Access-Control-Max-Age", self.max_age_secs.to_string());
        }
        response
    }
}

impl ResponseFilter for CorsFeature {
    fn apply<'a>(
        &'a self,
        ctx: &'a mut Context,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            if ctx.request().method() != &Method::Options {
                self.decorate(ctx.request(), response);
            }
            Ok(())
        })
    }
}
