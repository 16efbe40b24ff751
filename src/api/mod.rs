//! Content-negotiating API dispatcher.
//!
//! [`ApiHandlers`] is mounted on the [`Router`](crate::router::Router) as a
//! catch-all. For a request under one of its base paths it resolves:
//!
//! | Path                 | Handler                                          |
//! |----------------------|--------------------------------------------------|
//! | `/api`               | the index callback, or not-found without one      |
//! | `OPTIONS /api/...`   | the CORS preflight, or declined without CORS      |
//! | `/api/Hello`         | operation `Hello`, route default content type     |
//! | `/api/Hello.csv`     | operation `Hello`, `text/csv` for this request    |
//!
//! Paths outside every base path are declined so other routes can match.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

pub mod services;

pub use services::{Operation, ServiceError, ServiceRegistry, ServiceRequest};

use crate::{
    Error, Method, Response, StatusCode,
    config::ApiSettings,
    context::Context,
    filter::BoxFuture,
    formats::{ContentTypes, Format, RequestAttributes},
    router::{Handler, HandlerFactory},
    security::CorsFeature,
};

/// Produces the listing served at a route's base path.
pub type IndexCallback = Arc<dyn Fn(&Context) -> Value + Send + Sync>;

/// One mount point with its default format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRoute {
    base_path: String,
    content_type: String,
    attributes: RequestAttributes,
    feature: Format,
}

impl ApiRoute {
    /// A route whose attributes and feature come from the registered format
    /// for `content_type`. Unregistered content types get [`Format::Other`].
    pub fn new(base_path: &str, content_type: &str, content_types: &ContentTypes) -> Self {
        let feature = content_types
            .by_content_type(content_type)
            .map(|format| format.feature())
            .unwrap_or(Format::Other);
        Self::with_format(base_path, content_type, feature.attributes(), feature)
    }

    pub fn with_format(
        base_path: &str,
        content_type: &str,
        attributes: RequestAttributes,
        feature: Format,
    ) -> Self {
        let trimmed = base_path.trim_matches('/');
        Self {
            base_path: format!("/{trimmed}"),
            content_type: content_type.to_owned(),
            attributes,
            feature,
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

/// An operation bound to the format negotiated for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericHandler {
    pub operation_name: String,
    pub content_type: String,
    pub attributes: RequestAttributes,
    pub feature: Format,
}

/// Outcome of [`ApiHandlers::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiHandler {
    Index { content_type: String },
    NotFound,
    Preflight,
    Operation(GenericHandler),
}

struct ApiInner {
    routes: Vec<ApiRoute>,
    content_types: Arc<ContentTypes>,
    index: Option<IndexCallback>,
    cors: Option<Arc<CorsFeature>>,
    services: Arc<ServiceRegistry>,
}

/// The dispatcher. Cheap to clone.
#[derive(Clone)]
pub struct ApiHandlers {
    inner: Arc<ApiInner>,
}

pub struct ApiHandlersBuilder {
    routes: Vec<ApiRoute>,
    index: Option<IndexCallback>,
    cors: Option<Arc<CorsFeature>>,
    services: Arc<ServiceRegistry>,
}

impl ApiHandlersBuilder {
    #[must_use]
    pub fn route(mut self, route: ApiRoute) -> Self {
        self.routes.push(route);
        self
    }

    #[must_use]
    pub fn index<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Context) -> Value + Send + Sync + 'static,
    {
        self.index = Some(Arc::new(callback));
        self
    }

    /// Serves `{"operations": [...]}` listing every registered operation.
    #[must_use]
    pub fn operation_index(self) -> Self {
        let services = Arc::clone(&self.services);
        self.index(move |_ctx| json!({ "operations": services.operation_names() }))
    }

    #[must_use]
    pub fn cors(mut self, cors: Arc<CorsFeature>) -> Self {
        self.cors = Some(cors);
        self
    }

    pub fn build(self) -> ApiHandlers {
        let content_types = Arc::clone(self.services.content_types());
        ApiHandlers {
            inner: Arc::new(ApiInner {
                routes: self.routes,
                content_types,
                index: self.index,
                cors: self.cors,
                services: self.services,
            }),
        }
    }
}

impl ApiHandlers {
    pub fn builder(services: Arc<ServiceRegistry>) -> ApiHandlersBuilder {
        ApiHandlersBuilder {
            routes: Vec::new(),
            index: None,
            cors: None,
            services,
        }
    }

    /// A builder with the single route described by the `[api]` section.
    pub fn from_settings(settings: &ApiSettings, services: Arc<ServiceRegistry>) -> ApiHandlersBuilder {
        let route = ApiRoute::new(
            &settings.base_path,
            &settings.default_content_type,
            services.content_types(),
        );
        Self::builder(services).route(route)
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.inner.services
    }

    /// Maps a request line to a handler. `None` declines the request.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<ApiHandler> {
        let inner = &self.inner;
        for route in &inner.routes {
            if path == route.base_path {
                return Some(match inner.index {
                    Some(_) => ApiHandler::Index {
                        content_type: route.content_type.clone(),
                    },
                    None => ApiHandler::NotFound,
                });
            }

            let Some(rest) = path
                .strip_prefix(route.base_path.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            else {
                continue;
            };

            if method == &Method::Options {
                return inner.cors.as_ref().map(|_| ApiHandler::Preflight);
            }

            let segment = rest.rsplit('/').next().unwrap_or(rest);
            let handler = match segment.rsplit_once('.') {
                Some((name, ext)) => match inner.content_types.by_extension(ext) {
                    Some(format) if !name.is_empty() => GenericHandler {
                        operation_name: name.to_owned(),
                        content_type: format.content_type().to_owned(),
                        attributes: format.attributes(),
                        feature: format.feature(),
                    },
                    _ => return Some(ApiHandler::NotFound),
                },
                None if segment.is_empty() => return Some(ApiHandler::NotFound),
                None => GenericHandler {
                    operation_name: segment.to_owned(),
                    content_type: route.content_type.clone(),
                    attributes: route.attributes,
                    feature: route.feature,
                },
            };
            return Some(ApiHandler::Operation(handler));
        }
        None
    }

    /// Runs a resolved handler.
    pub async fn execute(&self, handler: ApiHandler, mut ctx: Context) -> Response {
        let inner = &self.inner;
        match handler {
            ApiHandler::Index { content_type } => {
                let Some(index) = &inner.index else {
                    return not_found(ctx.request().path());
                };
                let listing = index(&ctx);
                match inner.content_types.serialize(&content_type, &listing) {
                    Ok(body) => Response::new(StatusCode::Ok)
                        .content_type(content_type)
                        .body_bytes(body),
                    Err(err) => Error::from(err).into_response(),
                }
            }
            ApiHandler::NotFound => not_found(ctx.request().path()),
            ApiHandler::Preflight => match &inner.cors {
                Some(cors) => cors.preflight(ctx.request()),
                None => not_found(ctx.request().path()),
            },
            ApiHandler::Operation(generic) => {
                ctx.set_response_content_type(generic.content_type);
                ctx.extensions_mut().insert(generic.attributes);
                ctx.extensions_mut().insert(generic.feature);
                inner
                    .services
                    .execute(&mut ctx, &generic.operation_name)
                    .await
            }
        }
    }
}

fn not_found(path: &str) -> Response {
    Error::from(ServiceError::not_found(format!("Handler for `{path}` was not found")))
        .into_response()
}

impl HandlerFactory for ApiHandlers {
    fn handler_for(&self, method: &Method, path: &str) -> Option<Handler> {
        let resolved = self.resolve(method, path)?;
        debug!(%method, path, handler = ?resolved, "api dispatch");
        let api = self.clone();
        Some(Arc::new(move |ctx: Context| -> BoxFuture<'static, Response> {
            let api = api.clone();
            let resolved = resolved.clone();
            Box::pin(async move { api.execute(resolved, ctx).await })
        }))
    }
}
