//! Operation registry: named handlers, their filter chains, and the
//! execution pipeline the dispatcher hands requests to.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
    Error, Request, Response, StatusCode,
    cache::{CacheResponse, CacheResponseFilter, CacheResponseWriter, HttpCacheFeature, key},
    context::{Context, Session},
    filter::{BoxFuture, FilterChain, FilterOutcome, RequestFilter, ResponseFilter},
    formats::{self, ContentTypes, RequestAttributes},
};

/// A failure reported by an operation handler.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ServiceError {
    status: StatusCode,
    message: String,
}

impl ServiceError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BadRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InternalServerError, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// What an operation handler receives.
pub struct ServiceRequest {
    pub request: Arc<Request>,
    /// Operation name as registered.
    pub operation: String,
    pub attributes: RequestAttributes,
    pub session: Option<Arc<dyn Session>>,
}

impl ServiceRequest {
    /// Shorthand for a query-string parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.request.query_param(key)
    }
}

type ServiceHandler =
    Arc<dyn Fn(ServiceRequest) -> BoxFuture<'static, Result<Value, ServiceError>> + Send + Sync>;

/// One registered operation and its filter chains.
pub struct Operation {
    name: String,
    handler: ServiceHandler,
    request_filters: FilterChain<dyn RequestFilter>,
    response_filters: FilterChain<dyn ResponseFilter>,
    cache_feature: Option<Arc<HttpCacheFeature>>,
    content_types: Arc<ContentTypes>,
}

impl Operation {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serves this operation's GET/HEAD responses from the HTTP cache.
    ///
    /// Without a registered [`HttpCacheFeature`] every cacheable request to
    /// the operation fails with a configuration error.
    pub fn cache_response(&mut self, options: CacheResponse) -> &mut Self {
        let filter = CacheResponseFilter::new(
            options,
            self.cache_feature.clone(),
            Arc::clone(&self.content_types),
        );
        self.request_filters.push(Arc::new(filter));
        if let Some(feature) = &self.cache_feature {
            self.response_filters
                .push(Arc::new(CacheResponseWriter::new(Arc::clone(feature))));
        }
        self
    }

    pub fn request_filter(&mut self, filter: Arc<dyn RequestFilter>) -> &mut Self {
        self.request_filters.push(filter);
        self
    }

    pub fn response_filter(&mut self, filter: Arc<dyn ResponseFilter>) -> &mut Self {
        self.response_filters.push(filter);
        self
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("request_filters", &self.request_filters.len())
            .field("response_filters", &self.response_filters.len())
            .finish_non_exhaustive()
    }
}

/// Operations by case-insensitive name, plus the global filters wrapped
/// around every one of them.
///
/// Global request filters run before an operation's own chain (session
/// resolution belongs there). Global response filters run last and also
/// see responses produced by short-circuits and errors.
pub struct ServiceRegistry {
    operations: HashMap<String, Operation>,
    global_request_filters: FilterChain<dyn RequestFilter>,
    global_response_filters: FilterChain<dyn ResponseFilter>,
    cache_feature: Option<Arc<HttpCacheFeature>>,
    content_types: Arc<ContentTypes>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new(Arc::new(ContentTypes::default()))
    }
}

impl ServiceRegistry {
    pub fn new(content_types: Arc<ContentTypes>) -> Self {
        Self {
            operations: HashMap::new(),
            global_request_filters: FilterChain::new(),
            global_response_filters: FilterChain::new(),
            cache_feature: None,
            content_types,
        }
    }

    /// Registers the HTTP cache feature. Must happen before operations call
    /// [`Operation::cache_response`].
    #[must_use]
    pub fn with_cache_feature(mut self, feature: Arc<HttpCacheFeature>) -> Self {
        self.cache_feature = Some(feature);
        self
    }

    pub fn content_types(&self) -> &Arc<ContentTypes> {
        &self.content_types
    }

    /// Registers `handler` under `name`, replacing any operation with the same
    /// name in any letter case.
    pub fn register<F, Fut>(&mut self, name: &str, handler: F) -> &mut Operation
    where
        F: Fn(ServiceRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ServiceError>> + Send + 'static,
    {
        let handler: ServiceHandler =
            Arc::new(move |req| -> BoxFuture<'static, _> { Box::pin(handler(req)) });
        let operation = Operation {
            name: name.to_owned(),
            handler,
            request_filters: FilterChain::new(),
            response_filters: FilterChain::new(),
            cache_feature: self.cache_feature.clone(),
            content_types: Arc::clone(&self.content_types),
        };
        self.operations
            .entry(name.to_ascii_lowercase())
            .insert_entry(operation)
            .into_mut()
    }

    pub fn global_request_filter(&mut self, filter: Arc<dyn RequestFilter>) -> &mut Self {
        self.global_request_filters.push(filter);
        self
    }

    pub fn global_response_filter(&mut self, filter: Arc<dyn ResponseFilter>) -> &mut Self {
        self.global_response_filters.push(filter);
        self
    }

    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.operations.get(&name.to_ascii_lowercase())
    }

    /// Registered operation names, sorted.
    pub fn operation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.values().map(Operation::name).collect();
        names.sort_unstable_by_key(|name| name.to_ascii_lowercase());
        names
    }

    /// Runs operation `name` for the request in `ctx`.
    ///
    /// The context must already carry the negotiated response content type.
    /// Failures are rendered with [`Error::into_response`].
    pub async fn execute(&self, ctx: &mut Context, name: &str) -> Response {
        let mut response = match self.operation(name) {
            Some(operation) => match self.run(operation, ctx).await {
                Ok(response) => response,
                Err(err) => {
                    if err.status().is_server_error() {
                        error!(operation = name, error = %err, "operation failed");
                    } else {
                        warn!(operation = name, error = %err, "operation rejected");
                    }
                    err.into_response()
                }
            },
            None => {
                debug!(operation = name, "unknown operation");
                Error::from(ServiceError::not_found(format!("Unknown operation `{name}`")))
                    .into_response()
            }
        };

        if let Err(err) = self
            .global_response_filters
            .run(ctx, &mut response)
            .await
        {
            error!(operation = name, error = %err, "response filter failed");
            response = err.into_response();
        }
        response
    }

    async fn run(&self, operation: &Operation, ctx: &mut Context) -> Result<Response, Error> {
        if let FilterOutcome::ShortCircuit(response) = self.global_request_filters.run(ctx).await? {
            return Ok(response);
        }
        if let FilterOutcome::ShortCircuit(response) = operation.request_filters.run(ctx).await? {
            return Ok(response);
        }

        let attributes = ctx
            .extensions()
            .get::<RequestAttributes>()
            .copied()
            .unwrap_or_default();
        let value = (operation.handler)(ServiceRequest {
            request: ctx.request_arc(),
            operation: operation.name.clone(),
            attributes,
            session: ctx.session_arc(),
        })
        .await?;

        let content_type = ctx.response_content_type().to_owned();
        let mut body = self.content_types.serialize(&content_type, &value)?;
        if formats::is_json(&content_type) {
            if let Some(callback) = ctx.request().jsonp_callback() {
                let callback = key::sanitize_var_name(callback);
                let mut wrapped = Vec::with_capacity(body.len() + callback.len() + 2);
                wrapped.extend_from_slice(callback.as_bytes());
                wrapped.push(b'(');
                wrapped.extend_from_slice(&body);
                wrapped.push(b')');
                body = wrapped.into();
            }
        }

        let mut response = Response::new(StatusCode::Ok)
            .content_type(content_type)
            .body_bytes(body);
        operation.response_filters.run(ctx, &mut response).await?;
        Ok(response)
    }
}
