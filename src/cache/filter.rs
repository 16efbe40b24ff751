use std::sync::Arc;

use tracing::{Instrument, debug_span};

use super::{
    feature::HttpCacheFeature,
    key::{CacheResponse, KeyInputs, derive_cache_info},
    lookup::{CacheLookup, handle_valid_cache},
};
use crate::{
    Error,
    config::ConfigError,
    context::Context,
    filter::{BoxFuture, FilterOutcome, RequestFilter},
    formats::ContentTypes,
};

/// Request filter that answers from the cache when it can and otherwise
/// leaves the request's [`CacheInfo`](super::CacheInfo) in the context for
/// [`CacheResponseWriter`](super::CacheResponseWriter).
pub struct CacheResponseFilter {
    options: CacheResponse,
    feature: Option<Arc<HttpCacheFeature>>,
    content_types: Arc<ContentTypes>,
}

impl CacheResponseFilter {
    /// `feature` is `None` when the host never registered caching; using the
    /// filter then fails every cacheable request with a configuration error.
    pub fn new(
        options: CacheResponse,
        feature: Option<Arc<HttpCacheFeature>>,
        content_types: Arc<ContentTypes>,
    ) -> Self {
        Self {
            options,
            feature,
            content_types,
        }
    }

    async fn run(&self, ctx: &mut Context) -> Result<FilterOutcome, Error> {
        if !ctx.request().method().is_cacheable() {
            return Ok(FilterOutcome::Continue);
        }

        let feature = self
            .feature
            .as_deref()
            .ok_or(ConfigError::FeatureNotRegistered {
                feature: "HttpCacheFeature",
                attribute: "CacheResponse",
            })?;

        if feature.is_disabled() {
            return Ok(FilterOutcome::Continue);
        }

        let request = ctx.request();
        let raw_url = request.raw_url();
        let inputs = KeyInputs {
            method: request.method(),
            raw_url: &raw_url,
            response_content_type: ctx.response_content_type(),
            jsonp_callback: request.jsonp_callback(),
            session: ctx.session(),
            headers: request.headers(),
        };
        let Some(info) = derive_cache_info(&self.options, &inputs, &self.content_types) else {
            return Ok(FilterOutcome::Continue);
        };

        match handle_valid_cache(feature, ctx, Some(&info)).await? {
            CacheLookup::Miss => {
                ctx.extensions_mut().insert(info);
                Ok(FilterOutcome::Continue)
            }
            CacheLookup::NotModified(response) | CacheLookup::Hit(response) => {
                Ok(FilterOutcome::ShortCircuit(response))
            }
        }
    }
}

impl RequestFilter for CacheResponseFilter {
    fn priority(&self) -> i32 {
        self.options.priority_value()
    }

    fn apply<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<FilterOutcome, Error>> {
        let span = debug_span!("cache_response", path = %ctx.request().path());
        Box::pin(self.run(ctx).instrument(span))
    }
}
