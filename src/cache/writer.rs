use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tracing::{debug, error};

use super::{
    CacheError,
    feature::HttpCacheFeature,
    info::CacheInfo,
    store::encode_timestamp,
};
use crate::{
    Error,
    context::Context,
    filter::{BoxFuture, ResponseFilter},
    http::{Response, StatusCode, date, headers::names},
};

/// Response filter that stores a freshly produced `200 OK` response under
/// the key [`CacheResponseFilter`](super::CacheResponseFilter) derived for it.
///
/// Writes the plain body, the compressed variant the client negotiated (the
/// live response is switched to that variant), and the `Last-Modified`
/// timestamp. The three records are independent; there is no cross-key
/// atomicity.
pub struct CacheResponseWriter {
    feature: Arc<HttpCacheFeature>,
}

impl CacheResponseWriter {
    pub fn new(feature: Arc<HttpCacheFeature>) -> Self {
        Self { feature }
    }

    async fn write_back(
        &self,
        ctx: &mut Context,
        response: &mut Response,
    ) -> Result<(), CacheError> {
        if response.status() != StatusCode::Ok {
            return Ok(());
        }
        let Some(info) = ctx.extensions_mut().remove::<CacheInfo>() else {
            return Ok(());
        };

        let store = self.feature.store(info.local_cache);
        let ttl = Some(self.feature.expires_in(&info));
        let body = response.body_ref().clone();
        let cache_key = info.cache_key();

        store.set(&cache_key, body.clone(), ttl).await?;

        let encoding = if info.no_compression {
            None
        } else {
            self.feature
                .compression_type(ctx.request().accept_encoding())
        };
        if let Some(encoding) = encoding {
            let compressed = Bytes::from(
                encoding
                    .compress(&body)
                    .map_err(CacheError::Compression)?,
            );
            store
                .set(&info.storage_key(Some(encoding)), compressed.clone(), ttl)
                .await?;
            response.set_body(compressed);
            response.set_header(names::CONTENT_ENCODING, encoding.as_str());
        }

        let now = date::truncate_to_secs(SystemTime::now());
        store
            .set(&info.last_modified_key(), encode_timestamp(now), ttl)
            .await?;

        if let Some(value) = self.feature.build_cache_control_header(&info) {
            response.set_header(names::CACHE_CONTROL, value);
        }
        if info.vary_by_user {
            response.set_header(names::VARY, "Cookie");
        }
        response.set_header(names::LAST_MODIFIED, date::format_http_date(now));

        debug!(
            cache = "http",
            key = %cache_key,
            encoding = encoding.map(|e| e.as_str()),
            ttl_secs = ttl.map(|t| t.as_secs()),
            "stored response"
        );
        Ok(())
    }
}

impl ResponseFilter for CacheResponseWriter {
    fn apply<'a>(
        &'a self,
        ctx: &'a mut Context,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            self.write_back(ctx, response).await.map_err(|err| {
                error!(error = %err, path = %ctx.request().path(), "cache write-back failed");
                Error::from(err)
            })
        })
    }
}
