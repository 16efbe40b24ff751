//! Answering requests from the cache: `304 Not Modified` when the client's
//! copy is still current, the stored body when there is one, otherwise a miss.

use std::time::SystemTime;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    CacheError,
    feature::HttpCacheFeature,
    info::CacheInfo,
    store::{CacheStore, StoreError, decode_timestamp},
};
use crate::{
    context::Context,
    http::{Response, StatusCode, date, headers::names, range},
};

/// Result of consulting the cache for one request.
#[derive(Debug)]
pub enum CacheLookup {
    /// Nothing usable; run the operation.
    Miss,
    /// The client's copy is current. Status 304, no body.
    NotModified(Response),
    /// The stored representation.
    Hit(Response),
}

impl CacheLookup {
    pub fn is_handled(&self) -> bool {
        !matches!(self, Self::Miss)
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Miss => None,
            Self::NotModified(response) | Self::Hit(response) => Some(response),
        }
    }
}

/// Tries to satisfy the request in `ctx` from the cache entry `info` describes.
///
/// Store read failures degrade to a miss. A `Range` header on an
/// uncompressed hit is honoured; bad range syntax is returned as
/// [`CacheError::Range`].
pub async fn handle_valid_cache(
    feature: &HttpCacheFeature,
    ctx: &Context,
    info: Option<&CacheInfo>,
) -> Result<CacheLookup, CacheError> {
    let Some(info) = info else {
        return Ok(CacheLookup::Miss);
    };

    let store = feature.store(info.local_cache);
    let cancel = ctx.cancellation();
    let request = ctx.request();
    let cache_key = info.cache_key();
    let cache_control = feature.build_cache_control_header(info);

    let validates = info.does_http_caching();
    let mut last_modified = None;

    if validates {
        last_modified = read_timestamp(store, &info.last_modified_key(), cancel).await;
        let if_modified_since = request.headers().get(names::IF_MODIFIED_SINCE);
        if let Some(stored) = last_modified {
            if date::not_modified_since(if_modified_since, stored) {
                debug!(cache = "http", outcome = "not_modified", key = %cache_key);
                let mut response = Response::not_modified();
                if let Some(value) = &cache_control {
                    response.set_header(names::CACHE_CONTROL, value);
                }
                return Ok(CacheLookup::NotModified(response));
            }
        }
    }

    let encoding = if info.no_compression {
        None
    } else {
        feature.compression_type(request.accept_encoding())
    };
    let storage_key = info.storage_key(encoding);

    let Some(body) = read(store, &storage_key, cancel).await else {
        debug!(cache = "http", outcome = "miss", key = %storage_key);
        return Ok(CacheLookup::Miss);
    };

    let partial = match (encoding, request.headers().get(names::RANGE)) {
        (None, Some(header)) => Some(range::parse_range(header, body.len() as u64)?),
        _ => None,
    };

    let status = if partial.is_some() {
        StatusCode::PartialContent
    } else {
        StatusCode::Ok
    };
    let mut response = Response::new(status).content_type(ctx.response_content_type());

    if let Some(encoding) = encoding {
        response.set_header(names::CONTENT_ENCODING, encoding.as_str());
    } else {
        response.set_header(names::ACCEPT_RANGES, "bytes");
    }
    if info.vary_by_user {
        response.set_header(names::VARY, "Cookie");
    }
    if let Some(value) = &cache_control {
        response.set_header(names::CACHE_CONTROL, value);
    }

    if !validates {
        last_modified = read_timestamp(store, &info.last_modified_key(), cancel).await;
    }
    if let Some(at) = last_modified {
        response.set_header(names::LAST_MODIFIED, date::format_http_date(at));
    }

    match partial {
        Some(part) => {
            response.set_header(names::CONTENT_RANGE, part.content_range(body.len() as u64));
            response.set_body(body.slice(part.start as usize..=part.end as usize));
        }
        None => response.set_body(body),
    }

    debug!(cache = "http", outcome = "hit", key = %storage_key, status = status.as_u16());
    Ok(CacheLookup::Hit(response))
}

/// Reads `key`, treating every store failure as absent.
async fn read(store: &dyn CacheStore, key: &str, cancel: &CancellationToken) -> Option<Bytes> {
    match store.get(key, cancel).await {
        Ok(value) => value,
        Err(StoreError::Cancelled) => {
            debug!(key, "cache read cancelled, treating as miss");
            None
        }
        Err(err) => {
            warn!(key, error = %err, "cache read failed, treating as miss");
            None
        }
    }
}

async fn read_timestamp(
    store: &dyn CacheStore,
    key: &str,
    cancel: &CancellationToken,
) -> Option<SystemTime> {
    let raw = read(store, key, cancel).await?;
    match decode_timestamp(key, &raw) {
        Ok(at) => Some(at),
        Err(err) => {
            warn!(key, error = %err, "ignoring unreadable Last-Modified record");
            None
        }
    }
}
