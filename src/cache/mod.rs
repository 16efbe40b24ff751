//! HTTP response caching with conditional-request handling.
//!
//! ## Flow
//!
//! 1. [`CacheResponseFilter`] runs before an operation. It derives a
//!    [`CacheInfo`] for the request ([`derive_cache_info`]) and asks
//!    [`handle_valid_cache`] whether the request can be answered from the
//!    store: `304 Not Modified`, the stored body, or a miss.
//! 2. On a miss the `CacheInfo` is left in the request
//!    [`Extensions`](crate::context::Extensions) and the operation runs.
//! 3. [`CacheResponseWriter`] runs after the operation and stores the
//!    response under that key, together with its `Last-Modified` time.
//!
//! Store reads that fail are logged and treated as misses. Store writes
//! that fail are returned to the caller.

use thiserror::Error;

pub mod feature;
pub mod filter;
pub mod info;
pub mod key;
pub mod lookup;
pub mod store;
pub mod writer;

pub use feature::HttpCacheFeature;
pub use filter::CacheResponseFilter;
pub use info::{CacheControl, CacheInfo};
pub use key::{CacheResponse, KeyInputs, derive_cache_info};
pub use lookup::{CacheLookup, handle_valid_cache};
pub use store::{CacheStore, MemoryCacheStore, StoreError};
pub use writer::CacheResponseWriter;

use crate::http::range::RangeError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error("failed to compress cached response: {0}")]
    Compression(std::io::Error),
}
