//! # apigate
//!
//! An async HTTP/1.1 API front end with content negotiation and server-side
//! response caching.
//!
//! - [`api`] maps `/{base}/{Operation}[.ext]` to registered operations and
//!   serializes their results in the negotiated format.
//! - [`cache`] stores rendered responses per variant (format, user, roles,
//!   headers, compression) and answers conditional and range requests from
//!   the store.
//! - [`filter`] is the pre/post pipeline both of the above plug into.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use apigate::{
//!     Router,
//!     api::{ApiHandlers, ServiceRegistry, ServiceRequest, ServiceError},
//!     cache::{CacheResponse, HttpCacheFeature, MemoryCacheStore},
//!     server::Server,
//! };
//! use serde_json::{Value, json};
//!
//! async fn hello(req: ServiceRequest) -> Result<Value, ServiceError> {
//!     Ok(json!({ "result": format!("Hello, {}!", req.param("name").unwrap_or("World")) }))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = Arc::new(HttpCacheFeature::new(Arc::new(MemoryCacheStore::new())));
//!     let mut services = ServiceRegistry::default().with_cache_feature(cache);
//!     services
//!         .register("Hello", hello)
//!         .cache_response(CacheResponse::new().duration_secs(60));
//!
//!     let api = ApiHandlers::builder(Arc::new(services)).operation_index().build();
//!     let mut router = Router::new();
//!     router.mount(Arc::new(api));
//!
//!     Server::bind("127.0.0.1:8080").await?.serve(Arc::new(router)).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod formats;
pub mod http;
pub mod router;
pub mod security;
pub mod server;

pub use error::Error;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
