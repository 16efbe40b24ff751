//! A small cached API.
//!
//! ```text
//! cargo run --example hello_api [config.toml]
//!
//! curl -i 'http://127.0.0.1:8080/api/Hello?name=Ada'
//! curl -i 'http://127.0.0.1:8080/api/Hello.csv?name=Ada'
//! curl -i --compressed 'http://127.0.0.1:8080/api/Time'
//! curl -i -H 'X-User: ada' 'http://127.0.0.1:8080/api/Profile'
//! ```

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use apigate::{
    Error, Response, Router, StatusCode,
    api::{ApiHandlers, ServiceError, ServiceRegistry, ServiceRequest},
    cache::{CacheControl, CacheResponse, HttpCacheFeature, MemoryCacheStore},
    config::AppConfig,
    context::{Context, UserSession},
    filter::{BoxFuture, FilterOutcome, RequestFilter, RequestLogger},
    security::CorsFeature,
    server::Server,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn hello(req: ServiceRequest) -> Result<Value, ServiceError> {
    let name = req.param("name").unwrap_or("World");
    Ok(json!({ "result": format!("Hello, {name}!") }))
}

async fn time(_req: ServiceRequest) -> Result<Value, ServiceError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| ServiceError::internal(e.to_string()))?;
    Ok(json!({ "unix": now.as_secs(), "padding": "x".repeat(512) }))
}

async fn profile(req: ServiceRequest) -> Result<Value, ServiceError> {
    let session = req
        .session
        .ok_or_else(|| ServiceError::new(StatusCode::Unauthorized, "X-User header required"))?;
    Ok(json!({
        "id": session.session_id(),
        "admin": session.has_role("Admin"),
    }))
}

/// Trusts an `X-User` header. Demo only.
struct HeaderSession;

impl RequestFilter for HeaderSession {
    fn apply<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<FilterOutcome, Error>> {
        Box::pin(async move {
            if let Some(user) = ctx.request().headers().get("X-User") {
                let mut session = UserSession::new(user);
                if user == "admin" {
                    session = session.with_role("Admin");
                }
                ctx.set_session(Arc::new(session));
            }
            Ok(FilterOutcome::Continue)
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "apigate=debug,hello_api=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    let store = Arc::new(MemoryCacheStore::with_max_entries(config.cache.max_entries));
    let cache = Arc::new(HttpCacheFeature::from_settings(&config.cache, store)?);

    let cors = config
        .cors
        .as_ref()
        .map(|settings| Arc::new(CorsFeature::from_settings(settings)));

    let mut services = ServiceRegistry::default().with_cache_feature(cache);
    services
        .global_request_filter(Arc::new(HeaderSession))
        .global_response_filter(Arc::new(RequestLogger));
    if let Some(cors) = &cors {
        services.global_response_filter(cors.clone());
    }

    services
        .register("Hello", hello)
        .cache_response(CacheResponse::new().duration_secs(60));
    services.register("Time", time).cache_response(
        CacheResponse::new()
            .duration_secs(5)
            .max_age_secs(5)
            .cache_control(CacheControl::PUBLIC | CacheControl::MUST_REVALIDATE),
    );
    services.register("Profile", profile).cache_response(
        CacheResponse::new()
            .duration_secs(300)
            .vary_by_user(true)
            .vary_by_roles(["Admin"])
            .cache_control(CacheControl::PRIVATE),
    );

    let services = Arc::new(services);
    let mut api = ApiHandlers::from_settings(&config.api, Arc::clone(&services)).operation_index();
    if let Some(cors) = cors {
        api = api.cors(cors);
    }

    let mut router = Router::new();
    router.mount(Arc::new(api.build()));
    router.get("/health", |_ctx| async { Response::new(StatusCode::Ok).body("ok") });

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received Ctrl+C");
        }
        signal.cancel();
    });

    Server::bind(&config.server.bind)
        .await?
        .serve_with_shutdown(Arc::new(router), shutdown)
        .await?;
    Ok(())
}
