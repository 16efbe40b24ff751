//! End-to-end: router → API dispatcher → filters → operation → cache.

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use apigate::{
    Error, Headers, Method, Request, Response, Router, StatusCode,
    api::{ApiHandlers, ServiceError, ServiceRegistry, ServiceRequest},
    cache::{
        CacheResponse, CacheStore, HttpCacheFeature, KeyInputs, MemoryCacheStore, StoreError,
        derive_cache_info,
    },
    context::{Context, UserSession},
    filter::{BoxFuture, FilterOutcome, RequestFilter},
    formats::ContentTypes,
    security::CorsFeature,
};
use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CountingStore {
    inner: MemoryCacheStore,
    gets: AtomicUsize,
    sets: AtomicUsize,
}

impl CountingStore {
    fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for CountingStore {
    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<Bytes>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key, cancel).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl).await
    }
}

/// Resolves the caller from an `X-User` header.
struct HeaderSession;

impl RequestFilter for HeaderSession {
    fn apply<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<FilterOutcome, Error>> {
        Box::pin(async move {
            if let Some(user) = ctx.request().headers().get("X-User") {
                let session = Arc::new(UserSession::new(user).with_role("Reader"));
                ctx.set_session(session);
            }
            Ok(FilterOutcome::Continue)
        })
    }
}

async fn hello(req: ServiceRequest, calls: Arc<AtomicUsize>) -> Result<Value, ServiceError> {
    calls.fetch_add(1, Ordering::SeqCst);
    let name = req.param("name").unwrap_or("World");
    let user = req
        .session
        .as_deref()
        .and_then(|s| s.session_id())
        .unwrap_or("anonymous");
    Ok(json!({ "result": format!("Hello, {name}!"), "user": user }))
}

struct Harness {
    router: Router,
    store: Arc<CountingStore>,
    calls: Arc<AtomicUsize>,
}

fn harness(options: CacheResponse, index: bool) -> Harness {
    let store = Arc::new(CountingStore::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let feature = Arc::new(HttpCacheFeature::new(store.clone()));

    let mut services = ServiceRegistry::default().with_cache_feature(feature);
    services.global_request_filter(Arc::new(HeaderSession));
    let counter = Arc::clone(&calls);
    services
        .register("Hello", move |req| hello(req, Arc::clone(&counter)))
        .cache_response(options);

    let cors = Arc::new(CorsFeature::new());
    services.global_response_filter(cors.clone());

    let mut builder = ApiHandlers::builder(Arc::new(services))
        .route(apigate::api::ApiRoute::new(
            "/api",
            "application/json",
            &ContentTypes::default(),
        ))
        .cors(cors);
    if index {
        builder = builder.operation_index();
    }

    let mut router = Router::new();
    router.mount(Arc::new(builder.build()));
    router.get("/health", |_ctx| async { Response::new(StatusCode::Ok).body("ok") });

    Harness {
        router,
        store,
        calls,
    }
}

fn request(method: &str, target: &str, headers: &[(&str, &str)]) -> Request {
    let mut map = Headers::new();
    for (name, value) in headers {
        map.insert(*name, *value);
    }
    Request::from_parts(method, target, map)
}

async fn get(h: &Harness, target: &str, headers: &[(&str, &str)]) -> Response {
    h.router.handle(request("GET", target, headers)).await
}

#[test]
fn cache_key_is_deterministic() {
    let content_types = ContentTypes::default();
    let headers = {
        let mut headers = Headers::new();
        headers.insert("Accept-Language", "en");
        headers
    };
    let session = UserSession::new("abc").with_role("Admin");
    let options = CacheResponse::new()
        .vary_by_user(true)
        .vary_by_roles(["Admin", "Guest"])
        .vary_by_headers(["Accept-Language"]);
    let inputs = KeyInputs {
        method: &Method::Get,
        raw_url: "/api/Hello?name=x",
        response_content_type: "application/json",
        jsonp_callback: Some("cb"),
        session: Some(&session),
        headers: &headers,
    };

    let first = derive_cache_info(&options, &inputs, &content_types).unwrap();
    let second = derive_cache_info(&options, &inputs, &content_types).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first.cache_key(),
        "res:/api/Hello?name=x.json+jsonp:cb+user:abc+role:Admin+Accept-Language:en"
    );
}

#[tokio::test]
async fn vary_by_user_separates_sessions() {
    let h = harness(CacheResponse::new().vary_by_user(true), false);

    let alice = get(&h, "/api/Hello", &[("X-User", "alice")]).await;
    let bob = get(&h, "/api/Hello", &[("X-User", "bob")]).await;
    let alice_again = get(&h, "/api/Hello", &[("X-User", "alice")]).await;

    assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    assert_ne!(alice.body_ref(), bob.body_ref());
    assert_eq!(alice.body_ref(), alice_again.body_ref());
    assert_eq!(alice_again.headers().get("vary"), Some("Cookie"));
}

#[tokio::test]
async fn post_never_touches_the_store() {
    let h = harness(CacheResponse::new(), false);
    for _ in 0..3 {
        let res = h.router.handle(request("POST", "/api/Hello", &[])).await;
        assert_eq!(res.status(), StatusCode::Ok);
    }
    assert_eq!(h.store.gets(), 0);
    assert_eq!(h.store.sets(), 0);
    assert_eq!(h.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn conditional_request_gets_304() {
    let h = harness(CacheResponse::new().max_age_secs(60), false);

    let first = get(&h, "/api/Hello?name=x", &[]).await;
    assert_eq!(first.status(), StatusCode::Ok);
    assert_eq!(first.headers().get("cache-control"), Some("max-age=60"));
    let last_modified = first.headers().get("last-modified").unwrap().to_owned();

    let second = get(
        &h,
        "/api/Hello?name=x",
        &[
            ("If-Modified-Since", last_modified.as_str()),
            ("Accept-Encoding", "gzip"),
        ],
    )
    .await;
    assert_eq!(second.status(), StatusCode::NotModified);
    assert!(second.body_ref().is_empty());
    assert!(!second.headers().contains("content-encoding"));
    assert_eq!(second.headers().get("cache-control"), Some("max-age=60"));
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn body_hit_serves_stored_bytes_with_negotiated_type() {
    let h = harness(CacheResponse::new(), false);
    h.store
        .set("res:/api/Hello.text.text", Bytes::from_static(b"from the store"), None)
        .await
        .unwrap();

    let mut bodies = Vec::new();
    for _ in 0..4 {
        let res = get(&h, "/api/Hello.text", &[]).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.headers().get("content-type"), Some("text/plain"));
        assert_eq!(res.headers().get("accept-ranges"), Some("bytes"));
        bodies.push(res.body_ref().clone());
    }

    assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    assert!(bodies.iter().all(|b| &b[..] == b"from the store"));
}

#[tokio::test]
async fn miss_writes_back_then_hits() {
    let h = harness(CacheResponse::new().duration_secs(60), false);

    let first = get(&h, "/api/Hello.csv?name=Ada", &[]).await;
    assert_eq!(first.status(), StatusCode::Ok);
    assert_eq!(first.headers().get("content-type"), Some("text/csv"));
    assert_eq!(&first.body_ref()[..], b"result,user\r\n\"Hello, Ada!\",anonymous\r\n");

    let second = get(&h, "/api/Hello.csv?name=Ada", &[]).await;
    assert_eq!(second.body_ref(), first.body_ref());
    assert!(second.headers().contains("last-modified"));
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn compressed_variant_is_stored_and_served() {
    let h = harness(CacheResponse::new(), false);
    let headers = [("Accept-Encoding", "gzip, deflate")];

    let first = get(&h, "/api/Hello", &headers).await;
    let second = get(&h, "/api/Hello", &headers).await;
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);

    for res in [&first, &second] {
        assert_eq!(res.headers().get("content-encoding"), Some("gzip"));
        let mut plain = String::new();
        GzDecoder::new(&res.body_ref()[..])
            .read_to_string(&mut plain)
            .unwrap();
        assert_eq!(plain, r#"{"result":"Hello, World!","user":"anonymous"}"#);
    }

    let identity = get(&h, "/api/Hello", &[]).await;
    assert!(!identity.headers().contains("content-encoding"));
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn range_request_on_cached_body() {
    let h = harness(CacheResponse::new(), false);
    get(&h, "/api/Hello.text", &[]).await;

    let res = get(&h, "/api/Hello.text", &[("Range", "bytes=0-4")]).await;
    assert_eq!(res.status(), StatusCode::PartialContent);
    assert!(res.headers().get("content-range").unwrap().starts_with("bytes 0-4/"));
    assert_eq!(res.body_ref().len(), 5);
}

#[tokio::test]
async fn extension_selects_format() {
    let h = harness(CacheResponse::new(), false);

    let csv = get(&h, "/api/Hello.csv", &[]).await;
    assert_eq!(csv.headers().get("content-type"), Some("text/csv"));

    let json = get(&h, "/api/Hello", &[]).await;
    assert_eq!(json.headers().get("content-type"), Some("application/json"));

    let unknown = get(&h, "/api/Hello.yaml", &[]).await;
    assert_eq!(unknown.status(), StatusCode::NotFound);
}

#[tokio::test]
async fn base_path_index() {
    let without = harness(CacheResponse::new(), false);
    assert_eq!(get(&without, "/api", &[]).await.status(), StatusCode::NotFound);

    let with = harness(CacheResponse::new(), true);
    let res = get(&with, "/api", &[]).await;
    assert_eq!(res.status(), StatusCode::Ok);
    assert_eq!(res.headers().get("content-type"), Some("application/json"));
    assert_eq!(&res.body_ref()[..], br#"{"operations":["Hello"]}"#);
}

#[tokio::test]
async fn other_routes_still_reachable() {
    let h = harness(CacheResponse::new(), true);
    let res = get(&h, "/health", &[]).await;
    assert_eq!(res.status(), StatusCode::Ok);
    assert_eq!(&res.body_ref()[..], b"ok");
}

#[tokio::test]
async fn cors_preflight_and_actual_request() {
    let h = harness(CacheResponse::new(), false);
    let origin = [("Origin", "https://app.example")];

    let preflight = h.router.handle(request("OPTIONS", "/api/Hello", &origin)).await;
    assert_eq!(preflight.status(), StatusCode::NoContent);
    assert_eq!(preflight.headers().get("access-control-allow-origin"), Some("*"));

    let actual = get(&h, "/api/Hello", &origin).await;
    assert_eq!(actual.status(), StatusCode::Ok);
    assert_eq!(actual.headers().get("access-control-allow-origin"), Some("*"));
}

#[tokio::test]
async fn jsonp_wraps_and_keys_separately() {
    let h = harness(CacheResponse::new(), false);

    let wrapped = get(&h, "/api/Hello?callback=my.cb", &[]).await;
    assert_eq!(
        &wrapped.body_ref()[..],
        br#"my_cb({"result":"Hello, World!","user":"anonymous"})"#
    );

    let hit = get(&h, "/api/Hello?callback=my.cb", &[]).await;
    assert_eq!(hit.body_ref(), wrapped.body_ref());
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cache_response_without_feature_is_a_config_error() {
    let mut services = ServiceRegistry::default();
    services
        .register("Hello", |req| hello(req, Arc::new(AtomicUsize::new(0))))
        .cache_response(CacheResponse::new());
    let api = ApiHandlers::from_settings(&Default::default(), Arc::new(services)).build();
    let mut router = Router::new();
    router.mount(Arc::new(api));

    let res = router.handle(request("GET", "/api/Hello", &[])).await;
    assert_eq!(res.status(), StatusCode::InternalServerError);
    assert_eq!(
        &res.body_ref()[..],
        b"HttpCacheFeature Plugin must be registered to use [CacheResponse]"
    );
}

#[tokio::test]
async fn disabled_feature_always_executes() {
    let store = Arc::new(CountingStore::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let feature = Arc::new(HttpCacheFeature::new(store.clone()).disable_caching(true));
    let mut services = ServiceRegistry::default().with_cache_feature(feature);
    let counter = Arc::clone(&calls);
    services
        .register("Hello", move |req| hello(req, Arc::clone(&counter)))
        .cache_response(CacheResponse::new());
    let api = ApiHandlers::from_settings(&Default::default(), Arc::new(services)).build();
    let mut router = Router::new();
    router.mount(Arc::new(api));

    for _ in 0..2 {
        router.handle(request("GET", "/api/Hello", &[])).await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.gets(), 0);
}
