//! End-to-end lifecycle tests: install, activate, and fetch routing against a
//! scripted network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use nmc_common::{ActivationPolicy, CoreManifest, OfflineConfig};
use nmc_sw::{
    CacheLifecycleManager, CacheStorage, Client, Clients, FetchDisposition, FetchError, Fetcher,
    MatchOptions, PassthroughReason, Request, RequestClass, RequestDestination, Response,
    ResponseSource, SharedCacheStorage, WorkerState,
};
use url::Url;

const SCRIPT: &str = "https://nmc.example/nmc/service-worker.js?v=2025-11-27-02";
const CURRENT: &str = "nmc-2025-11-27-02";

/// Network double keyed by path. Query strings are ignored.
struct MockNetwork {
    routes: Mutex<HashMap<String, (u16, String)>>,
    online: AtomicBool,
    hang: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl MockNetwork {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            hang: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn serve(&self, path: &str, body: &str) {
        self.serve_status(path, 200, body);
    }

    fn serve_status(&self, path: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.to_string()));
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn set_hanging(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for MockNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.calls.lock().unwrap().push(request.url.to_string());
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(FetchError::network("connection refused"));
        }
        let routes = self.routes.lock().unwrap();
        Ok(match routes.get(request.url.path()) {
            Some((status, body)) => Response::new(*status, body.clone()),
            None => Response::new(404, "not found"),
        })
    }
}

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn site_network() -> Arc<MockNetwork> {
    let net = MockNetwork::new();
    net.serve("/nmc/", "<h1>home</h1>");
    net.serve("/nmc/index.html", "<h1>home</h1>");
    net.serve("/nmc/static/style.css", "body{}");
    net.serve("/nmc/static/app.js", "console.log(1)");
    net.serve("/nmc/static/manifest.webmanifest", "{\"name\":\"NMC\"}");
    net.serve("/nmc/static/compat_lookup.json", "{\"v\":1}");
    net.serve("/nmc/static/icons/icon-192.png", "png192");
    net.serve("/nmc/static/icons/icon-512.png", "png512");
    net
}

struct Harness {
    worker: CacheLifecycleManager,
    storage: SharedCacheStorage,
    net: Arc<MockNetwork>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn start(config: OfflineConfig, net: Arc<MockNetwork>, storage: SharedCacheStorage) -> Harness {
    init_tracing();
    let (worker, _events) = CacheLifecycleManager::new(
        config,
        url(SCRIPT),
        storage.clone(),
        Clients::shared(),
        net.clone(),
    )
    .unwrap();
    worker.install().await.unwrap();
    worker.activate().await.unwrap();
    Harness {
        worker,
        storage,
        net,
    }
}

async fn active_worker() -> Harness {
    start(OfflineConfig::default(), site_network(), CacheStorage::shared()).await
}

fn body(disposition: &FetchDisposition) -> String {
    let response = disposition.response().expect("request should be intercepted");
    String::from_utf8(response.body.to_vec()).unwrap()
}

async fn cached_body(storage: &SharedCacheStorage, target: &str, options: MatchOptions) -> Option<String> {
    let storage = storage.read().await;
    storage
        .match_in(&[CURRENT], &url(target), options)
        .map(|entry| String::from_utf8(entry.body.clone()).unwrap())
}

#[tokio::test]
async fn warm_static_asset_is_served_without_waiting_on_network() {
    let h = active_worker().await;
    h.net.set_hanging(true);

    let request = Request::get(url("https://nmc.example/nmc/static/style.css"))
        .destination(RequestDestination::Style);
    let disposition = tokio::time::timeout(Duration::from_millis(500), h.worker.handle_fetch(request))
        .await
        .expect("cache hit must not wait on the network");

    assert_eq!(body(&disposition), "body{}");
    assert_eq!(disposition.response().unwrap().source, ResponseSource::Cache);
}

#[tokio::test]
async fn static_asset_is_refreshed_in_background() {
    let h = active_worker().await;
    h.net.serve("/nmc/static/app.js", "console.log(2)");

    let request = Request::get(url("https://nmc.example/nmc/static/app.js"));
    let first = h.worker.handle_fetch(request.clone()).await;
    assert_eq!(body(&first), "console.log(1)");

    h.worker.settle().await;

    let second = h.worker.handle_fetch(request).await;
    assert_eq!(body(&second), "console.log(2)");
}

#[tokio::test]
async fn uncached_static_asset_is_fetched_and_stored() {
    let h = active_worker().await;
    h.net.serve("/nmc/static/icons/pill.svg", "<svg/>");

    let target = "https://nmc.example/nmc/static/icons/pill.svg";
    let disposition = h.worker.handle_fetch(Request::get(url(target))).await;

    assert_eq!(body(&disposition), "<svg/>");
    assert_eq!(
        cached_body(&h.storage, target, MatchOptions::default()).await,
        Some("<svg/>".to_string())
    );
}

#[tokio::test]
async fn static_asset_with_no_cache_and_no_network_fails() {
    let h = active_worker().await;
    h.net.set_online(false);

    let disposition = h
        .worker
        .handle_fetch(Request::get(url("https://nmc.example/nmc/static/missing.js")))
        .await;

    assert!(disposition.response().unwrap().is_network_error());
}

#[tokio::test]
async fn navigation_online_returns_network_bytes_and_updates_cache() {
    let h = active_worker().await;
    h.net.serve("/nmc/vanco.html", "<h1>vancomycin v2</h1>");

    let target = "https://nmc.example/nmc/vanco.html?bw=1.2&pma=30";
    let disposition = h.worker.handle_fetch(Request::navigate(url(target))).await;

    assert_eq!(body(&disposition), "<h1>vancomycin v2</h1>");
    assert!(matches!(
        disposition,
        FetchDisposition::Respond {
            class: RequestClass::Navigation,
            ..
        }
    ));
    assert_eq!(
        cached_body(&h.storage, "https://nmc.example/nmc/vanco.html", MatchOptions::default()).await,
        Some("<h1>vancomycin v2</h1>".to_string())
    );
}

#[tokio::test]
async fn navigation_offline_returns_cached_copy_ignoring_query() {
    let h = active_worker().await;
    h.net.serve("/nmc/genta.html", "<h1>gentamicin</h1>");
    h.worker
        .handle_fetch(Request::navigate(url("https://nmc.example/nmc/genta.html?bw=0.9")))
        .await;

    h.net.set_online(false);
    let disposition = h
        .worker
        .handle_fetch(Request::navigate(url("https://nmc.example/nmc/genta.html?bw=2.4")))
        .await;

    assert_eq!(body(&disposition), "<h1>gentamicin</h1>");
}

#[tokio::test]
async fn navigation_offline_without_cache_returns_offline_document() {
    let h = active_worker().await;
    h.net.set_online(false);

    let disposition = h
        .worker
        .handle_fetch(Request::navigate(url("https://nmc.example/nmc/never-visited.html")))
        .await;

    let response = disposition.response().unwrap();
    assert_eq!(body(&disposition), "<h1>home</h1>");
    assert_eq!(response.fallback(), Some("offline"));
}

#[tokio::test]
async fn navigation_offline_with_empty_cache_returns_offline_page() {
    let net = MockNetwork::new();
    let h = start(OfflineConfig::default(), net, CacheStorage::shared()).await;
    h.net.set_online(false);

    let disposition = h
        .worker
        .handle_fetch(Request::navigate(url("https://nmc.example/nmc/")))
        .await;

    let response = disposition.response().unwrap();
    assert_eq!(response.status, 503);
    assert_eq!(response.source, ResponseSource::Synthesized);
}

#[tokio::test]
async fn dynamic_data_always_returns_newest_content() {
    let h = active_worker().await;
    let request = Request::get(url("https://nmc.example/nmc/static/compat_lookup.json"));

    h.net.serve("/nmc/static/compat_lookup.json", "{\"pair\":\"compatible\"}");
    let first = h.worker.handle_fetch(request.clone()).await;
    assert_eq!(body(&first), "{\"pair\":\"compatible\"}");

    h.net.serve("/nmc/static/compat_lookup.json", "{\"pair\":\"incompatible\"}");
    let second = h.worker.handle_fetch(request).await;
    assert_eq!(body(&second), "{\"pair\":\"incompatible\"}");

    // The precached copy is never overwritten by runtime fetches.
    assert_eq!(
        cached_body(
            &h.storage,
            "https://nmc.example/nmc/static/compat_lookup.json",
            MatchOptions::default()
        )
        .await,
        Some("{\"v\":1}".to_string())
    );
}

#[tokio::test]
async fn dynamic_data_offline_falls_back_to_marked_copy() {
    let h = active_worker().await;
    h.net.set_online(false);

    let disposition = h
        .worker
        .handle_fetch(Request::get(url(
            "https://nmc.example/nmc/static/compat_lookup.json?t=1700000000",
        )))
        .await;

    let response = disposition.response().unwrap();
    assert_eq!(body(&disposition), "{\"v\":1}");
    assert_eq!(response.fallback(), Some("cache"));
}

#[tokio::test]
async fn dynamic_data_offline_without_copy_returns_empty_object() {
    let config = OfflineConfig {
        manifest: CoreManifest::new(["./index.html"]),
        ..Default::default()
    };
    let h = start(config, site_network(), CacheStorage::shared()).await;
    h.net.set_online(false);

    let disposition = h
        .worker
        .handle_fetch(Request::get(url("https://nmc.example/nmc/static/compat_lookup.json")))
        .await;

    let response = disposition.response().unwrap();
    assert_eq!(body(&disposition), "{}");
    assert_eq!(response.fallback(), Some("empty"));
    assert_eq!(response.headers.get("content-type").unwrap(), "application/json");
}

#[tokio::test]
async fn install_skips_failing_entries() {
    let net = site_network();
    net.serve_status("/nmc/static/icons/icon-512.png", 500, "boom");
    let config = OfflineConfig {
        manifest: CoreManifest::new([
            "./index.html",
            "./static/icons/icon-512.png",
            "./static/does-not-exist.css",
            "./static/style.css",
        ]),
        ..Default::default()
    };
    let (worker, _events) =
        CacheLifecycleManager::new(config, url(SCRIPT), CacheStorage::shared(), Clients::shared(), net.clone())
            .unwrap();

    let report = worker.install().await.unwrap();

    assert_eq!(
        report.cached,
        vec![
            "https://nmc.example/nmc/index.html",
            "https://nmc.example/nmc/static/style.css",
        ]
    );
    let reasons: Vec<&str> = report.skipped.iter().map(|s| s.reason.as_str()).collect();
    assert_eq!(reasons, vec!["HTTP 500", "HTTP 404"]);
    assert_eq!(worker.state().await, WorkerState::Installed);
}

#[tokio::test]
async fn install_precache_bypasses_http_cache() {
    struct ModeRecorder(Mutex<Vec<nmc_sw::CacheMode>>);

    #[async_trait]
    impl Fetcher for ModeRecorder {
        async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
            self.0.lock().unwrap().push(request.cache);
            Ok(Response::new(200, "ok"))
        }
    }

    let recorder = Arc::new(ModeRecorder(Mutex::new(Vec::new())));
    let (worker, _events) = CacheLifecycleManager::new(
        OfflineConfig::default(),
        url(SCRIPT),
        CacheStorage::shared(),
        Clients::shared(),
        recorder.clone(),
    )
    .unwrap();
    worker.install().await.unwrap();

    let modes = recorder.0.lock().unwrap();
    assert!(!modes.is_empty());
    assert!(modes.iter().all(|m| *m == nmc_sw::CacheMode::Reload));
}

#[tokio::test]
async fn activate_sweeps_only_older_generations_of_namespace() {
    let storage = CacheStorage::shared();
    {
        let mut caches = storage.write().await;
        caches.open("ns-v1");
        caches.open("ns-v2");
        caches.open("other-x");
    }
    let config = OfflineConfig {
        namespace: "ns".to_string(),
        ..Default::default()
    };
    let (worker, _events) = CacheLifecycleManager::new(
        config,
        url("https://nmc.example/nmc/service-worker.js?v=v2"),
        storage.clone(),
        Clients::shared(),
        MockNetwork::new(),
    )
    .unwrap();

    worker.install().await.unwrap();
    let report = worker.activate().await.unwrap();

    assert_eq!(report.deleted, vec!["ns-v1"]);
    assert_eq!(storage.read().await.keys(), vec!["ns-v2", "other-x"]);
}

#[tokio::test]
async fn activate_sweeps_split_partitions_of_old_generations() {
    let storage = CacheStorage::shared();
    {
        let mut caches = storage.write().await;
        caches.open("nmc-2025-11-12-01-pages");
        caches.open("nmc-2025-11-12-01-static");
        caches.open("nmc-dev");
    }
    let config = OfflineConfig {
        split_partitions: true,
        ..Default::default()
    };
    let h = start(config, site_network(), storage).await;

    assert_eq!(
        h.storage.read().await.keys(),
        vec![format!("{CURRENT}-pages"), format!("{CURRENT}-static")]
    );
}

#[tokio::test]
async fn activate_claims_open_pages() {
    let clients = Clients::shared();
    clients.write().await.add(Client::window(
        "tab-1",
        url("https://nmc.example/nmc/compatibility.html"),
    ));
    clients.write().await.add(Client::window(
        "tab-2",
        url("https://nmc.example/nmc/index.html"),
    ));
    let config = OfflineConfig {
        activation: ActivationPolicy::SkipWaiting,
        ..Default::default()
    };
    let (worker, _events) = CacheLifecycleManager::new(
        config,
        url(SCRIPT),
        CacheStorage::shared(),
        clients.clone(),
        site_network(),
    )
    .unwrap();

    let install = worker.install().await.unwrap();
    assert!(install.skip_waiting);
    let report = worker.activate().await.unwrap();

    assert_eq!(report.claimed, 2);
    assert_eq!(clients.read().await.get("tab-1").unwrap().controller, Some(worker.id()));
}

#[tokio::test]
async fn cross_origin_requests_are_not_intercepted() {
    let h = active_worker().await;
    let before = h.net.calls().len();

    let disposition = h
        .worker
        .handle_fetch(Request::get(url("https://cdn.jsdelivr.net/npm/bootstrap.min.css")))
        .await;

    assert!(matches!(
        disposition,
        FetchDisposition::Passthrough(PassthroughReason::CrossOrigin)
    ));
    assert_eq!(h.net.calls().len(), before);
}

#[tokio::test]
async fn non_get_requests_are_never_intercepted_or_cached() {
    let h = active_worker().await;
    let before = h.net.calls().len();
    let keys_before = h.storage.read().await.get(CURRENT).unwrap().len();

    let post = Request::with_method(url("https://nmc.example/nmc/compatibility_result.html"), Method::POST);
    let disposition = h.worker.handle_fetch(post).await;

    assert!(matches!(
        disposition,
        FetchDisposition::Passthrough(PassthroughReason::NonGet)
    ));
    assert_eq!(h.net.calls().len(), before);
    assert_eq!(h.storage.read().await.get(CURRENT).unwrap().len(), keys_before);
}
