use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{any, get};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_OK: &str = "/ok";
pub const PATH_FAIL: &str = "/fail";
pub const PATH_STATUS: &str = "/status/{code}";
pub const PATH_SLOW: &str = "/slow";
pub const PATH_FLAKY: &str = "/flaky";
pub const PATH_OVERLOAD: &str = "/overload";

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    bytes_received_total: Arc<AtomicU64>,
    saw_auth_header: Arc<AtomicU64>,
    flaky_seq: Arc<AtomicU64>,
    in_flight: Arc<AtomicU64>,
}

impl TestServerStats {
    fn observe(&self, headers: &HeaderMap, body: &[u8]) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_received_total
            .fetch_add(body.len() as u64, Ordering::Relaxed);
        if headers.contains_key("authorization") {
            self.saw_auth_header.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn bytes_received_total(&self) -> u64 {
        self.bytes_received_total.load(Ordering::Relaxed)
    }

    pub fn saw_auth_header(&self) -> u64 {
        self.saw_auth_header.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct TestServerUrls {
    pub base_url: String,
    pub ok: String,
    pub fail: String,
    pub slow: String,
    pub flaky: String,
    pub overload: String,
}

impl TestServerUrls {
    pub fn new(base_url: String) -> Self {
        Self {
            ok: format!("{base_url}{PATH_OK}"),
            fail: format!("{base_url}{PATH_FAIL}"),
            slow: format!("{base_url}{PATH_SLOW}"),
            flaky: format!("{base_url}{PATH_FLAKY}"),
            overload: format!("{base_url}{PATH_OVERLOAD}"),
            base_url,
        }
    }

    pub fn status(&self, code: u16) -> String {
        format!("{}/status/{code}", self.base_url)
    }
}

async fn handle_ok(
    State(stats): State<TestServerStats>,
    headers: HeaderMap,
    body: Bytes,
) -> &'static str {
    stats.observe(&headers, &body);
    "ok"
}

async fn handle_fail(
    State(stats): State<TestServerStats>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    stats.observe(&headers, &body);
    (StatusCode::INTERNAL_SERVER_ERROR, "fail")
}

async fn handle_status(
    State(stats): State<TestServerStats>,
    Path(code): Path<u16>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    stats.observe(&headers, &body);
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

#[derive(Debug, Deserialize)]
struct SlowQuery {
    ms: Option<u64>,
}

async fn handle_slow(
    State(stats): State<TestServerStats>,
    Query(q): Query<SlowQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> &'static str {
    stats.observe(&headers, &body);
    sleep(Duration::from_millis(q.ms.unwrap_or(50))).await;
    "slow"
}

#[derive(Debug, Deserialize)]
struct FlakyQuery {
    every: Option<u64>,
}

/// Fails every `every`-th request (default 2) with 503.
async fn handle_flaky(
    State(stats): State<TestServerStats>,
    Query(q): Query<FlakyQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    stats.observe(&headers, &body);
    let every = q.every.unwrap_or(2).max(1);
    let n = stats.flaky_seq.fetch_add(1, Ordering::Relaxed) + 1;
    if n % every == 0 {
        (StatusCode::SERVICE_UNAVAILABLE, "flaky")
    } else {
        (StatusCode::OK, "ok")
    }
}

#[derive(Debug, Deserialize)]
struct OverloadQuery {
    limit: Option<u64>,
    ms: Option<u64>,
}

/// Serves `limit` concurrent requests (default 2) and answers 503 beyond that.
async fn handle_overload(
    State(stats): State<TestServerStats>,
    Query(q): Query<OverloadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    stats.observe(&headers, &body);
    let limit = q.limit.unwrap_or(2);
    let in_flight = stats.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
    sleep(Duration::from_millis(q.ms.unwrap_or(20))).await;
    stats.in_flight.fetch_sub(1, Ordering::AcqRel);

    if in_flight > limit {
        (StatusCode::SERVICE_UNAVAILABLE, "overloaded")
    } else {
        (StatusCode::OK, "ok")
    }
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_OK, any(handle_ok))
        .route(PATH_FAIL, any(handle_fail))
        .route(PATH_STATUS, any(handle_status))
        .route(PATH_SLOW, get(handle_slow).post(handle_slow))
        .route(PATH_FLAKY, any(handle_flaky))
        .route(PATH_OVERLOAD, any(handle_overload))
        .with_state(stats)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    urls: TestServerUrls,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();

        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        let base_url = format!("http://{addr}");
        let urls = TestServerUrls::new(base_url.clone());

        Ok(Self {
            addr,
            base_url,
            urls,
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn urls(&self) -> &TestServerUrls {
        &self.urls
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
