use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Path label shared by every request no route matched.
pub const UNMATCHED_PATH: &str = "unmatched";

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static METRICS: OnceLock<Metrics> = OnceLock::new();

pub struct Metrics {
    pub transactions_total: IntCounter,
    pub feature_checks_total: IntCounterVec,
    pub goal_hits_total: IntCounterVec,
    pub fetch_degraded_total: IntCounter,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration: HistogramVec,
}

impl Metrics {
    fn new(registry: &Registry) -> Self {
        let transactions_total = IntCounter::new(
            "ff_transactions_total",
            "Transactions run by the AJAX endpoints",
        )
        .expect("metric ff_transactions_total");

        let feature_checks_total = IntCounterVec::new(
            Opts::new("ff_feature_checks_total", "Feature checks by result"),
            &["enabled"],
        )
        .expect("metric ff_feature_checks_total");

        let goal_hits_total = IntCounterVec::new(
            Opts::new("ff_goal_hits_total", "Goal hits recorded"),
            &["versioned"],
        )
        .expect("metric ff_goal_hits_total");

        let fetch_degraded_total = IntCounter::new(
            "ff_fetch_degraded_total",
            "Transactions that answered from defaults because the feature fetch failed",
        )
        .expect("metric ff_fetch_degraded_total");

        let http_requests_total = IntCounterVec::new(
            Opts::new("ff_http_requests_total", "HTTP requests served"),
            &["method", "path", "status"],
        )
        .expect("metric ff_http_requests_total");

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "ff_http_request_duration_seconds",
                "HTTP request duration, including the upstream feature fetch",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["method", "path"],
        )
        .expect("metric ff_http_request_duration_seconds");

        registry.register(Box::new(transactions_total.clone())).expect("register transactions_total");
        registry.register(Box::new(feature_checks_total.clone())).expect("register feature_checks_total");
        registry.register(Box::new(goal_hits_total.clone())).expect("register goal_hits_total");
        registry.register(Box::new(fetch_degraded_total.clone())).expect("register fetch_degraded_total");
        registry.register(Box::new(http_requests_total.clone())).expect("register http_requests_total");
        registry.register(Box::new(http_request_duration.clone())).expect("register http_request_duration");

        Self {
            transactions_total,
            feature_checks_total,
            goal_hits_total,
            fetch_degraded_total,
            http_requests_total,
            http_request_duration,
        }
    }
}

/// Global metrics, registered on first use.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = REGISTRY.get_or_init(Registry::new);
        Metrics::new(registry)
    })
}

/// GET /metrics
pub async fn handle_metrics() -> Response {
    let _ = metrics();
    let registry = REGISTRY.get_or_init(Registry::new);
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        tracing::error!("failed to encode metrics: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Middleware recording request count and duration per matched route.
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_PATH.to_string());

    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let m = metrics();
    m.http_requests_total
        .with_label_values(&[&method, &path, &status])
        .inc();
    m.http_request_duration
        .with_label_values(&[&method, &path])
        .observe(elapsed);

    response
}
