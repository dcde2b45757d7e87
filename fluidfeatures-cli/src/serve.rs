use std::process;
use std::sync::Arc;

use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Json, Router};
use fluidfeatures::{
    resolve_visitor, CookieAction, FluidFeatures, FluidFeaturesError, Transaction, UserIdentity,
    ANONYMOUS_COOKIE,
};
use serde::Deserialize;
use tower_http::compression::CompressionLayer;

use crate::metrics::{self, metrics};

pub struct AppState {
    pub ff: FluidFeatures,
}

#[derive(Debug, Deserialize)]
struct FeatureQuery {
    user_id: Option<String>,
    version: Option<String>,
    default: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct GoalParams {
    goal_name: String,
    #[serde(default)]
    goal_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoalQuery {
    user_id: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/metrics", get(metrics::handle_metrics))
        .route("/fluidfeature/{feature_name}", get(handle_feature))
        .route("/fluidgoal/{goal_name}", get(handle_goal))
        .route("/fluidgoal/{goal_name}/{goal_version}", get(handle_goal))
        .layer(middleware::from_fn(metrics::track_metrics))
        .layer(CompressionLayer::new())
        .with_state(state)
}

pub async fn run_serve(state: Arc<AppState>, hostname: &str, port: u16) {
    let app = router(state);
    let addr = format!("{}:{}", hostname, port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            eprintln!("Failed to bind to {}: {}", addr, e);
            process::exit(1);
        });
    tracing::info!("serving fluidfeatures endpoints on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|e| {
            eprintln!("Server error: {}", e);
            process::exit(1);
        });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
        return;
    }
    tracing::info!("shutting down");
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({"status": "ok", "enabled": state.ff.is_enabled()})),
    )
        .into_response()
}

/// GET /fluidfeature/{feature_name}
async fn handle_feature(
    State(state): State<Arc<AppState>>,
    Path(feature_name): Path<String>,
    Query(query): Query<FeatureQuery>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    let visitor = resolve_visitor(
        query.user_id.map(UserIdentity::new),
        anonymous_cookie(&headers),
    );
    let url = request_url(&headers, &uri);
    let default = query.default.unwrap_or(state.ff.defaults().enabled);
    let version = query.version;

    let result = run_transaction(state, visitor.user, url, move |tx| {
        tx.feature_enabled(&feature_name, version.as_deref(), default)
    })
    .await;

    match result {
        Ok(enabled) => {
            metrics()
                .feature_checks_total
                .with_label_values(&[&enabled.to_string()])
                .inc();
            with_cookie(
                &visitor.cookie,
                (StatusCode::OK, Json(serde_json::json!({"enabled": enabled}))).into_response(),
            )
        }
        Err(response) => response,
    }
}

/// GET /fluidgoal/{goal_name} and /fluidgoal/{goal_name}/{goal_version}
async fn handle_goal(
    State(state): State<Arc<AppState>>,
    Path(params): Path<GoalParams>,
    Query(query): Query<GoalQuery>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    let visitor = resolve_visitor(
        query.user_id.map(UserIdentity::new),
        anonymous_cookie(&headers),
    );
    let url = request_url(&headers, &uri);
    let versioned = params.goal_version.is_some();

    let result = run_transaction(state, visitor.user, url, move |tx| {
        tx.goal_hit(&params.goal_name, params.goal_version.as_deref());
    })
    .await;

    match result {
        Ok(()) => {
            metrics()
                .goal_hits_total
                .with_label_values(&[if versioned { "true" } else { "false" }])
                .inc();
            with_cookie(
                &visitor.cookie,
                (StatusCode::OK, Json(serde_json::json!({}))).into_response(),
            )
        }
        Err(response) => response,
    }
}

/// Runs `f` inside one transaction on a blocking worker and ends the
/// transaction before returning.
async fn run_transaction<T, F>(
    state: Arc<AppState>,
    user: UserIdentity,
    url: String,
    f: F,
) -> Result<T, Response>
where
    F: FnOnce(&mut Transaction) -> T + Send + 'static,
    T: Send + 'static,
{
    let joined = tokio::task::spawn_blocking(move || {
        let mut tx = state.ff.create_transaction(user, url)?;
        let out = f(&mut tx);
        tx.end_transaction();

        let m = metrics();
        m.transactions_total.inc();
        if tx.fetch_degraded() {
            m.fetch_degraded_total.inc();
        }
        Ok::<T, FluidFeaturesError>(out)
    })
    .await;

    match joined {
        Ok(Ok(out)) => Ok(out),
        Ok(Err(e)) => Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("transaction worker failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

fn anonymous_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == ANONYMOUS_COOKIE)
        .map(|(_, value)| value)
}

fn set_cookie_value(action: &CookieAction) -> Option<String> {
    match action {
        CookieAction::Keep => None,
        CookieAction::Set(id) => Some(format!("{}={}; Path=/", ANONYMOUS_COOKIE, id)),
        CookieAction::Clear => Some(format!("{}=; Path=/; Max-Age=0", ANONYMOUS_COOKIE)),
    }
}

fn with_cookie(action: &CookieAction, mut response: Response) -> Response {
    let Some(cookie) = set_cookie_value(action) else {
        return response;
    };
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => tracing::warn!("not setting visitor cookie {:?}: {}", cookie, e),
    }
    response
}

fn request_url(headers: &HeaderMap, uri: &Uri) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{}{}", host, uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use fluidfeatures::testutils::MockTransport;
    use fluidfeatures::{Config, TransactionDefaults};
    use prometheus::core::Collector;
    use reqwest::Method;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn config() -> Config {
        Config {
            base_uri: "http://test.host/service".to_string(),
            app_id: "123".to_string(),
            secret: "secret".to_string(),
            timeout: Duration::from_secs(1),
            warn_threshold: Duration::from_millis(250),
            pool_size: 1,
            default_version: "default".to_string(),
            default_enabled: false,
        }
    }

    fn app_with(transport: &Arc<MockTransport>) -> Router {
        let ff = FluidFeatures::with_transport(&config(), transport.clone());
        router(Arc::new(AppState { ff }))
    }

    fn disabled_app() -> Router {
        let ff = FluidFeatures::disabled(TransactionDefaults::default());
        router(Arc::new(AppState { ff }))
    }

    async fn get(app: Router, uri: &str, cookie: Option<&str>) -> (StatusCode, HeaderMap, Value) {
        let mut request = Request::builder().uri(uri).header(header::HOST, "test.host");
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, headers, body)
    }

    fn set_cookie(headers: &HeaderMap) -> Option<String> {
        headers
            .get(header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn health_reports_disabled_sdk() {
        let (status, _, body) = get(disabled_app(), "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "enabled": false}));
    }

    #[tokio::test]
    async fn feature_check_for_known_user() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(Method::GET, "/app/123/user/42/features", 200, json!({"apples": true}));
        transport.respond(Method::POST, "/app/123/user/42/features/hit", 200, json!({}));

        let (status, headers, body) =
            get(app_with(&transport), "/fluidfeature/apples?user_id=42", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"enabled": true}));
        assert_eq!(set_cookie(&headers), None);

        let reports = transport.requests_to(Method::POST, "/app/123/user/42/features/hit");
        assert_eq!(reports.len(), 1);
        let report = reports[0].body.as_ref().unwrap();
        assert_eq!(report["url"], "http://test.host/fluidfeature/apples?user_id=42");
        assert_eq!(report["hits"]["feature"], json!({"apples": {"default": {}}}));
    }

    #[tokio::test]
    async fn known_user_clears_anonymous_cookie() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(Method::GET, "/app/123/user/42/features", 200, json!({}));

        let (_, headers, _) = get(
            app_with(&transport),
            "/fluidfeature/apples?user_id=42",
            Some("theme=dark; fluidfeatures_anonymous=anon-1-2"),
        )
        .await;

        assert_eq!(
            set_cookie(&headers).unwrap(),
            "fluidfeatures_anonymous=; Path=/; Max-Age=0"
        );
    }

    #[tokio::test]
    async fn anonymous_visitor_keeps_cookie_id() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(
            Method::GET,
            "/app/123/user/anon-1-2/features",
            200,
            json!({"checkout": {"a": true, "b": false}}),
        );

        let (_, headers, body) = get(
            app_with(&transport),
            "/fluidfeature/checkout?version=b&default=true",
            Some("fluidfeatures_anonymous=anon-1-2"),
        )
        .await;

        assert_eq!(body, json!({"enabled": false}));
        assert_eq!(
            set_cookie(&headers).unwrap(),
            "fluidfeatures_anonymous=anon-1-2; Path=/"
        );
        let fetches = transport.requests_to(Method::GET, "/app/123/user/anon-1-2/features");
        assert_eq!(
            fetches[0].query,
            vec![("anonymous".to_string(), "true".to_string())]
        );
    }

    #[tokio::test]
    async fn new_visitor_gets_anonymous_cookie() {
        let (status, headers, body) =
            get(disabled_app(), "/fluidfeature/apples?default=true", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"enabled": true}));
        let cookie = set_cookie(&headers).unwrap();
        assert!(cookie.starts_with("fluidfeatures_anonymous=anon-"), "{}", cookie);
    }

    #[tokio::test]
    async fn goal_with_version_is_reported() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(Method::POST, "/app/123/user/7/features/hit", 200, json!({}));

        let (status, _, body) =
            get(app_with(&transport), "/fluidgoal/signup/b?user_id=7", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));
        let reports = transport.requests_to(Method::POST, "/app/123/user/7/features/hit");
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0].body.as_ref().unwrap()["hits"]["goal"],
            json!({"signup": {"b": {}}})
        );
    }

    #[tokio::test]
    async fn goal_without_version_uses_default_version() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(Method::POST, "/app/123/user/7/features/hit", 200, json!({}));

        get(app_with(&transport), "/fluidgoal/signup?user_id=7", None).await;

        let reports = transport.requests_to(Method::POST, "/app/123/user/7/features/hit");
        assert_eq!(
            reports[0].body.as_ref().unwrap()["hits"]["goal"],
            json!({"signup": {"default": {}}})
        );
    }

    #[tokio::test]
    async fn metrics_are_exposed() {
        get(disabled_app(), "/fluidfeature/apples", None).await;

        let response = disabled_app()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("ff_transactions_total"));
        assert!(text.contains("ff_feature_checks_total"));
    }

    #[tokio::test]
    async fn goal_metrics_do_not_grow_with_goal_names() {
        for i in 0..20 {
            get(disabled_app(), &format!("/fluidgoal/goal-{}", i), None).await;
            get(disabled_app(), &format!("/fluidgoal/goal-{}/b", i), None).await;
        }
        let families = metrics().goal_hits_total.collect();
        assert!(families[0].get_metric().len() <= 2);
    }

    #[tokio::test]
    async fn unmatched_paths_share_one_series() {
        for i in 0..5 {
            let (status, _, _) = get(disabled_app(), &format!("/nope-{}", i), None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        }
        let (_, _, _) = get(disabled_app(), "/health", None).await;
        let series: Vec<String> = metrics()
            .http_requests_total
            .collect()
            .iter()
            .flat_map(|family| family.get_metric().to_vec())
            .flat_map(|metric| metric.get_label().to_vec())
            .filter(|label| label.get_name() == "path")
            .map(|label| label.get_value().to_string())
            .collect();
        assert!(series.iter().all(|path| !path.starts_with("/nope")), "{:?}", series);
    }

    #[test]
    fn cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("a=1; fluidfeatures_anonymous=anon-5-6; b=2"),
        );
        assert_eq!(anonymous_cookie(&headers), Some("anon-5-6"));
        assert_eq!(anonymous_cookie(&HeaderMap::new()), None);
    }
}
