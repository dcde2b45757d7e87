use std::io::Read;
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fluidfeatures::{FeatureValue, FluidFeatures, FluidFeaturesError, UserIdentity};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// The SDK is blocking, so every call runs on a blocking worker while the
// mock server runs on the async runtime.
fn sdk(base_uri: &str) -> FluidFeatures {
    FluidFeatures::builder()
        .base_uri(base_uri)
        .app_id("123")
        .secret("s3cret")
        .timeout(Duration::from_millis(300))
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn fetches_user_features_with_auth_and_attributes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/service/app/123/user/42/features"))
        .and(header("authorization", "s3cret"))
        .and(header("accept", "application/json"))
        .and(query_param("anonymous", "false"))
        .and(query_param("plan", "gold"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"apples": true, "checkout": {"a": false}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let base_uri = format!("{}/service", server.uri());
    let fetch = tokio::task::spawn_blocking(move || {
        let ff = sdk(&base_uri);
        let user = UserIdentity::new("42").with_cohort("plan", "gold");
        ff.client().unwrap().fetch_user_features(&user)
    })
    .await
    .unwrap();

    assert!(!fetch.degraded);
    assert_eq!(fetch.features["apples"], FeatureValue::Flat(true));
    assert_eq!(fetch.features["checkout"].lookup("a"), Some(false));
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_upstream_degrades_to_defaults() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/app/123/user/7/features"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"apples": false}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/app/123/user/7/features/hit"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let base_uri = server.uri();
    let (enabled, degraded) = tokio::task::spawn_blocking(move || {
        let ff = sdk(&base_uri);
        let mut tx = ff
            .create_transaction(UserIdentity::new("7"), "http://localhost/")
            .unwrap();
        let enabled = tx.feature_enabled("apples", None, true);
        let degraded = tx.fetch_degraded();
        tx.end_transaction();
        (enabled, degraded)
    })
    .await
    .unwrap();

    assert!(enabled);
    assert!(degraded);
}

#[tokio::test(flavor = "multi_thread")]
async fn transaction_posts_one_report() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/app/123/user/1/features"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/app/123/user/1/features/hit"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let base_uri = server.uri();
    tokio::task::spawn_blocking(move || {
        let ff = sdk(&base_uri);
        let mut tx = ff
            .create_transaction(UserIdentity::new("1"), "http://localhost/")
            .unwrap();
        tx.feature_enabled("apples", None, true);
        tx.end_transaction();
        tx.end_transaction();
    })
    .await
    .unwrap();

    let requests = server.received_requests().await.unwrap();
    let report: serde_json::Value = requests
        .iter()
        .find(|r| r.method.as_str() == "POST")
        .unwrap()
        .body_json()
        .unwrap();
    assert_eq!(
        report["features"]["unknown"]["apples"]["versions"]["default"]["enabled"],
        true
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn rollout_and_listing() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/app/123/features/new%20checkout"))
        .and(body_json(json!({"enabled": {"percent": 30}})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/app/123/features"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"new checkout": {"enabled": {"percent": 30}}})),
        )
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/app/123/features/locked"))
        .respond_with(ResponseTemplate::new(403).set_body_string("read only"))
        .mount(&server)
        .await;

    let base_uri = server.uri();
    let (set, listed, locked) = tokio::task::spawn_blocking(move || {
        let ff = sdk(&base_uri);
        let client = ff.client().unwrap();
        (
            client.set_feature_rollout("new checkout", 30),
            client.list_features(),
            client.set_feature_rollout("locked", 50),
        )
    })
    .await
    .unwrap();

    assert!(set.is_ok());
    assert_eq!(listed.unwrap()["new checkout"]["enabled"]["percent"], 30);
    match locked {
        Err(FluidFeaturesError::Upstream { status, body }) => {
            assert_eq!(status, 403);
            assert_eq!(body, "read only");
        }
        other => panic!("expected upstream error, got {:?}", other),
    }
}

/// Accepts connections, reads the request head and hangs up without
/// answering. Returns the base URI and the number of connections seen.
fn hang_up_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base_uri = format!("http://{}", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            counter.fetch_add(1, Ordering::SeqCst);
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while let Ok(n) = stream.read(&mut buf) {
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
                if head.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
        }
    });
    (base_uri, accepted)
}

#[test]
fn report_is_not_resent_when_the_connection_drops() {
    let (base_uri, accepted) = hang_up_server();
    let ff = sdk(&base_uri);

    let mut tx = ff
        .create_transaction(UserIdentity::new("1"), "http://localhost/")
        .unwrap();
    tx.goal_hit("signup", None);
    tx.end_transaction();

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[test]
fn feature_fetch_is_retried_once_when_the_connection_drops() {
    let (base_uri, accepted) = hang_up_server();
    let ff = sdk(&base_uri);

    let fetch = ff
        .client()
        .unwrap()
        .fetch_user_features(&UserIdentity::new("1"));

    assert!(fetch.degraded);
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}
