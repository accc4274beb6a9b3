//! End-to-end tests for the request pipeline.
//!
//! Most tests drive the axum router in-process with `tower::ServiceExt::oneshot`.
//! The rate limiting tests start a real server on an ephemeral port so the
//! peer address reaches the limiter as the client identity.
//!
//! Run with: `cargo test --test pipeline_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use reqwest::Client;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

use resource_gateway::routing::{Resource, RouteTable};
use resource_gateway::{AppResult, AppState, Config, Environment, RequestContext, build_router, handlers};

// =============================================================================
// Helpers
// =============================================================================

fn config(environment: Environment) -> Config {
    Config {
        environment,
        public_dir: PathBuf::from("/nonexistent/public"),
        ..Config::default()
    }
}

/// Echoes what the pipeline handed to the handler.
fn echo_resource() -> Resource {
    Resource::new()
        .get("/", |ctx: RequestContext| async move {
            AppResult::Ok(axum::Json(json!({
                "query": ctx.query,
                "queryPolluted": ctx.query_polluted,
                "requestId": ctx.request_id(),
                "stamped": ctx.request_time().is_some(),
            })))
        })
        .unwrap()
        .post("/", |ctx: RequestContext| async move {
            AppResult::Ok(axum::Json(json!({ "body": ctx.body })))
        })
        .unwrap()
        .get("/boom", |_ctx: RequestContext| async move {
            if std::hint::black_box(true) {
                panic!("handler invariant broken: secret=hunter2");
            }
            AppResult::Ok("unreachable")
        })
        .unwrap()
}

fn app_with(config: Config) -> (Router, AppState) {
    let routes = handlers::mount_collections(RouteTable::new())
        .unwrap()
        .mount("/api/v1/echo", echo_resource());
    let state = AppState::new(config, routes).unwrap();
    (build_router(state.clone()), state)
}

fn app(environment: Environment) -> Router {
    app_with(config(environment)).0
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: Method, uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Start the app on an ephemeral port with peer addresses attached.
async fn spawn_server(config: Config) -> (String, AppState) {
    let (router, state) = app_with(config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (format!("http://{addr}"), state)
}

// =============================================================================
// Not Found Fallback
// =============================================================================

#[tokio::test]
async fn test_unknown_path_is_404_with_original_url() {
    let response = app(Environment::Production)
        .oneshot(get("/api/v1/nothing?page=2"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(
        body,
        json!({
            "status": "fail",
            "message": "Can't find /api/v1/nothing?page=2 on this server!"
        })
    );
}

#[tokio::test]
async fn test_path_outside_api_is_404() {
    let response = app(Environment::Production)
        .oneshot(get("/does/not/exist"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    // Outside the limited scope: no counters reported.
    assert!(!response.headers().contains_key("x-ratelimit-limit"));
    let body = body_json(response).await;
    assert_eq!(body["message"], "Can't find /does/not/exist on this server!");
}

#[tokio::test]
async fn test_unsupported_method_on_known_path_is_404() {
    let response = app(Environment::Production)
        .oneshot(json_request(Method::PUT, "/api/v1/tours", "{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Header Hardener
// =============================================================================

#[tokio::test]
async fn test_security_headers_on_success_and_failure() {
    let router = app(Environment::Production);

    let ok = router.clone().oneshot(get("/api/v1/tours")).await.unwrap();
    let missing = router.oneshot(get("/missing")).await.unwrap();

    for response in [&ok, &missing] {
        let headers = response.headers();
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "SAMEORIGIN");
        assert!(headers.contains_key("strict-transport-security"));
        assert!(!headers.contains_key("x-powered-by"));
    }
    assert_eq!(ok.status(), StatusCode::OK);
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Rate Limiter
// =============================================================================

#[tokio::test]
async fn test_rate_limit_rejects_101st_request() {
    let (base, state) = spawn_server(config(Environment::Production)).await;
    let client = Client::new();

    for i in 0..100 {
        let response = client
            .get(format!("{base}/api/v1/tours"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200, "request {} should pass", i + 1);
    }

    let response = client
        .get(format!("{base}/api/v1/tours"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);
    assert!(response.headers().contains_key("retry-after"));
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "fail");
    assert_eq!(
        body["message"],
        "Too many requests from this IP , please try again in an hour!"
    );

    state.shutdown().await;
}

#[tokio::test]
async fn test_rate_limit_only_counts_scoped_paths() {
    let (base, state) = spawn_server(Config {
        rate_limit_max: 2,
        rate_limit_message: "slow down".to_string(),
        ..config(Environment::Production)
    })
    .await;
    let client = Client::new();

    // Outside `/api`: never counted.
    for _ in 0..5 {
        let response = client
            .get(format!("{base}/overview.html"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    let first = client.get(format!("{base}/api/v1/tours")).send().await.unwrap();
    assert_eq!(first.headers()["x-ratelimit-limit"], "2");
    assert_eq!(first.headers()["x-ratelimit-remaining"], "1");

    client.get(format!("{base}/api/v1/tours")).send().await.unwrap();
    let third = client.get(format!("{base}/api/v1/tours")).send().await.unwrap();
    assert_eq!(third.status(), 429);
    let body: Value = third.json().await.unwrap();
    assert_eq!(body["message"], "slow down");

    state.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rate_limit_concurrent_burst_admits_exactly_max() {
    let (base, state) = spawn_server(Config {
        rate_limit_max: 20,
        ..config(Environment::Production)
    })
    .await;
    let client = Client::new();

    let mut tasks = Vec::new();
    for _ in 0..60 {
        let client = client.clone();
        let url = format!("{base}/api/v1/tours");
        tasks.push(tokio::spawn(async move {
            client.get(url).send().await.unwrap().status().as_u16()
        }));
    }

    let mut admitted = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            200 => admitted += 1,
            429 => rejected += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(admitted, 20);
    assert_eq!(rejected, 40);
    state.shutdown().await;
}

// =============================================================================
// Body Decoder
// =============================================================================

#[tokio::test]
async fn test_oversized_body_rejected_before_handler() {
    let big = format!(r#"{{"name":"{}"}}"#, "a".repeat(11 * 1024));
    let response = app(Environment::Production)
        .oneshot(json_request(Method::POST, "/api/v1/tours", big))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(response).await;
    assert_eq!(body["status"], "fail");
}

#[tokio::test]
async fn test_malformed_json_is_400() {
    let response = app(Environment::Production)
        .oneshot(json_request(Method::POST, "/api/v1/echo", "{\"name\": "))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().starts_with("Invalid JSON body"));
}

// =============================================================================
// Input Sanitizer
// =============================================================================

#[tokio::test]
async fn test_body_is_sanitized_before_handler() {
    let payload = json!({
        "email": {"$gt": ""},
        "name": "<script>alert(1)</script>",
        "nested": {"$where": "1 == 1", "keep": "  ok  "}
    });
    let response = app(Environment::Production)
        .oneshot(json_request(Method::POST, "/api/v1/echo", payload.to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(
        body["body"],
        json!({
            "email": {},
            "name": "&lt;script&gt;alert(1)&lt;/script&gt;",
            "nested": {"keep": "ok"}
        })
    );
}

#[tokio::test]
async fn test_operator_query_keys_removed() {
    let response = app(Environment::Production)
        .oneshot(get("/api/v1/echo?price%5B%24gt%5D=100&difficulty=easy"))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["query"]["difficulty"], "easy");
    assert_eq!(body["query"]["price"], json!({}));
}

// =============================================================================
// Parameter Deduplicator
// =============================================================================

#[tokio::test]
async fn test_repeated_query_key_keeps_first_value() {
    let response = app(Environment::Production)
        .oneshot(get("/api/v1/echo?sort=duration&sort=price"))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["query"]["sort"], "duration");
    assert_eq!(body["queryPolluted"]["sort"], json!(["duration", "price"]));
}

#[tokio::test]
async fn test_whitelisted_key_keeps_all_values() {
    let response = app(Environment::Production)
        .oneshot(get("/api/v1/echo?price=10&price=20&duration=5&duration=9"))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["query"]["price"], json!(["10", "20"]));
    assert_eq!(body["query"]["duration"], json!(["5", "9"]));
    assert!(body["queryPolluted"].get("price").is_none());
}

// =============================================================================
// Static Asset Server
// =============================================================================

struct PublicDir(PathBuf);

impl PublicDir {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("gateway-it-{name}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("overview.html"), "<h1>All tours</h1>").unwrap();
        Self(dir)
    }
}

impl Drop for PublicDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

#[tokio::test]
async fn test_static_file_served_with_security_headers() {
    let public = PublicDir::new("static");
    let router = app_with(Config {
        public_dir: public.0.clone(),
        ..config(Environment::Production)
    })
    .0;

    let response = router.clone().oneshot(get("/overview.html")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-frame-options"], "SAMEORIGIN");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"<h1>All tours</h1>");

    let missing = router.oneshot(get("/nope.html")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_overlong_path_segment_falls_through_to_404() {
    let public = PublicDir::new("overlong");
    let router = app_with(Config {
        public_dir: public.0.clone(),
        ..config(Environment::Production)
    })
    .0;
    let path = format!("/{}", "a".repeat(300));

    let response = router.oneshot(get(&path)).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(
        body,
        json!({"status": "fail", "message": format!("Can't find {path} on this server!")})
    );
}

// =============================================================================
// Router Dispatcher + resources
// =============================================================================

#[tokio::test]
async fn test_tour_crud_round_trip() {
    let router = app(Environment::Production);

    let created = router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/tours",
            json!({"name": "The Forest Hiker", "price": 397}).to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = body_json(created).await;
    assert_eq!(created["status"], "success");
    assert!(created["requestedAt"].is_string());
    let id = created["data"]["data"]["_id"].as_str().unwrap().to_string();

    let fetched = router
        .clone()
        .oneshot(get(&format!("/api/v1/tours/{id}")))
        .await
        .unwrap();
    assert_eq!(fetched.status(), StatusCode::OK);
    assert_eq!(body_json(fetched).await["data"]["data"]["price"], 397);

    let trailing = router
        .clone()
        .oneshot(get(&format!("/api/v1/tours/{id}/")))
        .await
        .unwrap();
    assert_eq!(trailing.status(), StatusCode::OK);

    let deleted = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/api/v1/tours/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let gone = router
        .oneshot(get(&format!("/api/v1/tours/{id}")))
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_request_is_stamped_and_id_propagated() {
    let response = app(Environment::Production)
        .oneshot(
            Request::builder()
                .uri("/api/v1/echo")
                .header("x-request-id", "trace-abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], "trace-abc-123");
    let body = body_json(response).await;
    assert_eq!(body["requestId"], "trace-abc-123");
    assert_eq!(body["stamped"], true);
}

// =============================================================================
// Global Error Handler
// =============================================================================

#[tokio::test]
async fn test_malformed_id_production_vs_development() {
    let production = app(Environment::Production)
        .oneshot(get("/api/v1/tours/wwww"))
        .await
        .unwrap();
    assert_eq!(production.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(production).await,
        json!({"status": "fail", "message": "Invalid _id: wwww."})
    );

    let development = app(Environment::Development)
        .oneshot(get("/api/v1/tours/wwww"))
        .await
        .unwrap();
    assert_eq!(development.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(development).await;
    assert_eq!(body["status"], "error");
    assert!(body["stack"].is_string());
    assert_eq!(body["error"]["isOperational"], false);
}

#[tokio::test]
async fn test_duplicate_key_production_message() {
    let router = app(Environment::Production);
    let tour = json!({"name": "The Sea Explorer", "price": 497}).to_string();

    let first = router
        .clone()
        .oneshot(json_request(Method::POST, "/api/v1/tours", tour.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = router
        .oneshot(json_request(Method::POST, "/api/v1/tours", tour))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
    let body = body_json(second).await;
    assert!(body["message"].as_str().unwrap().starts_with("Duplicate field value"));
}

#[tokio::test]
async fn test_panicking_handler_is_generic_500_in_production() {
    let response = app(Environment::Production)
        .oneshot(get("/api/v1/echo/boom"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    let text = body_json(response).await.to_string();
    assert!(text.contains("Something went very wrong!"));
    assert!(!text.contains("hunter2"));
}

#[tokio::test]
async fn test_server_survives_panics() {
    let router = app(Environment::Production);

    let _ = router.clone().oneshot(get("/api/v1/echo/boom")).await.unwrap();
    let after = router.oneshot(get("/api/v1/tours")).await.unwrap();

    assert_eq!(after.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_background_tasks_stop_on_shutdown() {
    let (_, state) = app_with(Config {
        rate_limit_sweep_interval: Duration::from_millis(10),
        ..config(Environment::Production)
    });
    assert_eq!(state.background_tasks(), 1);

    state.shutdown().await;
    assert_eq!(state.background_tasks(), 0);
}
