//! Router-level tests against the in-memory broker and run store.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tower::ServiceExt;

use agentrun_core::{Config, RunKeys};
use agentrun_relay::MemoryBroker;
use agentrun_server::run_store::{MemoryRunStore, RunStore};
use agentrun_server::{build_router, AppState};

const WAIT: Duration = Duration::from_secs(2);

struct TestApp {
    broker: MemoryBroker,
    store: MemoryRunStore,
    state: Arc<AppState>,
    router: Router,
}

fn config() -> Config {
    let mut config = Config::for_profile("");
    config.auth.jwt_secret = None;
    config.auth.user_id_prefix = "user_".to_string();
    config.server.cors_origin = "*".to_string();
    config.stream.cleanup_grace_ms = 0;
    config
}

fn app_with(runs: bool) -> TestApp {
    let broker = MemoryBroker::new();
    let store = MemoryRunStore::new();
    store.add_thread("thread-1", Some("acct-1"), false);
    store.add_thread("thread-pub", Some("acct-2"), true);
    store.add_member("user_alice", "acct-1");

    let runs = runs.then(|| Arc::new(store.clone()) as Arc<dyn RunStore>);
    let state = Arc::new(AppState::new(config(), Arc::new(broker.clone()), runs));
    TestApp {
        broker,
        store,
        router: build_router(state.clone()),
        state,
    }
}

fn app() -> TestApp {
    app_with(true)
}

fn token(user: &str) -> String {
    encode(
        &Header::default(),
        &json!({"sub": user}),
        &EncodingKey::from_secret(b"upstream"),
    )
    .unwrap()
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(user) = user {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token(user)));
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token(user)))
        .body(Body::empty())
        .unwrap()
}

fn stream_uri(run_id: &str, user: &str) -> String {
    format!("/agent-run/{}/stream?token={}", run_id, token(user))
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Parse an SSE body into its `data:` payloads.
async fn sse_frames(response: axum::response::Response) -> Vec<Value> {
    let bytes = tokio::time::timeout(WAIT, response.into_body().collect())
        .await
        .expect("stream did not end")
        .unwrap()
        .to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    text.split("\n\n")
        .filter_map(|event| event.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect()
}

// ── Health & docs ────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let app = app();
    let response = app.router.oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["run_store"], true);
}

#[tokio::test]
async fn test_docs_served() {
    let app = app();
    let response = app.router.oneshot(get("/docs", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ── Stream auth & access ─────────────────────────────────────

#[tokio::test]
async fn test_stream_requires_credentials() {
    let app = app();
    app.store.add_run("run-1", "thread-1", "running");

    let response = app
        .router
        .oneshot(get("/agent-run/run-1/stream", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    let body = json_body(response).await;
    assert_eq!(body["error"], "No valid authentication credentials found");
}

#[tokio::test]
async fn test_stream_accepts_header_token() {
    let app = app();
    app.store.add_run("run-1", "thread-1", "completed");

    let response = app
        .router
        .oneshot(get("/agent-run/run-1/stream", Some("user_alice")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_stream_unknown_run_is_404() {
    let app = app();
    let response = app
        .router
        .oneshot(get(&stream_uri("run-404", "user_alice"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "Agent run not found");
}

#[tokio::test]
async fn test_stream_other_account_is_403() {
    let app = app();
    app.store.add_run("run-1", "thread-1", "running");

    let response = app
        .router
        .oneshot(get(&stream_uri("run-1", "user_mallory"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.broker.subscriptions_opened(), 0);
}

// ── Stream content ───────────────────────────────────────────

#[tokio::test]
async fn test_stream_of_finished_run() {
    let app = app();
    app.store.add_run("run-1", "thread-1", "completed");
    let keys = RunKeys::new("run-1");
    app.broker
        .push(&keys.response_list(), &json!({"type": "text", "content": "hello"}));
    app.broker
        .push(&keys.response_list(), &json!({"type": "status", "status": "completed"}));

    let response = app
        .router
        .oneshot(get(&stream_uri("run-1", "user_alice"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-transform");
    assert_eq!(headers["x-accel-buffering"], "no");

    let frames = sse_frames(response).await;
    assert_eq!(
        frames,
        vec![
            json!({"type": "text", "content": "hello"}),
            json!({"type": "status", "status": "completed"}),
            json!({"type": "status", "status": "completed"}),
        ]
    );
}

#[tokio::test]
async fn test_live_stream_follows_run_to_completion() {
    let app = app();
    app.store.add_run("run-1", "thread-1", "running");
    let keys = RunKeys::new("run-1");
    app.broker.push(&keys.response_list(), &json!({"n": 1}));
    app.broker.push(&keys.response_list(), &json!({"n": 2}));

    let response = app
        .router
        .oneshot(get(&stream_uri("run-1", "user_alice"), None))
        .await
        .unwrap();
    let frames = tokio::spawn(sse_frames(response));

    assert!(
        app.broker
            .wait_for_subscribers(&keys.control_channel(), 1, WAIT)
            .await
    );
    app.broker
        .push(&keys.response_list(), &json!({"type": "status", "status": "completed"}));
    app.broker.publish_now(&keys.response_channel(), "new");

    let frames = frames.await.unwrap();
    assert_eq!(
        frames,
        vec![
            json!({"n": 1}),
            json!({"n": 2}),
            json!({"type": "status", "status": "completed"}),
        ]
    );

    tokio::time::timeout(WAIT, async {
        while app.broker.total_active_subscriptions() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriptions leaked");
}

#[tokio::test]
async fn test_public_thread_stream_for_non_member() {
    let app = app();
    app.store.add_run("run-pub", "thread-pub", "stopped");

    let response = app
        .router
        .oneshot(get(&stream_uri("run-pub", "user_bob"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let frames = sse_frames(response).await;
    assert_eq!(frames, vec![json!({"type": "status", "status": "completed"})]);
}

// ── Stop ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_stop_ends_open_stream() {
    let app = app();
    app.store.add_run("run-1", "thread-1", "running");
    let keys = RunKeys::new("run-1");

    let response = app
        .router
        .clone()
        .oneshot(get(&stream_uri("run-1", "user_alice"), None))
        .await
        .unwrap();
    let frames = tokio::spawn(sse_frames(response));
    assert!(
        app.broker
            .wait_for_subscribers(&keys.control_channel(), 1, WAIT)
            .await
    );

    let stop = app
        .router
        .clone()
        .oneshot(post("/agent-run/run-1/stop", "user_alice"))
        .await
        .unwrap();
    assert_eq!(stop.status(), StatusCode::OK);
    assert_eq!(json_body(stop).await, json!({"status": "stopped"}));

    let frames = frames.await.unwrap();
    assert_eq!(frames, vec![json!({"type": "status", "status": "STOP"})]);

    let run = app.store.get_run("run-1").await.unwrap().unwrap();
    assert_eq!(run.status, "stopped");
    assert!(app.broker.expiry(&keys.response_list()).is_some());
}

#[tokio::test]
async fn test_stop_requires_access() {
    let app = app();
    app.store.add_run("run-1", "thread-1", "running");

    let response = app
        .router
        .oneshot(post("/agent-run/run-1/stop", "user_mallory"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(app.broker.published().is_empty());
}

// ── Lookups ──────────────────────────────────────────────────

#[tokio::test]
async fn test_get_agent_run_uses_camel_case() {
    let app = app();
    app.store.add_run("run-1", "thread-1", "running");

    let response = app
        .router
        .oneshot(get("/agent-run/run-1", Some("user_alice")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["id"], "run-1");
    assert_eq!(body["threadId"], "thread-1");
    assert_eq!(body["status"], "running");
    assert!(body["startedAt"].is_string());
    assert!(body["completedAt"].is_null());
    assert!(body["error"].is_null());
}

#[tokio::test]
async fn test_get_agent_run_requires_header() {
    let app = app();
    app.store.add_run("run-1", "thread-1", "running");

    let response = app
        .router
        .oneshot(get(
            &format!("/agent-run/run-1?token={}", token("user_alice")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_thread_runs() {
    let app = app();
    app.store.add_run("run-1", "thread-1", "completed");
    app.store.add_run("run-2", "thread-1", "running");
    app.store.add_run("run-3", "thread-pub", "running");

    let response = app
        .router
        .clone()
        .oneshot(get("/thread/thread-1/agent-runs", Some("user_alice")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let runs = body["agent_runs"].as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r["thread_id"] == "thread-1"));

    let missing = app
        .router
        .oneshot(get("/thread/nope/agent-runs", Some("user_alice")))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(missing).await["error"], "Thread not found");
}

// ── Shutdown ─────────────────────────────────────────────────

async fn wait_released(broker: &MemoryBroker) {
    tokio::time::timeout(WAIT, async {
        while broker.total_active_subscriptions() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriptions leaked");
}

#[tokio::test]
async fn test_shutdown_ends_open_stream() {
    let app = app();
    app.store.add_run("run-1", "thread-1", "running");
    let keys = RunKeys::new("run-1");
    app.broker.push(&keys.response_list(), &json!({"n": 1}));

    let response = app
        .router
        .clone()
        .oneshot(get(&stream_uri("run-1", "user_alice"), None))
        .await
        .unwrap();
    let frames = tokio::spawn(sse_frames(response));
    assert!(
        app.broker
            .wait_for_subscribers(&keys.control_channel(), 1, WAIT)
            .await
    );

    app.state.begin_shutdown();
    assert_eq!(frames.await.unwrap(), vec![json!({"n": 1})]);
    wait_released(&app.broker).await;
}

#[tokio::test]
async fn test_graceful_shutdown_with_stream_open() {
    let app = app();
    app.store.add_run("run-1", "thread-1", "running");
    let keys = RunKeys::new("run-1");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let state = app.state.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app.router)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
                state.begin_shutdown();
            })
            .await
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nAccept: text/event-stream\r\n\r\n",
        stream_uri("run-1", "user_alice"),
        addr
    );
    client.write_all(request.as_bytes()).await.unwrap();
    assert!(
        app.broker
            .wait_for_subscribers(&keys.control_channel(), 1, WAIT)
            .await
    );

    stop_tx.send(()).unwrap();
    let served = tokio::time::timeout(Duration::from_secs(3), server)
        .await
        .expect("server kept running with a stream open");
    served.unwrap().unwrap();
    wait_released(&app.broker).await;
    drop(client);
}

// ── Degraded backends ────────────────────────────────────────

#[tokio::test]
async fn test_run_endpoints_without_run_store() {
    let app = app_with(false);
    let response = app
        .router
        .oneshot(get("/agent-run/run-1", Some("user_alice")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"], "PostgreSQL not configured");
}

#[tokio::test]
async fn test_unreachable_run_store_is_503() {
    let app = app();
    app.store.add_run("run-1", "thread-1", "running");
    app.store.set_unavailable(true);

    let response = app
        .router
        .oneshot(get(&stream_uri("run-1", "user_alice"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
