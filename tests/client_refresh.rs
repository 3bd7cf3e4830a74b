//! Client interceptor behavior against a stub server: one shared refresh per
//! expiry window, and terminal refresh failures log the session out.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::net::TcpListener;

use syncspace::client::{ApiClient, ClientError};

const FRESH_TOKEN: &str = "fresh-access-token";

#[derive(Clone)]
struct StubState {
    refresh_calls: Arc<AtomicUsize>,
    refresh_succeeds: bool,
}

fn success(data: serde_json::Value) -> Json<serde_json::Value> {
    Json(json!({
        "code": 200,
        "success": true,
        "message": "ok",
        "trace": "stub/success",
        "data": data,
    }))
}

fn failure(code: u16, trace: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::from_u16(code).unwrap(),
        Json(json!({
            "code": code,
            "success": false,
            "message": "nope",
            "trace": trace,
        })),
    )
}

async fn stub_session(headers: HeaderMap) -> impl IntoResponse {
    let bearer = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or_default();
    if bearer == FRESH_TOKEN {
        success(json!({"user": {"username": "alice"}})).into_response()
    } else {
        failure(403, "auth_guard/invalid_access_token").into_response()
    }
}

async fn stub_refresh(State(state): State<StubState>) -> impl IntoResponse {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    // Hold the refresh open long enough that every sibling request has
    // already observed the stale token and queued up.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    if state.refresh_succeeds {
        success(json!({"accessToken": FRESH_TOKEN})).into_response()
    } else {
        failure(403, "refresh/session_expired").into_response()
    }
}

async fn spawn_stub(refresh_succeeds: bool) -> (String, Arc<AtomicUsize>) {
    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let state = StubState {
        refresh_calls: Arc::clone(&refresh_calls),
        refresh_succeeds,
    };
    let app = Router::new()
        .route("/user/session", get(stub_session))
        .route("/auth/refresh", post(stub_refresh))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    (format!("http://{addr}/"), refresh_calls)
}

#[tokio::test]
async fn concurrent_expiries_share_one_refresh() {
    let (base_url, refresh_calls) = spawn_stub(true).await;
    let client = ApiClient::new(&base_url).unwrap();
    client.session.set_access_token("stale".to_string());

    let results = tokio::join!(
        client.fetch_session(),
        client.fetch_session(),
        client.fetch_session(),
        client.fetch_session(),
        client.fetch_session(),
        client.fetch_session(),
        client.fetch_session(),
        client.fetch_session(),
    );

    let outcomes = [
        results.0, results.1, results.2, results.3, results.4, results.5, results.6, results.7,
    ];
    for outcome in outcomes {
        assert!(outcome.is_ok(), "request should succeed after refresh");
    }

    assert_eq!(
        refresh_calls.load(Ordering::SeqCst),
        1,
        "exactly one refresh call for the whole expiry window"
    );
    assert_eq!(client.session.access_token().as_deref(), Some(FRESH_TOKEN));
}

#[tokio::test]
async fn failed_refresh_logs_out_every_waiter() {
    let (base_url, refresh_calls) = spawn_stub(false).await;
    let client = ApiClient::new(&base_url).unwrap();
    client.session.set_access_token("stale".to_string());

    let results = tokio::join!(
        client.fetch_session(),
        client.fetch_session(),
        client.fetch_session(),
    );

    for outcome in [results.0, results.1, results.2] {
        assert!(matches!(outcome, Err(ClientError::SessionExpired)));
    }
    assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
    assert!(!client.session.logged_in(), "terminal failure forces logout");
}

#[tokio::test]
async fn fresh_token_never_touches_refresh() {
    let (base_url, refresh_calls) = spawn_stub(true).await;
    let client = ApiClient::new(&base_url).unwrap();
    client.session.set_access_token(FRESH_TOKEN.to_string());

    client.fetch_session().await.unwrap();
    assert_eq!(refresh_calls.load(Ordering::SeqCst), 0);
}
