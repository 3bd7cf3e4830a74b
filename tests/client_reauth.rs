//! Step-up resume protocol against a stub server: a challenged operation is
//! parked, replayed byte-identically after a successful password round-trip,
//! and its outcome routed to the original continuations.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{patch, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use syncspace::client::{ApiClient, ClientError, PromptState, ResumeHandlers, RetryOp};

#[derive(Clone)]
struct StubState {
    reauthed: Arc<AtomicBool>,
    password_bodies: Arc<Mutex<Vec<Value>>>,
}

fn success(data: Value) -> Json<Value> {
    Json(json!({
        "code": 200,
        "success": true,
        "message": "ok",
        "trace": "stub/success",
        "data": data,
    }))
}

fn failure(code: u16, trace: &str) -> (StatusCode, Json<Value>) {
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

async fn stub_change_password(
    State(state): State<StubState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.password_bodies.lock().unwrap().push(body);
    if state.reauthed.load(Ordering::SeqCst) {
        success(Value::Null).into_response()
    } else {
        failure(403, "reauth_gate/auth_expired").into_response()
    }
}

async fn stub_reauth(State(state): State<StubState>, Json(body): Json<Value>) -> impl IntoResponse {
    if body["password"] == json!("correct-password") {
        state.reauthed.store(true, Ordering::SeqCst);
        success(json!({"accessToken": "post-reauth-token"})).into_response()
    } else {
        failure(409, "reauth/incorrect_password").into_response()
    }
}

async fn spawn_stub() -> (String, StubState) {
    let state = StubState {
        reauthed: Arc::new(AtomicBool::new(false)),
        password_bodies: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/user/password", patch(stub_change_password))
        .route("/auth/reauth", post(stub_reauth))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    (format!("http://{addr}/"), state)
}

fn capture_handlers() -> (ResumeHandlers, oneshot::Receiver<Result<Value, String>>) {
    let (tx, rx) = oneshot::channel();
    let tx = Arc::new(Mutex::new(Some(tx)));
    let success_tx = Arc::clone(&tx);
    let error_tx = tx;
    (
        ResumeHandlers {
            on_success: Box::new(move |data| {
                if let Some(tx) = success_tx.lock().unwrap().take() {
                    let _ = tx.send(Ok(data));
                }
            }),
            on_error: Box::new(move |err| {
                if let Some(tx) = error_tx.lock().unwrap().take() {
                    let _ = tx.send(Err(err.to_string()));
                }
            }),
        },
        rx,
    )
}

fn change_password_op() -> RetryOp {
    RetryOp::ChangePassword {
        current_password: "old-password".to_string(),
        new_password: "new-password-123".to_string(),
    }
}

#[tokio::test]
async fn challenged_op_resumes_after_correct_password() {
    let (base_url, stub) = spawn_stub().await;
    let client = ApiClient::new(&base_url).unwrap();
    client.session.set_access_token("token".to_string());

    let (handlers, outcome) = capture_handlers();
    client.submit_sensitive(change_password_op(), handlers).await;

    // Parked, prompt open, nothing delivered yet.
    assert!(matches!(
        client.reauth.prompt_state(),
        PromptState::Prompting { .. }
    ));

    client
        .submit_reauth_password("correct-password")
        .await
        .unwrap();

    let delivered = outcome.await.unwrap();
    assert!(delivered.is_ok(), "continuation should see the retry succeed");
    assert_eq!(client.reauth.prompt_state(), PromptState::Closed);

    // The replay carried the original arguments, byte for byte.
    let bodies = stub.password_bodies.lock().unwrap();
    assert_eq!(bodies.len(), 2, "one challenged attempt plus one replay");
    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[1]["currentPassword"], "old-password");
    assert_eq!(bodies[1]["newPassword"], "new-password-123");
}

#[tokio::test]
async fn wrong_password_keeps_prompt_open_and_op_parked() {
    let (base_url, stub) = spawn_stub().await;
    let client = ApiClient::new(&base_url).unwrap();
    client.session.set_access_token("token".to_string());

    let (handlers, mut outcome) = capture_handlers();
    client.submit_sensitive(change_password_op(), handlers).await;

    let err = client
        .submit_reauth_password("wrong-password")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Api { code: 409, .. }));
    assert!(matches!(
        client.reauth.prompt_state(),
        PromptState::Prompting { .. }
    ));

    // No replay happened, continuation still pending.
    assert_eq!(stub.password_bodies.lock().unwrap().len(), 1);
    assert!(outcome.try_recv().is_err());

    // Same prompt, right password this time.
    client
        .submit_reauth_password("correct-password")
        .await
        .unwrap();
    assert!(outcome.await.unwrap().is_ok());
}

#[tokio::test]
async fn cancel_abandons_parked_op() {
    let (base_url, stub) = spawn_stub().await;
    let client = ApiClient::new(&base_url).unwrap();
    client.session.set_access_token("token".to_string());

    let (handlers, mut outcome) = capture_handlers();
    client.submit_sensitive(change_password_op(), handlers).await;

    client.reauth.cancel();
    assert_eq!(client.reauth.prompt_state(), PromptState::Closed);

    // Submitting afterwards is a no-op: nothing to resume.
    client
        .submit_reauth_password("correct-password")
        .await
        .unwrap();
    assert_eq!(stub.password_bodies.lock().unwrap().len(), 1);
    assert!(outcome.try_recv().is_err());
}

#[tokio::test]
async fn unchallenged_op_delivers_immediately() {
    let (base_url, stub) = spawn_stub().await;
    stub.reauthed.store(true, Ordering::SeqCst);

    let client = ApiClient::new(&base_url).unwrap();
    client.session.set_access_token("token".to_string());

    let (handlers, outcome) = capture_handlers();
    client.submit_sensitive(change_password_op(), handlers).await;

    assert!(outcome.await.unwrap().is_ok());
    assert_eq!(client.reauth.prompt_state(), PromptState::Closed);
}
