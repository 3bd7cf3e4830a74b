//! HTTP surface: router, middleware stack and server loop.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{header, HeaderName, HeaderValue, Method, Request},
    routing::{delete, get, patch, post},
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;

pub mod error;
pub mod handlers;
mod openapi;

use handlers::auth::state::{AuthConfig, AuthState};
use handlers::{auth, health, user};

/// Routes with their middleware stack, shared state attached.
#[must_use]
pub fn app(pool: sqlx::PgPool, state: Arc<AuthState>) -> Router {
    let cors = cors_layer(state.config().frontend_url());

    Router::new()
        .route("/auth/register", post(auth::login::register))
        .route("/auth/login", post(auth::login::login))
        .route("/auth/refresh", post(auth::refresh::refresh))
        .route("/auth/reauth", post(auth::reauth::reauth))
        .route("/auth/logout", delete(auth::reauth::logout))
        .route("/auth/email-available", get(auth::login::email_available))
        .route(
            "/auth/username-available",
            get(auth::login::username_available),
        )
        .route("/user/session", get(user::session::fetch_session))
        .route("/user/reauth-status", get(user::session::reauth_status))
        .route("/user/password", patch(user::account::change_password))
        .route("/user/email", patch(user::account::change_email))
        .route("/user/account", delete(user::account::delete_account))
        .route("/user/settings", patch(user::settings::update_settings))
        .route("/health", get(health::health))
        .route("/openapi.json", get(openapi::openapi))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(pool))
                .layer(Extension(state)),
        )
}

fn cors_layer(frontend_url: &str) -> CorsLayer {
    // Credentialed CORS: the refresh cookie only flows when the exact
    // frontend origin is allowed, wildcard origins are rejected by browsers.
    let origin = HeaderValue::from_str(frontend_url.trim_end_matches('/'))
        .unwrap_or_else(|_| HeaderValue::from_static("http://localhost:5173"));
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(origin)
        .allow_credentials(true)
}

/// Connect, migrate and serve until ctrl-c.
///
/// # Errors
/// Returns an error if the database or listener cannot be set up.
pub async fn serve(port: u16, dsn: String, config: AuthConfig) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let state = Arc::new(AuthState::new(config));
    let app = app(pool, state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let path = request.uri().path();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, request_id)
}
