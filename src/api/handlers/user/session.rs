//! Session probes: who am I, and is step-up still fresh.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::instrument;

use serde::Serialize;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiReply};
use crate::api::handlers::auth::{
    principal::{require_auth, require_recent_auth},
    state::AuthState,
    storage,
    types::AccountBody,
};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionStateBody {
    pub user: AccountBody,
    pub settings: serde_json::Value,
}

#[utoipa::path(
    get,
    path = "/user/session",
    responses((status = 200, description = "The caller's public account state")),
    tag = "user",
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn fetch_session(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &pool, &state).await?;

    let settings = storage::account_settings(&pool, principal.account.id)
        .await?
        .map_or(Ok(serde_json::Value::Null), |raw| {
            serde_json::from_str(&raw)
        })
        .map_err(|err| ApiError::from(anyhow::Error::from(err)))?;

    let body = SessionStateBody {
        user: AccountBody::from(principal.account),
        settings,
    };

    Ok(
        ApiReply::new(StatusCode::OK, "Session fetched.", "session/success")
            .with_data(body)
            .into_response(),
    )
}

/// Liveness probe for step-up freshness. Succeeding here means a sensitive
/// operation started now would not be interrupted by a password prompt.
#[utoipa::path(
    get,
    path = "/user/reauth-status",
    responses(
        (status = 200, description = "Step-up is still fresh"),
        (status = 403, description = "Password re-entry required"),
    ),
    tag = "user",
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn reauth_status(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &pool, &state).await?;
    require_recent_auth(&pool, &state, &principal).await?;

    Ok(
        ApiReply::new(StatusCode::OK, "Re-authentication is fresh.", "reauth_status/success")
            .with_data(true)
            .into_response(),
    )
}
