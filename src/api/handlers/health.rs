//! Database-aware health probe.

use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use tokio::time::{timeout, Duration};
use tracing::{debug, warn, Instrument};
use utoipa::ToSchema;

const HEALTH_DB_TIMEOUT_SECONDS: u64 = 2;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    name: String,
    version: String,
    database: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Database connection is healthy", body = Health),
        (status = 503, description = "Database connection is unhealthy", body = Health)
    ),
    tag = "health",
)]
pub async fn health(Extension(pool): Extension<PgPool>) -> impl IntoResponse {
    let db_healthy = probe_database(&pool).await;

    let health = Health {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if db_healthy {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) = format!("{}:{}", health.name, health.version).parse::<HeaderValue>() {
        headers.insert("X-App", value);
    }

    let status = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, headers, Json(health))
}

async fn probe_database(pool: &PgPool) -> bool {
    let acquire_span = tracing::info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );

    let probe = async {
        match pool.acquire().instrument(acquire_span).await {
            Ok(mut conn) => {
                let ping_span =
                    tracing::info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
                match conn.ping().instrument(ping_span).await {
                    Ok(()) => true,
                    Err(error) => {
                        warn!("Database ping failed: {}", error);
                        false
                    }
                }
            }
            Err(error) => {
                warn!("Failed to acquire database connection: {}", error);
                false
            }
        }
    };

    match timeout(Duration::from_secs(HEALTH_DB_TIMEOUT_SECONDS), probe).await {
        Ok(healthy) => healthy,
        Err(_) => {
            debug!("Database health probe timed out");
            false
        }
    }
}
