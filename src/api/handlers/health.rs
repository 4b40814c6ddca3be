use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use std::sync::Arc;
use tracing::{Instrument, debug, error, info_span};
use utoipa::ToSchema;

use crate::{GIT_COMMIT_HASH, api::admission::RateLimiter};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LimiterStatus {
    enabled: bool,
    tracked_clients: usize,
}

/// Operator view: service health plus rate limiter occupancy.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Healthcheck {
    #[serde(flatten)]
    health: Health,
    rate_limiter: LimiterStatus,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Database is reachable", body = Health),
        (status = 503, description = "Database is unreachable", body = Health)
    ),
    tag = "health"
)]
// axum handler for health
pub async fn health(pool: Extension<PgPool>) -> impl IntoResponse {
    let (status, health) = check_database(&pool).await;
    (status, app_header(&health), Json(health))
}

#[utoipa::path(
    get,
    path = "/v1/healthcheck",
    responses(
        (status = 200, description = "Service and rate limiter status", body = Healthcheck),
        (status = 401, description = "Missing, malformed or expired credential", body = crate::api::admission::ErrorBody),
        (status = 403, description = "Caller lacks the admin permission", body = crate::api::admission::ErrorBody),
        (status = 503, description = "Database is unreachable", body = Healthcheck)
    ),
    security(("bearer" = [])),
    tag = "health"
)]
pub async fn healthcheck(
    pool: Extension<PgPool>,
    limiter: Extension<Arc<RateLimiter>>,
) -> impl IntoResponse {
    let (status, health) = check_database(&pool).await;
    let headers = app_header(&health);
    let body = Healthcheck {
        health,
        rate_limiter: LimiterStatus {
            enabled: limiter.config().enabled,
            tracked_clients: limiter.tracked_clients().await,
        },
    };
    (status, headers, Json(body))
}

async fn check_database(pool: &PgPool) -> (StatusCode, Health) {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    let result = match pool.acquire().instrument(acquire_span).await {
        Ok(mut conn) => {
            let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
            conn.ping().instrument(ping_span).await.map_err(|error| {
                error!("Failed to ping database: {}", error);
            })
        }
        Err(error) => {
            error!("Failed to acquire database connection: {}", error);
            Err(())
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if result.is_ok() { "ok" } else { "error" }.to_string(),
    };

    if result.is_ok() {
        debug!("Database connection is healthy");
        (StatusCode::OK, health)
    } else {
        debug!("Database connection is unhealthy");
        (StatusCode::SERVICE_UNAVAILABLE, health)
    }
}

/// `X-App: name:version:short-commit`
fn app_header(health: &Health) -> HeaderMap {
    let short_hash = if health.commit.len() > 7 {
        health.commit.get(..7).unwrap_or_default()
    } else {
        ""
    };
    let mut headers = HeaderMap::new();
    match format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>() {
        Ok(value) => {
            headers.insert("x-app", value);
        }
        Err(err) => error!("Failed to parse X-App header: {}", err),
    }
    headers
}
