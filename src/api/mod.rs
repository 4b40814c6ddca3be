use anyhow::{Context, Result, bail};
use axum::{
    Extension, Json, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware,
    routing::get,
};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, task::JoinHandle};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, debug, info, info_span, warn};
use ulid::Ulid;

use crate::identity::{CredentialStore, PgStore};

pub mod admission;
pub mod handlers;
pub mod metrics;
mod openapi;

pub use openapi::openapi;

use admission::{AdmissionState, RateLimitConfig, RateLimiter};
use handlers::{health, me};
use metrics::RequestMetrics;

/// Everything the server needs at startup.
#[derive(Debug)]
pub struct Config {
    pub port: u16,
    pub dsn: SecretString,
    /// Upper bound for every credential store statement.
    pub db_timeout: Duration,
    pub limiter: RateLimitConfig,
    /// How often expired tokens are deleted.
    pub token_sweep: Duration,
    /// Browser origins allowed to call the API cross-origin.
    pub cors_trusted_origins: Vec<HeaderValue>,
}

impl Config {
    /// # Errors
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.db_timeout.is_zero() {
            bail!("database timeout must be greater than 0");
        }
        if self.token_sweep.is_zero() {
            bail!("token sweep interval must be greater than 0");
        }
        self.limiter.validate()
    }
}

/// Application routes with their per-route guards, wrapped in the admission chain.
#[must_use]
pub fn router(admission: &AdmissionState) -> Router {
    let routes = Router::new()
        .route("/health", get(health::health))
        .route("/openapi.json", get(|| async { Json(openapi()) }))
        .route(
            "/metrics",
            get(metrics::metrics).with_state(admission.metrics().clone()),
        )
        .route(
            "/v1/healthcheck",
            get(health::healthcheck).route_layer(middleware::from_fn_with_state(
                admission.require_permission("admin"),
                admission::require_permission,
            )),
        )
        .route(
            "/v1/me",
            get(me::get_me).route_layer(middleware::from_fn(admission::require_activated_user)),
        );

    admission.wrap(routes)
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(config: Config) -> Result<()> {
    config.validate()?;

    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .acquire_timeout(config.db_timeout)
        .test_before_acquire(true)
        .connect(config.dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    let store = Arc::new(PgStore::new(pool.clone()).with_query_timeout(config.db_timeout));
    let limiter = Arc::new(
        RateLimiter::new(config.limiter).context("Invalid rate limiter configuration")?,
    );

    let _limiter_sweeper = limiter.spawn_sweeper();
    let _token_sweeper = spawn_token_sweeper(store.clone(), config.token_sweep);

    let metrics = Arc::new(RequestMetrics::new()?);
    let admission = AdmissionState::new(limiter.clone(), store.clone(), store, metrics)
        .with_trusted_origins(config.cors_trusted_origins);

    let app = router(&admission).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(Extension(limiter))
            .layer(Extension(pool)),
    );

    let listener = TcpListener::bind(format!("::0:{}", config.port)).await?;

    info!("Listening on [::]:{}", config.port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

/// Delete expired tokens every `period`. Failures are logged and retried on the
/// next tick.
pub fn spawn_token_sweeper(store: Arc<dyn CredentialStore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match store.delete_expired_tokens(Utc::now()).await {
                Ok(0) => {}
                Ok(deleted) => debug!(deleted, "deleted expired tokens"),
                Err(err) => warn!("Failed to delete expired tokens: {err}"),
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
