//! Request admission chain.
//!
//! Order per request, outermost first:
//! - request metrics count every request and the status it ended with.
//! - `panic` converts a fault in any later stage into an opaque 500.
//! - `cors` answers preflights and tags responses for trusted origins.
//! - `rate_limit` rejects clients that exhausted their token bucket.
//! - `authenticate` resolves the bearer credential into an [`Identity`].
//! - `authorize` guards run per route, right before the handler.
//!
//! Each stage short-circuits, so a rejected request never pays for the next one.
//!
//! [`Identity`]: crate::identity::Identity

pub mod authenticate;
pub mod authorize;
pub mod clock;
pub mod cors;
pub mod error;
pub mod panic;
pub mod rate_limit;


use axum::{Router, http::HeaderValue, middleware};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer};

use crate::api::metrics::{self, RequestMetrics};
use crate::identity::{CredentialStore, PermissionResolver};

pub use authenticate::{AuthState, authenticate};
pub use authorize::{
    PermissionGuard, ensure_activated, ensure_authenticated, ensure_permission,
    require_activated_user, require_authenticated_user, require_permission,
};
pub use error::{AdmissionError, ErrorBody};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimiter};

/// Shared collaborators of the admission chain.
#[derive(Clone)]
pub struct AdmissionState {
    limiter: Arc<RateLimiter>,
    store: Arc<dyn CredentialStore>,
    permissions: Arc<dyn PermissionResolver>,
    metrics: Arc<RequestMetrics>,
    cors: CorsLayer,
}

impl AdmissionState {
    #[must_use]
    pub fn new(
        limiter: Arc<RateLimiter>,
        store: Arc<dyn CredentialStore>,
        permissions: Arc<dyn PermissionResolver>,
        metrics: Arc<RequestMetrics>,
    ) -> Self {
        Self {
            limiter,
            store,
            permissions,
            metrics,
            cors: cors::cors_layer(Vec::new()),
        }
    }

    /// Allow cross-origin browser requests from `origins`.
    #[must_use]
    pub fn with_trusted_origins(mut self, origins: Vec<HeaderValue>) -> Self {
        self.cors = cors::cors_layer(origins);
        self
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<RequestMetrics> {
        &self.metrics
    }

    /// Guard state for a route that needs `code`; mount with
    /// `middleware::from_fn_with_state(guard, require_permission)`.
    #[must_use]
    pub fn require_permission(&self, code: &str) -> PermissionGuard {
        PermissionGuard::new(code, self.permissions.clone())
    }

    /// Wrap every route registered so far in request metrics, panic recovery,
    /// CORS, rate limiting and authentication. Per-route guards must already be
    /// attached with `route_layer`.
    pub fn wrap<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(
                    self.metrics.clone(),
                    metrics::track_requests,
                ))
                .layer(CatchPanicLayer::custom(panic::handle_panic))
                .layer(self.cors.clone())
                .layer(middleware::from_fn_with_state(
                    self.limiter.clone(),
                    rate_limit::rate_limit,
                ))
                .layer(middleware::from_fn_with_state(
                    AuthState::new(self.store.clone()),
                    authenticate,
                )),
        )
    }
}
