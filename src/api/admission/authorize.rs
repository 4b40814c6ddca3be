//! Per-route guards over the attached [`Identity`].
//!
//! The checks are plain functions taking the identity explicitly; the
//! middleware wrappers only pull it out of the request extensions and run the
//! wrapped handler once on success.

use anyhow::anyhow;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

use super::error::AdmissionError;
use crate::identity::{Identity, PermissionResolver, User};

/// # Errors
/// Returns [`AdmissionError::Unauthenticated`] for the anonymous identity.
pub fn ensure_authenticated(identity: &Identity) -> Result<&User, AdmissionError> {
    identity.user().ok_or(AdmissionError::Unauthenticated)
}

/// # Errors
/// Returns [`AdmissionError::Unauthenticated`] or [`AdmissionError::NotActivated`].
pub fn ensure_activated(identity: &Identity) -> Result<&User, AdmissionError> {
    let user = ensure_authenticated(identity)?;
    if user.activated {
        Ok(user)
    } else {
        Err(AdmissionError::NotActivated)
    }
}

/// Activation check followed by a fresh permission lookup.
///
/// # Errors
/// Returns the activation failures, [`AdmissionError::MissingPermission`] when
/// `code` is not granted, or [`AdmissionError::Internal`] when the resolver fails.
pub async fn ensure_permission<'a>(
    identity: &'a Identity,
    code: &str,
    resolver: &dyn PermissionResolver,
) -> Result<&'a User, AdmissionError> {
    let user = ensure_activated(identity)?;
    let permissions = resolver
        .permissions_for_user(user.id)
        .await
        .map_err(|err| {
            AdmissionError::Internal(anyhow::Error::new(err).context("failed to resolve permissions"))
        })?;

    if permissions.includes(code) {
        Ok(user)
    } else {
        debug!(user_id = user.id, permission = code, "permission denied");
        Err(AdmissionError::MissingPermission(code.to_string()))
    }
}

/// State for [`require_permission`]: the code a route needs and where to look it up.
#[derive(Clone)]
pub struct PermissionGuard {
    code: Arc<str>,
    resolver: Arc<dyn PermissionResolver>,
}

impl PermissionGuard {
    #[must_use]
    pub fn new(code: &str, resolver: Arc<dyn PermissionResolver>) -> Self {
        Self {
            code: Arc::from(code),
            resolver,
        }
    }
}

/// # Errors
/// Returns the [`ensure_authenticated`] failure.
pub async fn require_authenticated_user(
    request: Request,
    next: Next,
) -> Result<Response, AdmissionError> {
    ensure_authenticated(attached_identity(&request)?)?;
    Ok(next.run(request).await)
}

/// # Errors
/// Returns the [`ensure_activated`] failures.
pub async fn require_activated_user(
    request: Request,
    next: Next,
) -> Result<Response, AdmissionError> {
    ensure_activated(attached_identity(&request)?)?;
    Ok(next.run(request).await)
}

/// # Errors
/// Returns the [`ensure_permission`] failures.
pub async fn require_permission(
    State(guard): State<PermissionGuard>,
    request: Request,
    next: Next,
) -> Result<Response, AdmissionError> {
    let identity = attached_identity(&request)?.clone();
    ensure_permission(&identity, &guard.code, guard.resolver.as_ref()).await?;
    Ok(next.run(request).await)
}

/// A guard mounted without the authentication layer in front of it denies.
fn attached_identity(request: &Request) -> Result<&Identity, AdmissionError> {
    request
        .extensions()
        .get::<Identity>()
        .ok_or_else(|| AdmissionError::Internal(anyhow!("no identity attached to request")))
}
