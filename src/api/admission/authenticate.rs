//! Bearer credential resolution.
//!
//! Runs after rate limiting on every request and always leaves an [`Identity`]
//! in the request extensions: the anonymous one when no `Authorization` header
//! is sent, the token owner otherwise. It never writes to the store.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use super::error::AdmissionError;
use crate::identity::{CredentialStore, Identity, Scope, StoreError, Token, token};

#[derive(Clone)]
pub struct AuthState {
    store: Arc<dyn CredentialStore>,
}

impl AuthState {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }
}

/// Attach the caller's [`Identity`] to the request.
///
/// A malformed header short-circuits with [`AdmissionError::InvalidCredential`],
/// an unknown or expired token with [`AdmissionError::InvalidOrExpiredCredential`]
/// and a store failure with [`AdmissionError::Internal`]. Either way the response
/// varies on `Authorization`.
pub async fn authenticate(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let identity = resolve_identity(request.headers(), state.store.as_ref()).await;

    let mut response = match identity {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    };

    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("authorization"));

    response
}

async fn resolve_identity(
    headers: &HeaderMap,
    store: &dyn CredentialStore,
) -> Result<Identity, AdmissionError> {
    let Some(plaintext) = bearer_credential(headers)? else {
        return Ok(Identity::Anonymous);
    };

    let hash = token::hash(plaintext);
    match store
        .find_user_for_token(&hash, Scope::Authentication, Utc::now())
        .await
    {
        Ok(user) => {
            debug!(user_id = user.id, "authenticated request");
            Ok(Identity::User(user))
        }
        Err(StoreError::NotFound) => Err(AdmissionError::InvalidOrExpiredCredential),
        Err(err) => Err(AdmissionError::Internal(
            anyhow::Error::new(err).context("failed to resolve authentication token"),
        )),
    }
}

/// `None` when no `Authorization` header is present.
///
/// A header that is present but not `Bearer <token>` with a well-formed token is
/// rejected outright.
fn bearer_credential(headers: &HeaderMap) -> Result<Option<&str>, AdmissionError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let value = value
        .to_str()
        .map_err(|_| AdmissionError::InvalidCredential)?
        .trim();
    let (scheme, credential) = value
        .split_once(' ')
        .ok_or(AdmissionError::InvalidCredential)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AdmissionError::InvalidCredential);
    }

    let credential = credential.trim();
    if credential.is_empty() || !Token::validate_plaintext(credential) {
        return Err(AdmissionError::InvalidCredential);
    }

    Ok(Some(credential))
}
