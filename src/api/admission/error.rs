//! Failure kinds produced by the admission chain and their HTTP rendering.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

const INTERNAL_MESSAGE: &str = "the server encountered a problem and could not process your request";

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("invalid authentication credential")]
    InvalidCredential,
    #[error("invalid or expired authentication credential")]
    InvalidOrExpiredCredential,
    #[error("you must be authenticated to access this resource")]
    Unauthenticated,
    #[error("your user account must be activated to access this resource")]
    NotActivated,
    #[error("your user account doesn't have the necessary permissions to access this resource")]
    MissingPermission(String),
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("internal error: {0:#}")]
    Internal(#[source] anyhow::Error),
}

/// JSON body for every admission failure.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable code.
    pub code: String,
    pub message: String,
}

impl AdmissionError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredential => "invalid_credential",
            Self::InvalidOrExpiredCredential => "invalid_or_expired_credential",
            Self::Unauthenticated => "unauthenticated",
            Self::NotActivated => "not_activated",
            Self::MissingPermission(_) => "missing_permission",
            Self::RateLimited => "rate_limited",
            Self::Internal(_) => "internal_error",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredential | Self::InvalidOrExpiredCredential | Self::Unauthenticated => {
                StatusCode::UNAUTHORIZED
            }
            Self::NotActivated | Self::MissingPermission(_) => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(err) => {
                error!("admission failed: {err:#}");
                INTERNAL_MESSAGE.to_string()
            }
            other => other.to_string(),
        };

        let mut response = (
            status,
            Json(ErrorBody {
                code: self.code().to_string(),
                message,
            }),
        )
            .into_response();

        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        response
    }
}
