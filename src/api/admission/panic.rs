//! Panic recovery, the outermost admission stage.
//!
//! A panic below this layer is logged with its payload and answered with the
//! generic `500` body plus `Connection: close`.
use anyhow::anyhow;
use axum::{
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use std::any::Any;
use tracing::error;

use super::error::AdmissionError;

/// Turn a panic anywhere below the recovery layer into an opaque 500 and close
/// the connection.
pub fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    error!(panic = detail, "request handler panicked");

    let mut response = AdmissionError::Internal(anyhow!("panic: {detail}")).into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}
