//! Cross-origin access for browser clients.
//!
//! Only origins listed at startup receive `Access-Control-Allow-Origin`.
//! Preflight requests are answered here, before the rate limiter and
//! authentication run.

use anyhow::{Context, Result, anyhow};
use axum::http::{
    HeaderValue, Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use url::Url;

/// Normalize a configured origin to `scheme://host[:port]`.
///
/// # Errors
/// Returns an error if the value is not an absolute URL with a host.
pub fn trusted_origin(origin: &str) -> Result<HeaderValue> {
    let parsed =
        Url::parse(origin).with_context(|| format!("Invalid trusted CORS origin: {origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Trusted CORS origin must include a host: {origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build trusted origin header")
}

/// Split a whitespace or comma separated list of origins.
///
/// # Errors
/// Returns the first origin that fails [`trusted_origin`].
pub fn parse_trusted_origins(value: &str) -> Result<Vec<HeaderValue>> {
    value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|origin| !origin.is_empty())
        .map(trusted_origin)
        .collect()
}

/// With no origins every cross-origin request goes without the allow header.
#[must_use]
pub fn cors_layer(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(AllowOrigin::list(origins))
}
