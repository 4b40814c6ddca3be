//! Request counters for the whole service.
//!
//! Recorded outside panic recovery, so requests that panicked, were rate
//! limited or were denied are counted too. Each instance owns its registry.

use anyhow::{Context, Result};
use axum::{
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::{sync::Arc, time::Instant};

use super::admission::AdmissionError;

#[derive(Clone, Debug)]
pub struct RequestMetrics {
    registry: Registry,
    requests_received: IntCounter,
    responses_sent: IntCounter,
    responses_by_status: IntCounterVec,
    processing_time_us: IntCounter,
}

impl RequestMetrics {
    /// # Errors
    /// Returns an error if a collector cannot be registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("maestro".to_string()), None)
            .context("Failed to create metrics registry")?;

        let requests_received = IntCounter::new(
            "http_requests_received_total",
            "Requests that entered the admission chain",
        )?;
        let responses_sent =
            IntCounter::new("http_responses_sent_total", "Responses written back")?;
        let responses_by_status = IntCounterVec::new(
            Opts::new(
                "http_responses_by_status_total",
                "Responses written back, by status code",
            ),
            &["status"],
        )?;
        let processing_time_us = IntCounter::new(
            "http_processing_time_microseconds_total",
            "Time spent producing responses",
        )?;

        registry.register(Box::new(requests_received.clone()))?;
        registry.register(Box::new(responses_sent.clone()))?;
        registry.register(Box::new(responses_by_status.clone()))?;
        registry.register(Box::new(processing_time_us.clone()))?;

        Ok(Self {
            registry,
            requests_received,
            responses_sent,
            responses_by_status,
            processing_time_us,
        })
    }

    /// Prometheus text exposition of every counter.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn render(&self) -> Result<String> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .context("Failed to encode metrics")
    }
}

pub async fn track_requests(
    State(metrics): State<Arc<RequestMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    metrics.requests_received.inc();

    let response = next.run(request).await;

    metrics.responses_sent.inc();
    metrics
        .responses_by_status
        .with_label_values(&[response.status().as_str()])
        .inc();
    metrics
        .processing_time_us
        .inc_by(u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX));

    response
}

/// `GET /metrics`
///
/// # Errors
/// Returns [`AdmissionError::Internal`] if the counters cannot be encoded.
pub async fn metrics(
    State(metrics): State<Arc<RequestMetrics>>,
) -> Result<Response, AdmissionError> {
    let body = metrics.render().map_err(AdmissionError::Internal)?;
    Ok((
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        body,
    )
        .into_response())
}
