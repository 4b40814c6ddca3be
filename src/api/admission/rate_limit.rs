//! Per-client token bucket admission gate.
//!
//! Keyed by client address only, so anonymous and pre-authentication traffic is
//! throttled too. The whole client table sits behind one async mutex: refill and
//! consume for a key happen under the same guard, which is also what the
//! eviction sweep takes.

use anyhow::{Result, bail};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{Arc, Weak},
    time::{Duration, Instant},
};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, warn};

use super::{
    clock::{Clock, SystemClock},
    error::AdmissionError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Tokens added back per second.
    pub requests_per_second: f64,
    /// Bucket capacity; a new client starts full.
    pub burst: u32,
    /// Entries not seen for longer than this are dropped by the sweep.
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    /// Key clients by `X-Forwarded-For` / `X-Real-IP` instead of the peer address.
    pub trust_proxy_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 2.0,
            burst: 4,
            idle_timeout: Duration::from_secs(180),
            sweep_interval: Duration::from_secs(60),
            trust_proxy_headers: false,
        }
    }
}

impl RateLimitConfig {
    /// # Errors
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if !(self.requests_per_second.is_finite() && self.requests_per_second > 0.0) {
            bail!("rate limiter requests per second must be greater than 0");
        }
        if self.burst == 0 {
            bail!("rate limiter burst must be at least 1");
        }
        if self.idle_timeout.is_zero() {
            bail!("rate limiter idle timeout must be greater than 0");
        }
        if self.sweep_interval.is_zero() {
            bail!("rate limiter sweep interval must be greater than 0");
        }
        Ok(())
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, rate: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            capacity,
            rate,
            last_refill: now,
        }
    }

    fn try_consume(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct Client {
    bucket: TokenBucket,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    clients: Mutex<HashMap<IpAddr, Client>>,
}

impl RateLimiter {
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            clients: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Take one token from the bucket for `client`, creating it full on first sight.
    pub async fn check(&self, client: IpAddr) -> RateLimitDecision {
        if !self.config.enabled {
            return RateLimitDecision::Allowed;
        }

        let mut clients = self.clients.lock().await;
        let now = self.clock.now();
        let entry = clients.entry(client).or_insert_with(|| Client {
            bucket: TokenBucket::full(
                f64::from(self.config.burst),
                self.config.requests_per_second,
                now,
            ),
            last_seen: now,
        });
        entry.last_seen = now;

        if entry.bucket.try_consume(now) {
            RateLimitDecision::Allowed
        } else {
            RateLimitDecision::Limited
        }
    }

    /// Drop clients idle for longer than the configured threshold; returns how many.
    pub async fn sweep(&self) -> usize {
        let mut clients = self.clients.lock().await;
        let now = self.clock.now();
        let before = clients.len();
        clients.retain(|_, client| {
            now.saturating_duration_since(client.last_seen) <= self.config.idle_timeout
        });
        before - clients.len()
    }

    pub async fn tracked_clients(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Run [`RateLimiter::sweep`] every `sweep_interval` until the limiter is dropped.
    ///
    /// Returns `None` when limiting is disabled, since no entries are ever created.
    pub fn spawn_sweeper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            return None;
        }

        let limiter: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval;
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let evicted = limiter.sweep().await;
                if evicted > 0 {
                    debug!(evicted, "rate limiter evicted idle clients");
                }
            }
        }))
    }
}

/// Reject the request before any other stage runs when the client's bucket is empty.
///
/// # Errors
/// Returns [`AdmissionError::RateLimited`] when the client has no tokens left.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, AdmissionError> {
    let client = client_address(&request, limiter.config().trust_proxy_headers);

    match limiter.check(client).await {
        RateLimitDecision::Allowed => Ok(next.run(request).await),
        RateLimitDecision::Limited => {
            warn!(%client, "rate limit exceeded");
            Err(AdmissionError::RateLimited)
        }
    }
}

fn client_address(request: &Request, trust_proxy_headers: bool) -> IpAddr {
    if trust_proxy_headers {
        if let Some(ip) = forwarded_address(request.headers()) {
            return ip;
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(
            || {
                debug!("client address unavailable, using shared bucket");
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            },
            |ConnectInfo(addr)| addr.ip(),
        )
}

/// First `X-Forwarded-For` entry, then `X-Real-IP`.
fn forwarded_address(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|value| value.trim().parse().ok());
    if forwarded.is_some() {
        return forwarded;
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}
