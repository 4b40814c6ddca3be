use crate::api::{self, admission::RateLimitConfig};
use anyhow::Result;
use axum::http::HeaderValue;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub db_timeout: Duration,
    pub token_sweep: Duration,
    pub limiter: RateLimitConfig,
    pub cors_trusted_origins: Vec<HeaderValue>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    api::new(api::Config {
        port: args.port,
        dsn: args.dsn,
        db_timeout: args.db_timeout,
        limiter: args.limiter,
        token_sweep: args.token_sweep,
        cors_trusted_origins: args.cors_trusted_origins,
    })
    .await
}

fn startup_entries(args: &Args) -> Vec<(&'static str, String)> {
    vec![
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(args.dsn.expose_secret())),
        ("db_timeout", format!("{}s", args.db_timeout.as_secs())),
        ("token_sweep", format!("{}s", args.token_sweep.as_secs())),
        ("limiter_enabled", args.limiter.enabled.to_string()),
        (
            "limiter_rate",
            format!(
                "{}/s burst {}",
                args.limiter.requests_per_second, args.limiter.burst
            ),
        ),
        (
            "limiter_idle",
            format!("{}s", args.limiter.idle_timeout.as_secs()),
        ),
        (
            "limiter_sweep",
            format!("{}s", args.limiter.sweep_interval.as_secs()),
        ),
        (
            "trust_proxy_headers",
            args.limiter.trust_proxy_headers.to_string(),
        ),
        ("cors_trusted_origins", trusted_origins(&args.cors_trusted_origins)),
    ]
}

fn trusted_origins(origins: &[HeaderValue]) -> String {
    if origins.is_empty() {
        return "none".to_string();
    }
    origins
        .iter()
        .filter_map(|origin| origin.to_str().ok())
        .collect::<Vec<_>>()
        .join(" ")
}

fn log_startup_args(args: &Args) {
    let entries = startup_entries(args);
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "maestro {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed.get(..7).unwrap_or(trimmed)
    } else {
        trimmed
    }
}
