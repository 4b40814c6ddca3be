//! Command-line argument dispatch.
//!
//! Maps validated CLI arguments to an [`Action`] carrying the full server
//! configuration.

use crate::api::admission::cors;
use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{
    ARG_CORS_TRUSTED_ORIGINS, ARG_DB_TIMEOUT, ARG_DSN, ARG_PORT, ARG_TOKEN_SWEEP, limiter,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::time::Duration;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .filter(|dsn| !dsn.trim().is_empty())
        .context("missing required argument: --dsn")?;

    let db_timeout = matches
        .get_one::<u64>(ARG_DB_TIMEOUT)
        .copied()
        .map(Duration::from_secs)
        .context("missing required argument: --db-timeout")?;
    let token_sweep = matches
        .get_one::<u64>(ARG_TOKEN_SWEEP)
        .copied()
        .map(Duration::from_secs)
        .context("missing required argument: --token-sweep")?;

    let limiter = limiter::parse(matches).context("invalid rate limiter configuration")?;

    let cors_trusted_origins = matches
        .get_one::<String>(ARG_CORS_TRUSTED_ORIGINS)
        .map(String::as_str)
        .map(cors::parse_trusted_origins)
        .transpose()
        .context("invalid --cors-trusted-origins")?
        .unwrap_or_default();

    Ok(Action::Server(Args {
        port,
        dsn: SecretString::from(dsn),
        db_timeout,
        token_sweep,
        limiter,
        cors_trusted_origins,
    }))
}
