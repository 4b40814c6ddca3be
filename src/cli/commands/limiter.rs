use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::time::Duration;

use crate::api::admission::RateLimitConfig;

pub const ARG_LIMITER_ENABLED: &str = "limiter-enabled";
pub const ARG_LIMITER_RPS: &str = "limiter-rps";
pub const ARG_LIMITER_BURST: &str = "limiter-burst";
pub const ARG_LIMITER_IDLE: &str = "limiter-idle";
pub const ARG_LIMITER_SWEEP: &str = "limiter-sweep";
pub const ARG_TRUST_PROXY_HEADERS: &str = "trust-proxy-headers";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LIMITER_ENABLED)
                .long(ARG_LIMITER_ENABLED)
                .help("Enable the per-client rate limiter")
                .env("MAESTRO_LIMITER_ENABLED")
                .default_value("true")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_LIMITER_RPS)
                .long(ARG_LIMITER_RPS)
                .help("Requests per second refilled into each client bucket")
                .env("MAESTRO_LIMITER_RPS")
                .default_value("2")
                .value_parser(clap::value_parser!(f64)),
        )
        .arg(
            Arg::new(ARG_LIMITER_BURST)
                .long(ARG_LIMITER_BURST)
                .help("Maximum burst per client")
                .env("MAESTRO_LIMITER_BURST")
                .default_value("4")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_LIMITER_IDLE)
                .long(ARG_LIMITER_IDLE)
                .help("Seconds a client may stay idle before its bucket is evicted")
                .env("MAESTRO_LIMITER_IDLE")
                .default_value("180")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_LIMITER_SWEEP)
                .long(ARG_LIMITER_SWEEP)
                .help("Seconds between idle bucket sweeps")
                .env("MAESTRO_LIMITER_SWEEP")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_TRUST_PROXY_HEADERS)
                .long(ARG_TRUST_PROXY_HEADERS)
                .help("Key clients by X-Forwarded-For / X-Real-IP (only behind a trusted proxy)")
                .env("MAESTRO_TRUST_PROXY_HEADERS")
                .default_value("false")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(bool)),
        )
}

/// Build the rate limiter configuration from matches.
///
/// # Errors
/// Returns an error if an argument is missing or the resulting configuration is invalid.
pub fn parse(matches: &ArgMatches) -> Result<RateLimitConfig> {
    let seconds = |id: &str| -> Result<Duration> {
        matches
            .get_one::<u64>(id)
            .copied()
            .map(Duration::from_secs)
            .with_context(|| format!("missing required argument: --{id}"))
    };

    let config = RateLimitConfig {
        enabled: matches
            .get_one::<bool>(ARG_LIMITER_ENABLED)
            .copied()
            .unwrap_or(true),
        requests_per_second: matches
            .get_one::<f64>(ARG_LIMITER_RPS)
            .copied()
            .with_context(|| format!("missing required argument: --{ARG_LIMITER_RPS}"))?,
        burst: matches
            .get_one::<u32>(ARG_LIMITER_BURST)
            .copied()
            .with_context(|| format!("missing required argument: --{ARG_LIMITER_BURST}"))?,
        idle_timeout: seconds(ARG_LIMITER_IDLE)?,
        sweep_interval: seconds(ARG_LIMITER_SWEEP)?,
        trust_proxy_headers: matches
            .get_one::<bool>(ARG_TRUST_PROXY_HEADERS)
            .copied()
            .unwrap_or(false),
    };

    config.validate()?;

    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const VARS: [&str; 6] = [
        "MAESTRO_LIMITER_ENABLED",
        "MAESTRO_LIMITER_RPS",
        "MAESTRO_LIMITER_BURST",
        "MAESTRO_LIMITER_IDLE",
        "MAESTRO_LIMITER_SWEEP",
        "MAESTRO_TRUST_PROXY_HEADERS",
    ];

    fn parse_from(args: &[&str]) -> Result<RateLimitConfig> {
        let matches = with_args(Command::new("maestro")).try_get_matches_from(args)?;
        parse(&matches)
    }

    #[test]
    fn defaults() {
        temp_env::with_vars(VARS.map(|var| (var, None::<&str>)), || {
            let config = parse_from(&["maestro"]).unwrap();
            assert!(config.enabled);
            assert!((config.requests_per_second - 2.0).abs() < f64::EPSILON);
            assert_eq!(config.burst, 4);
            assert_eq!(config.idle_timeout, Duration::from_secs(180));
            assert_eq!(config.sweep_interval, Duration::from_secs(60));
            assert!(!config.trust_proxy_headers);
        });
    }

    #[test]
    fn from_env() {
        temp_env::with_vars(
            [
                ("MAESTRO_LIMITER_ENABLED", Some("false")),
                ("MAESTRO_LIMITER_RPS", Some("10")),
                ("MAESTRO_LIMITER_BURST", Some("20")),
                ("MAESTRO_TRUST_PROXY_HEADERS", Some("true")),
            ],
            || {
                let config = parse_from(&["maestro"]).unwrap();
                assert!(!config.enabled);
                assert!((config.requests_per_second - 10.0).abs() < f64::EPSILON);
                assert_eq!(config.burst, 20);
                assert!(config.trust_proxy_headers);
            },
        );
    }

    #[test]
    fn rejects_zero_burst() {
        temp_env::with_vars(VARS.map(|var| (var, None::<&str>)), || {
            let result = parse_from(&["maestro", "--limiter-burst", "0"]);
            assert!(result.is_err());
        });
    }

    #[test]
    fn rejects_zero_sweep_interval() {
        temp_env::with_vars(VARS.map(|var| (var, None::<&str>)), || {
            let result = parse_from(&["maestro", "--limiter-sweep", "0"]);
            assert!(result.is_err());
        });
    }
}
