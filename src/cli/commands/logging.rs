//! `-v` / `MAESTRO_LOG_LEVEL` and the tracing level it selects.

use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";

const LEVELS: [Level; 5] = [
    Level::ERROR,
    Level::WARN,
    Level::INFO,
    Level::DEBUG,
    Level::TRACE,
];

/// Accepts a level name or its index in `error..=trace`.
fn parse_log_level(value: &str) -> Result<u8, String> {
    if let Ok(index) = value.parse::<u8>() {
        if usize::from(index) < LEVELS.len() {
            return Ok(index);
        }
        return Err(format!("log level index must be below {}", LEVELS.len()));
    }

    LEVELS
        .iter()
        .position(|level| level.as_str().eq_ignore_ascii_case(value))
        .and_then(|index| u8::try_from(index).ok())
        .ok_or_else(|| {
            format!("unknown log level `{value}`, expected error, warn, info, debug or trace")
        })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Repeat to log more (-v warn, -vv info, -vvv debug, -vvvv trace), default: error")
            .env("MAESTRO_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(parse_log_level),
    )
}

/// Level selected on the command line; anything past `trace` saturates.
#[must_use]
pub fn level(matches: &ArgMatches) -> Level {
    let index = matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0);
    LEVELS[usize::from(index).min(LEVELS.len() - 1)]
}
