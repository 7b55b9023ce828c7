use clap::{Arg, ArgMatches, Command, builder::ValueParser};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";

/// Index is the verbosity count; `error` is what a bare run logs.
const LEVEL_NAMES: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// `ACCOUNTS_LOG_LEVEL` holds either a level name or its count.
fn parse_level(value: &str) -> Result<u8, String> {
    let value = value.trim().to_lowercase();
    if let Ok(count) = value.parse::<u8>()
        && usize::from(count) <= LEVEL_NAMES.len()
    {
        return Ok(count);
    }
    LEVEL_NAMES
        .iter()
        .position(|name| *name == value)
        .and_then(|index| u8::try_from(index).ok())
        .ok_or_else(|| format!("invalid log level, expected one of {}", LEVEL_NAMES.join(", ")))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("ACCOUNTS_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(ValueParser::new(parse_level)),
    )
}

/// Level chosen on the command line, or `None` to keep the default.
#[must_use]
pub fn level(matches: &ArgMatches) -> Option<Level> {
    match matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0) {
        0 => None,
        1 => Some(Level::WARN),
        2 => Some(Level::INFO),
        3 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}
