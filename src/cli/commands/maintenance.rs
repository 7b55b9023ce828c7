use clap::{Arg, Command};

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("token-expiration-seconds")
                .long("token-expiration-seconds")
                .help("Age after which unreferenced handoff tokens are reclaimed")
                .env("ACCOUNTS_TOKEN_EXPIRATION_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("flow-idle-seconds")
                .long("flow-idle-seconds")
                .help("Idle time after which registration and login flows are dropped")
                .env("ACCOUNTS_FLOW_IDLE_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("sweep-interval-seconds")
                .long("sweep-interval-seconds")
                .help("How often expired tokens and idle flows are swept")
                .env("ACCOUNTS_SWEEP_INTERVAL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}
