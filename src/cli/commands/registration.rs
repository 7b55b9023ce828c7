use clap::{Arg, Command, builder::BoolishValueParser};

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_registration_args(command);
    with_mfa_args(command)
}

/// A flag that may be given bare (`--flag`), with a value, or through its
/// environment variable.
fn switch(name: &'static str, env: &'static str, default: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .env(env)
        .num_args(0..=1)
        .require_equals(true)
        .default_value(default)
        .default_missing_value("true")
        .value_parser(BoolishValueParser::new())
}

fn with_registration_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("redirect-base-url")
                .long("redirect-base-url")
                .help("Trusted base URL every post-login and post-register redirect must stay under")
                .env("ACCOUNTS_REDIRECT_BASE_URL")
                .required(true),
        )
        .arg(
            switch(
                "enable-registration",
                "ACCOUNTS_ENABLE_REGISTRATION",
                "true",
            )
            .help("Accept new registrations"),
        )
        .arg(
            Arg::new("attribute-service-url")
                .long("attribute-service-url")
                .help("Attribute service base URL; attributes are only logged when unset")
                .env("ACCOUNTS_ATTRIBUTE_SERVICE_URL"),
        )
}

fn with_mfa_args(command: Command) -> Command {
    command
        .arg(
            switch("mfa-enabled", "ACCOUNTS_MFA_ENABLED", "false")
                .help("Verify a phone number with an SMS code at registration and login"),
        )
        .arg(
            Arg::new("mfa-code-ttl-seconds")
                .long("mfa-code-ttl-seconds")
                .help("Lifetime of an SMS code in seconds")
                .env("ACCOUNTS_MFA_CODE_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("mfa-max-attempts")
                .long("mfa-max-attempts")
                .help("Wrong codes accepted before the code is locked")
                .env("ACCOUNTS_MFA_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
}
