use crate::cli::actions::{Action, server::Args};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --dsn")?;
    let redirect_base_url = matches
        .get_one::<String>("redirect-base-url")
        .cloned()
        .context("missing required argument: --redirect-base-url")?;

    Ok(Action::Server(Args {
        port,
        dsn,
        redirect_base_url,
        enable_registration: matches
            .get_one::<bool>("enable-registration")
            .copied()
            .unwrap_or(true),
        attribute_service_url: matches.get_one::<String>("attribute-service-url").cloned(),
        mfa_enabled: matches
            .get_one::<bool>("mfa-enabled")
            .copied()
            .unwrap_or(false),
        mfa_code_ttl_seconds: matches
            .get_one::<u64>("mfa-code-ttl-seconds")
            .copied()
            .unwrap_or(900),
        mfa_max_attempts: matches
            .get_one::<u32>("mfa-max-attempts")
            .copied()
            .unwrap_or(5),
        token_expiration_seconds: matches
            .get_one::<i64>("token-expiration-seconds")
            .copied()
            .unwrap_or(3600),
        flow_idle_seconds: matches
            .get_one::<u64>("flow-idle-seconds")
            .copied()
            .unwrap_or(1800),
        sweep_interval_seconds: matches
            .get_one::<u64>("sweep-interval-seconds")
            .copied()
            .unwrap_or(300),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn builds_server_action() {
        temp_env::with_vars(
            [
                ("ACCOUNTS_ENABLE_REGISTRATION", None::<&str>),
                ("ACCOUNTS_FLOW_IDLE_SECONDS", None),
                ("ACCOUNTS_ATTRIBUTE_SERVICE_URL", None),
            ],
            || {
                let matches = commands::new().get_matches_from(vec![
                    "accounts",
                    "--port",
                    "9090",
                    "--dsn",
                    "postgres://accounts@localhost/accounts",
                    "--redirect-base-url",
                    "https://accounts.example.com",
                    "--mfa-enabled",
                    "--token-expiration-seconds",
                    "120",
                ]);

                let Ok(Action::Server(args)) = handler(&matches) else {
                    panic!("expected a server action");
                };
                assert_eq!(args.port, 9090);
                assert_eq!(args.redirect_base_url, "https://accounts.example.com");
                assert!(args.enable_registration);
                assert!(args.mfa_enabled);
                assert_eq!(args.token_expiration_seconds, 120);
                assert_eq!(args.flow_idle_seconds, 1800);
                assert!(args.attribute_service_url.is_none());
            },
        );
    }
}
