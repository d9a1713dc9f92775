use anyhow::{Context, Result};
use clap::{Arg, Command};

pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_policy_args(command);
    with_outbox_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL used for password reset links")
                .env("HEARTH_FRONTEND_BASE_URL")
                .default_value("https://hearth.chat"),
        )
        .arg(
            Arg::new("token-secret")
                .long("token-secret")
                .help("Base64 secret used to sign auth tokens (decodes to at least 16 bytes)")
                .env("HEARTH_TOKEN_SECRET")
                .required(true),
        )
        .arg(
            Arg::new("reset-token-ttl-seconds")
                .long("reset-token-ttl-seconds")
                .help("Password reset token TTL in seconds")
                .env("HEARTH_RESET_TOKEN_TTL_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("otp-ttl-seconds")
                .long("otp-ttl-seconds")
                .help("One-time verification code TTL in seconds")
                .env("HEARTH_OTP_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("session-ttl-seconds")
                .long("session-ttl-seconds")
                .help("Session cookie TTL in seconds")
                .env("HEARTH_SESSION_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_policy_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("password-min-length")
                .long("password-min-length")
                .help("Minimum accepted password length")
                .env("HEARTH_PASSWORD_MIN_LENGTH")
                .default_value("8")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("reset-rate-limit")
                .long("reset-rate-limit")
                .help("Max password reset requests per client within the window")
                .env("HEARTH_RESET_RATE_LIMIT")
                .default_value("3")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("reset-rate-window-seconds")
                .long("reset-rate-window-seconds")
                .help("Rate limit window for password reset requests")
                .env("HEARTH_RESET_RATE_WINDOW_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_outbox_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("email-outbox-poll-seconds")
                .long("email-outbox-poll-seconds")
                .help("Email outbox poll interval in seconds")
                .env("HEARTH_EMAIL_OUTBOX_POLL_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("email-outbox-batch-size")
                .long("email-outbox-batch-size")
                .help("Email outbox batch size per poll")
                .env("HEARTH_EMAIL_OUTBOX_BATCH_SIZE")
                .default_value("10")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("email-outbox-max-attempts")
                .long("email-outbox-max-attempts")
                .help("Max attempts before marking an email as failed")
                .env("HEARTH_EMAIL_OUTBOX_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("email-outbox-backoff-base-seconds")
                .long("email-outbox-backoff-base-seconds")
                .help("Base delay for email outbox retry backoff")
                .env("HEARTH_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("email-outbox-backoff-max-seconds")
                .long("email-outbox-backoff-max-seconds")
                .help("Max delay for email outbox retry backoff")
                .env("HEARTH_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[derive(Debug, Clone, Copy)]
pub struct OutboxOptions {
    pub poll_seconds: u64,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub frontend_base_url: String,
    pub token_secret: String,
    pub reset_token_ttl_seconds: i64,
    pub otp_ttl_seconds: i64,
    pub session_ttl_seconds: i64,
    pub password_min_length: usize,
    pub reset_rate_limit: u32,
    pub reset_rate_window_seconds: u64,
    pub outbox: OutboxOptions,
}

impl Options {
    /// Collect auth-related options from parsed matches.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let get_string = |name: &str| -> Result<String> {
            matches
                .get_one::<String>(name)
                .cloned()
                .with_context(|| format!("missing required argument: --{name}"))
        };

        Ok(Self {
            frontend_base_url: get_string("frontend-base-url")?,
            token_secret: get_string("token-secret")?,
            reset_token_ttl_seconds: matches
                .get_one::<i64>("reset-token-ttl-seconds")
                .copied()
                .unwrap_or(1800),
            otp_ttl_seconds: matches
                .get_one::<i64>("otp-ttl-seconds")
                .copied()
                .unwrap_or(900),
            session_ttl_seconds: matches
                .get_one::<i64>("session-ttl-seconds")
                .copied()
                .unwrap_or(604_800),
            password_min_length: matches
                .get_one::<usize>("password-min-length")
                .copied()
                .unwrap_or(8),
            reset_rate_limit: matches
                .get_one::<u32>("reset-rate-limit")
                .copied()
                .unwrap_or(3),
            reset_rate_window_seconds: matches
                .get_one::<u64>("reset-rate-window-seconds")
                .copied()
                .unwrap_or(60),
            outbox: OutboxOptions {
                poll_seconds: matches
                    .get_one::<u64>("email-outbox-poll-seconds")
                    .copied()
                    .unwrap_or(5),
                batch_size: matches
                    .get_one::<usize>("email-outbox-batch-size")
                    .copied()
                    .unwrap_or(10),
                max_attempts: matches
                    .get_one::<u32>("email-outbox-max-attempts")
                    .copied()
                    .unwrap_or(5),
                backoff_base_seconds: matches
                    .get_one::<u64>("email-outbox-backoff-base-seconds")
                    .copied()
                    .unwrap_or(5),
                backoff_max_seconds: matches
                    .get_one::<u64>("email-outbox-backoff-max-seconds")
                    .copied()
                    .unwrap_or(300),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Options;

    #[test]
    fn options_parse_defaults() {
        temp_env::with_vars(
            [
                ("HEARTH_DSN", Some("postgres://localhost/hearth")),
                ("HEARTH_TOKEN_SECRET", Some("c2VjcmV0")),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["hearth"]);
                let options = Options::parse(&matches);
                assert!(options.is_ok());
                if let Ok(options) = options {
                    assert_eq!(options.frontend_base_url, "https://hearth.chat");
                    assert_eq!(options.reset_token_ttl_seconds, 1800);
                    assert_eq!(options.otp_ttl_seconds, 900);
                    assert_eq!(options.password_min_length, 8);
                    assert_eq!(options.reset_rate_limit, 3);
                    assert_eq!(options.reset_rate_window_seconds, 60);
                    assert_eq!(options.outbox.poll_seconds, 5);
                }
            },
        );
    }

    #[test]
    fn options_parse_overrides() {
        temp_env::with_vars(
            [
                ("HEARTH_DSN", Some("postgres://localhost/hearth")),
                ("HEARTH_TOKEN_SECRET", Some("c2VjcmV0")),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec![
                    "hearth",
                    "--password-min-length",
                    "12",
                    "--reset-rate-limit",
                    "5",
                    "--session-ttl-seconds",
                    "3600",
                ]);
                let options = Options::parse(&matches);
                assert!(options.is_ok());
                if let Ok(options) = options {
                    assert_eq!(options.password_min_length, 12);
                    assert_eq!(options.reset_rate_limit, 5);
                    assert_eq!(options.session_ttl_seconds, 3600);
                }
            },
        );
    }
}
