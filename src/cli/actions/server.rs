use crate::api;
use crate::cli::telemetry;
use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use std::sync::Arc;
use std::time::Duration;

const MIN_TOKEN_SECRET_BYTES: usize = 16;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub frontend_base_url: String,
    pub token_secret: String,
    pub reset_token_ttl_seconds: i64,
    pub otp_ttl_seconds: i64,
    pub session_ttl_seconds: i64,
    pub password_min_length: usize,
    pub reset_rate_limit: u32,
    pub reset_rate_window_seconds: u64,
    pub email_outbox_poll_seconds: u64,
    pub email_outbox_batch_size: usize,
    pub email_outbox_max_attempts: u32,
    pub email_outbox_backoff_base_seconds: u64,
    pub email_outbox_backoff_max_seconds: u64,
}

/// Decode the CLI/env token secret. Accepts standard or url-safe base64.
fn decode_token_secret(secret: &str) -> Result<Vec<u8>> {
    let trimmed = secret.trim();
    let decoded = STANDARD
        .decode(trimmed)
        .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed))
        .context("token secret is not valid base64")?;

    if decoded.len() < MIN_TOKEN_SECRET_BYTES {
        return Err(anyhow!(
            "token secret must decode to at least {MIN_TOKEN_SECRET_BYTES} bytes, got {}",
            decoded.len()
        ));
    }

    Ok(decoded)
}

/// Execute the server action.
/// # Errors
/// Returns an error if configuration is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let token_secret = decode_token_secret(&args.token_secret)?;

    let auth_config =
        api::handlers::auth::AuthConfig::new(args.frontend_base_url, token_secret)
            .with_reset_token_ttl_seconds(args.reset_token_ttl_seconds)
            .with_otp_ttl_seconds(args.otp_ttl_seconds)
            .with_session_ttl_seconds(args.session_ttl_seconds)
            .with_password_min_length(args.password_min_length);

    let limiter = Arc::new(api::handlers::auth::FixedWindowRateLimiter::new(
        args.reset_rate_limit,
        Duration::from_secs(args.reset_rate_window_seconds),
    ));

    let email_config = api::email::EmailWorkerConfig::new()
        .with_poll_interval_seconds(args.email_outbox_poll_seconds)
        .with_batch_size(args.email_outbox_batch_size)
        .with_max_attempts(args.email_outbox_max_attempts)
        .with_backoff_base_seconds(args.email_outbox_backoff_base_seconds)
        .with_backoff_max_seconds(args.email_outbox_backoff_max_seconds);

    let result = api::new(args.port, args.dsn, auth_config, limiter, email_config).await;

    // Flush batched spans before the process exits.
    telemetry::shutdown_tracer();

    result
}
