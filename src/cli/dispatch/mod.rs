//! Command-line argument dispatch and server initialization.
//!
//! This module takes validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::auth;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url: auth_opts.frontend_base_url,
        token_secret: auth_opts.token_secret,
        reset_token_ttl_seconds: auth_opts.reset_token_ttl_seconds,
        otp_ttl_seconds: auth_opts.otp_ttl_seconds,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        password_min_length: auth_opts.password_min_length,
        reset_rate_limit: auth_opts.reset_rate_limit,
        reset_rate_window_seconds: auth_opts.reset_rate_window_seconds,
        email_outbox_poll_seconds: auth_opts.outbox.poll_seconds,
        email_outbox_batch_size: auth_opts.outbox.batch_size,
        email_outbox_max_attempts: auth_opts.outbox.max_attempts,
        email_outbox_backoff_base_seconds: auth_opts.outbox.backoff_base_seconds,
        email_outbox_backoff_max_seconds: auth_opts.outbox.backoff_max_seconds,
    }))
}
