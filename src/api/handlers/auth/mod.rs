//! Auth handlers and supporting modules.
//!
//! This module coordinates the credential lifecycle: password resets, signup
//! with one-time-code email verification, and session management.
//!
//! ## Token handling
//!
//! Raw tokens and codes are never stored. Reset tokens carry an offline
//! purpose-bound tag; the database keeps only hashes and enforces single use
//! with a conditional consume.
//!
//! ## Enumeration resistance
//!
//! The reset-request and signup endpoints answer the same way whether or not
//! the email matches an account; the reset-request endpoint is additionally
//! rate limited per client key.

pub(crate) mod otp;
mod password;
pub(crate) mod password_resets;
mod rate_limit;
pub(crate) mod session;
mod state;
mod storage;
mod tokens;
pub(crate) mod types;
mod utils;

pub use rate_limit::{FixedWindowRateLimiter, NoopRateLimiter, RateLimiter};
pub use state::{AuthConfig, AuthState};
