//! # Hearth (Team Chat Auth Backend)
//!
//! `hearth` is the authentication and credential-lifecycle backend of a team
//! chat application. It owns the flows with real invariants: password reset
//! tokens, one-time verification codes, session rotation, and email
//! verification gating. Rooms, messages, and link previews live elsewhere.
//!
//! ## Tokens
//!
//! All out-of-band credentials (reset links, OTP codes) are purpose-scoped,
//! time-bounded, and single-use. Raw secrets are only ever sent to the user;
//! the database stores hashes, and consumption is an atomic conditional
//! update so a token can never be redeemed twice.
//!
//! ## Enumeration resistance
//!
//! Requesting a password reset returns the same acknowledgment whether or
//! not the address belongs to an account. Invalid, expired, and consumed
//! tokens all collapse into one user-facing message.
//!
//! ## Sessions
//!
//! Every successful authentication event (reset completion, OTP validation)
//! establishes a brand-new session and drops prior sessions for the account,
//! so regaining control of a password also evicts attacker sessions.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_commit_hash_is_hex_or_unknown() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
