//! Purpose-scoped, expiring, single-use tokens.
//!
//! A raw reset token is `"{id}.{tag}"` where `id` is the token row's UUID in
//! simple form and `tag` is the url-safe base64 of
//! `HMAC-SHA256(token_secret, "{purpose}:{id}")`. The tag binds the token to
//! its purpose and lets us reject tampered or cross-purpose tokens offline,
//! before any database work. Only `SHA-256(tag)` is stored; a database leak
//! never exposes usable tokens.
//!
//! OTP codes are short numeric codes for email verification. Their stored
//! hash is the HMAC tag itself (deterministic, keyed), so lookup by code is
//! possible without storing the code.

use super::state::AuthConfig;
use super::storage;
use super::utils::hash_secret;
use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenPurpose {
    PasswordReset,
    OtpVerification,
}

impl TokenPurpose {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::PasswordReset => "password_reset",
            Self::OtpVerification => "otp_verification",
        }
    }
}

/// A live token row joined with its owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedToken {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub email: String,
}

fn purpose_tag(secret: &[u8], purpose: TokenPurpose, payload: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret).context("token secret rejected by HMAC")?;
    mac.update(purpose.as_str().as_bytes());
    mac.update(b":");
    mac.update(payload.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn verify_purpose_tag(secret: &[u8], purpose: TokenPurpose, payload: &str, tag: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(purpose.as_str().as_bytes());
    mac.update(b":");
    mac.update(payload.as_bytes());
    mac.verify_slice(tag).is_ok()
}

/// Mint a fresh raw reset token and the hash to persist for it.
fn mint_reset_token(secret: &[u8]) -> Result<(Uuid, String, Vec<u8>)> {
    let token_id = Uuid::new_v4();
    let id_simple = token_id.simple().to_string();
    let tag = purpose_tag(secret, TokenPurpose::PasswordReset, &id_simple)?;
    let raw = format!("{id_simple}.{}", URL_SAFE_NO_PAD.encode(&tag));
    Ok((token_id, raw, hash_secret(&tag)))
}

/// Check a raw reset token offline. Returns the token row id and the stored
/// hash to match against, or `None` for malformed, tampered or cross-purpose
/// input. No database access and no early-exit on tag comparison.
fn check_reset_token(secret: &[u8], raw: &str) -> Option<(Uuid, Vec<u8>)> {
    let (id_part, tag_part) = raw.split_once('.')?;
    let token_id = Uuid::parse_str(id_part).ok()?;
    let tag = URL_SAFE_NO_PAD.decode(tag_part).ok()?;
    if !verify_purpose_tag(secret, TokenPurpose::PasswordReset, id_part, &tag) {
        return None;
    }
    Some((token_id, hash_secret(&tag)))
}

/// Six decimal digits, zero-padded.
fn mint_otp_code() -> String {
    let code: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{code:06}")
}

fn otp_code_hash(secret: &[u8], code: &str) -> Result<Vec<u8>> {
    purpose_tag(secret, TokenPurpose::OtpVerification, code)
}

/// Issue a password reset token for `user_id` inside the caller's
/// transaction. Returns the raw token; only its hash is stored.
///
/// # Errors
/// Returns an error if the insert fails.
pub async fn issue_reset_token(
    conn: &mut PgConnection,
    config: &AuthConfig,
    user_id: Uuid,
) -> Result<String> {
    let (token_id, raw, code_hash) = mint_reset_token(config.token_secret())?;
    storage::insert_auth_token(
        conn,
        token_id,
        user_id,
        TokenPurpose::PasswordReset,
        &code_hash,
        config.reset_token_ttl_seconds(),
    )
    .await?;
    Ok(raw)
}

/// Resolve a raw reset token without consuming it (the edit/preview step).
///
/// # Errors
/// Returns an error only on database failure; a bad token is `Ok(None)`.
pub async fn resolve_reset_token(
    pool: &PgPool,
    config: &AuthConfig,
    raw: &str,
) -> Result<Option<ResolvedToken>> {
    let Some((token_id, code_hash)) = check_reset_token(config.token_secret(), raw) else {
        return Ok(None);
    };
    storage::find_live_token(pool, token_id, TokenPurpose::PasswordReset, &code_hash).await
}

/// Atomically consume a raw reset token inside the caller's transaction.
/// Exactly one concurrent caller wins; the rest get `Ok(None)`.
///
/// # Errors
/// Returns an error only on database failure.
pub async fn consume_reset_token(
    conn: &mut PgConnection,
    config: &AuthConfig,
    raw: &str,
) -> Result<Option<ResolvedToken>> {
    let Some((token_id, code_hash)) = check_reset_token(config.token_secret(), raw) else {
        return Ok(None);
    };
    storage::consume_token(conn, token_id, TokenPurpose::PasswordReset, &code_hash).await
}

/// Issue an OTP verification code for `user_id` inside the caller's
/// transaction. Returns the raw code for the outbound email.
///
/// # Errors
/// Returns an error if the insert fails.
pub async fn issue_otp(
    conn: &mut PgConnection,
    config: &AuthConfig,
    user_id: Uuid,
) -> Result<String> {
    let code = mint_otp_code();
    let code_hash = otp_code_hash(config.token_secret(), &code)?;
    storage::insert_auth_token(
        conn,
        Uuid::new_v4(),
        user_id,
        TokenPurpose::OtpVerification,
        &code_hash,
        config.otp_ttl_seconds(),
    )
    .await?;
    Ok(code)
}

/// Atomically consume the live OTP matching `code`. An ambiguous code, one
/// that two accounts currently hold, is rejected rather than guessed at.
///
/// # Errors
/// Returns an error only on database failure; a bad code is `Ok(None)`.
pub async fn consume_otp(
    conn: &mut PgConnection,
    config: &AuthConfig,
    code: &str,
) -> Result<Option<ResolvedToken>> {
    let trimmed = code.trim();
    if trimmed.is_empty() || trimmed.len() > 16 {
        return Ok(None);
    }
    let code_hash = otp_code_hash(config.token_secret(), trimmed)?;
    storage::consume_sole_token_by_hash(conn, TokenPurpose::OtpVerification, &code_hash).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn minted_token_round_trips() {
        let (token_id, raw, code_hash) = mint_reset_token(SECRET).unwrap();
        let (parsed_id, parsed_hash) = check_reset_token(SECRET, &raw).unwrap();
        assert_eq!(parsed_id, token_id);
        assert_eq!(parsed_hash, code_hash);
    }

    #[test]
    fn tampered_tag_is_rejected_offline() {
        let (_, raw, _) = mint_reset_token(SECRET).unwrap();
        let mut bytes = raw.into_bytes();
        let last = bytes.len() - 1;
        bytes[last] = if bytes[last] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();
        assert!(check_reset_token(SECRET, &tampered).is_none());
    }

    #[test]
    fn tampered_id_is_rejected_offline() {
        let (_, raw, _) = mint_reset_token(SECRET).unwrap();
        let (_, tag_part) = raw.split_once('.').unwrap();
        let other_id = Uuid::new_v4().simple().to_string();
        let spliced = format!("{other_id}.{tag_part}");
        assert!(check_reset_token(SECRET, &spliced).is_none());
    }

    #[test]
    fn cross_purpose_tag_is_rejected() {
        // A tag minted for OTP verification must not validate as a reset tag.
        let id = Uuid::new_v4().simple().to_string();
        let otp_tag = purpose_tag(SECRET, TokenPurpose::OtpVerification, &id).unwrap();
        let forged = format!("{id}.{}", URL_SAFE_NO_PAD.encode(&otp_tag));
        assert!(check_reset_token(SECRET, &forged).is_none());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let (_, raw, _) = mint_reset_token(SECRET).unwrap();
        assert!(check_reset_token(b"another-secret-another-secret!!!", &raw).is_none());
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(check_reset_token(SECRET, "").is_none());
        assert!(check_reset_token(SECRET, "no-separator").is_none());
        assert!(check_reset_token(SECRET, "not-a-uuid.dGFn").is_none());
        let id = Uuid::new_v4().simple().to_string();
        assert!(check_reset_token(SECRET, &format!("{id}.!!!not-base64!!!")).is_none());
    }

    #[test]
    fn otp_codes_are_six_digits() {
        for _ in 0..64 {
            let code = mint_otp_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn otp_hash_is_keyed_and_deterministic() {
        let first = otp_code_hash(SECRET, "123456").unwrap();
        let again = otp_code_hash(SECRET, "123456").unwrap();
        let other_code = otp_code_hash(SECRET, "654321").unwrap();
        let other_key = otp_code_hash(b"another-secret-another-secret!!!", "123456").unwrap();
        assert_eq!(first, again);
        assert_ne!(first, other_code);
        assert_ne!(first, other_key);
    }

    #[test]
    fn purpose_strings_are_stable() {
        // These land in the database CHECK constraint; renames break rows.
        assert_eq!(TokenPurpose::PasswordReset.as_str(), "password_reset");
        assert_eq!(TokenPurpose::OtpVerification.as_str(), "otp_verification");
    }
}
