//! Password policy and hashing.
//!
//! Validation short-circuits in a fixed order so callers always surface the
//! first applicable problem: blank, then too short, then confirmation
//! mismatch. Persistence failures map to [`PasswordIssue::PersistenceRejected`]
//! so the whole pipeline reports through one error type.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Argon2, password_hash::rand_core::OsRng};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PasswordIssue {
    #[error("Password can't be blank")]
    Blank,

    #[error("Password is too short (minimum is {0} characters)")]
    TooShort(usize),

    #[error("Password confirmation doesn't match Password")]
    Mismatch,

    #[error("{0}")]
    PersistenceRejected(String),
}

/// Check a candidate password against the policy, first failure wins.
///
/// # Errors
/// Returns the first [`PasswordIssue`] the candidate violates.
pub fn validate_new_password(
    password: &str,
    confirmation: &str,
    min_length: usize,
) -> Result<(), PasswordIssue> {
    if password.is_empty() {
        return Err(PasswordIssue::Blank);
    }

    if password.chars().count() < min_length {
        return Err(PasswordIssue::TooShort(min_length));
    }

    if password != confirmation {
        return Err(PasswordIssue::Mismatch);
    }

    Ok(())
}

/// Hash a password into a PHC string for storage.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> Result<String, PasswordIssue> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| PasswordIssue::PersistenceRejected(err.to_string()))
}

/// Verify a password against a stored PHC string.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_password_is_first_failure() {
        // Blank is also shorter than the minimum; blank must win.
        assert_eq!(
            validate_new_password("", "something", 8),
            Err(PasswordIssue::Blank)
        );
    }

    #[test]
    fn short_password_reports_minimum() {
        assert_eq!(
            validate_new_password("short", "short", 8),
            Err(PasswordIssue::TooShort(8))
        );
    }

    #[test]
    fn short_beats_mismatch() {
        assert_eq!(
            validate_new_password("short", "different", 8),
            Err(PasswordIssue::TooShort(8))
        );
    }

    #[test]
    fn mismatch_after_length_ok() {
        assert_eq!(
            validate_new_password("long enough", "but different", 8),
            Err(PasswordIssue::Mismatch)
        );
    }

    #[test]
    fn valid_password_passes() {
        assert_eq!(validate_new_password("correct horse", "correct horse", 8), Ok(()));
    }

    #[test]
    fn exact_minimum_length_passes() {
        assert_eq!(validate_new_password("12345678", "12345678", 8), Ok(()));
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        // 8 multibyte characters, more than 8 bytes.
        assert_eq!(validate_new_password("ñññññññ8", "ñññññññ8", 8), Ok(()));
    }

    #[test]
    fn issue_messages_are_user_facing() {
        assert_eq!(PasswordIssue::Blank.to_string(), "Password can't be blank");
        assert_eq!(
            PasswordIssue::TooShort(8).to_string(),
            "Password is too short (minimum is 8 characters)"
        );
        assert_eq!(
            PasswordIssue::Mismatch.to_string(),
            "Password confirmation doesn't match Password"
        );
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn verify_rejects_malformed_hash() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }
}
