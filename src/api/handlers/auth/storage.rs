//! Database helpers for users, tokens, sessions and the email outbox.
//!
//! Token consumption is a conditional `UPDATE ... RETURNING`, so single-use
//! holds under concurrency without explicit row locks.

use anyhow::{Context, Result, anyhow};
use sqlx::{PgConnection, PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::tokens::{ResolvedToken, TokenPurpose};
use super::utils::{generate_session_token, hash_secret, is_unique_violation};

/// Outcome when attempting to create a new user row.
#[derive(Debug)]
pub(super) enum SignupOutcome {
    Created(Uuid),
    Conflict,
}

#[derive(Debug)]
pub(super) struct UserRecord {
    pub(super) id: Uuid,
    pub(super) email: String,
}

/// Minimal data returned for a valid session token.
pub(crate) struct SessionRecord {
    pub(crate) user_id: Uuid,
    pub(crate) email: String,
}

pub(super) async fn lookup_user_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<UserRecord>> {
    let query = "SELECT id, email FROM users WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;

    Ok(row.map(|row| UserRecord {
        id: row.get("id"),
        email: row.get("email"),
    }))
}

pub(super) async fn insert_user(
    conn: &mut PgConnection,
    email: &str,
    name: &str,
) -> Result<SignupOutcome> {
    let query = r"
        INSERT INTO users (email, name)
        VALUES ($1, $2)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(name)
        .fetch_one(&mut *conn)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(SignupOutcome::Created(row.get("id"))),
        Err(err) if is_unique_violation(&err) => Ok(SignupOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert user"),
    }
}

pub(super) async fn update_password(
    conn: &mut PgConnection,
    user_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET password_hash = $2, updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(conn)
        .instrument(span)
        .await
        .context("failed to update password")?;

    if result.rows_affected() == 0 {
        return Err(anyhow!("password update matched no user"));
    }

    Ok(())
}

/// Mark the email verified. Returns `true` when this call flipped the state,
/// `false` when it was already verified; never un-verifies.
pub(super) async fn mark_email_verified(conn: &mut PgConnection, user_id: Uuid) -> Result<bool> {
    let query = r"
        UPDATE users
        SET email_verified_at = NOW(), updated_at = NOW()
        WHERE id = $1
          AND email_verified_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(conn)
        .instrument(span)
        .await
        .context("failed to mark email verified")?;

    Ok(result.rows_affected() > 0)
}

pub(super) async fn insert_auth_token(
    conn: &mut PgConnection,
    token_id: Uuid,
    user_id: Uuid,
    purpose: TokenPurpose,
    code_hash: &[u8],
    ttl_seconds: i64,
) -> Result<()> {
    let query = r"
        INSERT INTO auth_tokens (id, user_id, purpose, code_hash, expires_at)
        VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_id)
        .bind(user_id)
        .bind(purpose.as_str())
        .bind(code_hash)
        .bind(ttl_seconds)
        .execute(conn)
        .instrument(span)
        .await
        .context("failed to insert auth token")?;

    Ok(())
}

/// Find a live (unconsumed, unexpired) token without consuming it.
pub(super) async fn find_live_token(
    pool: &PgPool,
    token_id: Uuid,
    purpose: TokenPurpose,
    code_hash: &[u8],
) -> Result<Option<ResolvedToken>> {
    let query = r"
        SELECT auth_tokens.id, users.id AS user_id, users.email
        FROM auth_tokens
        JOIN users ON users.id = auth_tokens.user_id
        WHERE auth_tokens.id = $1
          AND auth_tokens.purpose = $2
          AND auth_tokens.code_hash = $3
          AND auth_tokens.consumed_at IS NULL
          AND auth_tokens.expires_at > NOW()
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_id)
        .bind(purpose.as_str())
        .bind(code_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to find auth token")?;

    Ok(row.map(|row| ResolvedToken {
        token_id: row.get("id"),
        user_id: row.get("user_id"),
        email: row.get("email"),
    }))
}

/// Consume a token by id + hash. The conditional update means only the first
/// concurrent caller gets a row back.
pub(super) async fn consume_token(
    conn: &mut PgConnection,
    token_id: Uuid,
    purpose: TokenPurpose,
    code_hash: &[u8],
) -> Result<Option<ResolvedToken>> {
    let query = r"
        UPDATE auth_tokens
        SET consumed_at = NOW()
        FROM users
        WHERE auth_tokens.id = $1
          AND auth_tokens.purpose = $2
          AND auth_tokens.code_hash = $3
          AND auth_tokens.consumed_at IS NULL
          AND auth_tokens.expires_at > NOW()
          AND users.id = auth_tokens.user_id
        RETURNING auth_tokens.id, users.id AS user_id, users.email
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_id)
        .bind(purpose.as_str())
        .bind(code_hash)
        .fetch_optional(conn)
        .instrument(span)
        .await
        .context("failed to consume auth token")?;

    Ok(row.map(|row| ResolvedToken {
        token_id: row.get("id"),
        user_id: row.get("user_id"),
        email: row.get("email"),
    }))
}

/// Consume a live token matching a bare hash (OTP codes carry no row id).
/// When more than one live row matches, nothing is consumed: a short code
/// shared by two accounts must not log either holder into the other's.
pub(super) async fn consume_sole_token_by_hash(
    conn: &mut PgConnection,
    purpose: TokenPurpose,
    code_hash: &[u8],
) -> Result<Option<ResolvedToken>> {
    let query = r"
        WITH live AS (
            SELECT id FROM auth_tokens
            WHERE purpose = $1
              AND code_hash = $2
              AND consumed_at IS NULL
              AND expires_at > NOW()
        )
        UPDATE auth_tokens
        SET consumed_at = NOW()
        FROM users
        WHERE auth_tokens.id IN (SELECT id FROM live)
          AND (SELECT COUNT(*) FROM live) = 1
          AND users.id = auth_tokens.user_id
        RETURNING auth_tokens.id, users.id AS user_id, users.email
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(purpose.as_str())
        .bind(code_hash)
        .fetch_optional(conn)
        .instrument(span)
        .await
        .context("failed to consume auth token by hash")?;

    Ok(row.map(|row| ResolvedToken {
        token_id: row.get("id"),
        user_id: row.get("user_id"),
        email: row.get("email"),
    }))
}

pub(super) async fn enqueue_email(
    conn: &mut PgConnection,
    to_email: &str,
    template: &str,
    payload_json: &serde_json::Value,
) -> Result<()> {
    let payload_text =
        serde_json::to_string(payload_json).context("failed to serialize email payload")?;

    let query = r"
        INSERT INTO email_outbox (to_email, template, payload_json)
        VALUES ($1, $2, $3::jsonb)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(to_email)
        .bind(template)
        .bind(payload_text)
        .execute(conn)
        .instrument(span)
        .await
        .context("failed to insert email outbox row")?;

    Ok(())
}

/// Drop every session the user holds. Called on each auth event so old
/// cookies die when credentials change.
pub(super) async fn delete_sessions_for_user(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> Result<u64> {
    let query = "DELETE FROM user_sessions WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(conn)
        .instrument(span)
        .await
        .context("failed to delete prior sessions")?;

    Ok(result.rows_affected())
}

pub(super) async fn insert_session(
    conn: &mut PgConnection,
    user_id: Uuid,
    ttl_seconds: i64,
) -> Result<String> {
    // Store only the hash and return the raw value for the cookie. Retry on
    // the (astronomically unlikely) hash collision.
    let query = r"
        INSERT INTO user_sessions (user_id, session_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_session_token();
        let token_hash = hash_secret(token.as_bytes());
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(token_hash)
            .bind(ttl_seconds)
            .execute(&mut *conn)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

pub(super) async fn lookup_session(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<SessionRecord>> {
    let query = r"
        SELECT users.id, users.email
        FROM user_sessions
        JOIN users ON users.id = user_sessions.user_id
        WHERE user_sessions.session_hash = $1
          AND user_sessions.expires_at > NOW()
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    if row.is_none() {
        return Ok(None);
    }

    // Record activity for visibility without extending the session TTL.
    let query = r"
        UPDATE user_sessions
        SET last_seen_at = NOW()
        WHERE session_hash = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to touch session")?;

    Ok(row.map(|row| SessionRecord {
        user_id: row.get("id"),
        email: row.get("email"),
    }))
}

pub(super) async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<bool> {
    let query = "DELETE FROM user_sessions WHERE session_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;

    Ok(result.rows_affected() > 0)
}
