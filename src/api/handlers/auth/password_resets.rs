//! Password reset endpoints.
//!
//! The request endpoint answers identically whether or not the email matches
//! an account; issuance and email delivery happen as a side effect only on
//! match, and any internal failure is logged without changing the response.
//! Completion consumes the token atomically, rotates sessions and verifies
//! the email address as a side effect.

use axum::{
    Json,
    extract::{Extension, Path},
    http::{
        HeaderMap, StatusCode,
        header::{LOCATION, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use super::password::{PasswordIssue, hash_password, validate_new_password};
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::session::{establish_session, session_cookie};
use super::state::AuthState;
use super::storage;
use super::tokens::{consume_reset_token, issue_reset_token, resolve_reset_token};
use super::types::{PasswordResetForm, PasswordResetRequest, ResetFormResponse};
use super::utils::{build_reset_url, extract_client_ip, normalize_email};

const GENERIC_RESET_NOTICE: &str =
    "If that email address is in our system, you will receive password reset instructions.";
const INVALID_LINK_ALERT: &str = "Invalid or expired password reset link.";
const RATE_LIMIT_ALERT: &str = "Too many requests. Please wait before trying again.";
const RESET_SUCCESS_NOTICE: &str = "Your password has been reset successfully!";

const SESSION_NEW_PATH: &str = "/session/new";
const ROOT_PATH: &str = "/";

/// 302 with a flash-style notice body. Built by hand; the framework helper
/// answers 303 and the contract here is FOUND.
pub(super) fn redirect_with_notice(location: &str, notice: &str) -> Response {
    (
        StatusCode::FOUND,
        [(LOCATION, location.to_string())],
        Json(json!({ "notice": notice })),
    )
        .into_response()
}

pub(super) fn redirect_with_alert(location: &str, alert: &str) -> Response {
    (
        StatusCode::FOUND,
        [(LOCATION, location.to_string())],
        Json(json!({ "alert": alert })),
    )
        .into_response()
}

/// Request a password reset email.
#[utoipa::path(
    post,
    path = "/password_resets",
    request_body = PasswordResetRequest,
    responses(
        (status = 302, description = "Generic acknowledgment, identical for any email"),
        (status = 400, description = "Missing payload", body = String)
    ),
    tag = "password-resets"
)]
pub async fn create(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<PasswordResetRequest>>,
) -> impl IntoResponse {
    let request: PasswordResetRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    // Rate limits come first so blocked clients trigger no lookup or email.
    let client_key = extract_client_ip(&headers).unwrap_or_else(|| "unknown".to_string());
    if state
        .rate_limiter()
        .check_and_increment(RateLimitAction::PasswordResetRequest, &client_key)
        == RateLimitDecision::Limited
    {
        return redirect_with_alert(SESSION_NEW_PATH, RATE_LIMIT_ALERT);
    }

    let email = normalize_email(&request.email_address);

    // Everything past this point is side effect only. The response is fixed
    // before the lookup so no branch can leak whether the account exists.
    if let Err(err) = issue_reset_for_email(&state, &email).await {
        error!("Failed to process password reset request: {err}");
    }

    redirect_with_notice(SESSION_NEW_PATH, GENERIC_RESET_NOTICE)
}

async fn issue_reset_for_email(state: &AuthState, email: &str) -> anyhow::Result<()> {
    let Some(user) = storage::lookup_user_by_email(state.pool(), email).await? else {
        return Ok(());
    };

    // Token row and outbox row commit together or not at all.
    let mut tx = state.pool().begin().await?;
    let token = issue_reset_token(&mut tx, state.config(), user.id).await?;
    let reset_url = build_reset_url(state.config().frontend_base_url(), &token);
    storage::enqueue_email(
        &mut tx,
        &user.email,
        "password_reset",
        &json!({
            "email": user.email,
            "reset_url": reset_url,
        }),
    )
    .await?;
    tx.commit().await?;

    Ok(())
}

/// Check a reset link before showing the new-password form.
#[utoipa::path(
    get,
    path = "/password_resets/{token}/edit",
    params(
        ("token" = String, Path, description = "Raw password reset token")
    ),
    responses(
        (status = 200, description = "Token is live, render the form", body = ResetFormResponse),
        (status = 302, description = "Invalid or expired token")
    ),
    tag = "password-resets"
)]
pub async fn edit(
    state: Extension<Arc<AuthState>>,
    Path(token): Path<String>,
) -> impl IntoResponse {
    match resolve_reset_token(state.pool(), state.config(), &token).await {
        Ok(Some(resolved)) => (
            StatusCode::OK,
            Json(ResetFormResponse {
                email: resolved.email,
            }),
        )
            .into_response(),
        Ok(None) => redirect_with_alert(SESSION_NEW_PATH, INVALID_LINK_ALERT),
        Err(err) => {
            error!("Failed to resolve reset token: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Complete a password reset.
#[utoipa::path(
    patch,
    path = "/password_resets/{token}",
    params(
        ("token" = String, Path, description = "Raw password reset token")
    ),
    request_body = PasswordResetForm,
    responses(
        (status = 302, description = "Password reset, session established (or invalid token alert)"),
        (status = 400, description = "Missing payload", body = String),
        (status = 422, description = "Password rejected, token still live")
    ),
    tag = "password-resets"
)]
pub async fn update(
    state: Extension<Arc<AuthState>>,
    Path(token): Path<String>,
    payload: Option<Json<PasswordResetForm>>,
) -> impl IntoResponse {
    let form: PasswordResetForm = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    // A validation failure must leave the token live so the user can retry,
    // so the non-consuming check runs first.
    match resolve_reset_token(state.pool(), state.config(), &token).await {
        Ok(Some(_)) => {}
        Ok(None) => return redirect_with_alert(SESSION_NEW_PATH, INVALID_LINK_ALERT),
        Err(err) => {
            error!("Failed to resolve reset token: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    if let Err(issue) = validate_new_password(
        &form.password,
        &form.password_confirmation,
        state.config().password_min_length(),
    ) {
        return password_issue_response(&issue);
    }

    let password_hash = match hash_password(&form.password) {
        Ok(hash) => hash,
        Err(issue) => return password_issue_response(&issue),
    };

    match complete_reset(&state, &token, &password_hash).await {
        Ok(Some(session_token)) => {
            let mut response_headers = HeaderMap::new();
            if let Ok(cookie) = session_cookie(state.config(), &session_token) {
                response_headers.insert(SET_COOKIE, cookie);
            }
            (
                response_headers,
                redirect_with_notice(ROOT_PATH, RESET_SUCCESS_NOTICE),
            )
                .into_response()
        }
        // Lost the race to a concurrent consumer.
        Ok(None) => redirect_with_alert(SESSION_NEW_PATH, INVALID_LINK_ALERT),
        Err(err) => {
            error!("Failed to complete password reset: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Consume the token, store the new password, verify the email and rotate
/// sessions in one transaction. Returns the raw session token on success.
async fn complete_reset(
    state: &AuthState,
    token: &str,
    password_hash: &str,
) -> anyhow::Result<Option<String>> {
    let mut tx = state.pool().begin().await?;

    let Some(resolved) = consume_reset_token(&mut tx, state.config(), token).await? else {
        let _ = tx.rollback().await;
        return Ok(None);
    };

    storage::update_password(&mut tx, resolved.user_id, password_hash).await?;

    // Completing a reset proves control of the inbox; no-op when already
    // verified.
    storage::mark_email_verified(&mut tx, resolved.user_id).await?;

    let session_token = establish_session(&mut tx, state.config(), resolved.user_id).await?;

    tx.commit().await?;

    Ok(Some(session_token))
}

fn password_issue_response(issue: &PasswordIssue) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "alert": issue.to_string() })),
    )
        .into_response()
}
