//! Signup and one-time-code email verification endpoints.
//!
//! New accounts start unverified. Signup mints a short numeric code, mails it
//! through the outbox and establishes no session; validating the code flips
//! the account to verified (idempotent, never reversed) and signs the user
//! in. Duplicate signups answer exactly like fresh ones so the endpoint
//! cannot be used to probe for registered addresses.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use super::password_resets::{redirect_with_alert, redirect_with_notice};
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::session::{establish_session, session_cookie};
use super::state::AuthState;
use super::storage::{self, SignupOutcome};
use super::tokens::{consume_otp, issue_otp};
use super::types::{OtpValidationRequest, SignupRequest};
use super::utils::{extract_client_ip, normalize_email, valid_email};

const SIGNUP_NOTICE: &str = "Please check your email for a verification code.";
const VERIFIED_NOTICE: &str = "Your email address has been verified successfully!";
const INVALID_CODE_ALERT: &str = "Invalid or expired verification code.";
const RATE_LIMIT_ALERT: &str = "Too many requests. Please wait before trying again.";

const VALIDATIONS_NEW_PATH: &str = "/auth_tokens/validations/new";
const ROOT_PATH: &str = "/";

/// Create an unverified account and mail a one-time verification code.
#[utoipa::path(
    post,
    path = "/users",
    request_body = SignupRequest,
    responses(
        (status = 302, description = "Account handling queued, identical for duplicate emails"),
        (status = 400, description = "Missing payload", body = String),
        (status = 422, description = "Rejected input")
    ),
    tag = "users"
)]
pub async fn signup(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupRequest>>,
) -> impl IntoResponse {
    let request: SignupRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let name = request.name.trim().to_string();
    if name.is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "alert": "Name can't be blank" })),
        )
            .into_response();
    }

    let email = normalize_email(&request.email_address);
    if !valid_email(&email) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "alert": "Email address is invalid" })),
        )
            .into_response();
    }

    let client_key = extract_client_ip(&headers).unwrap_or_else(|| "unknown".to_string());
    if state
        .rate_limiter()
        .check_and_increment(RateLimitAction::OtpRequest, &client_key)
        == RateLimitDecision::Limited
    {
        return redirect_with_alert(VALIDATIONS_NEW_PATH, RATE_LIMIT_ALERT);
    }

    // The response is the same whether the row was created or the email was
    // already taken; only the side effects differ.
    if let Err(err) = create_account(&state, &name, &email).await {
        error!("Failed to process signup: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    redirect_with_notice(VALIDATIONS_NEW_PATH, SIGNUP_NOTICE)
}

async fn create_account(state: &AuthState, name: &str, email: &str) -> anyhow::Result<()> {
    let mut tx = state.pool().begin().await?;

    let user_id = match storage::insert_user(&mut tx, email, name).await? {
        SignupOutcome::Created(user_id) => user_id,
        SignupOutcome::Conflict => {
            // No code for an address someone else owns.
            let _ = tx.rollback().await;
            return Ok(());
        }
    };

    let code = issue_otp(&mut tx, state.config(), user_id).await?;
    storage::enqueue_email(
        &mut tx,
        email,
        "otp_verification",
        &json!({
            "email": email,
            "name": name,
            "code": code,
        }),
    )
    .await?;

    tx.commit().await?;

    Ok(())
}

/// Validate a one-time code: verify the email and sign the user in.
#[utoipa::path(
    post,
    path = "/auth_tokens/validations",
    request_body = OtpValidationRequest,
    responses(
        (status = 302, description = "Verified and signed in, or invalid-code alert"),
        (status = 400, description = "Missing payload", body = String)
    ),
    tag = "users"
)]
pub async fn validate_otp(
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<OtpValidationRequest>>,
) -> impl IntoResponse {
    let request: OtpValidationRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    match verify_code(&state, &request.code).await {
        Ok(Some(session_token)) => {
            let mut response_headers = HeaderMap::new();
            if let Ok(cookie) = session_cookie(state.config(), &session_token) {
                response_headers.insert(SET_COOKIE, cookie);
            }
            (
                response_headers,
                redirect_with_notice(ROOT_PATH, VERIFIED_NOTICE),
            )
                .into_response()
        }
        Ok(None) => redirect_with_alert(VALIDATIONS_NEW_PATH, INVALID_CODE_ALERT),
        Err(err) => {
            error!("Failed to validate verification code: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Consume the code, mark the email verified and rotate onto a fresh session
/// in one transaction. Returns the raw session token when the code was live.
async fn verify_code(state: &AuthState, code: &str) -> anyhow::Result<Option<String>> {
    let mut tx = state.pool().begin().await?;

    let Some(resolved) = consume_otp(&mut tx, state.config(), code).await? else {
        let _ = tx.rollback().await;
        return Ok(None);
    };

    // Idempotent; a second code for an already-verified account just signs
    // the user in.
    storage::mark_email_verified(&mut tx, resolved.user_id).await?;

    let session_token = establish_session(&mut tx, state.config(), resolved.user_id).await?;

    tx.commit().await?;

    Ok(Some(session_token))
}
