//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasswordResetRequest {
    pub email_address: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasswordResetForm {
    pub password: String,
    pub password_confirmation: String,
}

/// Returned when a reset token resolves, so the form can show whose password
/// is being changed.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetFormResponse {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignupRequest {
    pub name: String,
    pub email_address: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OtpValidationRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub user_id: String,
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_reset_request_deserializes() {
        let parsed: PasswordResetRequest =
            serde_json::from_str(r#"{"email_address":"bob@example.com"}"#).unwrap();
        assert_eq!(parsed.email_address, "bob@example.com");
    }

    #[test]
    fn password_reset_form_requires_both_fields() {
        let missing: Result<PasswordResetForm, _> =
            serde_json::from_str(r#"{"password":"secret123"}"#);
        assert!(missing.is_err());

        let parsed: PasswordResetForm = serde_json::from_str(
            r#"{"password":"secret123","password_confirmation":"secret123"}"#,
        )
        .unwrap();
        assert_eq!(parsed.password, parsed.password_confirmation);
    }

    #[test]
    fn session_response_serializes() {
        let response = SessionResponse {
            user_id: "00000000-0000-0000-0000-000000000000".to_string(),
            email: "bob@example.com".to_string(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["email"], "bob@example.com");
    }
}
