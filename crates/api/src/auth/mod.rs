//! Authentication module for ocrgate

pub mod identity;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub use identity::{
    AccountInfo, HttpIdentityVerifier, IdentityResolver, IdentityVerifier, Verification,
};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("X-Device-Id header is required")]
    MissingDeviceId,
    #[error("Invalid internal key")]
    InvalidInternalKey,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidToken | AuthError::InvalidInternalKey => StatusCode::UNAUTHORIZED,
            AuthError::MissingDeviceId => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "detail": self.to_string(),
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// Whether the presented `X-Internal-Key` matches the configured key.
///
/// Always false when no key is configured.
pub fn internal_key_matches(configured: Option<&str>, presented: Option<&str>) -> bool {
    use subtle::ConstantTimeEq;

    match (configured, presented) {
        (Some(expected), Some(given)) if !expected.is_empty() => {
            bool::from(expected.as_bytes().ct_eq(given.as_bytes()))
        }
        _ => false,
    }
}
