//! API error handling
//!
//! Every error leaves the gateway as `{"detail": "<message>", "code": <status>}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ocrgate_billing::BillingError;
use serde_json::json;

use crate::auth::AuthError;
use crate::ocr::OcrError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    /// Balance exhausted; carries the metering reason
    #[error("{0}")]
    PaymentRequired(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    /// Message is logged, never returned
    #[error("Internal error: {0}")]
    Internal(String),
    /// Message is returned as-is
    #[error("{0}")]
    Upstream(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) | ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ApiError::Internal(message) = &self {
            tracing::error!(error = %message, "Request failed");
        }

        let body = Json(json!({
            "detail": self.detail(),
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidInput(message) => ApiError::BadRequest(message),
            BillingError::UnknownProduct(_) => ApiError::BadRequest(err.to_string()),
            BillingError::InvalidPayload(_) => ApiError::BadRequest("Invalid payload".to_string()),
            BillingError::WebhookSignatureInvalid => {
                ApiError::Unauthorized("Invalid signature".to_string())
            }
            BillingError::NotFound(_) => ApiError::NotFound("Transaction not found".to_string()),
            BillingError::CheckoutProvider(_) => {
                tracing::error!(error = %err, "Checkout provider failure");
                ApiError::Upstream("Failed to create checkout".to_string())
            }
            BillingError::ProductNotConfigured(_)
            | BillingError::Database(_)
            | BillingError::Config(_)
            | BillingError::Internal(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingDeviceId => ApiError::BadRequest(err.to_string()),
            AuthError::InvalidToken | AuthError::InvalidInternalKey => {
                ApiError::Unauthorized(err.to_string())
            }
        }
    }
}

impl From<OcrError> for ApiError {
    fn from(err: OcrError) -> Self {
        ApiError::Upstream(format!("OCR processing failed: {}", err))
    }
}
