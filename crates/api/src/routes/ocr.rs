//! OCR routes

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::{header::AUTHORIZATION, HeaderMap},
    Json,
};
use ocrgate_billing::TokenStatus;
use serde::Serialize;

use super::header_str;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::ocr::canonical_mime;
use crate::state::AppState;

const DEVICE_ID_HEADER: &str = "x-device-id";
const INTERNAL_KEY_HEADER: &str = "x-internal-key";

#[derive(Debug, Serialize)]
pub struct OcrResponse {
    pub success: bool,
    pub markdown: String,
    pub tokens_remaining: i64,
}

struct Upload {
    bytes: Vec<u8>,
    filename: String,
    content_type: String,
}

async fn read_upload(mut multipart: Multipart) -> ApiResult<Upload> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("document").to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
        return Ok(Upload {
            bytes: bytes.to_vec(),
            filename,
            content_type,
        });
    }
    Err(ApiError::BadRequest("No file uploaded".to_string()))
}

/// POST /api/v1/ocr/process
pub async fn process(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<OcrResponse>> {
    let multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let upload = read_upload(multipart).await?;

    let mime = canonical_mime(&upload.content_type).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "Unsupported file type: {}. Supported: PDF, JPEG, PNG, WebP",
            upload.content_type
        ))
    })?;

    let principal = state
        .identity
        .resolve(
            header_str(&headers, DEVICE_ID_HEADER),
            header_str(&headers, AUTHORIZATION.as_str()),
        )
        .await?;

    let tokens_remaining = if state.is_internal(header_str(&headers, INTERNAL_KEY_HEADER)) {
        tracing::info!(principal = %principal, "Internal request, metering skipped");
        state
            .billing
            .metering
            .get_status(&principal)
            .await?
            .total_available
    } else {
        let result = state.billing.metering.check_and_consume(&principal).await?;
        let Some(source) = result.source else {
            return Err(ApiError::PaymentRequired(result.reason));
        };
        metrics::record_token_consumed(source);
        result.total_available()
    };
    metrics::record_ocr_request(mime);

    // The consumed unit is not returned if recognition fails
    let markdown = state
        .ocr
        .process(&upload.bytes, &upload.filename, mime)
        .await
        .map_err(|e| {
            tracing::error!(
                principal = %principal,
                filename = %upload.filename,
                error = %e,
                "OCR failed after token consumed"
            );
            ApiError::from(e)
        })?;

    Ok(Json(OcrResponse {
        success: true,
        markdown,
        tokens_remaining,
    }))
}

/// GET /api/v1/ocr/tokens
pub async fn tokens(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<TokenStatus>> {
    let principal = state
        .identity
        .resolve(
            header_str(&headers, DEVICE_ID_HEADER),
            header_str(&headers, AUTHORIZATION.as_str()),
        )
        .await?;

    Ok(Json(state.billing.metering.get_status(&principal).await?))
}
