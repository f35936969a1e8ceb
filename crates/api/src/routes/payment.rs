//! Payment routes

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::{header::AUTHORIZATION, HeaderMap},
    Json,
};
use ocrgate_billing::{list_products, PaymentStatus, ProductListing, WebhookOutcome};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::header_str;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "creem-signature";

#[derive(Debug, Serialize)]
pub struct ProductsResponse {
    pub products: Vec<ProductListing>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub product_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    pub success_url: String,
    /// Accepted for compatibility; the provider only takes a success URL
    #[serde(default)]
    pub cancel_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
    pub checkout_id: String,
}

/// GET /api/v1/payment/products
pub async fn products() -> Json<ProductsResponse> {
    Json(ProductsResponse {
        products: list_products(),
    })
}

/// POST /api/v1/payment/checkout
pub async fn checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> ApiResult<Json<CheckoutResponse>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let principal = state
        .identity
        .resolve(
            request.device_id.as_deref(),
            header_str(&headers, AUTHORIZATION.as_str()),
        )
        .await?;

    let session = state
        .billing
        .checkout
        .create_pending_charge(&principal, &request.product_id, &request.success_url)
        .await?;

    Ok(Json(CheckoutResponse {
        checkout_url: session.checkout_url,
        checkout_id: session.checkout_id,
    }))
}

/// POST /api/v1/payment/webhook
///
/// Acknowledges every authentic event, including ones that change nothing,
/// so the provider stops retrying.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let signature = header_str(&headers, SIGNATURE_HEADER).unwrap_or_default();

    let outcome = state
        .billing
        .webhooks
        .verify_and_apply(&body, signature)
        .await?;

    match outcome {
        WebhookOutcome::Applied {
            product_sku,
            amount_cents,
            ..
        } => metrics::record_payment(&product_sku, amount_cents),
        WebhookOutcome::Ignored(reason) => {
            tracing::debug!(reason = ?reason, "Webhook acknowledged without effect");
        }
    }

    Ok(Json(json!({ "status": "ok" })))
}

/// GET /api/v1/payment/status/{checkout_id}
pub async fn status(
    State(state): State<AppState>,
    Path(checkout_id): Path<String>,
) -> ApiResult<Json<PaymentStatus>> {
    Ok(Json(
        state.billing.checkout.payment_status(&checkout_id).await?,
    ))
}
