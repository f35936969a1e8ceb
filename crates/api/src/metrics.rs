//! Prometheus metrics recorder, HTTP middleware and business counters.

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use ocrgate_billing::TokenSource;

use crate::routes::SERVICE_NAME;

/// HTTP requests (counter, labels: tool, endpoint, method, status).
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
/// HTTP request duration (histogram, labels: tool, endpoint, method).
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
/// OCR requests admitted (counter, labels: tool, file_type).
pub const OCR_REQUESTS_TOTAL: &str = "ocr_requests_total";
/// Units debited from a ledger (counter, labels: tool).
pub const TOKENS_CONSUMED_TOTAL: &str = "tokens_consumed_total";
/// Units debited from the free allowance (counter, labels: tool).
pub const FREE_TRIAL_USED_TOTAL: &str = "free_trial_used_total";
/// Settled checkouts (counter, labels: tool, product_sku).
pub const PAYMENT_SUCCESS_TOTAL: &str = "payment_success_total";
/// Settled revenue in cents (counter, labels: tool).
pub const PAYMENT_REVENUE_CENTS_TOTAL: &str = "payment_revenue_cents_total";

/// Label for requests that matched no route
const UNMATCHED_ENDPOINT: &str = "unmatched";

/// OCR calls take seconds, not milliseconds
const LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Install the global Prometheus recorder and describe every metric.
pub fn setup_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
            LATENCY_BUCKETS,
        )?
        .install_recorder()?;

    metrics::describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    metrics::describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "HTTP request duration"
    );
    metrics::describe_counter!(OCR_REQUESTS_TOTAL, "Total OCR requests");
    metrics::describe_counter!(TOKENS_CONSUMED_TOTAL, "Total tokens consumed");
    metrics::describe_counter!(FREE_TRIAL_USED_TOTAL, "Free trial uses");
    metrics::describe_counter!(PAYMENT_SUCCESS_TOTAL, "Successful payments");
    metrics::describe_counter!(PAYMENT_REVENUE_CENTS_TOTAL, "Total revenue in cents");

    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// Count and time every routed request
pub async fn track_http(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ENDPOINT.to_string());
    let method = request.method().to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "tool" => SERVICE_NAME,
        "endpoint" => endpoint.clone(),
        "method" => method.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "tool" => SERVICE_NAME,
        "endpoint" => endpoint,
        "method" => method
    )
    .record(start.elapsed().as_secs_f64());

    response
}

pub fn record_ocr_request(file_type: &str) {
    metrics::counter!(OCR_REQUESTS_TOTAL, "tool" => SERVICE_NAME, "file_type" => file_type.to_string())
        .increment(1);
}

/// A unit was debited; free units also count as a trial use
pub fn record_token_consumed(source: TokenSource) {
    metrics::counter!(TOKENS_CONSUMED_TOTAL, "tool" => SERVICE_NAME).increment(1);
    if source == TokenSource::Free {
        metrics::counter!(FREE_TRIAL_USED_TOTAL, "tool" => SERVICE_NAME).increment(1);
    }
}

pub fn record_payment(product_sku: &str, amount_cents: i32) {
    metrics::counter!(PAYMENT_SUCCESS_TOTAL, "tool" => SERVICE_NAME, "product_sku" => product_sku.to_string())
        .increment(1);
    metrics::counter!(PAYMENT_REVENUE_CENTS_TOTAL, "tool" => SERVICE_NAME)
        .increment(u64::try_from(amount_cents).unwrap_or(0));
}
