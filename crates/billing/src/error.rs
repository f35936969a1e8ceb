//! Billing error types

/// Errors raised by the ledger, checkout and settlement services
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Caller supplied an unusable value (non-positive credit, empty URL, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// SKU is not in the product catalog
    #[error("Invalid product: {0}")]
    UnknownProduct(String),

    /// SKU exists but has no checkout-provider product mapped to it
    #[error("Payment not configured for product: {0}")]
    ProductNotConfigured(String),

    #[error("Invalid webhook signature")]
    WebhookSignatureInvalid,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Checkout provider error: {0}")]
    CheckoutProvider(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
