//! Checkout provider client
//!
//! Thin wrapper over the Creem checkout API. The [`CheckoutProvider`] trait
//! is the seam the checkout service depends on, so tests can swap in a fake.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ocrgate_shared::Principal;
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};

pub const DEFAULT_API_URL: &str = "https://api.creem.io";
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Creem configuration
#[derive(Debug, Clone)]
pub struct CreemConfig {
    pub api_url: String,
    pub api_key: String,
    pub webhook_secret: String,
    /// SKU to Creem product id
    pub product_ids: HashMap<String, String>,
    pub timeout: Duration,
}

impl Default for CreemConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: String::new(),
            webhook_secret: String::new(),
            product_ids: HashMap::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl CreemConfig {
    /// Creem product id for a SKU
    pub fn product_id(&self, sku: &str) -> Option<&str> {
        self.product_ids
            .get(sku)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}

/// What the checkout service asks the provider for
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub sku: String,
    pub tokens: i32,
    pub principal: Principal,
    pub success_url: String,
}

impl CheckoutSessionRequest {
    /// Metadata echoed back by the provider on the completion webhook
    pub fn metadata(&self) -> serde_json::Value {
        let mut metadata = serde_json::json!({
            "principal_kind": self.principal.kind().as_str(),
            "product_sku": self.sku,
            "tokens": self.tokens,
        });
        let id_field = match &self.principal {
            Principal::Device { .. } => "device_id",
            Principal::Account { .. } => "account_id",
        };
        metadata[id_field] = serde_json::Value::String(self.principal.id().to_string());
        metadata
    }
}

/// Session created by the provider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderSession {
    pub id: String,
    pub checkout_url: String,
}

/// Hosted checkout provider
#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    async fn create_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<ProviderSession>;
}

#[derive(Serialize)]
struct CreateCheckoutBody<'a> {
    product_id: &'a str,
    success_url: &'a str,
    metadata: serde_json::Value,
}

/// Creem API client
#[derive(Clone)]
pub struct CreemClient {
    http: reqwest::Client,
    config: CreemConfig,
}

impl CreemClient {
    pub fn new(config: CreemConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BillingError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &CreemConfig {
        &self.config
    }
}

#[async_trait]
impl CheckoutProvider for CreemClient {
    async fn create_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<ProviderSession> {
        let product_id = self
            .config
            .product_id(&request.sku)
            .ok_or_else(|| BillingError::ProductNotConfigured(request.sku.clone()))?;

        let url = format!("{}/v1/checkouts", self.config.api_url.trim_end_matches('/'));
        let body = CreateCheckoutBody {
            product_id,
            success_url: &request.success_url,
            metadata: request.metadata(),
        };

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(sku = %request.sku, error = %e, "Checkout provider unreachable");
                BillingError::CheckoutProvider(format!("Request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(
                sku = %request.sku,
                status = status.as_u16(),
                "Checkout provider rejected session request"
            );
            return Err(BillingError::CheckoutProvider(format!(
                "Provider returned status {}",
                status.as_u16()
            )));
        }

        response.json::<ProviderSession>().await.map_err(|e| {
            tracing::error!(sku = %request.sku, error = %e, "Unreadable checkout provider response");
            BillingError::CheckoutProvider(format!("Invalid response body: {}", e))
        })
    }
}
