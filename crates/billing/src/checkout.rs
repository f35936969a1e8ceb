//! Checkout session creation and payment status

use std::sync::Arc;

use ocrgate_shared::Principal;
use serde::Serialize;

use crate::catalog::{find_product, CURRENCY};
use crate::charge::{ChargeStatus, NewPendingCharge};
use crate::client::{CheckoutProvider, CheckoutSessionRequest};
use crate::error::{BillingError, BillingResult};
use crate::metering::{MeteringService, TokenStatus};
use crate::store::LedgerStore;

/// Hosted checkout handed back to the caller
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub checkout_id: String,
    pub checkout_url: String,
}

/// Payment status of one checkout
#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatus {
    pub checkout_id: String,
    pub status: ChargeStatus,
    /// Zero until the charge completes
    pub tokens_granted: i32,
    pub token_status: TokenStatus,
}

/// Service for creating pending charges
#[derive(Clone)]
pub struct CheckoutService {
    provider: Arc<dyn CheckoutProvider>,
    store: Arc<dyn LedgerStore>,
    metering: MeteringService,
}

impl CheckoutService {
    pub fn new(
        provider: Arc<dyn CheckoutProvider>,
        store: Arc<dyn LedgerStore>,
        metering: MeteringService,
    ) -> Self {
        Self {
            provider,
            store,
            metering,
        }
    }

    /// Open a hosted checkout for `sku` and record it as a pending charge.
    ///
    /// Nothing is persisted unless the provider returns a session.
    pub async fn create_pending_charge(
        &self,
        principal: &Principal,
        sku: &str,
        success_url: &str,
    ) -> BillingResult<CheckoutSession> {
        let product =
            find_product(sku).ok_or_else(|| BillingError::UnknownProduct(sku.to_string()))?;
        if success_url.trim().is_empty() {
            return Err(BillingError::InvalidInput(
                "success_url must not be empty".to_string(),
            ));
        }

        let request = CheckoutSessionRequest {
            sku: product.sku.to_string(),
            tokens: product.tokens,
            principal: principal.clone(),
            success_url: success_url.to_string(),
        };
        let session = self.provider.create_session(&request).await?;

        let charge = self
            .store
            .insert_pending_charge(&NewPendingCharge {
                checkout_id: session.id.clone(),
                principal: principal.key(),
                product_sku: product.sku.to_string(),
                tokens_granted: product.tokens,
                amount_cents: product.price_cents,
                currency: CURRENCY.to_string(),
            })
            .await?;

        tracing::info!(
            principal = %principal,
            checkout_id = %charge.checkout_id,
            sku = %charge.product_sku,
            tokens = charge.tokens_granted,
            "Pending charge created"
        );

        Ok(CheckoutSession {
            checkout_id: session.id,
            checkout_url: session.checkout_url,
        })
    }

    /// Status of a checkout plus the owner's current balance
    pub async fn payment_status(&self, checkout_id: &str) -> BillingResult<PaymentStatus> {
        let charge = self
            .store
            .find_charge(checkout_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Transaction {}", checkout_id)))?;

        let token_status = self.metering.get_status(&charge.owner()).await?;
        let tokens_granted = if charge.is_completed() {
            charge.tokens_granted
        } else {
            0
        };

        Ok(PaymentStatus {
            checkout_id: charge.checkout_id,
            status: charge.status,
            tokens_granted,
            token_status,
        })
    }
}
