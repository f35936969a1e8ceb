//! Creem webhook handling
//!
//! Verifies the `creem-signature` header and settles pending charges on
//! `checkout.completed`. Settlement is idempotent: the status flip and the
//! credit happen in one store transaction, so a redelivered event finds the
//! charge already completed and changes nothing.

use std::collections::HashMap;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use ocrgate_shared::Principal;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::balance::Balance;
use crate::error::{BillingError, BillingResult};
use crate::metering::MeteringConfig;
use crate::store::{LedgerStore, SettlementOutcome};

type HmacSha256 = Hmac<Sha256>;

pub const CHECKOUT_COMPLETED: &str = "checkout.completed";

/// Inbound webhook envelope.
///
/// Only the event type is required to be readable; the object is kept as raw
/// JSON and decoded once the event is known to be a completed checkout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "eventType", alias = "event", default)]
    pub event_type: Option<String>,
    #[serde(rename = "object", alias = "data", default)]
    pub object: serde_json::Value,
}

impl WebhookEvent {
    /// Decode an envelope from parsed JSON. Any JSON value is accepted; a
    /// shape that is not an envelope yields an event with no type.
    pub fn from_json(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Webhook body is not an event envelope");
            Self::default()
        })
    }

    pub fn is_checkout_completed(&self) -> bool {
        self.event_type.as_deref() == Some(CHECKOUT_COMPLETED)
    }
}

/// The checkout a `checkout.completed` event refers to
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookObject {
    pub id: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl WebhookObject {
    /// Pull the checkout id and metadata out of a raw event object, ignoring
    /// fields of unexpected type.
    pub fn from_value(object: &serde_json::Value) -> Self {
        let id = object
            .get("id")
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let metadata = object
            .get("metadata")
            .and_then(|v| v.as_object())
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        Self { id, metadata }
    }

    /// Principal named in the metadata, if any
    fn metadata_principal(&self) -> Option<Principal> {
        let field = |name: &str| {
            self.metadata
                .get(name)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        if let Some(account_id) = field("account_id") {
            return Some(Principal::account(account_id, None));
        }
        field("device_id").map(Principal::device)
    }
}

/// Why an authentic webhook changed nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnhandledEvent,
    MissingCheckoutId,
    UnknownCharge,
    AlreadySettled,
}

/// Result of processing an authentic webhook
#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    Applied {
        checkout_id: String,
        principal: Principal,
        product_sku: String,
        tokens_granted: i32,
        amount_cents: i32,
        balance: Balance,
    },
    Ignored(IgnoreReason),
}

/// Webhook handler for Creem events
#[derive(Clone)]
pub struct WebhookHandler {
    store: Arc<dyn LedgerStore>,
    webhook_secret: String,
    config: MeteringConfig,
}

impl WebhookHandler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        webhook_secret: impl Into<String>,
        config: MeteringConfig,
    ) -> Self {
        Self {
            store,
            webhook_secret: webhook_secret.into(),
            config,
        }
    }

    /// Check a hex HMAC-SHA256 signature over the raw body
    pub fn verify_signature(&self, payload: &[u8], signature: &str) -> BillingResult<()> {
        if self.webhook_secret.is_empty() {
            tracing::error!("Webhook secret not configured, rejecting webhook");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let received = signature.trim().to_ascii_lowercase();
        if received.is_empty() {
            tracing::error!("Missing webhook signature");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes()).map_err(|_| {
            tracing::error!("Invalid webhook secret key");
            BillingError::WebhookSignatureInvalid
        })?;
        mac.update(payload);
        let computed = hex::encode(mac.finalize().into_bytes());

        if !bool::from(computed.as_bytes().ct_eq(received.as_bytes())) {
            tracing::error!(
                payload_len = payload.len(),
                signature_len = received.len(),
                "Webhook signature mismatch"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        Ok(())
    }

    /// Verify, parse and apply a webhook.
    ///
    /// Nothing is read or written when the signature does not verify. Only a
    /// body that is not JSON at all is rejected after verification; every
    /// other event the handler does not act on is reported as ignored.
    pub async fn verify_and_apply(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> BillingResult<WebhookOutcome> {
        self.verify_signature(payload, signature)?;

        let value: serde_json::Value = serde_json::from_slice(payload).map_err(|e| {
            tracing::error!(error = %e, "Unparsable webhook payload");
            BillingError::InvalidPayload(e.to_string())
        })?;

        self.handle_event(WebhookEvent::from_json(value)).await
    }

    /// Apply an already-verified event
    pub async fn handle_event(&self, event: WebhookEvent) -> BillingResult<WebhookOutcome> {
        if !event.is_checkout_completed() {
            tracing::debug!(event_type = ?event.event_type, "Ignoring unhandled webhook event");
            return Ok(WebhookOutcome::Ignored(IgnoreReason::UnhandledEvent));
        }

        let object = WebhookObject::from_value(&event.object);
        let Some(checkout_id) = object.id.clone() else {
            tracing::warn!("checkout.completed event without checkout id");
            return Ok(WebhookOutcome::Ignored(IgnoreReason::MissingCheckoutId));
        };

        let outcome = self
            .store
            .settle_charge(&checkout_id, self.config.free_uses_per_principal)
            .await?;

        match outcome {
            SettlementOutcome::UnknownCharge => {
                tracing::warn!(checkout_id = %checkout_id, "Webhook for unknown checkout");
                Ok(WebhookOutcome::Ignored(IgnoreReason::UnknownCharge))
            }
            SettlementOutcome::AlreadySettled(charge) => {
                tracing::info!(
                    checkout_id = %checkout_id,
                    completed_at = ?charge.completed_at,
                    "Duplicate webhook, charge already settled"
                );
                Ok(WebhookOutcome::Ignored(IgnoreReason::AlreadySettled))
            }
            SettlementOutcome::Settled { charge, balance } => {
                let principal = charge.owner();
                if let Some(named) = object.metadata_principal() {
                    if named.key() != charge.principal {
                        tracing::warn!(
                            checkout_id = %checkout_id,
                            metadata_principal = %named,
                            charge_principal = %principal,
                            "Webhook metadata disagrees with charge owner, crediting charge owner"
                        );
                    }
                }

                tracing::info!(
                    checkout_id = %checkout_id,
                    principal = %principal,
                    sku = %charge.product_sku,
                    tokens = charge.tokens_granted,
                    paid_tokens = balance.paid_tokens,
                    "Charge settled"
                );

                Ok(WebhookOutcome::Applied {
                    checkout_id,
                    principal,
                    product_sku: charge.product_sku,
                    tokens_granted: charge.tokens_granted,
                    amount_cents: charge.amount_cents,
                    balance,
                })
            }
        }
    }
}

/// Hex HMAC-SHA256 of `payload` under `secret`, as the provider signs it
pub fn sign_payload(secret: &str, payload: &[u8]) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BillingError::Internal(format!("Invalid HMAC key: {}", e)))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
