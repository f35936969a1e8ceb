//! Metering engine
//!
//! Decides whether a principal may consume one unit and records the
//! consumption. The internal bypass is a gateway concern and never reaches
//! this service.

use std::sync::Arc;

use ocrgate_shared::Principal;
use serde::Serialize;

use crate::balance::{Balance, TokenSource};
use crate::error::BillingResult;
use crate::store::LedgerStore;

pub const DEFAULT_FREE_USES: i32 = 3;

const EXHAUSTED_REASON: &str = "No tokens available. Please purchase more.";

/// Metering settings
#[derive(Debug, Clone, Copy)]
pub struct MeteringConfig {
    /// Free uses granted to a principal on first touch
    pub free_uses_per_principal: i32,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            free_uses_per_principal: DEFAULT_FREE_USES,
        }
    }
}

/// Outcome of a check-and-consume
#[derive(Debug, Clone, Serialize)]
pub struct ConsumeResult {
    pub granted: bool,
    pub source: Option<TokenSource>,
    pub free_uses_remaining: i32,
    pub paid_tokens: i32,
    pub reason: String,
}

impl ConsumeResult {
    fn from_outcome(source: Option<TokenSource>, balance: Balance) -> Self {
        let reason = match source {
            Some(TokenSource::Free) => format!(
                "Free use consumed. {} remaining.",
                balance.free_uses_remaining
            ),
            Some(TokenSource::Paid) => {
                format!("Paid token consumed. {} remaining.", balance.paid_tokens)
            }
            None => EXHAUSTED_REASON.to_string(),
        };
        Self {
            granted: source.is_some(),
            source,
            free_uses_remaining: balance.free_uses_remaining,
            paid_tokens: balance.paid_tokens,
            reason,
        }
    }

    pub fn total_available(&self) -> i64 {
        i64::from(self.free_uses_remaining) + i64::from(self.paid_tokens)
    }
}

/// Read-only balance view for a principal
#[derive(Debug, Clone, Serialize)]
pub struct TokenStatus {
    #[serde(flatten)]
    pub principal: Principal,
    pub free_uses_remaining: i32,
    pub paid_tokens: i32,
    pub total_available: i64,
}

impl TokenStatus {
    pub fn new(principal: Principal, balance: Balance) -> Self {
        Self {
            principal,
            free_uses_remaining: balance.free_uses_remaining,
            paid_tokens: balance.paid_tokens,
            total_available: balance.total_available(),
        }
    }
}

/// Service for metering usage against principal balances
#[derive(Clone)]
pub struct MeteringService {
    store: Arc<dyn LedgerStore>,
    config: MeteringConfig,
}

impl MeteringService {
    pub fn new(store: Arc<dyn LedgerStore>, config: MeteringConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &MeteringConfig {
        &self.config
    }

    /// Atomically consume one unit, free uses first.
    ///
    /// An exhausted balance is not an error: the result comes back with
    /// `granted = false` and the balance untouched.
    pub async fn check_and_consume(&self, principal: &Principal) -> BillingResult<ConsumeResult> {
        let outcome = self
            .store
            .consume_one(principal, self.config.free_uses_per_principal)
            .await?;
        let result = ConsumeResult::from_outcome(outcome.source, outcome.balance);

        if result.granted {
            tracing::info!(
                principal = %principal,
                source = ?result.source,
                free_uses_remaining = result.free_uses_remaining,
                paid_tokens = result.paid_tokens,
                "Token consumed"
            );
        } else {
            tracing::info!(principal = %principal, "Consume denied, balance exhausted");
        }

        Ok(result)
    }

    /// Current balance; a principal never seen before reports the full quota
    pub async fn get_status(&self, principal: &Principal) -> BillingResult<TokenStatus> {
        let balance = self
            .store
            .balance(principal, self.config.free_uses_per_principal)
            .await?;
        Ok(TokenStatus::new(principal.clone(), balance))
    }

    /// Add paid tokens to a principal's balance
    pub async fn credit(&self, principal: &Principal, amount: i32) -> BillingResult<Balance> {
        let balance = self
            .store
            .credit(principal, amount, self.config.free_uses_per_principal)
            .await?;

        tracing::info!(
            principal = %principal,
            amount = amount,
            paid_tokens = balance.paid_tokens,
            "Paid tokens credited"
        );
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BillingError;
    use crate::store::InMemoryLedgerStore;

    fn service() -> MeteringService {
        MeteringService::new(Arc::new(InMemoryLedgerStore::new()), MeteringConfig::default())
    }

    #[tokio::test]
    async fn test_fresh_principal_reports_full_quota() {
        let metering = service();
        let status = metering
            .get_status(&Principal::device("dev-new"))
            .await
            .unwrap();
        assert_eq!(status.free_uses_remaining, 3);
        assert_eq!(status.paid_tokens, 0);
        assert_eq!(status.total_available, 3);
    }

    #[tokio::test]
    async fn test_granted_reason_names_source() {
        let metering = service();
        let device = Principal::device("dev-1");

        let result = metering.check_and_consume(&device).await.unwrap();
        assert!(result.granted);
        assert_eq!(result.source, Some(TokenSource::Free));
        assert_eq!(result.reason, "Free use consumed. 2 remaining.");

        metering.check_and_consume(&device).await.unwrap();
        metering.check_and_consume(&device).await.unwrap();
        metering.credit(&device, 5).await.unwrap();

        let result = metering.check_and_consume(&device).await.unwrap();
        assert_eq!(result.source, Some(TokenSource::Paid));
        assert_eq!(result.reason, "Paid token consumed. 4 remaining.");
    }

    #[tokio::test]
    async fn test_exhausted_is_not_an_error() {
        let metering = MeteringService::new(
            Arc::new(InMemoryLedgerStore::new()),
            MeteringConfig {
                free_uses_per_principal: 0,
            },
        );
        let result = metering
            .check_and_consume(&Principal::device("dev-1"))
            .await
            .unwrap();
        assert!(!result.granted);
        assert!(result.source.is_none());
        assert!(result.reason.to_lowercase().contains("no tokens available"));
        assert_eq!(result.total_available(), 0);
    }

    #[tokio::test]
    async fn test_credit_on_unseen_principal_adds_to_quota() {
        let metering = service();
        let account = Principal::account("acct-1", None);

        let balance = metering.credit(&account, 10).await.unwrap();
        assert_eq!(balance.free_uses_remaining, 3);
        assert_eq!(balance.paid_tokens, 10);
        assert_eq!(balance.total_available(), 13);
    }

    #[tokio::test]
    async fn test_credit_rejects_zero() {
        let metering = service();
        let err = metering
            .credit(&Principal::device("dev-1"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidInput(_)));
    }

    #[test]
    fn test_token_status_serializes_principal_inline() {
        let status = TokenStatus::new(Principal::device("dev-1"), Balance::fresh(3));
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["kind"], "device");
        assert_eq!(json["device_id"], "dev-1");
        assert_eq!(json["total_available"], 3);
    }
}
