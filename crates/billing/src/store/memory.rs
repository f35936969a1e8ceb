use std::collections::HashMap;

use async_trait::async_trait;
use ocrgate_shared::{Principal, PrincipalKey};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::{ConsumeOutcome, LedgerStore, SettlementOutcome};
use crate::balance::{validate_credit_amount, Balance};
use crate::charge::{ChargeStatus, NewPendingCharge, PendingCharge};
use crate::error::{BillingError, BillingResult};

#[derive(Default)]
struct LedgerState {
    balances: HashMap<PrincipalKey, Balance>,
    charges: HashMap<String, PendingCharge>,
}

impl LedgerState {
    fn balance_mut(&mut self, principal: &Principal, free_quota: i32) -> &mut Balance {
        self.balances
            .entry(principal.key())
            .or_insert_with(|| Balance::fresh(free_quota))
    }
}

/// Process-local ledger store
#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a principal's balance
    pub async fn seed_balance(&self, principal: &Principal, balance: Balance) {
        let mut state = self.state.lock().await;
        state.balances.insert(principal.key(), balance);
    }

    /// Balance as stored, without creating a record
    pub async fn peek_balance(&self, principal: &Principal) -> Option<Balance> {
        let state = self.state.lock().await;
        state.balances.get(&principal.key()).copied()
    }

    pub async fn charge_count(&self) -> usize {
        self.state.lock().await.charges.len()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn consume_one(
        &self,
        principal: &Principal,
        free_quota: i32,
    ) -> BillingResult<ConsumeOutcome> {
        let mut state = self.state.lock().await;
        let balance = state.balance_mut(principal, free_quota);
        let source = balance.consume_one();
        Ok(ConsumeOutcome {
            source,
            balance: *balance,
        })
    }

    async fn balance(&self, principal: &Principal, free_quota: i32) -> BillingResult<Balance> {
        let mut state = self.state.lock().await;
        Ok(*state.balance_mut(principal, free_quota))
    }

    async fn credit(
        &self,
        principal: &Principal,
        amount: i32,
        free_quota: i32,
    ) -> BillingResult<Balance> {
        validate_credit_amount(amount)?;
        let mut state = self.state.lock().await;
        let balance = state.balance_mut(principal, free_quota);
        balance.credit(amount)?;
        Ok(*balance)
    }

    async fn insert_pending_charge(
        &self,
        charge: &NewPendingCharge,
    ) -> BillingResult<PendingCharge> {
        let mut state = self.state.lock().await;
        if state.charges.contains_key(&charge.checkout_id) {
            return Err(BillingError::Database(format!(
                "Duplicate checkout id: {}",
                charge.checkout_id
            )));
        }
        let stored = charge.clone().into_charge(OffsetDateTime::now_utc());
        state
            .charges
            .insert(stored.checkout_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn find_charge(&self, checkout_id: &str) -> BillingResult<Option<PendingCharge>> {
        let state = self.state.lock().await;
        Ok(state.charges.get(checkout_id).cloned())
    }

    async fn settle_charge(
        &self,
        checkout_id: &str,
        free_quota: i32,
    ) -> BillingResult<SettlementOutcome> {
        let mut state = self.state.lock().await;

        let Some(charge) = state.charges.get(checkout_id).cloned() else {
            return Ok(SettlementOutcome::UnknownCharge);
        };
        if charge.is_completed() {
            return Ok(SettlementOutcome::AlreadySettled(charge));
        }

        // Credit first so a rejected credit leaves the charge pending
        let owner = charge.owner();
        let balance = {
            let balance = state.balance_mut(&owner, free_quota);
            let mut updated = *balance;
            updated.credit(charge.tokens_granted)?;
            *balance = updated;
            updated
        };

        let mut settled = charge;
        settled.status = ChargeStatus::Completed;
        settled.completed_at = Some(OffsetDateTime::now_utc());
        state
            .charges
            .insert(settled.checkout_id.clone(), settled.clone());

        Ok(SettlementOutcome::Settled {
            charge: settled,
            balance,
        })
    }
}
