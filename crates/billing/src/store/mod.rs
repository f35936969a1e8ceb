//! Ledger persistence
//!
//! Balances and pending charges live behind [`LedgerStore`]. Production uses
//! PostgreSQL with per-principal row locks; tests and local development use
//! the in-memory store, which serialises every operation behind one mutex.

mod memory;
mod postgres;

pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use ocrgate_shared::Principal;

use crate::balance::{Balance, TokenSource};
use crate::charge::{NewPendingCharge, PendingCharge};
use crate::error::BillingResult;

/// Result of an atomic consume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOutcome {
    /// `None` when nothing was available and nothing changed
    pub source: Option<TokenSource>,
    /// Balance after the operation
    pub balance: Balance,
}

/// Result of settling a pending charge
#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    /// Charge flipped to completed and its owner credited
    Settled {
        charge: PendingCharge,
        balance: Balance,
    },
    /// No charge with that checkout id
    UnknownCharge,
    /// Charge was already completed; nothing changed
    AlreadySettled(PendingCharge),
}

/// Persistence seam for balances and pending charges.
///
/// Every method is atomic on its own. Balance records are created on first
/// touch with `free_quota` free uses.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Draw one unit from the principal's balance, free uses first
    async fn consume_one(
        &self,
        principal: &Principal,
        free_quota: i32,
    ) -> BillingResult<ConsumeOutcome>;

    /// Current balance
    async fn balance(&self, principal: &Principal, free_quota: i32) -> BillingResult<Balance>;

    /// Add `amount` paid tokens
    async fn credit(
        &self,
        principal: &Principal,
        amount: i32,
        free_quota: i32,
    ) -> BillingResult<Balance>;

    /// Record a new charge in `pending` status
    async fn insert_pending_charge(&self, charge: &NewPendingCharge)
        -> BillingResult<PendingCharge>;

    async fn find_charge(&self, checkout_id: &str) -> BillingResult<Option<PendingCharge>>;

    /// Flip a pending charge to completed and credit its owner, as one unit
    async fn settle_charge(
        &self,
        checkout_id: &str,
        free_quota: i32,
    ) -> BillingResult<SettlementOutcome>;
}
