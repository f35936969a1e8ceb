use async_trait::async_trait;
use ocrgate_shared::{Principal, PrincipalKey};
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{ConsumeOutcome, LedgerStore, SettlementOutcome};
use crate::balance::{validate_credit_amount, Balance};
use crate::charge::{
    owner_columns, owner_from_columns, ChargeStatus, NewPendingCharge, PendingCharge,
};
use crate::error::{BillingError, BillingResult};

/// Row type for `pending_charges`
#[derive(Debug, sqlx::FromRow)]
struct ChargeRow {
    id: Uuid,
    checkout_id: String,
    device_id: Option<String>,
    account_id: Option<String>,
    product_sku: String,
    tokens_granted: i32,
    amount_cents: i32,
    currency: String,
    status: String,
    created_at: OffsetDateTime,
    completed_at: Option<OffsetDateTime>,
}

impl TryFrom<ChargeRow> for PendingCharge {
    type Error = BillingError;

    fn try_from(row: ChargeRow) -> Result<Self, Self::Error> {
        Ok(PendingCharge {
            id: row.id,
            checkout_id: row.checkout_id,
            principal: owner_from_columns(row.device_id, row.account_id)?,
            product_sku: row.product_sku,
            tokens_granted: row.tokens_granted,
            amount_cents: row.amount_cents,
            currency: row.currency,
            status: row.status.parse()?,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

const CHARGE_COLUMNS: &str = "id, checkout_id, device_id, account_id, product_sku, \
     tokens_granted, amount_cents, currency, status, created_at, completed_at";

/// PostgreSQL-backed ledger store
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Get-or-create the balance row and lock it for the rest of the transaction.
///
/// The insert-if-absent runs inside the caller's transaction so two first
/// requests for the same principal cannot both create a record.
async fn lock_balance(
    conn: &mut PgConnection,
    key: &PrincipalKey,
    free_quota: i32,
) -> BillingResult<Balance> {
    sqlx::query(
        r#"
        INSERT INTO balances (id, principal_kind, principal_id, free_uses_remaining, paid_tokens)
        VALUES ($1, $2, $3, $4, 0)
        ON CONFLICT (principal_kind, principal_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(key.kind.as_str())
    .bind(&key.id)
    .bind(free_quota.max(0))
    .execute(&mut *conn)
    .await?;

    let (free_uses_remaining, paid_tokens): (i32, i32) = sqlx::query_as(
        r#"
        SELECT free_uses_remaining, paid_tokens
        FROM balances
        WHERE principal_kind = $1 AND principal_id = $2
        FOR UPDATE
        "#,
    )
    .bind(key.kind.as_str())
    .bind(&key.id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(Balance {
        free_uses_remaining,
        paid_tokens,
    })
}

async fn write_balance(
    conn: &mut PgConnection,
    key: &PrincipalKey,
    balance: &Balance,
) -> BillingResult<()> {
    sqlx::query(
        r#"
        UPDATE balances
        SET free_uses_remaining = $3, paid_tokens = $4, updated_at = NOW()
        WHERE principal_kind = $1 AND principal_id = $2
        "#,
    )
    .bind(key.kind.as_str())
    .bind(&key.id)
    .bind(balance.free_uses_remaining)
    .bind(balance.paid_tokens)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn consume_one(
        &self,
        principal: &Principal,
        free_quota: i32,
    ) -> BillingResult<ConsumeOutcome> {
        let key = principal.key();
        let mut tx = self.pool.begin().await?;

        let mut balance = lock_balance(&mut tx, &key, free_quota).await?;
        let source = balance.consume_one();
        if source.is_some() {
            write_balance(&mut tx, &key, &balance).await?;
        }
        tx.commit().await?;

        Ok(ConsumeOutcome { source, balance })
    }

    async fn balance(&self, principal: &Principal, free_quota: i32) -> BillingResult<Balance> {
        let key = principal.key();
        let mut tx = self.pool.begin().await?;
        let balance = lock_balance(&mut tx, &key, free_quota).await?;
        tx.commit().await?;
        Ok(balance)
    }

    async fn credit(
        &self,
        principal: &Principal,
        amount: i32,
        free_quota: i32,
    ) -> BillingResult<Balance> {
        validate_credit_amount(amount)?;
        let key = principal.key();
        let mut tx = self.pool.begin().await?;

        let mut balance = lock_balance(&mut tx, &key, free_quota).await?;
        balance.credit(amount)?;
        write_balance(&mut tx, &key, &balance).await?;
        tx.commit().await?;

        Ok(balance)
    }

    async fn insert_pending_charge(
        &self,
        charge: &NewPendingCharge,
    ) -> BillingResult<PendingCharge> {
        let (device_id, account_id) = owner_columns(&charge.principal);

        let row: ChargeRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO pending_charges
                (id, checkout_id, device_id, account_id, product_sku, tokens_granted,
                 amount_cents, currency, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending')
            RETURNING {}
            "#,
            CHARGE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&charge.checkout_id)
        .bind(device_id)
        .bind(account_id)
        .bind(&charge.product_sku)
        .bind(charge.tokens_granted)
        .bind(charge.amount_cents)
        .bind(&charge.currency)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn find_charge(&self, checkout_id: &str) -> BillingResult<Option<PendingCharge>> {
        let row: Option<ChargeRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pending_charges WHERE checkout_id = $1",
            CHARGE_COLUMNS
        ))
        .bind(checkout_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PendingCharge::try_from).transpose()
    }

    async fn settle_charge(
        &self,
        checkout_id: &str,
        free_quota: i32,
    ) -> BillingResult<SettlementOutcome> {
        let mut tx = self.pool.begin().await?;

        // Row lock serialises concurrent deliveries of the same webhook
        let row: Option<ChargeRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pending_charges WHERE checkout_id = $1 FOR UPDATE",
            CHARGE_COLUMNS
        ))
        .bind(checkout_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(SettlementOutcome::UnknownCharge);
        };
        let mut charge = PendingCharge::try_from(row)?;
        if charge.is_completed() {
            tx.rollback().await?;
            return Ok(SettlementOutcome::AlreadySettled(charge));
        }

        let completed_at: OffsetDateTime = sqlx::query_scalar(
            r#"
            UPDATE pending_charges
            SET status = 'completed', completed_at = NOW()
            WHERE id = $1
            RETURNING completed_at
            "#,
        )
        .bind(charge.id)
        .fetch_one(&mut *tx)
        .await?;

        let mut balance = lock_balance(&mut tx, &charge.principal, free_quota).await?;
        balance.credit(charge.tokens_granted)?;
        write_balance(&mut tx, &charge.principal, &balance).await?;

        tx.commit().await?;

        charge.status = ChargeStatus::Completed;
        charge.completed_at = Some(completed_at);
        Ok(SettlementOutcome::Settled { charge, balance })
    }
}

/// Tests against a live PostgreSQL. Skipped when `DATABASE_URL` is unset.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::TokenSource;
    use std::sync::Arc;
    use tokio::sync::Barrier;

    async fn setup_test_store() -> Option<PgLedgerStore> {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set, skipping PostgreSQL ledger test");
            return None;
        };

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(25)
            .connect(&database_url)
            .await
            .expect("Failed to connect to test database");
        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .expect("Failed to apply migrations");

        Some(PgLedgerStore::new(pool))
    }

    fn unique(prefix: &str) -> String {
        format!("{}-{}", prefix, Uuid::new_v4())
    }

    fn new_charge(checkout_id: &str, principal: &Principal, tokens: i32) -> NewPendingCharge {
        NewPendingCharge {
            checkout_id: checkout_id.to_string(),
            principal: principal.key(),
            product_sku: "ocr_10".to_string(),
            tokens_granted: tokens,
            amount_cents: 799,
            currency: "USD".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fresh_principal_is_upserted() {
        let Some(store) = setup_test_store().await else {
            return;
        };
        let device = Principal::device(unique("dev"));

        assert_eq!(store.balance(&device, 3).await.unwrap(), Balance::fresh(3));

        let outcome = store.consume_one(&device, 3).await.unwrap();
        assert_eq!(outcome.source, Some(TokenSource::Free));
        assert_eq!(outcome.balance.free_uses_remaining, 2);

        // Quota changes do not rewrite an existing row
        assert_eq!(
            store.balance(&device, 10).await.unwrap().free_uses_remaining,
            2
        );

        let balance = store.credit(&device, 5, 3).await.unwrap();
        assert_eq!(balance, Balance {
            free_uses_remaining: 2,
            paid_tokens: 5,
        });
    }

    #[tokio::test]
    async fn test_concurrent_consumes_on_fresh_principal() {
        let Some(store) = setup_test_store().await else {
            return;
        };
        let device = Principal::device(unique("dev-race"));
        let barrier = Arc::new(Barrier::new(20));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            let device = device.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                store.consume_one(&device, 3).await.unwrap().source.is_some()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 3);
        let balance = store.balance(&device, 3).await.unwrap();
        assert_eq!(balance.total_available(), 0);
    }

    #[tokio::test]
    async fn test_last_unit_goes_to_one_caller() {
        let Some(store) = setup_test_store().await else {
            return;
        };
        let device = Principal::device(unique("dev-last"));
        store.consume_one(&device, 1).await.unwrap();
        store.credit(&device, 1, 1).await.unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let store = store.clone();
            let device = device.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                store.consume_one(&device, 1).await.unwrap().source
            }));
        }

        let mut sources = Vec::new();
        for handle in handles {
            sources.push(handle.await.unwrap());
        }
        assert_eq!(sources.iter().filter(|s| s.is_some()).count(), 1);
        assert!(sources.contains(&Some(TokenSource::Paid)));
        assert_eq!(store.balance(&device, 1).await.unwrap().paid_tokens, 0);
    }

    #[tokio::test]
    async fn test_duplicate_settlement_credits_once() {
        let Some(store) = setup_test_store().await else {
            return;
        };
        let account = Principal::account(unique("acct"), None);
        let checkout_id = unique("chk");
        let inserted = store
            .insert_pending_charge(&new_charge(&checkout_id, &account, 10))
            .await
            .unwrap();
        assert_eq!(inserted.status, ChargeStatus::Pending);
        assert!(inserted.completed_at.is_none());

        let barrier = Arc::new(Barrier::new(5));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let store = store.clone();
            let checkout_id = checkout_id.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                store.settle_charge(&checkout_id, 3).await.unwrap()
            }));
        }

        let mut settled = 0;
        for handle in handles {
            match handle.await.unwrap() {
                SettlementOutcome::Settled { .. } => settled += 1,
                SettlementOutcome::AlreadySettled(charge) => assert!(charge.is_completed()),
                SettlementOutcome::UnknownCharge => panic!("charge should exist"),
            }
        }

        assert_eq!(settled, 1);
        assert_eq!(store.balance(&account, 3).await.unwrap().paid_tokens, 10);
        let charge = store.find_charge(&checkout_id).await.unwrap().unwrap();
        assert!(charge.is_completed());
        assert!(charge.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_checkout_id_is_rejected() {
        let Some(store) = setup_test_store().await else {
            return;
        };
        let device = Principal::device(unique("dev"));
        let checkout_id = unique("chk");

        store
            .insert_pending_charge(&new_charge(&checkout_id, &device, 3))
            .await
            .unwrap();
        assert!(matches!(
            store
                .insert_pending_charge(&new_charge(&checkout_id, &device, 3))
                .await,
            Err(BillingError::Database(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_credit_leaves_charge_pending() {
        let Some(store) = setup_test_store().await else {
            return;
        };
        let device = Principal::device(unique("dev-full"));
        let checkout_id = unique("chk");

        store.balance(&device, 0).await.unwrap();
        sqlx::query(
            "UPDATE balances SET paid_tokens = $3 WHERE principal_kind = $1 AND principal_id = $2",
        )
        .bind("device")
        .bind(device.id())
        .bind(i32::MAX)
        .execute(&store.pool)
        .await
        .unwrap();
        store
            .insert_pending_charge(&new_charge(&checkout_id, &device, 10))
            .await
            .unwrap();

        assert!(store.settle_charge(&checkout_id, 0).await.is_err());

        let charge = store.find_charge(&checkout_id).await.unwrap().unwrap();
        assert_eq!(charge.status, ChargeStatus::Pending);
        assert!(charge.completed_at.is_none());
        assert_eq!(
            store.balance(&device, 0).await.unwrap().paid_tokens,
            i32::MAX
        );
    }

    #[tokio::test]
    async fn test_unknown_charge() {
        let Some(store) = setup_test_store().await else {
            return;
        };
        assert!(store.find_charge(&unique("missing")).await.unwrap().is_none());
        assert!(matches!(
            store.settle_charge(&unique("missing"), 3).await.unwrap(),
            SettlementOutcome::UnknownCharge
        ));
    }
}
