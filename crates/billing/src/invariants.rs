//! Ledger Invariants Module
//!
//! Runnable consistency checks over balances and pending charges. Safe to
//! run at any time, including after a webhook replay.
//!
//! Checks only read, never write. Each violation carries enough context to
//! find the offending rows.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::catalog::find_product;
use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Affected balances or charges, as `kind:id` or `checkout:<id>`
    pub subjects: Vec<String>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Balances may be wrong
    Critical,
    /// Data inconsistency that needs attention
    High,
    /// Should investigate
    Medium,
    /// Informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

impl InvariantCheckSummary {
    fn from_violations(
        checked_at: OffsetDateTime,
        checks_run: usize,
        violations: Vec<InvariantViolation>,
    ) -> Self {
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        Self {
            checked_at,
            checks_run,
            checks_passed: checks_run.saturating_sub(checks_failed),
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NegativeBalanceRow {
    principal_kind: String,
    principal_id: String,
    free_uses_remaining: i32,
    paid_tokens: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct ChargeTimestampRow {
    checkout_id: String,
    status: String,
    completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, sqlx::FromRow)]
struct ChargeOwnerRow {
    checkout_id: String,
    device_id: Option<String>,
    account_id: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct ChargeCatalogRow {
    checkout_id: String,
    product_sku: String,
    tokens_granted: i32,
    amount_cents: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct OrphanSettlementRow {
    checkout_id: String,
    principal_kind: String,
    principal_id: String,
}

/// Service for running ledger invariant checks
#[derive(Clone)]
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_non_negative_balances().await?);
        violations.extend(self.check_completed_charges_have_timestamp().await?);
        violations.extend(self.check_pending_charges_have_no_completion().await?);
        violations.extend(self.check_charge_single_owner().await?);
        violations.extend(self.check_charge_matches_catalog().await?);
        violations.extend(self.check_settled_owner_has_balance().await?);

        let summary =
            InvariantCheckSummary::from_violations(now, Self::available_checks().len(), violations);
        if !summary.healthy {
            tracing::warn!(
                checks_failed = summary.checks_failed,
                violations = summary.violations.len(),
                "Ledger invariant violations found"
            );
        }
        Ok(summary)
    }

    /// Balance counters never go negative
    async fn check_non_negative_balances(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<NegativeBalanceRow> = sqlx::query_as(
            r#"
            SELECT principal_kind, principal_id, free_uses_remaining, paid_tokens
            FROM balances
            WHERE free_uses_remaining < 0 OR paid_tokens < 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "non_negative_balances".to_string(),
                subjects: vec![format!("{}:{}", row.principal_kind, row.principal_id)],
                description: format!(
                    "Balance has negative counters (free {}, paid {})",
                    row.free_uses_remaining, row.paid_tokens
                ),
                context: serde_json::json!({
                    "free_uses_remaining": row.free_uses_remaining,
                    "paid_tokens": row.paid_tokens,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Completed charges record when they completed
    async fn check_completed_charges_have_timestamp(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ChargeTimestampRow> = sqlx::query_as(
            r#"
            SELECT checkout_id, status, completed_at
            FROM pending_charges
            WHERE status = 'completed' AND completed_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| timestamp_violation("completed_charges_have_timestamp", row))
            .collect())
    }

    /// Pending charges have not completed
    async fn check_pending_charges_have_no_completion(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ChargeTimestampRow> = sqlx::query_as(
            r#"
            SELECT checkout_id, status, completed_at
            FROM pending_charges
            WHERE status = 'pending' AND completed_at IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| timestamp_violation("pending_charges_have_no_completion", row))
            .collect())
    }

    /// Every charge is owned by exactly one of device or account
    async fn check_charge_single_owner(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ChargeOwnerRow> = sqlx::query_as(
            r#"
            SELECT checkout_id, device_id, account_id
            FROM pending_charges
            WHERE (device_id IS NULL) = (account_id IS NULL)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "charge_single_owner".to_string(),
                subjects: vec![format!("checkout:{}", row.checkout_id)],
                description: "Charge must have exactly one owning principal".to_string(),
                context: serde_json::json!({
                    "device_id": row.device_id,
                    "account_id": row.account_id,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Charge token counts and prices agree with the product catalog
    async fn check_charge_matches_catalog(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ChargeCatalogRow> = sqlx::query_as(
            r#"
            SELECT checkout_id, product_sku, tokens_granted, amount_cents
            FROM pending_charges
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(catalog_violation).collect())
    }

    /// Every settled charge's owner has a balance record
    async fn check_settled_owner_has_balance(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<OrphanSettlementRow> = sqlx::query_as(
            r#"
            SELECT
                c.checkout_id,
                CASE WHEN c.device_id IS NOT NULL THEN 'device' ELSE 'account' END AS principal_kind,
                COALESCE(c.device_id, c.account_id) AS principal_id
            FROM pending_charges c
            LEFT JOIN balances b
              ON b.principal_kind = CASE WHEN c.device_id IS NOT NULL THEN 'device' ELSE 'account' END
             AND b.principal_id = COALESCE(c.device_id, c.account_id)
            WHERE c.status = 'completed' AND b.id IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "settled_owner_has_balance".to_string(),
                subjects: vec![
                    format!("checkout:{}", row.checkout_id),
                    format!("{}:{}", row.principal_kind, row.principal_id),
                ],
                description: "Completed charge credited a principal with no balance record"
                    .to_string(),
                context: serde_json::json!({
                    "checkout_id": row.checkout_id,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "non_negative_balances" => self.check_non_negative_balances().await,
            "completed_charges_have_timestamp" => {
                self.check_completed_charges_have_timestamp().await
            }
            "pending_charges_have_no_completion" => {
                self.check_pending_charges_have_no_completion().await
            }
            "charge_single_owner" => self.check_charge_single_owner().await,
            "charge_matches_catalog" => self.check_charge_matches_catalog().await,
            "settled_owner_has_balance" => self.check_settled_owner_has_balance().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "non_negative_balances",
            "completed_charges_have_timestamp",
            "pending_charges_have_no_completion",
            "charge_single_owner",
            "charge_matches_catalog",
            "settled_owner_has_balance",
        ]
    }
}

fn timestamp_violation(invariant: &str, row: ChargeTimestampRow) -> InvariantViolation {
    InvariantViolation {
        invariant: invariant.to_string(),
        subjects: vec![format!("checkout:{}", row.checkout_id)],
        description: format!(
            "Charge status '{}' disagrees with completed_at ({:?})",
            row.status, row.completed_at
        ),
        context: serde_json::json!({
            "status": row.status,
            "has_completed_at": row.completed_at.is_some(),
        }),
        severity: ViolationSeverity::High,
    }
}

fn catalog_violation(row: ChargeCatalogRow) -> Option<InvariantViolation> {
    let subjects = vec![format!("checkout:{}", row.checkout_id)];
    let Some(product) = find_product(&row.product_sku) else {
        return Some(InvariantViolation {
            invariant: "charge_matches_catalog".to_string(),
            subjects,
            description: format!("Charge references unknown SKU '{}'", row.product_sku),
            context: serde_json::json!({ "product_sku": row.product_sku }),
            severity: ViolationSeverity::High,
        });
    };

    if product.tokens == row.tokens_granted && product.price_cents == row.amount_cents {
        return None;
    }

    Some(InvariantViolation {
        invariant: "charge_matches_catalog".to_string(),
        subjects,
        description: format!(
            "Charge for '{}' grants {} tokens at {} cents, catalog says {} at {}",
            row.product_sku,
            row.tokens_granted,
            row.amount_cents,
            product.tokens,
            product.price_cents
        ),
        context: serde_json::json!({
            "product_sku": row.product_sku,
            "tokens_granted": row.tokens_granted,
            "amount_cents": row.amount_cents,
        }),
        severity: ViolationSeverity::Medium,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 6);
        assert!(checks.contains(&"non_negative_balances"));
        assert!(checks.contains(&"settled_owner_has_balance"));
    }

    #[test]
    fn test_catalog_violation_detection() {
        let matching = ChargeCatalogRow {
            checkout_id: "c1".to_string(),
            product_sku: "ocr_10".to_string(),
            tokens_granted: 10,
            amount_cents: 799,
        };
        assert!(catalog_violation(matching).is_none());

        let wrong_tokens = ChargeCatalogRow {
            checkout_id: "c2".to_string(),
            product_sku: "ocr_10".to_string(),
            tokens_granted: 100,
            amount_cents: 799,
        };
        let violation = catalog_violation(wrong_tokens).unwrap();
        assert_eq!(violation.severity, ViolationSeverity::Medium);

        let unknown = ChargeCatalogRow {
            checkout_id: "c3".to_string(),
            product_sku: "ocr_999".to_string(),
            tokens_granted: 1,
            amount_cents: 1,
        };
        assert_eq!(
            catalog_violation(unknown).unwrap().severity,
            ViolationSeverity::High
        );
    }

    #[test]
    fn test_summary_counts_failed_checks_once() {
        let v = |name: &str| InvariantViolation {
            invariant: name.to_string(),
            subjects: vec![],
            description: String::new(),
            context: serde_json::Value::Null,
            severity: ViolationSeverity::Low,
        };
        let summary = InvariantCheckSummary::from_violations(
            OffsetDateTime::now_utc(),
            6,
            vec![v("a"), v("a"), v("b")],
        );
        assert_eq!(summary.checks_failed, 2);
        assert_eq!(summary.checks_passed, 4);
        assert!(!summary.healthy);
    }
}
