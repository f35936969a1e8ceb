//! Pending charges (one per checkout attempt)

use ocrgate_shared::{Principal, PrincipalKey, PrincipalKind};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Charge lifecycle. `Pending -> Completed` is the only transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Pending,
    Completed,
}

impl ChargeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeStatus::Pending => "pending",
            ChargeStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for ChargeStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChargeStatus::Pending),
            "completed" => Ok(ChargeStatus::Completed),
            other => Err(BillingError::Internal(format!(
                "Unknown charge status: {}",
                other
            ))),
        }
    }
}

/// A persisted checkout attempt
#[derive(Debug, Clone, Serialize)]
pub struct PendingCharge {
    pub id: Uuid,
    pub checkout_id: String,
    pub principal: PrincipalKey,
    pub product_sku: String,
    pub tokens_granted: i32,
    pub amount_cents: i32,
    pub currency: String,
    pub status: ChargeStatus,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl PendingCharge {
    pub fn is_completed(&self) -> bool {
        self.status == ChargeStatus::Completed
    }

    pub fn owner(&self) -> Principal {
        self.principal.clone().into_principal()
    }
}

/// Values needed to record a new pending charge
#[derive(Debug, Clone)]
pub struct NewPendingCharge {
    pub checkout_id: String,
    pub principal: PrincipalKey,
    pub product_sku: String,
    pub tokens_granted: i32,
    pub amount_cents: i32,
    pub currency: String,
}

impl NewPendingCharge {
    pub(crate) fn into_charge(self, now: OffsetDateTime) -> PendingCharge {
        PendingCharge {
            id: Uuid::new_v4(),
            checkout_id: self.checkout_id,
            principal: self.principal,
            product_sku: self.product_sku,
            tokens_granted: self.tokens_granted,
            amount_cents: self.amount_cents,
            currency: self.currency,
            status: ChargeStatus::Pending,
            created_at: now,
            completed_at: None,
        }
    }
}

/// Split a principal key into the `(device_id, account_id)` column pair;
/// exactly one side is populated.
pub(crate) fn owner_columns(key: &PrincipalKey) -> (Option<&str>, Option<&str>) {
    match key.kind {
        PrincipalKind::Device => (Some(key.id.as_str()), None),
        PrincipalKind::Account => (None, Some(key.id.as_str())),
    }
}

/// Inverse of [`owner_columns`]
pub(crate) fn owner_from_columns(
    device_id: Option<String>,
    account_id: Option<String>,
) -> BillingResult<PrincipalKey> {
    match (device_id, account_id) {
        (Some(id), None) => Ok(PrincipalKey {
            kind: PrincipalKind::Device,
            id,
        }),
        (None, Some(id)) => Ok(PrincipalKey {
            kind: PrincipalKind::Account,
            id,
        }),
        _ => Err(BillingError::Internal(
            "Pending charge must have exactly one owner".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_columns_round_trip() {
        let device = Principal::device("dev-1").key();
        let (d, a) = owner_columns(&device);
        assert_eq!((d, a), (Some("dev-1"), None));
        let back = owner_from_columns(d.map(String::from), a.map(String::from)).unwrap();
        assert_eq!(back, device);

        let account = Principal::account("acct-1", None).key();
        let (d, a) = owner_columns(&account);
        assert_eq!((d, a), (None, Some("acct-1")));
    }

    #[test]
    fn test_owner_from_columns_requires_exactly_one() {
        assert!(owner_from_columns(None, None).is_err());
        assert!(owner_from_columns(Some("a".into()), Some("b".into())).is_err());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("pending".parse::<ChargeStatus>().unwrap(), ChargeStatus::Pending);
        assert_eq!(
            "completed".parse::<ChargeStatus>().unwrap(),
            ChargeStatus::Completed
        );
        assert!("refunded".parse::<ChargeStatus>().is_err());
    }
}
