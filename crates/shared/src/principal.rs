//! Billable identities
//!
//! A balance is keyed on exactly one principal: either an anonymous device
//! (free trial, caller-supplied id) or an authenticated account resolved from
//! a verified credential. The two are modelled as a tagged variant so storage
//! and metering branch on the tag instead of sharing an identity base type.

use serde::{Deserialize, Serialize};

/// The kind of principal, as persisted in `principal_kind` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    Device,
    Account,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalKind::Device => "device",
            PrincipalKind::Account => "account",
        }
    }
}

impl std::fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PrincipalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "device" => Ok(PrincipalKind::Device),
            "account" => Ok(PrincipalKind::Account),
            other => Err(format!("unknown principal kind: {}", other)),
        }
    }
}

/// The identity a balance is keyed on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Principal {
    /// Anonymous device. Trivially spoofable; accepted for the free trial.
    Device { device_id: String },
    /// Authenticated account. `contact` is for display only and never
    /// participates in the balance key.
    Account {
        account_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        contact: Option<String>,
    },
}

impl Principal {
    pub fn device(device_id: impl Into<String>) -> Self {
        Principal::Device {
            device_id: device_id.into(),
        }
    }

    pub fn account(account_id: impl Into<String>, contact: Option<String>) -> Self {
        Principal::Account {
            account_id: account_id.into(),
            contact,
        }
    }

    pub fn kind(&self) -> PrincipalKind {
        match self {
            Principal::Device { .. } => PrincipalKind::Device,
            Principal::Account { .. } => PrincipalKind::Account,
        }
    }

    /// Identifier within the principal's kind (device id or account id)
    pub fn id(&self) -> &str {
        match self {
            Principal::Device { device_id } => device_id,
            Principal::Account { account_id, .. } => account_id,
        }
    }

    /// Storage key: kind plus id, so a device and an account that happen to
    /// share an identifier never share a balance.
    pub fn key(&self) -> PrincipalKey {
        PrincipalKey {
            kind: self.kind(),
            id: self.id().to_string(),
        }
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Unique key of a balance record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalKey {
    pub kind: PrincipalKind,
    pub id: String,
}

impl PrincipalKey {
    /// Rebuild a principal from its key. Account contact details are not
    /// stored, so they come back empty.
    pub fn into_principal(self) -> Principal {
        match self.kind {
            PrincipalKind::Device => Principal::Device { device_id: self.id },
            PrincipalKind::Account => Principal::Account {
                account_id: self.id,
                contact: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_and_account_keys_never_collide() {
        let device = Principal::device("abc");
        let account = Principal::account("abc", Some("+15550100".to_string()));

        assert_ne!(device.key(), account.key());
        assert_eq!(device.id(), account.id());
    }

    #[test]
    fn test_contact_is_not_part_of_key() {
        let a = Principal::account("acct-1", Some("+15550100".to_string()));
        let b = Principal::account("acct-1", None);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_principal_serializes_with_kind_tag() {
        let json = serde_json::to_value(Principal::device("dev-1")).unwrap();
        assert_eq!(json["kind"], "device");
        assert_eq!(json["device_id"], "dev-1");

        let json = serde_json::to_value(Principal::account("42", Some("+1555".into()))).unwrap();
        assert_eq!(json["kind"], "account");
        assert_eq!(json["account_id"], "42");
        assert_eq!(json["contact"], "+1555");
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in [PrincipalKind::Device, PrincipalKind::Account] {
            assert_eq!(kind.as_str().parse::<PrincipalKind>().unwrap(), kind);
        }
        assert!("org".parse::<PrincipalKind>().is_err());
    }

    #[test]
    fn test_key_into_principal_drops_contact() {
        let principal = Principal::account("acct-9", Some("+1555".to_string()));
        let rebuilt = principal.key().into_principal();
        assert_eq!(rebuilt, Principal::account("acct-9", None));
    }
}
