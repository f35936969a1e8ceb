//! Balance arithmetic
//!
//! Every store applies the same rules through [`Balance`]: free uses are
//! drawn before paid tokens, exactly one unit per consume, and neither
//! counter ever goes below zero.

use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};

/// Which counter a consumed unit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    Free,
    Paid,
}

/// Counters of one balance record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub free_uses_remaining: i32,
    pub paid_tokens: i32,
}

impl Balance {
    /// Balance of a principal seen for the first time
    pub fn fresh(free_quota: i32) -> Self {
        Self {
            free_uses_remaining: free_quota.max(0),
            paid_tokens: 0,
        }
    }

    pub fn total_available(&self) -> i64 {
        i64::from(self.free_uses_remaining) + i64::from(self.paid_tokens)
    }

    pub fn is_exhausted(&self) -> bool {
        self.free_uses_remaining <= 0 && self.paid_tokens <= 0
    }

    /// Take one unit, free first. Returns `None` and leaves the counters
    /// untouched when nothing is available.
    pub fn consume_one(&mut self) -> Option<TokenSource> {
        if self.free_uses_remaining > 0 {
            self.free_uses_remaining -= 1;
            return Some(TokenSource::Free);
        }
        if self.paid_tokens > 0 {
            self.paid_tokens -= 1;
            return Some(TokenSource::Paid);
        }
        None
    }

    /// Add paid tokens
    pub fn credit(&mut self, amount: i32) -> BillingResult<()> {
        validate_credit_amount(amount)?;
        self.paid_tokens = self.paid_tokens.checked_add(amount).ok_or_else(|| {
            BillingError::InvalidInput(format!(
                "Credit of {} would overflow paid token balance of {}",
                amount, self.paid_tokens
            ))
        })?;
        Ok(())
    }
}

/// Credit amounts must be strictly positive
pub fn validate_credit_amount(amount: i32) -> BillingResult<()> {
    if amount <= 0 {
        return Err(BillingError::InvalidInput(format!(
            "Credit amount must be a positive integer, got {}",
            amount
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_balance_has_full_quota() {
        let balance = Balance::fresh(3);
        assert_eq!(balance.free_uses_remaining, 3);
        assert_eq!(balance.paid_tokens, 0);
        assert_eq!(balance.total_available(), 3);
    }

    #[test]
    fn test_negative_quota_is_clamped() {
        assert_eq!(Balance::fresh(-1).free_uses_remaining, 0);
    }

    #[test]
    fn test_consume_prefers_free_uses() {
        let mut balance = Balance {
            free_uses_remaining: 1,
            paid_tokens: 5,
        };
        assert_eq!(balance.consume_one(), Some(TokenSource::Free));
        assert_eq!(balance.free_uses_remaining, 0);
        assert_eq!(balance.paid_tokens, 5);

        assert_eq!(balance.consume_one(), Some(TokenSource::Paid));
        assert_eq!(balance.paid_tokens, 4);
    }

    #[test]
    fn test_consume_on_empty_balance_is_noop() {
        let mut balance = Balance {
            free_uses_remaining: 0,
            paid_tokens: 0,
        };
        assert_eq!(balance.consume_one(), None);
        assert_eq!(balance, Balance {
            free_uses_remaining: 0,
            paid_tokens: 0,
        });
        assert!(balance.is_exhausted());
    }

    #[test]
    fn test_credit_rejects_non_positive_amounts() {
        let mut balance = Balance::fresh(3);
        assert!(matches!(balance.credit(0), Err(BillingError::InvalidInput(_))));
        assert!(matches!(balance.credit(-4), Err(BillingError::InvalidInput(_))));
        assert_eq!(balance, Balance::fresh(3));
    }

    #[test]
    fn test_credit_overflow_is_rejected() {
        let mut balance = Balance {
            free_uses_remaining: 0,
            paid_tokens: i32::MAX - 1,
        };
        assert!(balance.credit(2).is_err());
        assert_eq!(balance.paid_tokens, i32::MAX - 1);
    }

    #[test]
    fn test_total_does_not_overflow() {
        let balance = Balance {
            free_uses_remaining: i32::MAX,
            paid_tokens: i32::MAX,
        };
        assert_eq!(balance.total_available(), 2 * i64::from(i32::MAX));
    }
}
