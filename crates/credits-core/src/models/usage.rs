//! Usage settlement models
//!
//! Records delivered by the usage source and the outcome of settling a
//! batch of them against the ledger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::grant::GrantUpdate;

/// One externally sourced usage line awaiting settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSettlementRecord {
    /// Monotonically increasing per reporting stream
    pub usage_id: i64,

    pub account_id: String,

    /// Product used to resolve a rate when none is attached
    pub product_id: String,

    /// Quantity not yet reported against credits
    pub unreported_quantity: Decimal,

    /// Price per unit, when the source already priced the record
    #[serde(default)]
    pub rate: Option<Decimal>,

    /// Fully settled in a previous run
    #[serde(default)]
    pub reported: bool,
}

/// Priced contribution of one usage record to an account batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCharge {
    pub usage_id: i64,
    pub amount: Decimal,
}

/// Split of a settled amount across the charges that produced it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageCoverage {
    /// Charges paid in full
    pub covered: Vec<i64>,

    /// Boundary charge paid in part, with its unsettled amount
    pub partial: Option<(i64, Decimal)>,
}

/// Result of one settlement call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementOutcome {
    pub account_id: String,

    /// Cost that was asked for
    pub cost: Decimal,

    /// Cost the ledger could not account for
    pub unsettled: Decimal,

    /// Remaining amounts written by this call
    pub updates: Vec<GrantUpdate>,

    /// Usage ids now fully settled
    #[serde(default)]
    pub covered: Vec<i64>,

    /// Usage id settled in part and its unsettled amount
    #[serde(default)]
    pub partial: Option<(i64, Decimal)>,
}

impl SettlementOutcome {
    /// Amount taken from the ledger
    pub fn settled(&self) -> Decimal {
        self.cost - self.unsettled
    }

    /// Nothing could be applied; the account holds no eligible credit
    pub fn no_credit_available(&self) -> bool {
        self.cost > Decimal::ZERO && self.unsettled == self.cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_outcome_helpers() {
        let outcome = SettlementOutcome {
            account_id: "a".to_string(),
            cost: dec!(12.5),
            unsettled: dec!(12.5),
            updates: vec![],
            covered: vec![],
            partial: None,
        };
        assert!(outcome.no_credit_available());
        assert_eq!(outcome.settled(), Decimal::ZERO);

        let zero = SettlementOutcome {
            cost: Decimal::ZERO,
            unsettled: Decimal::ZERO,
            ..outcome
        };
        assert!(!zero.no_credit_available());
    }

    #[test]
    fn test_record_deserialize_without_rate() {
        let record: UsageSettlementRecord = serde_json::from_str(
            r#"{"usage_id":7,"account_id":"a","product_id":"vm","unreported_quantity":"3"}"#,
        )
        .unwrap();
        assert_eq!(record.rate, None);
        assert!(!record.reported);
        assert_eq!(record.unreported_quantity, dec!(3));
    }
}
