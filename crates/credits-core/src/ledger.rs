//! Ledger planning
//!
//! Pure functions that decide how grant balances change. Stores run them
//! against the rows they locked and persist the resulting updates, so every
//! store applies exactly the same consumption rules.

use rust_decimal::Decimal;

use crate::error::AppError;
use crate::models::{CreditGrant, GrantUpdate, UsageCharge, UsageCoverage};
use crate::AppResult;

/// Grant updates and leftover cost of one settlement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementPlan {
    pub updates: Vec<GrantUpdate>,
    pub unsettled: Decimal,
}

/// Plan the consumption of `cost` against `grants`
///
/// `grants` must be the eligible grants of one account, ordered by
/// ascending creation time. Grants are consumed oldest first:
///
/// - an over-drawn grant is zeroed and its over-draft carried forward with
///   the cost, so the debt moves towards the newest grant
/// - a grant with credit covers what it can and carries the rest
/// - the last grant absorbs whatever is left, going negative if needed
///
/// With no grants nothing is planned and the whole cost stays unsettled.
///
/// # Errors
///
/// Returns `AppError::InvalidAmount` when a balance would leave the
/// representable decimal range. Nothing is planned in that case.
pub fn plan_settlement(grants: &[CreditGrant], cost: Decimal) -> AppResult<SettlementPlan> {
    let mut plan = SettlementPlan {
        updates: Vec::new(),
        unsettled: cost,
    };
    let Some(last) = grants.len().checked_sub(1) else {
        return Ok(plan);
    };
    let overflow = |grant: &CreditGrant| {
        AppError::InvalidAmount(format!(
            "settling {} against grant {} overflows its balance",
            cost, grant.id
        ))
    };

    let mut carried = cost;
    for (index, grant) in grants.iter().enumerate() {
        if carried <= Decimal::ZERO {
            break;
        }
        let remaining = grant.remaining_amount;
        let is_last = index == last;

        let new_remaining = if is_last {
            let absorbed = remaining
                .checked_sub(carried)
                .ok_or_else(|| overflow(grant))?;
            carried = Decimal::ZERO;
            absorbed
        } else if remaining < Decimal::ZERO {
            carried = carried
                .checked_add(remaining.abs())
                .ok_or_else(|| overflow(grant))?;
            Decimal::ZERO
        } else if remaining >= carried {
            let left = remaining - carried;
            carried = Decimal::ZERO;
            left
        } else {
            carried -= remaining;
            Decimal::ZERO
        };

        if new_remaining != remaining {
            plan.updates.push(GrantUpdate {
                grant_id: grant.id,
                remaining_amount: new_remaining,
            });
        }
    }

    plan.unsettled = carried;
    Ok(plan)
}

/// Plan moving older over-drafts onto the newest grant
///
/// `grants` are all grants of one account ordered by ascending creation
/// time. While the newest grant still holds credit, each older over-drawn
/// grant is set to zero and its over-draft deducted from the newest one.
/// Returns no updates when there is nothing to move.
pub fn plan_rebalance(grants: &[CreditGrant]) -> Vec<GrantUpdate> {
    let Some((newest, older)) = grants.split_last() else {
        return Vec::new();
    };

    let mut updates = Vec::new();
    let mut newest_remaining = newest.remaining_amount;
    for grant in older {
        if newest_remaining <= Decimal::ZERO {
            break;
        }
        if grant.remaining_amount < Decimal::ZERO {
            newest_remaining += grant.remaining_amount;
            updates.push(GrantUpdate {
                grant_id: grant.id,
                remaining_amount: Decimal::ZERO,
            });
        }
    }

    if !updates.is_empty() {
        updates.push(GrantUpdate {
            grant_id: newest.id,
            remaining_amount: newest_remaining,
        });
    }
    updates
}

/// Attribute a settled amount to the charges of a batch, in order
///
/// Charges paid in full are listed as covered. The first charge the
/// settled amount only reaches in part is returned with its unsettled
/// amount. Charges beyond it are neither.
pub fn cover_usage(charges: &[UsageCharge], settled: Decimal) -> UsageCoverage {
    let mut coverage = UsageCoverage::default();
    let mut available = settled;

    for charge in charges {
        if charge.amount <= available {
            available -= charge.amount;
            coverage.covered.push(charge.usage_id);
        } else {
            if available > Decimal::ZERO {
                coverage.partial = Some((charge.usage_id, charge.amount - available));
            }
            break;
        }
    }

    coverage
}

/// Apply planned updates to an in-memory copy of the grants
pub fn apply_updates(grants: &mut [CreditGrant], updates: &[GrantUpdate]) {
    for update in updates {
        if let Some(grant) = grants.iter_mut().find(|g| g.id == update.grant_id) {
            grant.remaining_amount = update.remaining_amount;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn grants(remaining: &[Decimal]) -> Vec<CreditGrant> {
        let base = Utc::now() - Duration::days(30);
        remaining
            .iter()
            .enumerate()
            .map(|(i, amount)| CreditGrant {
                id: i as i64 + 1,
                account_id: "acct".to_string(),
                code: format!("C{}", i),
                original_amount: dec!(100),
                remaining_amount: *amount,
                created_at: base + Duration::days(i as i64),
                expires_at: base + Duration::days(60),
                updated_at: base,
            })
            .collect()
    }

    fn used(grants: &[CreditGrant]) -> Decimal {
        grants.iter().map(CreditGrant::used_amount).sum()
    }

    #[test]
    fn test_oldest_first_consumption() {
        let ledger = grants(&[dec!(100), dec!(50), dec!(0)]);
        let plan = plan_settlement(&ledger, dec!(120)).unwrap();

        assert_eq!(plan.unsettled, Decimal::ZERO);
        assert_eq!(
            plan.updates,
            vec![
                GrantUpdate { grant_id: 1, remaining_amount: dec!(0) },
                GrantUpdate { grant_id: 2, remaining_amount: dec!(30) },
            ]
        );
    }

    #[test]
    fn test_last_grant_absorbs_remainder() {
        let ledger = grants(&[dec!(10)]);
        let plan = plan_settlement(&ledger, dec!(15)).unwrap();

        assert_eq!(plan.unsettled, Decimal::ZERO);
        assert_eq!(
            plan.updates,
            vec![GrantUpdate { grant_id: 1, remaining_amount: dec!(-5) }]
        );
    }

    #[test]
    fn test_overdraft_is_carried_forward() {
        let ledger = grants(&[dec!(-20), dec!(50)]);
        let plan = plan_settlement(&ledger, dec!(10)).unwrap();

        assert_eq!(plan.unsettled, Decimal::ZERO);
        assert_eq!(
            plan.updates,
            vec![
                GrantUpdate { grant_id: 1, remaining_amount: dec!(0) },
                GrantUpdate { grant_id: 2, remaining_amount: dec!(20) },
            ]
        );
    }

    #[test]
    fn test_last_overdrawn_grant_grows() {
        let ledger = grants(&[dec!(0), dec!(-5)]);
        let plan = plan_settlement(&ledger, dec!(7)).unwrap();

        assert_eq!(plan.unsettled, Decimal::ZERO);
        assert_eq!(
            plan.updates,
            vec![GrantUpdate { grant_id: 2, remaining_amount: dec!(-12) }]
        );
    }

    #[test]
    fn test_no_grants_leaves_cost_unsettled() {
        let plan = plan_settlement(&[], dec!(42)).unwrap();
        assert_eq!(plan.unsettled, dec!(42));
        assert!(plan.updates.is_empty());
    }

    #[test]
    fn test_zero_cost_is_noop() {
        let ledger = grants(&[dec!(-3), dec!(10)]);
        let plan = plan_settlement(&ledger, Decimal::ZERO).unwrap();
        assert_eq!(plan, SettlementPlan::default());
    }

    #[test]
    fn test_conservation_across_settlements() {
        let mut ledger = grants(&[dec!(30), dec!(-10), dec!(25), dec!(5)]);
        let before = used(&ledger);
        let costs = [dec!(12.5), dec!(40), dec!(0.75), dec!(33)];

        for cost in costs {
            let plan = plan_settlement(&ledger, cost).unwrap();
            assert_eq!(plan.unsettled, Decimal::ZERO);
            apply_updates(&mut ledger, &plan.updates);
        }

        let total: Decimal = costs.iter().sum();
        assert_eq!(used(&ledger) - before, total);
    }

    #[test]
    fn test_overflowing_settlement_is_rejected() {
        let ledger = grants(&[dec!(-10), dec!(5)]);
        let err = plan_settlement(&ledger, Decimal::MAX).unwrap_err();
        assert!(matches!(err, AppError::InvalidAmount(_)));

        let ledger = grants(&[dec!(-1)]);
        assert!(plan_settlement(&ledger, Decimal::MAX).is_err());

        let ledger = grants(&[dec!(10)]);
        let plan = plan_settlement(&ledger, Decimal::MAX).unwrap();
        assert_eq!(plan.updates[0].remaining_amount, dec!(10) - Decimal::MAX);
    }

    #[test]
    fn test_rebalance_moves_overdraft_to_newest() {
        let ledger = grants(&[dec!(-20), dec!(50)]);
        let updates = plan_rebalance(&ledger);

        assert_eq!(
            updates,
            vec![
                GrantUpdate { grant_id: 1, remaining_amount: dec!(0) },
                GrantUpdate { grant_id: 2, remaining_amount: dec!(30) },
            ]
        );
    }

    #[test]
    fn test_rebalance_cascades_negative() {
        let ledger = grants(&[dec!(-20), dec!(-15), dec!(10)]);
        let updates = plan_rebalance(&ledger);

        // newest goes negative after the first move, second over-draft stays
        assert_eq!(
            updates,
            vec![
                GrantUpdate { grant_id: 1, remaining_amount: dec!(0) },
                GrantUpdate { grant_id: 3, remaining_amount: dec!(-10) },
            ]
        );
    }

    #[test]
    fn test_rebalance_is_idempotent() {
        let mut ledger = grants(&[dec!(-20), dec!(5), dec!(50)]);
        let first = plan_rebalance(&ledger);
        apply_updates(&mut ledger, &first);

        assert!(plan_rebalance(&ledger).is_empty());
        assert!(plan_rebalance(&grants(&[dec!(-4)])).is_empty());
    }

    #[test]
    fn test_cover_usage_partial_boundary() {
        let charges = [
            UsageCharge { usage_id: 1, amount: dec!(4) },
            UsageCharge { usage_id: 2, amount: dec!(6) },
            UsageCharge { usage_id: 3, amount: dec!(5) },
        ];

        let full = cover_usage(&charges, dec!(15));
        assert_eq!(full.covered, vec![1, 2, 3]);
        assert_eq!(full.partial, None);

        let part = cover_usage(&charges, dec!(7));
        assert_eq!(part.covered, vec![1]);
        assert_eq!(part.partial, Some((2, dec!(3))));

        let none = cover_usage(&charges, Decimal::ZERO);
        assert!(none.covered.is_empty());
        assert_eq!(none.partial, None);
    }
}
