//! Posting rules
//!
//! Pure functions that turn an account's current totals plus a requested
//! operation into the totals after the operation. Both stores call [`plan`]
//! inside their per-client critical section, so the arithmetic and the
//! overdraft rule live in exactly one place.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{LedgerError, LedgerResult};
use crate::transactions::TransactionType;

/// Maximum number of fractional digits stored for any amount or cost.
/// Matches the `NUMERIC(20,4)` columns.
pub const AMOUNT_SCALE: u32 = 4;

/// Largest magnitude accepted for a single amount (fits `NUMERIC(20,4)`).
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_874_919_423, 2_328_306, 0, false, 0); // 10^16 - 1

/// How far below zero a balance may fall on deduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "mode", content = "limit", rename_all = "snake_case")]
pub enum OverdraftPolicy {
    /// Balance must stay at or above zero.
    #[default]
    Disallow,
    /// Balance may go down to `-limit`.
    Limit(Decimal),
}

impl OverdraftPolicy {
    /// Lowest balance this policy accepts after a deduction.
    pub fn floor(&self) -> Decimal {
        match self {
            OverdraftPolicy::Disallow => Decimal::ZERO,
            OverdraftPolicy::Limit(limit) => -*limit,
        }
    }

    pub fn permits(&self, balance_after: Decimal) -> bool {
        balance_after >= self.floor()
    }
}

/// Balance and accumulators of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccountTotals {
    pub balance: Decimal,
    pub total_added: Decimal,
    pub total_used: Decimal,
}

/// A requested balance change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOp {
    Add { amount: Decimal },
    Deduct { cost: Decimal },
    Reset { total_added: Decimal, total_used: Decimal },
    /// Refund whatever is still charged to the order. The store resolves
    /// the amount under the account lock.
    RefundOrder { order_id: String },
}

impl LedgerOp {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            LedgerOp::Add { .. } => TransactionType::Add,
            LedgerOp::Deduct { .. } => TransactionType::Deduct,
            LedgerOp::Reset { .. } => TransactionType::Reset,
            LedgerOp::RefundOrder { .. } => TransactionType::Refund,
        }
    }

    /// The order whose net charge must be looked up before planning.
    pub fn refund_order_id(&self) -> Option<&str> {
        match self {
            LedgerOp::RefundOrder { order_id } => Some(order_id),
            _ => None,
        }
    }
}

/// Outcome of planning an operation: what to write to the account and the
/// transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub kind: TransactionType,
    pub amount: Decimal,
    pub after: AccountTotals,
}

/// Validate a strictly positive amount (grants, refunds).
pub fn validate_amount(amount: Decimal) -> LedgerResult<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be greater than zero, got {}",
            amount
        )));
    }
    check_precision(amount).map_err(LedgerError::InvalidAmount)
}

/// Validate an amount that may be zero (reset totals).
pub fn validate_non_negative(amount: Decimal, field: &str) -> LedgerResult<Decimal> {
    if amount < Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "{} must not be negative, got {}",
            field, amount
        )));
    }
    check_precision(amount).map_err(LedgerError::InvalidAmount)
}

/// Validate a per-use feature cost. Zero is a valid (free) cost.
pub fn validate_cost(cost: Decimal) -> LedgerResult<Decimal> {
    if cost < Decimal::ZERO {
        return Err(LedgerError::InvalidCost(format!(
            "cost must not be negative, got {}",
            cost
        )));
    }
    check_precision(cost).map_err(LedgerError::InvalidCost)
}

fn check_precision(value: Decimal) -> Result<Decimal, String> {
    let normalized = value.normalize();
    if normalized.scale() > AMOUNT_SCALE {
        return Err(format!(
            "{} has more than {} decimal places",
            value, AMOUNT_SCALE
        ));
    }
    if normalized.abs() > MAX_AMOUNT {
        return Err(format!("{} exceeds the maximum of {}", value, MAX_AMOUNT));
    }
    Ok(normalized)
}

/// Compute the posting for `op` against `before`.
///
/// `refundable` is the net amount still charged to the order and is only
/// consulted for [`LedgerOp::RefundOrder`].
pub fn plan(
    before: &AccountTotals,
    op: &LedgerOp,
    refundable: Option<Decimal>,
    policy: OverdraftPolicy,
) -> LedgerResult<Posting> {
    let posting = plan_unchecked(before, op, refundable, policy)?;
    check_totals(&posting.after)?;
    Ok(posting)
}

/// Running totals must stay within the stored column range too, otherwise
/// only the Postgres store would reject the posting.
fn check_totals(after: &AccountTotals) -> LedgerResult<()> {
    let fields = [
        ("balance", after.balance),
        ("total_added", after.total_added),
        ("total_used", after.total_used),
    ];
    for (field, value) in fields {
        if value.abs() > MAX_AMOUNT {
            return Err(LedgerError::InvalidAmount(format!(
                "{} would be {}, above the maximum of {}",
                field, value, MAX_AMOUNT
            )));
        }
    }
    Ok(())
}

fn plan_unchecked(
    before: &AccountTotals,
    op: &LedgerOp,
    refundable: Option<Decimal>,
    policy: OverdraftPolicy,
) -> LedgerResult<Posting> {
    match op {
        LedgerOp::Add { amount } => {
            let amount = validate_amount(*amount)?;
            Ok(credit(before, TransactionType::Add, amount))
        }
        LedgerOp::Deduct { cost } => {
            let cost = validate_cost(*cost)?;
            let balance = before.balance - cost;
            if !policy.permits(balance) {
                return Err(LedgerError::InsufficientCredit {
                    balance: before.balance,
                    required: cost,
                });
            }
            Ok(Posting {
                kind: TransactionType::Deduct,
                amount: cost,
                after: AccountTotals {
                    balance,
                    total_added: before.total_added,
                    total_used: before.total_used + cost,
                },
            })
        }
        LedgerOp::Reset {
            total_added,
            total_used,
        } => {
            let total_added = validate_non_negative(*total_added, "total_added")?;
            let total_used = validate_non_negative(*total_used, "total_used")?;
            if total_used > total_added {
                return Err(LedgerError::InvalidAmount(format!(
                    "total_used ({}) must not exceed total_added ({})",
                    total_used, total_added
                )));
            }
            let balance = total_added - total_used;
            Ok(Posting {
                kind: TransactionType::Reset,
                amount: balance,
                after: AccountTotals {
                    balance,
                    total_added,
                    total_used,
                },
            })
        }
        LedgerOp::RefundOrder { order_id } => {
            let refundable = refundable.ok_or_else(|| {
                LedgerError::Internal(format!(
                    "refundable amount for order {} was not resolved",
                    order_id
                ))
            })?;
            if refundable <= Decimal::ZERO {
                return Err(LedgerError::NothingToRefund(order_id.clone()));
            }
            Ok(credit(before, TransactionType::Refund, refundable))
        }
    }
}

fn credit(before: &AccountTotals, kind: TransactionType, amount: Decimal) -> Posting {
    Posting {
        kind,
        amount,
        after: AccountTotals {
            balance: before.balance + amount,
            total_added: before.total_added + amount,
            total_used: before.total_used,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(balance: i64, added: i64, used: i64) -> AccountTotals {
        AccountTotals {
            balance: Decimal::from(balance),
            total_added: Decimal::from(added),
            total_used: Decimal::from(used),
        }
    }

    #[test]
    fn test_add_increments_balance_and_total_added() {
        let posting = plan(
            &totals(10, 10, 0),
            &LedgerOp::Add {
                amount: Decimal::from(5),
            },
            None,
            OverdraftPolicy::Disallow,
        )
        .unwrap();

        assert_eq!(posting.kind, TransactionType::Add);
        assert_eq!(posting.after, totals(15, 15, 0));
    }

    #[test]
    fn test_add_rejects_zero_and_negative() {
        for amount in [Decimal::ZERO, Decimal::from(-3)] {
            let err = plan(
                &AccountTotals::default(),
                &LedgerOp::Add { amount },
                None,
                OverdraftPolicy::Disallow,
            )
            .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount(_)));
        }
    }

    #[test]
    fn test_add_rejects_excess_precision() {
        let err = validate_amount(Decimal::new(123_456, 5)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
        // Trailing zeros do not count against the scale
        assert_eq!(
            validate_amount(Decimal::new(150_000, 5)).unwrap(),
            Decimal::new(15, 1)
        );
    }

    #[test]
    fn test_deduct_exact_balance_reaches_zero() {
        let posting = plan(
            &totals(1, 1, 0),
            &LedgerOp::Deduct { cost: Decimal::ONE },
            None,
            OverdraftPolicy::Disallow,
        )
        .unwrap();
        assert_eq!(posting.after, totals(0, 1, 1));
    }

    #[test]
    fn test_deduct_over_balance_is_insufficient() {
        let before = AccountTotals {
            balance: Decimal::new(5, 1),
            total_added: Decimal::new(5, 1),
            total_used: Decimal::ZERO,
        };
        let err = plan(
            &before,
            &LedgerOp::Deduct { cost: Decimal::ONE },
            None,
            OverdraftPolicy::Disallow,
        )
        .unwrap_err();

        match err {
            LedgerError::InsufficientCredit { balance, required } => {
                assert_eq!(balance, Decimal::new(5, 1));
                assert_eq!(required, Decimal::ONE);
            }
            other => panic!("expected InsufficientCredit, got {:?}", other),
        }
    }

    #[test]
    fn test_overdraft_limit_allows_negative_down_to_floor() {
        let policy = OverdraftPolicy::Limit(Decimal::from(10));
        let ok = plan(
            &totals(5, 5, 0),
            &LedgerOp::Deduct {
                cost: Decimal::from(15),
            },
            None,
            policy,
        )
        .unwrap();
        assert_eq!(ok.after.balance, Decimal::from(-10));

        let err = plan(
            &totals(5, 5, 0),
            &LedgerOp::Deduct {
                cost: Decimal::from(16),
            },
            None,
            policy,
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientCredit { .. }));
    }

    #[test]
    fn test_deduct_fractional_cost() {
        let posting = plan(
            &totals(3, 3, 0),
            &LedgerOp::Deduct {
                cost: Decimal::new(25, 1),
            },
            None,
            OverdraftPolicy::Disallow,
        )
        .unwrap();
        assert_eq!(posting.after.balance, Decimal::new(5, 1));
        assert_eq!(posting.after.total_used, Decimal::new(25, 1));
    }

    #[test]
    fn test_reset_recomputes_balance() {
        let posting = plan(
            &totals(3, 50, 47),
            &LedgerOp::Reset {
                total_added: Decimal::from(1000),
                total_used: Decimal::ZERO,
            },
            None,
            OverdraftPolicy::Disallow,
        )
        .unwrap();
        assert_eq!(posting.kind, TransactionType::Reset);
        assert_eq!(posting.amount, Decimal::from(1000));
        assert_eq!(posting.after, totals(1000, 1000, 0));
    }

    #[test]
    fn test_reset_rejects_used_above_added() {
        let err = plan(
            &AccountTotals::default(),
            &LedgerOp::Reset {
                total_added: Decimal::from(5),
                total_used: Decimal::from(6),
            },
            None,
            OverdraftPolicy::Disallow,
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
    }

    #[test]
    fn test_refund_requires_positive_refundable() {
        let op = LedgerOp::RefundOrder {
            order_id: "o1".into(),
        };
        let err = plan(
            &totals(0, 1, 1),
            &op,
            Some(Decimal::ZERO),
            OverdraftPolicy::Disallow,
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::NothingToRefund(ref id) if id == "o1"));

        let posting = plan(
            &totals(0, 1, 1),
            &op,
            Some(Decimal::ONE),
            OverdraftPolicy::Disallow,
        )
        .unwrap();
        assert_eq!(posting.kind, TransactionType::Refund);
        assert_eq!(posting.after, totals(1, 2, 1));
    }

    #[test]
    fn test_conservation_holds_for_every_posting() {
        let ops = [
            LedgerOp::Add {
                amount: Decimal::from(100),
            },
            LedgerOp::Deduct {
                cost: Decimal::new(75, 1),
            },
            LedgerOp::Deduct { cost: Decimal::ZERO },
            LedgerOp::Reset {
                total_added: Decimal::from(40),
                total_used: Decimal::from(15),
            },
        ];

        let mut current = AccountTotals::default();
        for op in &ops {
            let posting = plan(&current, op, None, OverdraftPolicy::Disallow).unwrap();
            assert_eq!(
                posting.after.balance,
                posting.after.total_added - posting.after.total_used
            );
            current = posting.after;
        }
    }

    #[test]
    fn test_max_amount_value() {
        assert_eq!(MAX_AMOUNT, Decimal::from(9_999_999_999_999_999_i64));
    }

    #[test]
    fn test_running_totals_capped_at_max_amount() {
        let full = AccountTotals {
            balance: MAX_AMOUNT,
            total_added: MAX_AMOUNT,
            total_used: Decimal::ZERO,
        };
        let err = plan(
            &full,
            &LedgerOp::Add {
                amount: Decimal::ONE,
            },
            None,
            OverdraftPolicy::Disallow,
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(ref m) if m.contains("total_added")));

        // Spending stays possible
        let posting = plan(
            &full,
            &LedgerOp::Deduct { cost: Decimal::ONE },
            None,
            OverdraftPolicy::Disallow,
        )
        .unwrap();
        assert_eq!(posting.after.total_used, Decimal::ONE);
    }
}
