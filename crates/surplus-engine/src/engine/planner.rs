//! Pure, side-effect-free allocation computations.
//!
//! Every function here takes snapshots of the entry and credit state and
//! returns a transient preview. Nothing is persisted; the commit executor
//! re-derives the same preview from live state before posting anything.

use rust_decimal::Decimal;

use super::domain::{
    AllocationAction, AllocationPreview, Bucket, BucketAllocation, Credit, DistributionSuggestion,
    PrincipalStrategy, SurplusEntry, MONEY_EPSILON,
};
use super::repository::RepositoryError;
use super::schedule::{annuity_payment, monthly_rate, round2, term_for_payment};

/// Engine error taxonomy. All variants are terminal for the caller; only
/// `Conflict` invites a retry, and then only after re-running the preview.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AllocationError {
    #[error("{what} '{id}' not found")]
    NotFound { what: &'static str, id: String },
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
    #[error("invalid amount: {reason}")]
    InvalidAmount { reason: String },
    #[error("conflict: {reason}; re-run the preview and resubmit")]
    Conflict { reason: String },
    #[error("operation requires the {required} role")]
    Unauthorized { required: &'static str },
    #[error("storage unavailable: {0}")]
    Storage(String),
}

impl From<RepositoryError> for AllocationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => AllocationError::NotFound {
                what: "record",
                id: String::new(),
            },
            RepositoryError::Conflict => AllocationError::Conflict {
                reason: "storage record changed underneath the operation".to_string(),
            },
            RepositoryError::Unavailable(detail) => AllocationError::Storage(detail),
        }
    }
}

/// Compute a preview for the requested action against the given credit.
pub fn preview(
    entry: &SurplusEntry,
    credit: &Credit,
    action: AllocationAction,
    amount: Decimal,
) -> Result<AllocationPreview, AllocationError> {
    match action {
        AllocationAction::Installment => preview_installment(entry, credit, amount),
        AllocationAction::Principal { strategy } => {
            preview_principal(entry, credit, strategy, amount)
        }
    }
}

/// Waterfall preview for an installment payment.
///
/// Fixed bucket order, each filled to its full outstanding value before the
/// next receives any funds: moratorium interest, ordinary interest,
/// insurance premium (insured credits only), principal.
pub fn preview_installment(
    entry: &SurplusEntry,
    credit: &Credit,
    amount: Decimal,
) -> Result<AllocationPreview, AllocationError> {
    check_common(entry, credit, amount)?;

    let due = credit.installment_due();
    let total_due = due.total();

    let mut remaining = amount;
    let mut buckets = Vec::with_capacity(Bucket::WATERFALL.len());
    for (bucket, outstanding) in due.in_order() {
        let take = remaining.min(outstanding).max(Decimal::ZERO);
        buckets.push(BucketAllocation {
            bucket,
            amount: take,
        });
        remaining -= take;
    }

    let shortfall = (total_due - amount).max(Decimal::ZERO);
    let overflow = (amount - total_due).max(Decimal::ZERO);
    let is_full = shortfall <= MONEY_EPSILON;

    let principal_paid = buckets
        .iter()
        .find(|b| b.bucket == Bucket::Principal)
        .map(|b| b.amount)
        .unwrap_or(Decimal::ZERO);
    let resulting_balance = round2(credit.principal_balance - principal_paid);
    let finalizes = resulting_balance <= MONEY_EPSILON;

    let resulting_term = if finalizes {
        0
    } else if is_full {
        credit.remaining_term_months.saturating_sub(1)
    } else {
        credit.remaining_term_months
    };

    Ok(AllocationPreview {
        requested_amount: amount,
        credit_id: credit.id.clone(),
        action: AllocationAction::Installment,
        buckets,
        resulting_balance: if finalizes {
            Decimal::ZERO
        } else {
            resulting_balance
        },
        resulting_installment: credit.installment_amount,
        resulting_term,
        is_full_installment: Some(is_full),
        finalizes_credit: finalizes,
        shortfall,
        overflow,
    })
}

/// Preview for a principal paydown under one of the two recompute strategies.
pub fn preview_principal(
    entry: &SurplusEntry,
    credit: &Credit,
    strategy: PrincipalStrategy,
    amount: Decimal,
) -> Result<AllocationPreview, AllocationError> {
    check_common(entry, credit, amount)?;

    if amount > credit.principal_balance + MONEY_EPSILON {
        return Err(AllocationError::InvalidAmount {
            reason: format!(
                "amount {} exceeds the credit's principal balance {}",
                amount, credit.principal_balance
            ),
        });
    }

    let action = AllocationAction::Principal { strategy };
    let resulting_balance = round2(credit.principal_balance - amount);
    let applied = amount.min(credit.principal_balance);
    let buckets = principal_only_buckets(applied);

    // Full payoff: mark for finalization, no schedule recompute.
    if resulting_balance <= MONEY_EPSILON {
        return Ok(AllocationPreview {
            requested_amount: amount,
            credit_id: credit.id.clone(),
            action,
            buckets,
            resulting_balance: Decimal::ZERO,
            resulting_installment: credit.installment_amount,
            resulting_term: 0,
            is_full_installment: None,
            finalizes_credit: true,
            shortfall: Decimal::ZERO,
            overflow: (-resulting_balance).max(Decimal::ZERO),
        });
    }

    let rate = monthly_rate(credit.annual_rate);
    let (resulting_installment, resulting_term) = match strategy {
        PrincipalStrategy::ReduceAmount => {
            let term = credit.remaining_term_months.max(1);
            (annuity_payment(resulting_balance, rate, term), term)
        }
        PrincipalStrategy::ReduceTerm => {
            let term = term_for_payment(resulting_balance, rate, credit.installment_amount)
                .ok_or_else(|| AllocationError::InvalidState {
                    reason: format!(
                        "installment {} cannot amortize the remaining balance {}",
                        credit.installment_amount, resulting_balance
                    ),
                })?;
            (credit.installment_amount, term)
        }
    };

    Ok(AllocationPreview {
        requested_amount: amount,
        credit_id: credit.id.clone(),
        action,
        buckets,
        resulting_balance,
        resulting_installment,
        resulting_term,
        is_full_installment: None,
        finalizes_credit: false,
        shortfall: Decimal::ZERO,
        overflow: Decimal::ZERO,
    })
}

/// Advisory multi-credit distribution suggestion.
///
/// Credits are visited in the caller-supplied order; no tie-break policy is
/// applied or implied. For each credit the first installment costs its
/// current total due (accrued interest included) and subsequent ones the
/// contractual installment amount, capped by the remaining term. The output
/// never bypasses the per-credit preview/commit flow.
pub fn preview_distribution(
    entry: &SurplusEntry,
    credits: &[Credit],
) -> Result<Vec<DistributionSuggestion>, AllocationError> {
    if !entry.is_pending() {
        return Err(AllocationError::InvalidState {
            reason: format!("surplus entry is {}", entry.status.label()),
        });
    }

    let mut remaining = entry.amount;
    let mut suggestions = Vec::with_capacity(credits.len());

    for credit in credits {
        if credit.borrower_id != entry.borrower_id {
            return Err(AllocationError::NotFound {
                what: "credit for borrower",
                id: credit.id.0.clone(),
            });
        }

        let mut covered = 0u32;
        let mut allocated = Decimal::ZERO;
        let mut partial = false;
        let mut remainder = Decimal::ZERO;

        if credit.is_active() {
            let cap = credit.remaining_term_months;
            while covered < cap {
                let cost = if covered == 0 {
                    credit.installment_due().total()
                } else {
                    credit.installment_amount
                };
                if cost <= Decimal::ZERO || remaining + MONEY_EPSILON < cost {
                    break;
                }
                covered += 1;
                allocated += cost;
                remaining -= cost;
            }

            // Funds ran out mid-installment on this credit: flag the
            // remainder here instead of carrying cents to the next credit.
            if remaining > MONEY_EPSILON && covered < cap {
                partial = true;
                remainder = remaining;
                allocated += remaining;
                remaining = Decimal::ZERO;
            }
        }

        suggestions.push(DistributionSuggestion {
            credit_id: credit.id.clone(),
            installments_covered: covered,
            amount_allocated: round2(allocated),
            partial_remainder: partial,
            remainder_amount: round2(remainder),
        });
    }

    Ok(suggestions)
}

fn principal_only_buckets(amount: Decimal) -> Vec<BucketAllocation> {
    Bucket::WATERFALL
        .iter()
        .map(|&bucket| BucketAllocation {
            bucket,
            amount: if bucket == Bucket::Principal {
                amount
            } else {
                Decimal::ZERO
            },
        })
        .collect()
}

fn check_common(
    entry: &SurplusEntry,
    credit: &Credit,
    amount: Decimal,
) -> Result<(), AllocationError> {
    if !entry.is_pending() {
        return Err(AllocationError::InvalidState {
            reason: format!("surplus entry is {}", entry.status.label()),
        });
    }
    if credit.borrower_id != entry.borrower_id {
        return Err(AllocationError::NotFound {
            what: "credit for borrower",
            id: credit.id.0.clone(),
        });
    }
    if !credit.is_active() {
        return Err(AllocationError::InvalidState {
            reason: format!("credit '{}' is not active", credit.id.0),
        });
    }
    if amount <= Decimal::ZERO {
        return Err(AllocationError::InvalidAmount {
            reason: "amount must be positive".to_string(),
        });
    }
    if amount > entry.amount + MONEY_EPSILON {
        return Err(AllocationError::InvalidAmount {
            reason: format!(
                "amount {} exceeds the entry's available {}",
                amount, entry.amount
            ),
        });
    }
    Ok(())
}
