use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identifier wrapper for surplus ledger entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub String);

/// Identifier wrapper for credits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CreditId(pub String);

/// Borrower identifier; carries the cedula used by payroll files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BorrowerId(pub String);

/// Payroll-deduction clearing entity reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeductoraId(pub String);

/// Tolerance for monetary comparisons: one cent.
pub const MONEY_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Lifecycle of a surplus entry. Applied and Reintegrated are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurplusStatus {
    Pending,
    Applied,
    Reintegrated,
}

impl SurplusStatus {
    pub const fn label(self) -> &'static str {
        match self {
            SurplusStatus::Pending => "pending",
            SurplusStatus::Applied => "applied",
            SurplusStatus::Reintegrated => "reintegrated",
        }
    }
}

/// A payroll-deduction overpayment held for later allocation.
///
/// Created by the out-of-scope payroll ingestion process; consumed exactly
/// once by this engine, either through a commit or a reintegro. Nothing but
/// `status`, `applied_to`, and `reintegration` changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurplusEntry {
    pub id: EntryId,
    pub borrower_id: BorrowerId,
    pub source_credit_id: CreditId,
    pub deductora_id: DeductoraId,
    pub amount: Decimal,
    pub origin_date: NaiveDate,
    pub status: SurplusStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_to: Option<AppliedAllocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reintegration: Option<Reintegration>,
}

impl SurplusEntry {
    pub fn is_pending(&self) -> bool {
        self.status == SurplusStatus::Pending
    }

    pub fn view(&self) -> PendingEntryView {
        PendingEntryView {
            id: self.id.clone(),
            borrower_cedula: self.borrower_id.0.clone(),
            source_credit_id: self.source_credit_id.clone(),
            deductora_id: self.deductora_id.clone(),
            amount: self.amount,
            origin_date: self.origin_date,
            status: self.status.label(),
        }
    }
}

/// Snapshot recorded on the entry when a commit succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedAllocation {
    pub credit_id: CreditId,
    pub preview: AllocationPreview,
    pub applied_at: DateTime<Utc>,
}

/// Reason trail recorded when an entry is returned to the deductora.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reintegration {
    pub reason: String,
    pub reintegrated_at: DateTime<Utc>,
}

/// Sanitized listing row for pending entries.
#[derive(Debug, Clone, Serialize)]
pub struct PendingEntryView {
    pub id: EntryId,
    pub borrower_cedula: String,
    pub source_credit_id: CreditId,
    pub deductora_id: DeductoraId,
    pub amount: Decimal,
    pub origin_date: NaiveDate,
    pub status: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditStatus {
    Active,
    Finalized,
}

/// Current state of a credit's amortization schedule.
///
/// `version` is an optimistic-concurrency stamp bumped on every store
/// update; commits compare it so that a credit mutated between preview and
/// commit surfaces as a conflict instead of a silent double application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credit {
    pub id: CreditId,
    pub reference: String,
    pub borrower_id: BorrowerId,
    pub principal_balance: Decimal,
    pub installment_amount: Decimal,
    /// Nominal annual rate as a fraction, e.g. 0.32 for 32%.
    pub annual_rate: Decimal,
    pub term_months: u32,
    pub remaining_term_months: u32,
    pub accrued_moratorium_interest: Decimal,
    pub accrued_ordinary_interest: Decimal,
    pub has_insurance: bool,
    /// Premium bundled into each installment when `has_insurance` is set.
    pub insurance_premium: Decimal,
    pub status: CreditStatus,
    pub version: u64,
}

impl Credit {
    pub fn is_active(&self) -> bool {
        self.status == CreditStatus::Active
    }

    /// Decompose the installment currently due into the waterfall buckets.
    ///
    /// Moratorium interest rides on top of the contractual installment; the
    /// principal component is whatever the installment leaves after ordinary
    /// interest and the insurance premium, capped by the live balance.
    pub fn installment_due(&self) -> InstallmentDue {
        let insurance = if self.has_insurance {
            self.insurance_premium
        } else {
            Decimal::ZERO
        };
        let principal = (self.installment_amount - self.accrued_ordinary_interest - insurance)
            .max(Decimal::ZERO)
            .min(self.principal_balance);

        InstallmentDue {
            moratorium: self.accrued_moratorium_interest,
            ordinary: self.accrued_ordinary_interest,
            insurance,
            principal,
        }
    }
}

/// The components of the installment currently due, in waterfall order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstallmentDue {
    pub moratorium: Decimal,
    pub ordinary: Decimal,
    pub insurance: Decimal,
    pub principal: Decimal,
}

impl InstallmentDue {
    pub fn total(&self) -> Decimal {
        self.moratorium + self.ordinary + self.insurance + self.principal
    }

    /// Bucket kinds paired with their outstanding amounts, waterfall order.
    pub fn in_order(&self) -> [(Bucket, Decimal); 4] {
        [
            (Bucket::Moratorium, self.moratorium),
            (Bucket::Ordinary, self.ordinary),
            (Bucket::Insurance, self.insurance),
            (Bucket::Principal, self.principal),
        ]
    }
}

/// Allocation buckets. The waterfall order is a contract: a later bucket
/// receives funds only once every earlier bucket is filled to its full
/// outstanding value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Moratorium,
    Ordinary,
    Insurance,
    Principal,
}

impl Bucket {
    pub const WATERFALL: [Bucket; 4] = [
        Bucket::Moratorium,
        Bucket::Ordinary,
        Bucket::Insurance,
        Bucket::Principal,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Bucket::Moratorium => "moratorium",
            Bucket::Ordinary => "ordinary",
            Bucket::Insurance => "insurance",
            Bucket::Principal => "principal",
        }
    }
}

/// One bucket's share of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketAllocation {
    pub bucket: Bucket,
    pub amount: Decimal,
}

/// What the caller wants done with the surplus funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AllocationAction {
    /// Pay the installment currently due, following the bucket waterfall.
    Installment,
    /// Pay down principal and recompute the schedule.
    Principal { strategy: PrincipalStrategy },
}

/// How the schedule is recomputed after a principal paydown. Mutually
/// exclusive; modeled as a variant so further strategies slot in without
/// signature changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalStrategy {
    /// Keep the remaining term, lower the installment.
    ReduceAmount,
    /// Keep the installment, shorten the term.
    ReduceTerm,
}

impl PrincipalStrategy {
    pub const fn label(self) -> &'static str {
        match self {
            PrincipalStrategy::ReduceAmount => "reduce_amount",
            PrincipalStrategy::ReduceTerm => "reduce_term",
        }
    }
}

/// Side-effect-free description of how a requested amount would be absorbed.
/// Never persisted until a commit re-derives it from live state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPreview {
    pub requested_amount: Decimal,
    pub credit_id: CreditId,
    #[serde(flatten)]
    pub action: AllocationAction,
    /// Ordered waterfall breakdown: moratorium, ordinary, insurance, principal.
    pub buckets: Vec<BucketAllocation>,
    pub resulting_balance: Decimal,
    pub resulting_installment: Decimal,
    pub resulting_term: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_full_installment: Option<bool>,
    pub finalizes_credit: bool,
    pub shortfall: Decimal,
    pub overflow: Decimal,
}

impl AllocationPreview {
    pub fn allocated_total(&self) -> Decimal {
        self.buckets.iter().map(|b| b.amount).sum()
    }

    pub fn bucket(&self, kind: Bucket) -> Decimal {
        self.buckets
            .iter()
            .find(|b| b.bucket == kind)
            .map(|b| b.amount)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Outcome of a successful (or idempotently replayed) commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedResult {
    pub entry_id: EntryId,
    pub credit_id: CreditId,
    pub allocation: AllocationPreview,
    pub applied_at: DateTime<Utc>,
    pub credit_finalized: bool,
}

/// Journal line posted against a credit when a commit succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub entry_id: EntryId,
    pub credit_id: CreditId,
    pub buckets: Vec<BucketAllocation>,
    pub posted_at: DateTime<Utc>,
}

/// Caller identity as resolved by the out-of-scope auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: String,
    pub role: OperatorRole,
}

/// Surplus mutations require the supervisor role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorRole {
    Analyst,
    Supervisor,
}

impl OperatorRole {
    pub fn can_allocate(self) -> bool {
        matches!(self, OperatorRole::Supervisor)
    }
}

/// Advisory row from the multi-credit distribution suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSuggestion {
    pub credit_id: CreditId,
    /// Whole installments the remaining surplus fully covers for this credit.
    pub installments_covered: u32,
    pub amount_allocated: Decimal,
    /// Set on the last credit touched when funds ran out mid-installment.
    pub partial_remainder: bool,
    pub remainder_amount: Decimal,
}
