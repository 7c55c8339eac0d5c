//! The surplus balance reallocation engine.
//!
//! Layered leaf-first: `domain` holds the data model, `schedule` the
//! amortization arithmetic, `planner` the pure preview computations,
//! `repository` the storage seams, `service` the commit executor, and
//! `router` the HTTP surface consumed by the back-office UI.

pub mod domain;
pub mod planner;
pub mod repository;
pub mod router;
pub mod schedule;
pub mod service;

#[cfg(test)]
mod tests;

pub use domain::{
    AllocationAction, AllocationPreview, AppliedAllocation, AppliedResult, BorrowerId, Bucket,
    BucketAllocation, Credit, CreditId, CreditStatus, DeductoraId, DistributionSuggestion, EntryId,
    InstallmentDue, Operator, OperatorRole, PaymentRecord, PendingEntryView, PrincipalStrategy,
    Reintegration, SurplusEntry, SurplusStatus, MONEY_EPSILON,
};
pub use planner::{preview, preview_distribution, preview_installment, preview_principal, AllocationError};
pub use repository::{CreditStore, PendingFilter, RepositoryError, SurplusLedger};
pub use router::surplus_router;
pub use service::{CommitRequest, PageRequest, Paged, PreviewRequest, SurplusAllocationService};
