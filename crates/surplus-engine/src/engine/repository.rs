use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::domain::{
    AppliedAllocation, BorrowerId, Credit, CreditId, EntryId, PaymentRecord, Reintegration,
    SurplusEntry,
};

/// Filter for listing pending surplus entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingFilter {
    pub borrower_cedula: Option<String>,
    pub deductora_id: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl PendingFilter {
    pub fn matches(&self, entry: &SurplusEntry) -> bool {
        if let Some(cedula) = &self.borrower_cedula {
            if &entry.borrower_id.0 != cedula {
                return false;
            }
        }
        if let Some(deductora) = &self.deductora_id {
            if &entry.deductora_id.0 != deductora {
                return false;
            }
        }
        if let Some(from) = self.date_from {
            if entry.origin_date < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if entry.origin_date > to {
                return false;
            }
        }
        true
    }
}

/// Storage abstraction for the surplus ledger so the engine can be exercised
/// against in-memory fakes and, in production, the platform database.
///
/// The two `mark_*` transitions are compare-and-set on the pending status:
/// implementations must reject (with `Conflict`) any transition whose entry
/// is no longer pending, so a racing writer can never double-consume one.
pub trait SurplusLedger: Send + Sync {
    fn insert(&self, entry: SurplusEntry) -> Result<SurplusEntry, RepositoryError>;
    fn fetch(&self, id: &EntryId) -> Result<Option<SurplusEntry>, RepositoryError>;
    fn mark_applied(
        &self,
        id: &EntryId,
        allocation: AppliedAllocation,
    ) -> Result<SurplusEntry, RepositoryError>;
    fn mark_reintegrated(
        &self,
        id: &EntryId,
        reintegration: Reintegration,
    ) -> Result<SurplusEntry, RepositoryError>;
    /// Pending entries matching `filter`, ordered by origin date then id.
    fn pending(&self, filter: &PendingFilter) -> Result<Vec<SurplusEntry>, RepositoryError>;
}

/// Storage abstraction for credit schedule state.
///
/// `update` is optimistic: the write succeeds only when the stored version
/// equals `expected_version`, and the stored version is bumped on success.
pub trait CreditStore: Send + Sync {
    fn fetch(&self, id: &CreditId) -> Result<Option<Credit>, RepositoryError>;
    fn active_for_borrower(&self, borrower: &BorrowerId) -> Result<Vec<Credit>, RepositoryError>;
    fn update(&self, credit: Credit, expected_version: u64) -> Result<Credit, RepositoryError>;
    fn post_payment(&self, record: PaymentRecord) -> Result<(), RepositoryError>;
    /// Remove journal records posted for `entry_id`. Compensation hook for
    /// a commit that fails after the payment was already journaled.
    fn revert_payment(&self, entry_id: &EntryId) -> Result<(), RepositoryError>;
}

/// Error enumeration for storage failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists or was concurrently modified")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
