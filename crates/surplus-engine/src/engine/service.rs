use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::domain::{
    AllocationAction, AllocationPreview, AppliedAllocation, AppliedResult, Bucket, Credit,
    CreditId, CreditStatus, DistributionSuggestion, EntryId, Operator, PaymentRecord,
    Reintegration, SurplusEntry, SurplusStatus, MONEY_EPSILON,
};
use super::planner::{self, AllocationError};
use super::repository::{CreditStore, PendingFilter, RepositoryError, SurplusLedger};

const DEFAULT_PAGE_SIZE: usize = 25;
const MAX_PAGE_SIZE: usize = 100;

/// Read parameters for a preview. Previews are side-effect free and may run
/// with unlimited concurrency against the same entry or credit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PreviewRequest {
    pub entry_id: EntryId,
    pub credit_id: CreditId,
    #[serde(flatten)]
    pub action: AllocationAction,
    /// Defaults to the entry's full amount.
    pub amount: Option<Decimal>,
}

/// Parameters for a commit. The bucket breakdown is never taken from the
/// caller; only the intent (action, credit, amount) and an optional
/// fingerprint of the preview the caller confirmed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommitRequest {
    pub entry_id: EntryId,
    pub credit_id: CreditId,
    #[serde(flatten)]
    pub action: AllocationAction,
    pub amount: Option<Decimal>,
    /// When present, commit rejects with Conflict if the freshly derived
    /// preview disagrees; the credit changed between preview and confirm.
    pub expected_resulting_balance: Option<Decimal>,
}

/// 1-based pagination parameters.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageRequest {
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

/// The engine facade: list, preview, commit, reintegrate.
///
/// Previews are pure reads. Commit and reintegro serialize per entry through
/// a lock registry, and the credit write uses the store's optimistic version
/// so that of two racing mutations exactly one succeeds; the loser sees
/// Conflict or InvalidState, never a silent double application.
pub struct SurplusAllocationService<L, C> {
    ledger: Arc<L>,
    credits: Arc<C>,
    entry_locks: Mutex<HashMap<EntryId, Arc<Mutex<()>>>>,
    page_size: usize,
}

impl<L, C> SurplusAllocationService<L, C>
where
    L: SurplusLedger + 'static,
    C: CreditStore + 'static,
{
    pub fn new(ledger: Arc<L>, credits: Arc<C>) -> Self {
        Self::with_page_size(ledger, credits, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(ledger: Arc<L>, credits: Arc<C>, page_size: usize) -> Self {
        Self {
            ledger,
            credits,
            entry_locks: Mutex::new(HashMap::new()),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Paged listing of pending entries for the back-office screens.
    pub fn list_pending(
        &self,
        filter: &PendingFilter,
        page: PageRequest,
    ) -> Result<Paged<SurplusEntry>, AllocationError> {
        let entries = self.ledger.pending(filter)?;
        let total = entries.len();
        let per_page = page
            .per_page
            .unwrap_or(self.page_size)
            .clamp(1, MAX_PAGE_SIZE);
        let page_number = page.page.unwrap_or(1).max(1);

        let items = entries
            .into_iter()
            .skip((page_number - 1) * per_page)
            .take(per_page)
            .collect();

        Ok(Paged {
            items,
            page: page_number,
            per_page,
            total,
        })
    }

    /// Re-derivable, non-mutating allocation preview.
    pub fn preview(&self, request: &PreviewRequest) -> Result<AllocationPreview, AllocationError> {
        let entry = self.load_entry(&request.entry_id)?;
        let credit = self.load_credit(&request.credit_id)?;
        let amount = request.amount.unwrap_or(entry.amount);
        planner::preview(&entry, &credit, request.action, amount)
    }

    /// Advisory multi-credit distribution, in the caller-supplied order.
    pub fn distribution(
        &self,
        entry_id: &EntryId,
        credit_ids: &[CreditId],
    ) -> Result<Vec<DistributionSuggestion>, AllocationError> {
        let entry = self.load_entry(entry_id)?;
        let mut credits = Vec::with_capacity(credit_ids.len());
        for id in credit_ids {
            credits.push(self.load_credit(id)?);
        }
        planner::preview_distribution(&entry, &credits)
    }

    /// Active credits for the entry's borrower, for the preview dialogs.
    pub fn borrower_credits(&self, entry_id: &EntryId) -> Result<Vec<Credit>, AllocationError> {
        let entry = self.load_entry(entry_id)?;
        Ok(self.credits.active_for_borrower(&entry.borrower_id)?)
    }

    /// Apply exactly one allocation, or reject.
    ///
    /// The preview is recomputed from current state inside the entry lock; a
    /// client-held breakdown is never posted. Replaying a commit that already
    /// applied with the same intent returns the stored result unchanged.
    pub fn commit(
        &self,
        request: &CommitRequest,
        operator: &Operator,
    ) -> Result<AppliedResult, AllocationError> {
        require_supervisor(operator)?;

        let lock = self.entry_lock(&request.entry_id);
        let result = {
            let _guard = lock.lock().expect("entry lock poisoned");
            self.commit_locked(request, operator)
        };
        drop(lock);
        self.release_entry_lock(&request.entry_id);
        result
    }

    fn commit_locked(
        &self,
        request: &CommitRequest,
        operator: &Operator,
    ) -> Result<AppliedResult, AllocationError> {
        let entry = self.load_entry(&request.entry_id)?;
        match entry.status {
            SurplusStatus::Pending => {}
            SurplusStatus::Applied => return self.replay(&entry, request),
            SurplusStatus::Reintegrated => {
                return Err(AllocationError::InvalidState {
                    reason: "surplus entry was already reintegrated".to_string(),
                })
            }
        }

        let credit = self.load_credit(&request.credit_id)?;
        let amount = request.amount.unwrap_or(entry.amount);
        let preview = planner::preview(&entry, &credit, request.action, amount)?;

        if let Some(expected) = request.expected_resulting_balance {
            if (expected - preview.resulting_balance).abs() > MONEY_EPSILON {
                return Err(AllocationError::Conflict {
                    reason: format!(
                        "expected resulting balance {} but current state yields {}",
                        expected, preview.resulting_balance
                    ),
                });
            }
        }

        let updated = apply_preview(&credit, &preview);
        let written = self
            .credits
            .update(updated, credit.version)
            .map_err(|err| match err {
                RepositoryError::Conflict => AllocationError::Conflict {
                    reason: "credit state changed between preview and commit".to_string(),
                },
                other => other.into(),
            })?;

        let applied_at = Utc::now();
        let record = PaymentRecord {
            entry_id: entry.id.clone(),
            credit_id: credit.id.clone(),
            buckets: preview.buckets.clone(),
            posted_at: applied_at,
        };
        if let Err(err) = self.credits.post_payment(record) {
            self.restore_credit(&credit, written.version);
            return Err(err.into());
        }

        let allocation = AppliedAllocation {
            credit_id: credit.id.clone(),
            preview: preview.clone(),
            applied_at,
        };
        if let Err(err) = self.ledger.mark_applied(&entry.id, allocation) {
            self.restore_credit(&credit, written.version);
            self.rollback_journal(&entry.id);
            return Err(err.into());
        }

        info!(
            entry = %entry.id.0,
            credit = %credit.id.0,
            operator = %operator.id,
            amount = %preview.allocated_total(),
            finalized = preview.finalizes_credit,
            "surplus entry applied"
        );

        Ok(AppliedResult {
            entry_id: entry.id,
            credit_id: credit.id,
            credit_finalized: preview.finalizes_credit,
            allocation: preview,
            applied_at,
        })
    }

    /// Return a pending entry to the deductora. No credit side effects.
    pub fn reintegrate(
        &self,
        entry_id: &EntryId,
        reason: &str,
        operator: &Operator,
    ) -> Result<SurplusEntry, AllocationError> {
        require_supervisor(operator)?;

        let lock = self.entry_lock(entry_id);
        let result = {
            let _guard = lock.lock().expect("entry lock poisoned");
            self.reintegrate_locked(entry_id, reason, operator)
        };
        drop(lock);
        self.release_entry_lock(entry_id);
        result
    }

    fn reintegrate_locked(
        &self,
        entry_id: &EntryId,
        reason: &str,
        operator: &Operator,
    ) -> Result<SurplusEntry, AllocationError> {
        let entry = self.load_entry(entry_id)?;
        if !entry.is_pending() {
            return Err(AllocationError::InvalidState {
                reason: format!("surplus entry is {}", entry.status.label()),
            });
        }

        let reintegration = Reintegration {
            reason: reason.to_string(),
            reintegrated_at: Utc::now(),
        };
        let updated = self.ledger.mark_reintegrated(entry_id, reintegration)?;

        info!(entry = %entry_id.0, operator = %operator.id, "surplus entry reintegrated");
        Ok(updated)
    }

    fn replay(
        &self,
        entry: &SurplusEntry,
        request: &CommitRequest,
    ) -> Result<AppliedResult, AllocationError> {
        let stored = entry
            .applied_to
            .as_ref()
            .ok_or_else(|| AllocationError::InvalidState {
                reason: "applied entry is missing its allocation snapshot".to_string(),
            })?;

        let amount = request.amount.unwrap_or(stored.preview.requested_amount);
        let matches = stored.credit_id == request.credit_id
            && stored.preview.action == request.action
            && (stored.preview.requested_amount - amount).abs() <= MONEY_EPSILON
            && request
                .expected_resulting_balance
                .map(|expected| (stored.preview.resulting_balance - expected).abs() <= MONEY_EPSILON)
                .unwrap_or(true);

        if !matches {
            return Err(AllocationError::Conflict {
                reason: "entry was already applied with a different allocation".to_string(),
            });
        }

        info!(entry = %entry.id.0, "commit replayed idempotently");
        Ok(AppliedResult {
            entry_id: entry.id.clone(),
            credit_id: stored.credit_id.clone(),
            allocation: stored.preview.clone(),
            applied_at: stored.applied_at,
            credit_finalized: stored.preview.finalizes_credit,
        })
    }

    fn restore_credit(&self, original: &Credit, current_version: u64) {
        if let Err(err) = self.credits.update(original.clone(), current_version) {
            warn!(credit = %original.id.0, error = %err, "credit rollback failed");
        }
    }

    fn rollback_journal(&self, entry_id: &EntryId) {
        if let Err(err) = self.credits.revert_payment(entry_id) {
            warn!(entry = %entry_id.0, error = %err, "journal rollback failed");
        }
    }

    fn load_entry(&self, id: &EntryId) -> Result<SurplusEntry, AllocationError> {
        self.ledger
            .fetch(id)?
            .ok_or_else(|| AllocationError::NotFound {
                what: "surplus entry",
                id: id.0.clone(),
            })
    }

    fn load_credit(&self, id: &CreditId) -> Result<Credit, AllocationError> {
        self.credits
            .fetch(id)?
            .ok_or_else(|| AllocationError::NotFound {
                what: "credit",
                id: id.0.clone(),
            })
    }

    fn entry_lock(&self, id: &EntryId) -> Arc<Mutex<()>> {
        let mut registry = self.entry_locks.lock().expect("lock registry poisoned");
        registry.entry(id.clone()).or_default().clone()
    }

    /// Drop the registry slot once no caller holds the lock anymore, so
    /// terminal entries do not pin a mutex forever.
    fn release_entry_lock(&self, id: &EntryId) {
        let mut registry = self.entry_locks.lock().expect("lock registry poisoned");
        if let Some(lock) = registry.get(id) {
            if Arc::strong_count(lock) == 1 {
                registry.remove(id);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn entry_lock_count(&self) -> usize {
        self.entry_locks.lock().expect("lock registry poisoned").len()
    }
}

fn require_supervisor(operator: &Operator) -> Result<(), AllocationError> {
    if operator.role.can_allocate() {
        Ok(())
    } else {
        Err(AllocationError::Unauthorized {
            required: "supervisor",
        })
    }
}

/// Project the preview onto the credit record. Pure; the caller persists.
fn apply_preview(credit: &Credit, preview: &AllocationPreview) -> Credit {
    let mut updated = credit.clone();
    updated.principal_balance = preview.resulting_balance;

    match preview.action {
        AllocationAction::Installment => {
            updated.accrued_moratorium_interest = (credit.accrued_moratorium_interest
                - preview.bucket(Bucket::Moratorium))
            .max(Decimal::ZERO);
            updated.accrued_ordinary_interest = (credit.accrued_ordinary_interest
                - preview.bucket(Bucket::Ordinary))
            .max(Decimal::ZERO);
        }
        AllocationAction::Principal { .. } => {
            updated.installment_amount = preview.resulting_installment;
        }
    }
    updated.remaining_term_months = preview.resulting_term;

    if preview.finalizes_credit {
        updated.principal_balance = Decimal::ZERO;
        updated.status = CreditStatus::Finalized;
    }
    updated
}
