use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::engine::domain::{
    AppliedAllocation, BorrowerId, Credit, CreditId, CreditStatus, DeductoraId, EntryId, Operator,
    OperatorRole, PaymentRecord, Reintegration, SurplusEntry, SurplusStatus,
};
use crate::engine::repository::{CreditStore, PendingFilter, RepositoryError, SurplusLedger};
use crate::engine::schedule::{annuity_payment, monthly_rate};
use crate::engine::service::SurplusAllocationService;

pub(super) fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).expect("valid decimal")
}

pub(super) fn borrower() -> BorrowerId {
    BorrowerId("001-1234567-8".to_string())
}

pub(super) fn supervisor() -> Operator {
    Operator {
        id: "maria.p".to_string(),
        role: OperatorRole::Supervisor,
    }
}

pub(super) fn analyst() -> Operator {
    Operator {
        id: "jorge.t".to_string(),
        role: OperatorRole::Analyst,
    }
}

/// Credit matching the arithmetic of the canonical installment scenario:
/// moratorium 2,000 and ordinary 8,000 accrued on a 43,000 installment, so
/// the installment due totals 45,000 with a 35,000 principal component.
pub(super) fn credit() -> Credit {
    Credit {
        id: CreditId("cr-100".to_string()),
        reference: "CRED-2024-0100".to_string(),
        borrower_id: borrower(),
        principal_balance: dec("500000.00"),
        installment_amount: dec("43000.00"),
        annual_rate: dec("0.28"),
        term_months: 36,
        remaining_term_months: 12,
        accrued_moratorium_interest: dec("2000.00"),
        accrued_ordinary_interest: dec("8000.00"),
        has_insurance: false,
        insurance_premium: Decimal::ZERO,
        status: CreditStatus::Active,
        version: 1,
    }
}

/// Credit for the principal-paydown scenarios: 1,200,000 at 32% nominal over
/// 24 remaining months, installment derived from the annuity formula.
pub(super) fn amortizing_credit() -> Credit {
    let balance = dec("1200000.00");
    let annual_rate = dec("0.32");
    let installment = annuity_payment(balance, monthly_rate(annual_rate), 24);
    Credit {
        id: CreditId("cr-200".to_string()),
        reference: "CRED-2024-0200".to_string(),
        borrower_id: borrower(),
        principal_balance: balance,
        installment_amount: installment,
        annual_rate,
        term_months: 48,
        remaining_term_months: 24,
        accrued_moratorium_interest: Decimal::ZERO,
        accrued_ordinary_interest: Decimal::ZERO,
        has_insurance: false,
        insurance_premium: Decimal::ZERO,
        status: CreditStatus::Active,
        version: 1,
    }
}

pub(super) fn entry(amount: &str) -> SurplusEntry {
    SurplusEntry {
        id: EntryId("sp-1".to_string()),
        borrower_id: borrower(),
        source_credit_id: CreditId("cr-100".to_string()),
        deductora_id: DeductoraId("ded-34".to_string()),
        amount: dec(amount),
        origin_date: NaiveDate::from_ymd_opt(2026, 7, 15).expect("valid date"),
        status: SurplusStatus::Pending,
        applied_to: None,
        reintegration: None,
    }
}

pub(super) fn build_service(
    entries: Vec<SurplusEntry>,
    credits: Vec<Credit>,
) -> (
    SurplusAllocationService<MemoryLedger, MemoryCreditStore>,
    Arc<MemoryLedger>,
    Arc<MemoryCreditStore>,
) {
    let ledger = Arc::new(MemoryLedger::default());
    for entry in entries {
        ledger.insert(entry).expect("seed entry");
    }
    let store = Arc::new(MemoryCreditStore::default());
    for credit in credits {
        store.seed(credit);
    }
    let service = SurplusAllocationService::new(ledger.clone(), store.clone());
    (service, ledger, store)
}

#[derive(Default)]
pub(super) struct MemoryLedger {
    entries: Mutex<HashMap<EntryId, SurplusEntry>>,
}

impl SurplusLedger for MemoryLedger {
    fn insert(&self, entry: SurplusEntry) -> Result<SurplusEntry, RepositoryError> {
        let mut guard = self.entries.lock().expect("ledger mutex poisoned");
        if guard.contains_key(&entry.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    fn fetch(&self, id: &EntryId) -> Result<Option<SurplusEntry>, RepositoryError> {
        let guard = self.entries.lock().expect("ledger mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn mark_applied(
        &self,
        id: &EntryId,
        allocation: AppliedAllocation,
    ) -> Result<SurplusEntry, RepositoryError> {
        let mut guard = self.entries.lock().expect("ledger mutex poisoned");
        let entry = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if entry.status != SurplusStatus::Pending {
            return Err(RepositoryError::Conflict);
        }
        entry.status = SurplusStatus::Applied;
        entry.applied_to = Some(allocation);
        Ok(entry.clone())
    }

    fn mark_reintegrated(
        &self,
        id: &EntryId,
        reintegration: Reintegration,
    ) -> Result<SurplusEntry, RepositoryError> {
        let mut guard = self.entries.lock().expect("ledger mutex poisoned");
        let entry = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if entry.status != SurplusStatus::Pending {
            return Err(RepositoryError::Conflict);
        }
        entry.status = SurplusStatus::Reintegrated;
        entry.reintegration = Some(reintegration);
        Ok(entry.clone())
    }

    fn pending(&self, filter: &PendingFilter) -> Result<Vec<SurplusEntry>, RepositoryError> {
        let guard = self.entries.lock().expect("ledger mutex poisoned");
        let mut pending: Vec<SurplusEntry> = guard
            .values()
            .filter(|entry| entry.status == SurplusStatus::Pending && filter.matches(entry))
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.origin_date
                .cmp(&b.origin_date)
                .then_with(|| a.id.0.cmp(&b.id.0))
        });
        Ok(pending)
    }
}

#[derive(Default)]
pub(super) struct MemoryCreditStore {
    credits: Mutex<HashMap<CreditId, Credit>>,
    journal: Mutex<Vec<PaymentRecord>>,
}

impl MemoryCreditStore {
    pub(super) fn seed(&self, credit: Credit) {
        let mut guard = self.credits.lock().expect("credit mutex poisoned");
        guard.insert(credit.id.clone(), credit);
    }

    pub(super) fn journal(&self) -> Vec<PaymentRecord> {
        self.journal.lock().expect("journal mutex poisoned").clone()
    }
}

impl CreditStore for MemoryCreditStore {
    fn fetch(&self, id: &CreditId) -> Result<Option<Credit>, RepositoryError> {
        let guard = self.credits.lock().expect("credit mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn active_for_borrower(&self, borrower: &BorrowerId) -> Result<Vec<Credit>, RepositoryError> {
        let guard = self.credits.lock().expect("credit mutex poisoned");
        let mut credits: Vec<Credit> = guard
            .values()
            .filter(|credit| &credit.borrower_id == borrower && credit.is_active())
            .cloned()
            .collect();
        credits.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(credits)
    }

    fn update(&self, mut credit: Credit, expected_version: u64) -> Result<Credit, RepositoryError> {
        let mut guard = self.credits.lock().expect("credit mutex poisoned");
        let stored = guard.get_mut(&credit.id).ok_or(RepositoryError::NotFound)?;
        if stored.version != expected_version {
            return Err(RepositoryError::Conflict);
        }
        credit.version = expected_version + 1;
        *stored = credit.clone();
        Ok(credit)
    }

    fn post_payment(&self, record: PaymentRecord) -> Result<(), RepositoryError> {
        self.journal
            .lock()
            .expect("journal mutex poisoned")
            .push(record);
        Ok(())
    }

    fn revert_payment(&self, entry_id: &EntryId) -> Result<(), RepositoryError> {
        self.journal
            .lock()
            .expect("journal mutex poisoned")
            .retain(|record| &record.entry_id != entry_id);
        Ok(())
    }
}

/// Simulates another writer touching the credit between the commit's fetch
/// and its update, so the optimistic version check must fire.
pub(super) struct DriftingCreditStore {
    pub(super) inner: MemoryCreditStore,
}

impl CreditStore for DriftingCreditStore {
    fn fetch(&self, id: &CreditId) -> Result<Option<Credit>, RepositoryError> {
        let fetched = self.inner.fetch(id)?;
        if let Some(credit) = &fetched {
            let mut drifted = credit.clone();
            drifted.principal_balance -= Decimal::ONE;
            self.inner.update(drifted, credit.version)?;
        }
        Ok(fetched)
    }

    fn active_for_borrower(&self, borrower: &BorrowerId) -> Result<Vec<Credit>, RepositoryError> {
        self.inner.active_for_borrower(borrower)
    }

    fn update(&self, credit: Credit, expected_version: u64) -> Result<Credit, RepositoryError> {
        self.inner.update(credit, expected_version)
    }

    fn post_payment(&self, record: PaymentRecord) -> Result<(), RepositoryError> {
        self.inner.post_payment(record)
    }

    fn revert_payment(&self, entry_id: &EntryId) -> Result<(), RepositoryError> {
        self.inner.revert_payment(entry_id)
    }
}

/// Accepts credit updates but refuses to journal the payment, forcing the
/// commit executor down its rollback path.
pub(super) struct FailingJournalStore {
    pub(super) inner: MemoryCreditStore,
}

impl CreditStore for FailingJournalStore {
    fn fetch(&self, id: &CreditId) -> Result<Option<Credit>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn active_for_borrower(&self, borrower: &BorrowerId) -> Result<Vec<Credit>, RepositoryError> {
        self.inner.active_for_borrower(borrower)
    }

    fn update(&self, credit: Credit, expected_version: u64) -> Result<Credit, RepositoryError> {
        self.inner.update(credit, expected_version)
    }

    fn post_payment(&self, _record: PaymentRecord) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("journal offline".to_string()))
    }

    fn revert_payment(&self, entry_id: &EntryId) -> Result<(), RepositoryError> {
        self.inner.revert_payment(entry_id)
    }
}

/// Accepts reads and journal writes but refuses the applied transition, so
/// the commit executor must unwind both the credit write and the journal
/// record it already made.
pub(super) struct FailingApplyLedger {
    pub(super) inner: MemoryLedger,
}

impl SurplusLedger for FailingApplyLedger {
    fn insert(&self, entry: SurplusEntry) -> Result<SurplusEntry, RepositoryError> {
        self.inner.insert(entry)
    }

    fn fetch(&self, id: &EntryId) -> Result<Option<SurplusEntry>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn mark_applied(
        &self,
        _id: &EntryId,
        _allocation: AppliedAllocation,
    ) -> Result<SurplusEntry, RepositoryError> {
        Err(RepositoryError::Unavailable("ledger offline".to_string()))
    }

    fn mark_reintegrated(
        &self,
        id: &EntryId,
        reintegration: Reintegration,
    ) -> Result<SurplusEntry, RepositoryError> {
        self.inner.mark_reintegrated(id, reintegration)
    }

    fn pending(&self, filter: &PendingFilter) -> Result<Vec<SurplusEntry>, RepositoryError> {
        self.inner.pending(filter)
    }
}
