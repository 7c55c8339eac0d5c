use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal::Decimal;
use surplus_engine::engine::{
    AppliedAllocation, BorrowerId, Credit, CreditId, CreditStatus, CreditStore, DeductoraId,
    EntryId, PaymentRecord, PendingFilter, Reintegration, RepositoryError, SurplusEntry,
    SurplusLedger, SurplusStatus,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// In-memory surplus ledger. Production deployments swap this for the
/// platform database adapter; the trait contract (compare-and-set terminal
/// transitions) is the same.
#[derive(Default)]
pub(crate) struct InMemorySurplusLedger {
    entries: Mutex<HashMap<EntryId, SurplusEntry>>,
}

impl SurplusLedger for InMemorySurplusLedger {
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

/// In-memory credit schedule store with an optimistic version stamp and a
/// payment journal.
#[derive(Default)]
pub(crate) struct InMemoryCreditStore {
    credits: Mutex<HashMap<CreditId, Credit>>,
    journal: Mutex<Vec<PaymentRecord>>,
}

impl InMemoryCreditStore {
    pub(crate) fn seed(&self, credit: Credit) {
        let mut guard = self.credits.lock().expect("credit mutex poisoned");
        guard.insert(credit.id.clone(), credit);
    }

    pub(crate) fn journal(&self) -> Vec<PaymentRecord> {
        self.journal.lock().expect("journal mutex poisoned").clone()
    }
}

impl CreditStore for InMemoryCreditStore {
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

fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).expect("valid decimal literal")
}

/// Seed a borrower with two active credits and two pending surplus entries
/// so the serve/demo commands have something to allocate.
pub(crate) fn seed_demo_data(ledger: &InMemorySurplusLedger, store: &InMemoryCreditStore) {
    let borrower = BorrowerId("001-1234567-8".to_string());

    store.seed(Credit {
        id: CreditId("cr-100".to_string()),
        reference: "CRED-2024-0100".to_string(),
        borrower_id: borrower.clone(),
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
    });
    store.seed(Credit {
        id: CreditId("cr-200".to_string()),
        reference: "CRED-2025-0200".to_string(),
        borrower_id: borrower.clone(),
        principal_balance: dec("1200000.00"),
        installment_amount: dec("68338.74"),
        annual_rate: dec("0.32"),
        term_months: 48,
        remaining_term_months: 24,
        accrued_moratorium_interest: Decimal::ZERO,
        accrued_ordinary_interest: Decimal::ZERO,
        has_insurance: true,
        insurance_premium: dec("1500.00"),
        status: CreditStatus::Active,
        version: 1,
    });

    let entries = [
        ("sp-1", "50000.00", 10),
        ("sp-2", "200000.00", 18),
    ];
    for (id, amount, day) in entries {
        ledger
            .insert(SurplusEntry {
                id: EntryId(id.to_string()),
                borrower_id: borrower.clone(),
                source_credit_id: CreditId("cr-100".to_string()),
                deductora_id: DeductoraId("ded-34".to_string()),
                amount: dec(amount),
                origin_date: NaiveDate::from_ymd_opt(2026, 7, day).expect("valid seed date"),
                status: SurplusStatus::Pending,
                applied_to: None,
                reintegration: None,
            })
            .expect("seed entry");
    }
}
