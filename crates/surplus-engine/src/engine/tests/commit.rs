use std::sync::Arc;

use rust_decimal::Decimal;

use super::common::*;
use crate::engine::domain::{
    AllocationAction, Bucket, CreditId, CreditStatus, EntryId, PrincipalStrategy, SurplusStatus,
};
use crate::engine::planner::AllocationError;
use crate::engine::repository::{CreditStore, SurplusLedger};
use crate::engine::service::{CommitRequest, SurplusAllocationService};

fn installment_request() -> CommitRequest {
    CommitRequest {
        entry_id: EntryId("sp-1".to_string()),
        credit_id: CreditId("cr-100".to_string()),
        action: AllocationAction::Installment,
        amount: Some(dec("50000.00")),
        expected_resulting_balance: None,
    }
}

#[test]
fn installment_commit_updates_credit_and_ledger_together() {
    let (service, ledger, store) = build_service(vec![entry("50000.00")], vec![credit()]);

    let result = service
        .commit(&installment_request(), &supervisor())
        .expect("commit succeeds");

    assert_eq!(result.allocation.bucket(Bucket::Principal), dec("35000.00"));
    assert!(!result.credit_finalized);

    let stored_credit = store
        .fetch(&CreditId("cr-100".to_string()))
        .expect("store read")
        .expect("credit exists");
    assert_eq!(stored_credit.principal_balance, dec("465000.00"));
    assert_eq!(stored_credit.accrued_moratorium_interest, Decimal::ZERO);
    assert_eq!(stored_credit.accrued_ordinary_interest, Decimal::ZERO);
    assert_eq!(stored_credit.remaining_term_months, 11);
    assert_eq!(stored_credit.version, 2);

    let stored_entry = ledger
        .fetch(&EntryId("sp-1".to_string()))
        .expect("ledger read")
        .expect("entry exists");
    assert_eq!(stored_entry.status, SurplusStatus::Applied);
    let snapshot = stored_entry.applied_to.expect("snapshot recorded");
    assert_eq!(snapshot.preview, result.allocation);

    let journal = store.journal();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].buckets, result.allocation.buckets);
}

#[test]
fn principal_commit_recomputes_schedule() {
    let credit = amortizing_credit();
    let mut entry = entry("200000.00");
    entry.source_credit_id = credit.id.clone();
    let original_installment = credit.installment_amount;
    let (service, _ledger, store) = build_service(vec![entry], vec![credit]);

    let request = CommitRequest {
        entry_id: EntryId("sp-1".to_string()),
        credit_id: CreditId("cr-200".to_string()),
        action: AllocationAction::Principal {
            strategy: PrincipalStrategy::ReduceAmount,
        },
        amount: None,
        expected_resulting_balance: Some(dec("1000000.00")),
    };
    let result = service.commit(&request, &supervisor()).expect("commit succeeds");

    let stored = store
        .fetch(&CreditId("cr-200".to_string()))
        .expect("store read")
        .expect("credit exists");
    assert_eq!(stored.principal_balance, dec("1000000.00"));
    assert_eq!(stored.remaining_term_months, 24);
    assert!(stored.installment_amount < original_installment);
    assert_eq!(stored.installment_amount, result.allocation.resulting_installment);
}

#[test]
fn commit_is_idempotent_for_matching_replay() {
    let (service, _ledger, store) = build_service(vec![entry("50000.00")], vec![credit()]);

    let first = service
        .commit(&installment_request(), &supervisor())
        .expect("first commit");
    let second = service
        .commit(&installment_request(), &supervisor())
        .expect("replay succeeds");

    assert_eq!(first, second);

    // The credit was mutated exactly once.
    let stored = store
        .fetch(&CreditId("cr-100".to_string()))
        .expect("store read")
        .expect("credit exists");
    assert_eq!(stored.version, 2);
    assert_eq!(store.journal().len(), 1);
}

#[test]
fn replay_with_different_intent_conflicts() {
    let (service, _ledger, _store) = build_service(vec![entry("50000.00")], vec![credit()]);
    service
        .commit(&installment_request(), &supervisor())
        .expect("first commit");

    let mut altered = installment_request();
    altered.amount = Some(dec("40000.00"));
    let err = service.commit(&altered, &supervisor()).unwrap_err();
    assert!(matches!(err, AllocationError::Conflict { .. }));
}

#[test]
fn stale_fingerprint_conflicts_and_leaves_state_untouched() {
    let (service, ledger, store) = build_service(vec![entry("50000.00")], vec![credit()]);

    let mut request = installment_request();
    request.expected_resulting_balance = Some(dec("111111.00"));
    let err = service.commit(&request, &supervisor()).unwrap_err();
    assert!(matches!(err, AllocationError::Conflict { .. }));

    let stored_entry = ledger
        .fetch(&EntryId("sp-1".to_string()))
        .expect("ledger read")
        .expect("entry exists");
    assert_eq!(stored_entry.status, SurplusStatus::Pending);
    let stored_credit = store
        .fetch(&CreditId("cr-100".to_string()))
        .expect("store read")
        .expect("credit exists");
    assert_eq!(stored_credit, credit());
}

#[test]
fn concurrent_credit_drift_surfaces_conflict() {
    let ledger = Arc::new(MemoryLedger::default());
    ledger.insert(entry("50000.00")).expect("seed entry");
    let store = Arc::new(DriftingCreditStore {
        inner: MemoryCreditStore::default(),
    });
    store.inner.seed(credit());
    let service = SurplusAllocationService::new(ledger.clone(), store);

    let err = service
        .commit(&installment_request(), &supervisor())
        .unwrap_err();
    assert!(matches!(err, AllocationError::Conflict { .. }));

    let stored_entry = ledger
        .fetch(&EntryId("sp-1".to_string()))
        .expect("ledger read")
        .expect("entry exists");
    assert_eq!(stored_entry.status, SurplusStatus::Pending);
}

#[test]
fn journal_failure_rolls_back_the_credit() {
    let ledger = Arc::new(MemoryLedger::default());
    ledger.insert(entry("50000.00")).expect("seed entry");
    let store = Arc::new(FailingJournalStore {
        inner: MemoryCreditStore::default(),
    });
    store.inner.seed(credit());
    let service = SurplusAllocationService::new(ledger.clone(), store.clone());

    let err = service
        .commit(&installment_request(), &supervisor())
        .unwrap_err();
    assert!(matches!(err, AllocationError::Storage(_)));

    // Credit fields are back to the original snapshot; the entry never left
    // pending; nothing was journaled.
    let stored = store
        .inner
        .fetch(&CreditId("cr-100".to_string()))
        .expect("store read")
        .expect("credit exists");
    let original = credit();
    assert_eq!(stored.principal_balance, original.principal_balance);
    assert_eq!(stored.accrued_moratorium_interest, original.accrued_moratorium_interest);
    assert_eq!(stored.remaining_term_months, original.remaining_term_months);
    assert_eq!(stored.status, CreditStatus::Active);

    let stored_entry = ledger
        .fetch(&EntryId("sp-1".to_string()))
        .expect("ledger read")
        .expect("entry exists");
    assert_eq!(stored_entry.status, SurplusStatus::Pending);
    assert!(store.inner.journal().is_empty());
}

#[test]
fn ledger_failure_rolls_back_credit_and_journal() {
    let ledger = Arc::new(FailingApplyLedger {
        inner: MemoryLedger::default(),
    });
    ledger.inner.insert(entry("50000.00")).expect("seed entry");
    let store = Arc::new(MemoryCreditStore::default());
    store.seed(credit());
    let service = SurplusAllocationService::new(ledger.clone(), store.clone());

    let err = service
        .commit(&installment_request(), &supervisor())
        .unwrap_err();
    assert!(matches!(err, AllocationError::Storage(_)));

    // Both writes that preceded the failed transition were unwound: the
    // credit snapshot is back and no journal record is left behind.
    let stored = store
        .fetch(&CreditId("cr-100".to_string()))
        .expect("store read")
        .expect("credit exists");
    let original = credit();
    assert_eq!(stored.principal_balance, original.principal_balance);
    assert_eq!(stored.accrued_moratorium_interest, original.accrued_moratorium_interest);
    assert_eq!(stored.accrued_ordinary_interest, original.accrued_ordinary_interest);
    assert_eq!(stored.remaining_term_months, original.remaining_term_months);
    assert!(store.journal().is_empty());

    let stored_entry = ledger
        .inner
        .fetch(&EntryId("sp-1".to_string()))
        .expect("ledger read")
        .expect("entry exists");
    assert_eq!(stored_entry.status, SurplusStatus::Pending);
}

#[test]
fn entry_lock_registry_is_pruned_after_use() {
    let (service, _ledger, _store) = build_service(vec![entry("50000.00")], vec![credit()]);

    service
        .commit(&installment_request(), &supervisor())
        .expect("commit succeeds");
    assert_eq!(service.entry_lock_count(), 0);

    // Failed attempts release their slot as well.
    let mut unknown = installment_request();
    unknown.entry_id = EntryId("sp-404".to_string());
    service.commit(&unknown, &supervisor()).unwrap_err();
    assert_eq!(service.entry_lock_count(), 0);
}

#[test]
fn analyst_cannot_commit() {
    let (service, _ledger, _store) = build_service(vec![entry("50000.00")], vec![credit()]);
    let err = service
        .commit(&installment_request(), &analyst())
        .unwrap_err();
    assert!(matches!(err, AllocationError::Unauthorized { .. }));
}

#[test]
fn unknown_entry_and_credit_are_not_found() {
    let (service, _ledger, _store) = build_service(vec![], vec![credit()]);
    let err = service
        .commit(&installment_request(), &supervisor())
        .unwrap_err();
    assert!(matches!(err, AllocationError::NotFound { .. }));

    let (service, _ledger, _store) = build_service(vec![entry("50000.00")], vec![]);
    let err = service
        .commit(&installment_request(), &supervisor())
        .unwrap_err();
    assert!(matches!(err, AllocationError::NotFound { .. }));
}

#[test]
fn full_payoff_commit_finalizes_the_credit() {
    let mut small = credit();
    small.principal_balance = dec("30000.00");
    let (service, _ledger, store) = build_service(vec![entry("50000.00")], vec![small]);

    let request = CommitRequest {
        entry_id: EntryId("sp-1".to_string()),
        credit_id: CreditId("cr-100".to_string()),
        action: AllocationAction::Principal {
            strategy: PrincipalStrategy::ReduceAmount,
        },
        amount: Some(dec("30000.00")),
        expected_resulting_balance: Some(Decimal::ZERO),
    };
    let result = service.commit(&request, &supervisor()).expect("commit succeeds");
    assert!(result.credit_finalized);

    let stored = store
        .fetch(&CreditId("cr-100".to_string()))
        .expect("store read")
        .expect("credit exists");
    assert_eq!(stored.status, CreditStatus::Finalized);
    assert_eq!(stored.principal_balance, Decimal::ZERO);
    assert_eq!(stored.remaining_term_months, 0);
}
