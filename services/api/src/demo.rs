use crate::infra::{seed_demo_data, InMemoryCreditStore, InMemorySurplusLedger};
use clap::Args;
use std::sync::Arc;
use surplus_engine::engine::{
    AllocationAction, CommitRequest, CreditId, EntryId, Operator, OperatorRole, PageRequest,
    PendingFilter, PreviewRequest, PrincipalStrategy, SurplusAllocationService,
};
use surplus_engine::error::AppError;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Principal paydown strategy for the second entry: reduce_amount or reduce_term
    #[arg(long, default_value = "reduce_term", value_parser = parse_strategy)]
    pub(crate) strategy: PrincipalStrategy,
}

fn parse_strategy(raw: &str) -> Result<PrincipalStrategy, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "reduce_amount" => Ok(PrincipalStrategy::ReduceAmount),
        "reduce_term" => Ok(PrincipalStrategy::ReduceTerm),
        other => Err(format!("unknown strategy '{other}'")),
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let ledger = Arc::new(InMemorySurplusLedger::default());
    let credits = Arc::new(InMemoryCreditStore::default());
    seed_demo_data(&ledger, &credits);
    let service = SurplusAllocationService::new(ledger, credits.clone());

    println!("Surplus reallocation demo");
    println!("=========================");

    let pending = service.list_pending(&PendingFilter::default(), PageRequest::default())?;
    println!("\nPending surplus entries ({}):", pending.total);
    for entry in &pending.items {
        println!(
            "  {}  borrower {}  deductora {}  {}  (origin {})",
            entry.id.0, entry.borrower_id.0, entry.deductora_id.0, entry.amount, entry.origin_date
        );
    }

    let operator = Operator {
        id: "demo.supervisor".to_string(),
        role: OperatorRole::Supervisor,
    };

    // Entry 1: installment payment on the smaller credit.
    let preview = service.preview(&PreviewRequest {
        entry_id: EntryId("sp-1".to_string()),
        credit_id: CreditId("cr-100".to_string()),
        action: AllocationAction::Installment,
        amount: None,
    })?;
    println!("\nPreview sp-1 -> cr-100 (installment):");
    for bucket in &preview.buckets {
        println!("  {:<12} {}", bucket.bucket.label(), bucket.amount);
    }
    println!(
        "  full installment: {:?}, overflow {}, resulting balance {}",
        preview.is_full_installment, preview.overflow, preview.resulting_balance
    );

    let result = service.commit(
        &CommitRequest {
            entry_id: EntryId("sp-1".to_string()),
            credit_id: CreditId("cr-100".to_string()),
            action: AllocationAction::Installment,
            amount: None,
            expected_resulting_balance: Some(preview.resulting_balance),
        },
        &operator,
    )?;
    println!(
        "\nCommitted sp-1: credit {} now at balance {}, applied at {}",
        result.credit_id.0, result.allocation.resulting_balance, result.applied_at
    );

    // Entry 2: advisory distribution, then a principal paydown.
    let suggestions = service.distribution(
        &EntryId("sp-2".to_string()),
        &[CreditId("cr-100".to_string()), CreditId("cr-200".to_string())],
    )?;
    println!("\nAdvisory distribution for sp-2:");
    for suggestion in &suggestions {
        println!(
            "  {}  {} whole installment(s), {} allocated{}",
            suggestion.credit_id.0,
            suggestion.installments_covered,
            suggestion.amount_allocated,
            if suggestion.partial_remainder {
                format!(", partial remainder {}", suggestion.remainder_amount)
            } else {
                String::new()
            }
        );
    }

    let principal = service.preview(&PreviewRequest {
        entry_id: EntryId("sp-2".to_string()),
        credit_id: CreditId("cr-200".to_string()),
        action: AllocationAction::Principal {
            strategy: args.strategy,
        },
        amount: None,
    })?;
    println!(
        "\nPreview sp-2 -> cr-200 (principal, {}): balance {} -> {}, installment {}, term {} months",
        args.strategy.label(),
        "1200000.00",
        principal.resulting_balance,
        principal.resulting_installment,
        principal.resulting_term
    );

    let result = service.commit(
        &CommitRequest {
            entry_id: EntryId("sp-2".to_string()),
            credit_id: CreditId("cr-200".to_string()),
            action: AllocationAction::Principal {
                strategy: args.strategy,
            },
            amount: None,
            expected_resulting_balance: Some(principal.resulting_balance),
        },
        &operator,
    )?;
    println!(
        "Committed sp-2: finalized={}, journal now holds {} posting(s)",
        result.credit_finalized,
        credits.journal().len()
    );

    Ok(())
}
