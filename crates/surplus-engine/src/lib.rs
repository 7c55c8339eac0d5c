//! Surplus balance reallocation engine ("saldos pendientes") for a
//! payroll-deduction lending platform.
//!
//! When a payroll deduction collected for a borrower exceeds the amount
//! currently due, the excess is held as a surplus entry. This crate owns the
//! full lifecycle of those entries: listing the pending ones, previewing how
//! an allocation would absorb the funds, committing exactly one allocation
//! against live credit state, and reversing entries back to the deductora.

pub mod config;
pub mod engine;
pub mod error;
pub mod telemetry;
