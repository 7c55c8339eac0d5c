//! Amortized-loan schedule arithmetic shared by the allocation planner.
//!
//! Stored amounts are fixed-point (`Decimal`, 2 fraction digits); the power
//! terms of the annuity formula are evaluated in `f64` and the result is
//! rounded back to cents.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use super::domain::MONEY_EPSILON;

/// Round a monetary value to 2 fraction digits, half away from zero.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Monthly rate for a nominal annual rate expressed as a fraction.
pub fn monthly_rate(annual_rate: Decimal) -> f64 {
    annual_rate.to_f64().unwrap_or(0.0) / 12.0
}

/// Standard annuity payment for `balance` amortized over `term` months at
/// monthly rate `rate`: `B * r(1+r)^n / ((1+r)^n - 1)`. Falls back to the
/// straight division for a zero rate.
pub fn annuity_payment(balance: Decimal, rate: f64, term: u32) -> Decimal {
    debug_assert!(term > 0);
    let b = balance.to_f64().unwrap_or(0.0);
    let n = term as i32;

    let payment = if rate > 0.0 {
        let factor = (1.0 + rate).powi(n);
        b * rate * factor / (factor - 1.0)
    } else {
        b / n as f64
    };

    round2(Decimal::from_f64(payment).unwrap_or(Decimal::ZERO))
}

/// Present value of an annuity of `payment` over `term` months at monthly
/// rate `rate`. Used by tests to close the loop on recomputed installments.
pub fn annuity_present_value(payment: Decimal, rate: f64, term: u32) -> Decimal {
    let p = payment.to_f64().unwrap_or(0.0);
    let value = if rate > 0.0 {
        p * (1.0 - (1.0 + rate).powi(-(term as i32))) / rate
    } else {
        p * term as f64
    };
    round2(Decimal::from_f64(value).unwrap_or(Decimal::ZERO))
}

/// Smallest term `n >= 1` whose annuity payment for `balance` at `rate`
/// does not exceed `installment` by more than one cent.
///
/// Returns `None` when the installment cannot amortize the balance (it does
/// not even cover one month's interest), which has no finite solution.
pub fn term_for_payment(balance: Decimal, rate: f64, installment: Decimal) -> Option<u32> {
    let ceiling = installment + MONEY_EPSILON;
    if installment <= Decimal::ZERO {
        return None;
    }

    if rate <= 0.0 {
        let n = (balance / installment).ceil().to_u32()?;
        return Some(n.max(1));
    }

    let b = balance.to_f64().unwrap_or(0.0);
    let p = ceiling.to_f64().unwrap_or(0.0);
    if p <= b * rate {
        return None;
    }

    // Closed-form solve, then nudge to absorb the float/cent rounding seam.
    let raw = (p / (p - b * rate)).ln() / (1.0 + rate).ln();
    let mut n = raw.ceil().max(1.0) as u32;
    while n > 1 && annuity_payment(balance, rate, n - 1) <= ceiling {
        n -= 1;
    }
    while annuity_payment(balance, rate, n) > ceiling {
        n += 1;
    }
    Some(n)
}
