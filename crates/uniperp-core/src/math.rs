// crates/uniperp-core/src/math.rs
//
// Checked integer arithmetic for reward accounting.
//
// Amounts are u128 base units and the reward accumulator is scaled by 1e30,
// so products such as `distributed * PRECISION` routinely exceed 128 bits.
// `mul_div` therefore forms the full 256-bit product before dividing, and
// only fails when the final quotient itself does not fit.

use crate::error::ProtocolError;
use crate::token::Amount;

/// Fixed-point scale of the cumulative-reward-per-token accumulator.
pub const PRECISION: u128 = 1_000_000_000_000_000_000_000_000_000_000;

/// Basis-point denominator (100% = 10,000 bps).
pub const BASIS_POINTS_DIVISOR: u128 = 10_000;

/// Seconds in a 365-day year; the bonus emission period.
pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 60 * 60;

const LOW_MASK: u128 = u64::MAX as u128;

/// Full 256-bit product of two u128 values as `(high, low)`.
fn mul_wide(a: u128, b: u128) -> (u128, u128) {
    let (a_hi, a_lo) = (a >> 64, a & LOW_MASK);
    let (b_hi, b_lo) = (b >> 64, b & LOW_MASK);

    let lo_lo = a_lo * b_lo;
    let lo_hi = a_lo * b_hi;
    let hi_lo = a_hi * b_lo;
    let hi_hi = a_hi * b_hi;

    // At most three 64-bit quantities, fits comfortably in u128.
    let mid = (lo_lo >> 64) + (lo_hi & LOW_MASK) + (hi_lo & LOW_MASK);
    let low = (lo_lo & LOW_MASK) | (mid << 64);
    let high = hi_hi + (lo_hi >> 64) + (hi_lo >> 64) + (mid >> 64);
    (high, low)
}

/// `floor(a * b / denom)` without intermediate overflow.
///
/// # Errors
/// `MathOverflow` on division by zero or when the quotient exceeds u128.
pub fn mul_div(a: u128, b: u128, denom: u128) -> Result<u128, ProtocolError> {
    if denom == 0 {
        return Err(ProtocolError::MathOverflow("division by zero".to_string()));
    }
    let (high, low) = mul_wide(a, b);
    if high == 0 {
        return Ok(low / denom);
    }
    if high >= denom {
        return Err(ProtocolError::MathOverflow(format!(
            "{} * {} / {} does not fit in 128 bits",
            a, b, denom
        )));
    }

    // Restoring long division of the low word with `high` as the running remainder.
    let mut rem = high;
    let mut quotient: u128 = 0;
    for i in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((low >> i) & 1);
        quotient <<= 1;
        if carry == 1 || rem >= denom {
            rem = rem.wrapping_sub(denom);
            quotient |= 1;
        }
    }
    Ok(quotient)
}

pub fn add(a: Amount, b: Amount) -> Result<Amount, ProtocolError> {
    a.checked_add(b)
        .ok_or_else(|| ProtocolError::MathOverflow(format!("{} + {} overflows", a, b)))
}

pub fn sub(a: Amount, b: Amount) -> Result<Amount, ProtocolError> {
    a.checked_sub(b)
        .ok_or_else(|| ProtocolError::MathOverflow(format!("{} - {} underflows", a, b)))
}

pub fn mul(a: Amount, b: Amount) -> Result<Amount, ProtocolError> {
    a.checked_mul(b)
        .ok_or_else(|| ProtocolError::MathOverflow(format!("{} * {} overflows", a, b)))
}
