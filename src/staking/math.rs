//! Fixed-point helpers.
//!
//! All intermediate products go through `num-bigint` so `value * SCALE`
//! cannot overflow; results saturate at `u128::MAX` and clamp at zero.

use num_bigint::{BigInt, BigUint, Sign};

use super::types::{Amount, RATE_DENOMINATOR};

fn biguint_to_u128(value: &BigUint) -> u128 {
    u128::try_from(value).unwrap_or(u128::MAX)
}

fn bigint_to_u128(value: &BigInt) -> u128 {
    if value.sign() == Sign::Minus {
        return 0;
    }
    u128::try_from(value).unwrap_or(u128::MAX)
}

/// `a * b / d` with a 256-bit-plus intermediate, rounding down.
///
/// Returns `None` when `d == 0`.
pub fn mul_div(a: u128, b: u128, d: u128) -> Option<u128> {
    if d == 0 {
        return None;
    }
    let product = BigUint::from(a) * BigUint::from(b);
    Some(biguint_to_u128(&(product / BigUint::from(d))))
}

/// Linear extrapolation through `(old_t, old_v)` and `(new_t, new_v)`
/// evaluated at `at`: `new_v + slope * (at - new_t)`.
///
/// The per-second slope `(new_v - old_v) / (new_t - old_t)` is taken first
/// and truncates toward zero, so a slope that does not divide evenly loses
/// its fractional part. `at` may lie before `old_t` or after `new_t`. The
/// slope may be negative; a negative result clamps to zero.
/// Requires `new_t > old_t`; a degenerate span yields `new_v`.
pub fn extrapolate(old_v: Amount, old_t: u64, new_v: Amount, new_t: u64, at: u64) -> Amount {
    if new_t <= old_t {
        return new_v;
    }
    let delta_v = BigInt::from(new_v) - BigInt::from(old_v);
    let slope = delta_v / BigInt::from(new_t - old_t);
    let elapsed = BigInt::from(at) - BigInt::from(new_t);
    let value = BigInt::from(new_v) + slope * elapsed;
    bigint_to_u128(&value)
}

/// Relative difference `|candidate - reference| / reference` in parts per
/// `RATE_DENOMINATOR`. A zero reference yields `u128::MAX` unless both are zero.
pub fn relative_change(candidate: u128, reference: u128) -> u128 {
    if reference == 0 {
        return if candidate == 0 { 0 } else { u128::MAX };
    }
    let diff = candidate.abs_diff(reference);
    mul_div(diff, RATE_DENOMINATOR as u128, reference).unwrap_or(u128::MAX)
}
