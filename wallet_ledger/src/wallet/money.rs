//! Exact decimal arithmetic for balances.
//!
//! `rust_decimal` rounds a result whose digits do not fit its 96-bit
//! mantissa. A ledger may not drift, so these helpers return `None` instead.

use rust_decimal::Decimal;

/// `lhs + rhs`, or `None` if the exact sum is not representable
pub fn exact_add(lhs: Decimal, rhs: Decimal) -> Option<Decimal> {
    let (lhs, rhs, scale) = align(lhs, rhs)?;
    finish(lhs.checked_add(rhs)?, scale)
}

/// `lhs - rhs`, or `None` if the exact difference is not representable
pub fn exact_sub(lhs: Decimal, rhs: Decimal) -> Option<Decimal> {
    let (lhs, rhs, scale) = align(lhs, rhs)?;
    finish(lhs.checked_sub(rhs)?, scale)
}

/// Mantissas of both operands at their common (finest) scale.
///
/// An `i128` overflow here implies the exact result needs more than 96 bits.
fn align(lhs: Decimal, rhs: Decimal) -> Option<(i128, i128, u32)> {
    let lhs = lhs.normalize();
    let rhs = rhs.normalize();
    let scale = lhs.scale().max(rhs.scale());
    Some((rescale(lhs, scale)?, rescale(rhs, scale)?, scale))
}

/// Build the result, dropping trailing zeros only when the mantissa is too wide
fn finish(mut mantissa: i128, mut scale: u32) -> Option<Decimal> {
    while scale > 0 && mantissa % 10 == 0 && mantissa.unsigned_abs() >= 1u128 << 96 {
        mantissa /= 10;
        scale -= 1;
    }
    Decimal::try_from_i128_with_scale(mantissa, scale).ok()
}

fn rescale(value: Decimal, scale: u32) -> Option<i128> {
    value
        .mantissa()
        .checked_mul(10i128.checked_pow(scale - value.scale())?)
}
