//! Small bit-arithmetic helpers used for order/size conversions, built on
//! stable `usize` methods only.

/// Floor of `log2(n)`. Panics if `n == 0`.
#[inline]
pub fn log2_floor(n: usize) -> usize {
    assert!(n != 0, "log2_floor of zero");
    usize::BITS as usize - 1 - n.leading_zeros() as usize
}

/// Ceiling of `log2(n)`. Panics if `n == 0`.
#[inline]
pub fn log2_ceil(n: usize) -> usize {
    assert!(n != 0, "log2_ceil of zero");
    let floor = log2_floor(n);
    if n.is_power_of_two() {
        floor
    } else {
        floor + 1
    }
}

/// Number of trailing zero bits, i.e. the order of the largest power of two
/// dividing `n`. Returns `usize::BITS` for `n == 0`.
#[inline]
pub fn trailing_zeros(n: usize) -> usize {
    n.trailing_zeros() as usize
}

/// Ceiling-divide `a` by `b`.
#[inline]
pub fn div_ceil(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}
