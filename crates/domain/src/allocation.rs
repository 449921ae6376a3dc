//! Exact integer allocation.

use common::Money;

/// Splits `total` into `parts` integer shares that sum exactly to `total`.
///
/// Every share is `floor(total / parts)`; the first `total mod parts`
/// shares get one more. Shares therefore differ by at most one and the
/// larger ones come first:
///
/// ```
/// assert_eq!(domain::allocation::split_evenly(20, 3), vec![7, 7, 6]);
/// assert_eq!(domain::allocation::split_evenly(10, 3), vec![4, 3, 3]);
/// ```
///
/// Returns an empty vector when `parts` is zero.
pub fn split_evenly(total: i64, parts: usize) -> Vec<i64> {
    if parts == 0 {
        return Vec::new();
    }

    let n = parts as i64;
    let base = total.div_euclid(n);
    let remainder = total.rem_euclid(n) as usize;

    (0..parts)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

/// Splits a money amount into `parts` shares.
pub fn split_money(total: Money, parts: usize) -> Vec<Money> {
    split_evenly(total.amount(), parts)
        .into_iter()
        .map(Money::new)
        .collect()
}

/// Splits a unit count into `parts` shares.
pub fn split_units(units: u32, parts: usize) -> Vec<u32> {
    split_evenly(i64::from(units), parts)
        .into_iter()
        .map(|share| share as u32)
        .collect()
}
