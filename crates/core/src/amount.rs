//! Integer minor-unit amounts.
//!
//! Every monetary value in the ledger is an `i64` count of the group's
//! smallest currency unit (e.g. cents). There is no floating point anywhere in
//! balance math; all arithmetic is checked.
//!
//! Write-time validation caps every record at [`Amount::MAX_RECORD`] and every
//! group's gross volume at `i64::MAX`, so folding a stored log can never
//! overflow. An overflow during arithmetic is therefore reported as an
//! invariant violation, not as bad input.

use core::ops::Neg;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Signed amount in minor units.
///
/// Positive for amounts owed *to* someone, negative for amounts owed *by*
/// someone, depending on context. Record fields (expense totals, shares,
/// settlements) are validated non-negative at the write gate.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Largest expense total, share or settlement a single record may carry:
    /// 10^15 minor units (ten trillion in a two-decimal currency).
    pub const MAX_RECORD: Amount = Amount(1_000_000_000_000_000);

    pub const fn new(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Magnitude of the amount. Fails only for `i64::MIN`.
    pub fn abs(self) -> DomainResult<Self> {
        self.0
            .checked_abs()
            .map(Self)
            .ok_or_else(|| DomainError::invariant("amount out of range"))
    }

    pub fn checked_add(self, other: Amount) -> DomainResult<Self> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or_else(|| DomainError::invariant("amount overflow"))
    }

    pub fn checked_sub(self, other: Amount) -> DomainResult<Self> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or_else(|| DomainError::invariant("amount overflow"))
    }

    pub fn min(self, other: Amount) -> Self {
        if self.0 <= other.0 { self } else { other }
    }

    /// Checked sum of a sequence of amounts.
    pub fn sum<I>(amounts: I) -> DomainResult<Self>
    where
        I: IntoIterator<Item = Amount>,
    {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, |acc, a| acc.checked_add(a))
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Self::Output {
        Amount(-self.0)
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Amount> for i64 {
    fn from(value: Amount) -> Self {
        value.0
    }
}

impl core::fmt::Display for Amount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Split `total` into `parts` shares that sum to exactly `total`.
///
/// The remainder (`total mod parts`) goes one unit at a time to the first
/// shares in order, so `split_evenly(100, 3) == [34, 33, 33]`.
pub fn split_evenly(total: Amount, parts: usize) -> DomainResult<Vec<Amount>> {
    if parts == 0 {
        return Err(DomainError::validation("cannot split across zero shares"));
    }
    if total.is_negative() {
        return Err(DomainError::validation("cannot split a negative amount"));
    }

    let n = i64::try_from(parts).map_err(|_| DomainError::validation("too many shares"))?;
    let base = total.0 / n;
    let remainder = (total.0 % n) as usize;

    Ok((0..parts)
        .map(|idx| {
            if idx < remainder {
                Amount(base + 1)
            } else {
                Amount(base)
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn uneven_split_front_loads_remainder() {
        let shares = split_evenly(Amount::new(100), 3).unwrap();
        assert_eq!(shares, vec![Amount::new(34), Amount::new(33), Amount::new(33)]);
    }

    #[test]
    fn even_split_has_no_remainder() {
        let shares = split_evenly(Amount::new(300), 3).unwrap();
        assert!(shares.iter().all(|s| *s == Amount::new(100)));
    }

    #[test]
    fn split_smaller_than_parts_gives_zeros_at_the_tail() {
        let shares = split_evenly(Amount::new(2), 4).unwrap();
        assert_eq!(
            shares,
            vec![Amount::new(1), Amount::new(1), Amount::ZERO, Amount::ZERO]
        );
    }

    #[test]
    fn split_rejects_zero_parts_and_negative_totals() {
        assert!(split_evenly(Amount::new(10), 0).is_err());
        assert!(split_evenly(Amount::new(-10), 2).is_err());
    }

    #[test]
    fn checked_arithmetic_reports_overflow_as_integrity() {
        let err = Amount::new(i64::MAX).checked_add(Amount::new(1)).unwrap_err();
        assert!(err.is_integrity());
        assert!(Amount::new(i64::MIN).abs().unwrap_err().is_integrity());
        assert!(Amount::new(i64::MIN).checked_sub(Amount::new(1)).unwrap_err().is_integrity());
        assert!(Amount::sum([Amount::new(i64::MAX), Amount::new(1)]).is_err());
    }

    #[test]
    fn record_ceiling_leaves_room_for_many_records() {
        assert!(Amount::MAX_RECORD.is_positive());
        assert!(i64::MAX / Amount::MAX_RECORD.minor() > 9_000);
    }

    #[test]
    fn serializes_as_bare_integer() {
        let json = serde_json::to_string(&Amount::new(1250)).unwrap();
        assert_eq!(json, "1250");
    }

    proptest! {
        /// Property: an even split never drops or invents units, and no two
        /// shares differ by more than one unit.
        #[test]
        fn split_preserves_total(total in 0i64..10_000_000i64, parts in 1usize..50) {
            let shares = split_evenly(Amount::new(total), parts).unwrap();
            prop_assert_eq!(shares.len(), parts);
            prop_assert_eq!(Amount::sum(shares.iter().copied()).unwrap(), Amount::new(total));

            let max = shares.iter().max().unwrap().minor();
            let min = shares.iter().min().unwrap().minor();
            prop_assert!(max - min <= 1);
        }
    }
}
