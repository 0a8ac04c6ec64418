//! Divider strategy used by the priority discipline to turn a quantity of
//! handler slots into a per-priority allocation.
//!
//! A divider is a pure function of `(quantity, priorities, distribution)`. It
//! must only *add* to `distribution` (never remove or reset entries it didn't
//! touch) and must never mutate `priorities`. `priorities` is guaranteed by
//! every caller in this crate to be non-empty, sorted descending, and free of
//! zero priorities.

use std::collections::HashMap;
use thiserror::Error;

/// Error types for divider operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DividerError {
    /// An intermediate sum overflowed the integer width used for quantities.
    #[error("arithmetic overflow while dividing")]
    ArithmeticOverflow,
}

/// Distributes a quantity of handler slots across a sorted priority list.
///
/// Implementations must satisfy two contracts, both covered by the property
/// tests in `tests/divider_tests.rs`:
///
/// - **Preservation**: the sum of the increments made to `distribution` equals
///   `quantity` exactly.
/// - **Monotonicity**: for a fixed priority list, the count assigned to any one
///   priority never decreases as `quantity` grows.
pub trait Divider: Send + Sync {
    /// Adds to `distribution` the slots assigned to each entry of `priorities`
    /// for the given `quantity`.
    fn divide(
        &self,
        quantity: u64,
        priorities: &[u64],
        distribution: &mut HashMap<u64, u64>,
    ) -> Result<(), DividerError>;
}

/// Distributes slots evenly among priorities.
///
/// Base = `quantity / priorities.len()`; the remainder is handed out one unit
/// at a time to priorities in the order given (descending), so the highest
/// priorities absorb the leftover.
///
/// # Examples
///
/// - `Fair(10, [7, 2, 1]) = {7: 4, 2: 3, 1: 3}`
/// - `Fair(6, [3, 2, 1]) = {3: 2, 2: 2, 1: 2}`
#[derive(Debug, Clone, Copy, Default)]
pub struct Fair;

impl Divider for Fair {
    fn divide(
        &self,
        quantity: u64,
        priorities: &[u64],
        distribution: &mut HashMap<u64, u64>,
    ) -> Result<(), DividerError> {
        let divisor = priorities.len() as u64;
        let base = quantity / divisor;
        let mut remainder = quantity % divisor;

        for &priority in priorities {
            let mut part = base;

            if remainder != 0 {
                part += 1;
                remainder -= 1;
            }

            *distribution.entry(priority).or_insert(0) += part;
        }

        Ok(())
    }
}

/// Distributes slots in proportion to priority value.
///
/// Let `s` be the sum of all priorities. Base = `quantity / s`; a "quicking"
/// phase hands one extra unit to each priority (up to `min(priorities.len(),
/// remainder)`) before the proportional split, so small `quantity` values
/// don't starve low priorities. After quicking, each priority receives
/// `base * priority + min(remainder, priority - 1)`, consuming the remainder
/// greedily from the highest priority down.
///
/// # Examples
///
/// - `Rate(10, [7, 2, 1]) = {7: 7, 2: 2, 1: 1}`
/// - `Rate(11, [3, 2, 1]) = {3: 6, 2: 3, 1: 2}`
#[derive(Debug, Clone, Copy, Default)]
pub struct Rate;

impl Divider for Rate {
    fn divide(
        &self,
        quantity: u64,
        priorities: &[u64],
        distribution: &mut HashMap<u64, u64>,
    ) -> Result<(), DividerError> {
        let mut sum: u64 = 0;
        for &priority in priorities {
            sum = sum
                .checked_add(priority)
                .ok_or(DividerError::ArithmeticOverflow)?;
        }

        let base = quantity / sum;
        let remainder = quantity % sum;

        let mut quicking = priorities.len() as u64;
        if quicking > remainder {
            quicking = remainder;
        }
        let mut remainder = remainder - quicking;

        for &priority in priorities {
            let mut part = base
                .checked_mul(priority)
                .ok_or(DividerError::ArithmeticOverflow)?;

            if quicking != 0 {
                part += 1;
                quicking -= 1;
            }

            // priority >= 1 is guaranteed by every caller in this crate.
            let rating = priority - 1;

            if remainder < rating {
                part += remainder;
                remainder = 0;
            } else {
                part += rating;
                remainder -= rating;
            }

            *distribution.entry(priority).or_insert(0) += part;
        }

        Ok(())
    }
}

/// Sums the values in a distribution, failing on overflow.
pub(crate) fn quantity(distribution: &HashMap<u64, u64>) -> Result<u64, DividerError> {
    let mut total: u64 = 0;
    for &amount in distribution.values() {
        total = total
            .checked_add(amount)
            .ok_or(DividerError::ArithmeticOverflow)?;
    }
    Ok(total)
}

/// Returns `true` if every priority in `priorities` has a non-zero entry in
/// `distribution` (and `priorities` is non-empty).
pub(crate) fn is_filled(priorities: &[u64], distribution: &HashMap<u64, u64>) -> bool {
    if priorities.is_empty() {
        return false;
    }

    priorities
        .iter()
        .all(|priority| distribution.get(priority).copied().unwrap_or(0) != 0)
}

/// Runs `divider` once against `priorities`/`handlers_quantity` and reports
/// whether every priority received at least one slot.
///
/// Useful for sizing a [`crate::priority::Priority`] discipline before
/// spawning it: a divider/priority-list combination that starves a priority at
/// a given handler quantity will fail that priority's channel permanently once
/// the discipline is running.
pub fn is_non_fatal(
    priorities: &[u64],
    divider: &dyn Divider,
    handlers_quantity: u64,
) -> Result<bool, DividerError> {
    let mut distribution = HashMap::with_capacity(priorities.len());
    divider.divide(handlers_quantity, priorities, &mut distribution)?;
    Ok(is_filled(priorities, &distribution))
}

/// Finds the smallest handler quantity in `[1, max_handlers_quantity]` for
/// which `divider` does not starve any priority in `priorities`.
///
/// Returns `None` if no quantity in that range qualifies.
pub fn pick_up_min_non_fatal_quantity(
    priorities: &[u64],
    divider: &dyn Divider,
    max_handlers_quantity: u64,
) -> Result<Option<u64>, DividerError> {
    for quantity in 1..=max_handlers_quantity {
        if is_non_fatal(priorities, divider, quantity)? {
            return Ok(Some(quantity));
        }
    }
    Ok(None)
}

/// Finds the largest handler quantity in `[1, max_handlers_quantity]` for
/// which `divider` does not starve any priority in `priorities`, searching
/// downward from `max_handlers_quantity`.
///
/// Returns `None` if no quantity in that range qualifies.
pub fn pick_up_max_non_fatal_quantity(
    priorities: &[u64],
    divider: &dyn Divider,
    max_handlers_quantity: u64,
) -> Result<Option<u64>, DividerError> {
    for quantity in (1..=max_handlers_quantity).rev() {
        if is_non_fatal(priorities, divider, quantity)? {
            return Ok(Some(quantity));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn divide(divider: &dyn Divider, quantity: u64, priorities: &[u64]) -> HashMap<u64, u64> {
        let mut distribution = HashMap::new();
        divider.divide(quantity, priorities, &mut distribution).unwrap();
        distribution
    }

    #[test]
    fn fair_worked_examples() {
        let got = divide(&Fair, 10, &[7, 2, 1]);
        assert_eq!(got[&7], 4);
        assert_eq!(got[&2], 3);
        assert_eq!(got[&1], 3);

        let got = divide(&Fair, 6, &[3, 2, 1]);
        assert_eq!(got[&3], 2);
        assert_eq!(got[&2], 2);
        assert_eq!(got[&1], 2);
    }

    #[test]
    fn rate_worked_examples() {
        let got = divide(&Rate, 10, &[7, 2, 1]);
        assert_eq!(got[&7], 7);
        assert_eq!(got[&2], 2);
        assert_eq!(got[&1], 1);

        let got = divide(&Rate, 11, &[3, 2, 1]);
        assert_eq!(got[&3], 6);
        assert_eq!(got[&2], 3);
        assert_eq!(got[&1], 2);

        let got = divide(&Rate, 6, &[3, 2, 1]);
        assert_eq!(got[&3], 3);
        assert_eq!(got[&2], 2);
        assert_eq!(got[&1], 1);
    }

    #[test]
    fn rate_detects_priority_sum_overflow() {
        let err = Rate
            .divide(1, &[u64::MAX, 1], &mut HashMap::new())
            .unwrap_err();
        assert_eq!(err, DividerError::ArithmeticOverflow);
    }

    #[test]
    fn accumulates_into_existing_distribution() {
        let mut distribution = HashMap::new();
        distribution.insert(7, 100);
        Fair.divide(10, &[7, 2, 1], &mut distribution).unwrap();
        assert_eq!(distribution[&7], 104);
    }

    #[test]
    fn pick_up_min_non_fatal_quantity_finds_threshold() {
        // Rate([3, 2, 1]) starves priority 1 until quantity covers at least
        // one unit per priority via quicking; sum of priorities is 6, so by
        // quantity 3 every priority has received its quick unit.
        let found = pick_up_min_non_fatal_quantity(&[3, 2, 1], &Rate, 10)
            .unwrap()
            .unwrap();
        assert!(is_non_fatal(&[3, 2, 1], &Rate, found).unwrap());
        if found > 1 {
            assert!(!is_non_fatal(&[3, 2, 1], &Rate, found - 1).unwrap());
        }
    }

    #[test]
    fn pick_up_max_non_fatal_quantity_finds_ceiling_when_always_fatal_free() {
        let found = pick_up_max_non_fatal_quantity(&[3, 2, 1], &Fair, 20)
            .unwrap()
            .unwrap();
        assert_eq!(found, 20);
    }

    #[test]
    fn pick_up_returns_none_when_never_satisfiable() {
        // A single handler can never satisfy three distinct priorities under Fair.
        assert_eq!(
            pick_up_min_non_fatal_quantity(&[3, 2, 1], &Fair, 2).unwrap(),
            None
        );
    }
}
