// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Payee registry.
//!
//! Holds the ordered payee list of one track and enforces that the share
//! units of all payees add up to the configured total at all times.

use crate::base::{Amount, PayeeId};
use crate::error::LedgerError;
use serde::Serialize;
use std::collections::HashSet;

/// A payee and its proportional weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PayeeShare {
    pub payee: PayeeId,
    pub share_units: u32,
}

/// Ordered payee set of one track.
///
/// Registration order matters: it decides who absorbs split remainders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PayeeShares {
    shares: Vec<PayeeShare>,
}

impl PayeeShares {
    /// Validates and builds a payee set from parallel arrays.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::LengthMismatch`] - Arrays differ in length.
    /// - [`LedgerError::EmptyPayees`] - No payees given.
    /// - [`LedgerError::TooManyPayees`] - More than `max_payees`.
    /// - [`LedgerError::ZeroShare`] - A payee has no weight.
    /// - [`LedgerError::DuplicatePayee`] - A payee is listed twice.
    /// - [`LedgerError::ShareSumMismatch`] - Units do not sum to `total_units`.
    pub fn new(
        payees: &[PayeeId],
        share_units: &[u32],
        total_units: u32,
        max_payees: usize,
    ) -> Result<Self, LedgerError> {
        if payees.len() != share_units.len() {
            return Err(LedgerError::LengthMismatch {
                left: payees.len(),
                right: share_units.len(),
            });
        }
        if payees.is_empty() {
            return Err(LedgerError::EmptyPayees);
        }
        if payees.len() > max_payees {
            return Err(LedgerError::TooManyPayees {
                count: payees.len(),
                max: max_payees,
            });
        }

        let mut seen = HashSet::with_capacity(payees.len());
        let mut sum: u64 = 0;
        for (&payee, &units) in payees.iter().zip(share_units) {
            if units == 0 {
                return Err(LedgerError::ZeroShare { payee });
            }
            if !seen.insert(payee) {
                return Err(LedgerError::DuplicatePayee { payee });
            }
            sum += u64::from(units);
        }
        if sum != u64::from(total_units) {
            return Err(LedgerError::ShareSumMismatch {
                expected: total_units,
                actual: sum,
            });
        }

        let shares = payees
            .iter()
            .zip(share_units)
            .map(|(&payee, &share_units)| PayeeShare { payee, share_units })
            .collect();
        Ok(Self { shares })
    }

    pub fn as_slice(&self) -> &[PayeeShare] {
        &self.shares
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    pub fn contains(&self, payee: PayeeId) -> bool {
        self.shares.iter().any(|s| s.payee == payee)
    }

    pub fn total_units(&self) -> u64 {
        self.shares.iter().map(|s| u64::from(s.share_units)).sum()
    }

    /// Removes `payee` and hands its units to the survivors in proportion to
    /// their existing shares. The integer remainder goes to the survivor with
    /// the largest share, earliest registered on ties.
    ///
    /// Returns the number of units that were redistributed. Leaves `self`
    /// untouched on error.
    pub(crate) fn remove(&mut self, payee: PayeeId) -> Result<u32, PayeeRemovalError> {
        let index = self
            .shares
            .iter()
            .position(|s| s.payee == payee)
            .ok_or(PayeeRemovalError::NotFound)?;
        if self.shares.len() == 1 {
            return Err(PayeeRemovalError::Last);
        }

        let mut survivors = self.shares.clone();
        let removed = survivors.remove(index).share_units;
        let survivor_units: u128 = survivors.iter().map(|s| u128::from(s.share_units)).sum();

        let mut handed_out: u32 = 0;
        let mut bonuses = Vec::with_capacity(survivors.len());
        for share in &survivors {
            // bonus <= removed, so it always fits back in u32
            let bonus = (u128::from(removed) * u128::from(share.share_units) / survivor_units) as u32;
            handed_out += bonus;
            bonuses.push(bonus);
        }

        // max_by_key keeps the last maximum, so walk in reverse to favor the earliest
        let largest = survivors
            .iter()
            .enumerate()
            .rev()
            .max_by_key(|(_, s)| s.share_units)
            .map(|(i, _)| i)
            .unwrap_or(0);
        bonuses[largest] += removed - handed_out;

        for (share, bonus) in survivors.iter_mut().zip(bonuses) {
            share.share_units += bonus;
        }
        self.shares = survivors;
        Ok(removed)
    }
}

/// Reasons [`PayeeShares::remove`] can refuse; the caller attaches track context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PayeeRemovalError {
    NotFound,
    Last,
}

/// Splits `amount` across `shares` exactly.
///
/// Every payee but the last gets `floor(amount * units / total_units)`; the
/// last gets whatever is left, so the parts always add up to `amount`.
pub fn exact_split(
    amount: Amount,
    shares: &[PayeeShare],
    total_units: u32,
) -> Result<Vec<(PayeeId, Amount)>, LedgerError> {
    let Some((last, rest)) = shares.split_last() else {
        return Ok(Vec::new());
    };
    if total_units == 0 {
        return Err(LedgerError::ArithmeticOverflow);
    }

    let mut parts = Vec::with_capacity(shares.len());
    let mut running: Amount = 0;
    for share in rest {
        let part = u128::from(amount) * u128::from(share.share_units) / u128::from(total_units);
        let part = Amount::try_from(part).map_err(|_| LedgerError::ArithmeticOverflow)?;
        running = running
            .checked_add(part)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        parts.push((share.payee, part));
    }
    let remainder = amount
        .checked_sub(running)
        .ok_or(LedgerError::ArithmeticOverflow)?;
    parts.push((last.payee, remainder));
    Ok(parts)
}
