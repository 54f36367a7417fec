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


//! Streaming meter: turns metered usage into ledger deposits.

use crate::base::{Amount, TrackId};
use crate::distribution::Distribution;
use crate::error::LedgerError;
use serde::Serialize;

/// Usage pricing and counters of one track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamingConfig {
    /// Price of one usage unit. Zero disables usage recording.
    pub rate_per_unit: Amount,
    pub total_units_recorded: u64,
}

impl StreamingConfig {
    /// Price of `units` at the current rate.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::RateNotSet`] - Rate is zero.
    /// - [`LedgerError::InvalidUsage`] - `units` is zero.
    /// - [`LedgerError::ArithmeticOverflow`] - `units * rate` overflows.
    pub fn charge(&self, track: TrackId, units: u64) -> Result<Amount, LedgerError> {
        if self.rate_per_unit == 0 {
            return Err(LedgerError::RateNotSet { track });
        }
        if units == 0 {
            return Err(LedgerError::InvalidUsage);
        }
        units
            .checked_mul(self.rate_per_unit)
            .ok_or(LedgerError::ArithmeticOverflow)
    }

    pub(crate) fn count(&mut self, units: u64) -> Result<(), LedgerError> {
        self.total_units_recorded = self
            .total_units_recorded
            .checked_add(units)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(())
    }
}

/// Outcome of a usage recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageReceipt {
    pub track: TrackId,
    pub units: u64,
    /// Amount deposited for the usage.
    pub deposit: Amount,
    /// Pending balance right after the deposit, before any auto-flush.
    pub accrued: Amount,
    /// Set when the deposit crossed the auto-flush threshold.
    pub flushed: Option<Distribution>,
}
