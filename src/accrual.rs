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


//! Accrual ledger and threshold policy.
//!
//! Revenue accrues per track until it is flushed, either on demand or
//! automatically once the track's auto-flush threshold is reached. Explicit
//! distributions are additionally bounded below by a global minimum.

use crate::base::{Amount, TrackId};
use crate::distribution::Distribution;
use crate::error::LedgerError;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Undistributed balance of one track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccrualState {
    pub pending: Amount,
}

impl AccrualState {
    pub(crate) fn add(&mut self, amount: Amount) -> Result<Amount, LedgerError> {
        self.pending = self
            .pending
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(self.pending)
    }

    /// Empties the balance and returns what was pending.
    pub(crate) fn take(&mut self) -> Amount {
        std::mem::take(&mut self.pending)
    }
}

/// Per-track auto-flush threshold. Zero disables auto-flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThresholdConfig {
    pub auto_flush: Amount,
}

impl ThresholdConfig {
    pub fn triggers(&self, pending: Amount) -> bool {
        self.auto_flush > 0 && pending >= self.auto_flush
    }
}

/// Global minimum for explicit distributions.
#[derive(Debug)]
pub struct ThresholdPolicy {
    global_minimum: AtomicU64,
}

impl ThresholdPolicy {
    pub fn new(global_minimum: Amount) -> Self {
        Self {
            global_minimum: AtomicU64::new(global_minimum),
        }
    }

    pub fn global_minimum(&self) -> Amount {
        self.global_minimum.load(Ordering::Acquire)
    }

    pub fn set_global_minimum(&self, amount: Amount) {
        self.global_minimum.store(amount, Ordering::Release);
    }

    /// # Errors
    ///
    /// [`LedgerError::BelowMinimum`] if `amount` is under the global minimum.
    pub fn check(&self, amount: Amount) -> Result<(), LedgerError> {
        let minimum = self.global_minimum();
        if amount < minimum {
            return Err(LedgerError::BelowMinimum { amount, minimum });
        }
        Ok(())
    }
}

/// Outcome of a deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositReceipt {
    pub track: TrackId,
    pub amount: Amount,
    /// Pending balance right after the deposit, before any auto-flush.
    pub accrued: Amount,
    /// Set when the deposit crossed the auto-flush threshold.
    pub flushed: Option<Distribution>,
}
