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


//! Track accounts.
//!
//! A [`TrackAccount`] owns everything the ledger knows about one track: its
//! payees, accrued balance, auto-flush threshold, usage meter and deficits.
//! All access goes through its mutex, so a reader sees either the state
//! before a mutation or the state after it.
//!
//! # Example
//!
//! ```
//! use royalty_ledger_rs::{TrackAccount, TrackId};
//! use std::time::Duration;
//!
//! let account = TrackAccount::new(TrackId(1));
//! let snapshot = account.snapshot(Duration::from_millis(10)).unwrap();
//! assert_eq!(snapshot.pending, 0);
//! assert!(snapshot.payees.is_empty());
//! ```

use crate::accrual::{AccrualState, ThresholdConfig};
use crate::base::{Amount, PayeeId, TrackId};
use crate::distribution::{Distribution, settle};
use crate::error::LedgerError;
use crate::meter::StreamingConfig;
use crate::reconciliation::{AdjustmentOutcome, AdvanceLedger, DeficitLedger, Direction};
use crate::registry::{PayeeRemovalError, PayeeShare, PayeeShares, exact_split};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::time::Duration;

/// Result of adding revenue to a track's accrual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Accrued {
    pub accrued: Amount,
    pub flushed: Option<Distribution>,
}

//  Unregistered ──register──► Registered ──deposit──► Accruing
//                                  ▲                     │
//                                  └──── Distributing ◄──┘ (flush, distribute, adjust)
#[derive(Debug, Clone)]
pub struct TrackData {
    track: TrackId,
    payees: PayeeShares,
    accrual: AccrualState,
    threshold: ThresholdConfig,
    streaming: StreamingConfig,
    deficits: DeficitLedger,
    advances: AdvanceLedger,
    version: u64,
}

impl TrackData {
    fn new(track: TrackId) -> Self {
        Self {
            track,
            payees: PayeeShares::default(),
            accrual: AccrualState::default(),
            threshold: ThresholdConfig::default(),
            streaming: StreamingConfig::default(),
            deficits: DeficitLedger::default(),
            advances: AdvanceLedger::default(),
            version: 0,
        }
    }

    fn assert_invariants(&self, total_units: u32) {
        debug_assert!(
            self.payees.is_empty() || self.payees.total_units() == u64::from(total_units),
            "Invariant violated: share units sum to {} instead of {}",
            self.payees.total_units(),
            total_units
        );
    }

    pub fn track(&self) -> TrackId {
        self.track
    }

    pub fn payees(&self) -> &PayeeShares {
        &self.payees
    }

    pub fn pending(&self) -> Amount {
        self.accrual.pending
    }

    pub fn auto_flush(&self) -> Amount {
        self.threshold.auto_flush
    }

    pub fn streaming(&self) -> StreamingConfig {
        self.streaming
    }

    pub fn deficits(&self) -> &DeficitLedger {
        &self.deficits
    }

    /// Transfers already delivered for payouts that have not committed yet.
    pub fn advances(&self) -> &AdvanceLedger {
        &self.advances
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    pub(crate) fn replace_payees(&mut self, payees: PayeeShares, total_units: u32) {
        self.payees = payees;
        self.assert_invariants(total_units);
    }

    /// Removes a payee and returns the redistributed share units.
    pub(crate) fn remove_payee(
        &mut self,
        payee: PayeeId,
        total_units: u32,
    ) -> Result<u32, LedgerError> {
        let track = self.track;
        let removed = self.payees.remove(payee).map_err(|e| match e {
            PayeeRemovalError::NotFound => LedgerError::PayeeNotFound { track, payee },
            PayeeRemovalError::Last => LedgerError::LastPayee { track, payee },
        })?;
        self.assert_invariants(total_units);
        Ok(removed)
    }

    pub(crate) fn set_rate(&mut self, rate: Amount) {
        self.streaming.rate_per_unit = rate;
    }

    pub(crate) fn set_auto_flush(&mut self, amount: Amount) {
        self.threshold.auto_flush = amount;
    }

    /// Adds `amount` to the accrual and flushes it if the threshold is reached.
    pub(crate) fn deposit(&mut self, amount: Amount, total_units: u32) -> Result<Accrued, LedgerError> {
        let accrued = self.accrual.add(amount)?;
        let flushed = if self.threshold.triggers(accrued) {
            Some(self.flush(total_units)?)
        } else {
            None
        };
        Ok(Accrued { accrued, flushed })
    }

    /// Prices `units` of usage and deposits the result.
    pub(crate) fn record_usage(
        &mut self,
        units: u64,
        total_units: u32,
    ) -> Result<(Amount, Accrued), LedgerError> {
        let deposit = self.streaming.charge(self.track, units)?;
        self.streaming.count(units)?;
        let accrued = self.deposit(deposit, total_units)?;
        Ok((deposit, accrued))
    }

    /// Distributes the entire pending balance.
    pub(crate) fn flush(&mut self, total_units: u32) -> Result<Distribution, LedgerError> {
        let amount = self.accrual.pending;
        let distribution = self.settle(amount, total_units)?;
        self.accrual.take();
        Ok(distribution)
    }

    /// Splits `amount` over the current payees, netting deficits.
    pub(crate) fn settle(&mut self, amount: Amount, total_units: u32) -> Result<Distribution, LedgerError> {
        settle(self.track, amount, &self.payees, total_units, &mut self.deficits)
    }

    /// Transfers still owed for `distribution` after outstanding advances.
    ///
    /// Consumes the advances it counts, so callers run it on a staged copy.
    pub(crate) fn remit(&mut self, distribution: &Distribution) -> Vec<(PayeeId, Amount)> {
        distribution
            .payouts
            .iter()
            .map(|p| (p.payee, self.advances.remaining(p.payee, p.net)))
            .filter(|&(_, amount)| amount > 0)
            .collect()
    }

    /// Records a transfer the rail accepted before its payout failed.
    pub(crate) fn record_advance(&mut self, payee: PayeeId, amount: Amount) -> Result<(), LedgerError> {
        self.advances.record(payee, amount)
    }

    pub(crate) fn adjust(
        &mut self,
        amount: Amount,
        direction: Direction,
        total_units: u32,
    ) -> Result<AdjustmentOutcome, LedgerError> {
        match direction {
            Direction::Credit => Ok(AdjustmentOutcome::Paid(self.settle(amount, total_units)?)),
            Direction::Debit => {
                if self.payees.is_empty() {
                    return Err(LedgerError::NoPayees { track: self.track });
                }
                let parts = exact_split(amount, self.payees.as_slice(), total_units)?;
                self.deficits.record(&parts)?;
                Ok(AdjustmentOutcome::DeficitRecorded { amount, parts })
            }
        }
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            track: self.track,
            payees: self.payees.as_slice().to_vec(),
            pending: self.accrual.pending,
            auto_flush: self.threshold.auto_flush,
            rate_per_unit: self.streaming.rate_per_unit,
            total_units_recorded: self.streaming.total_units_recorded,
            deficits: self.deficits.entries(),
            advances: self.advances.entries(),
            version: self.version,
        }
    }
}

/// Point-in-time copy of a track's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackSnapshot {
    pub track: TrackId,
    pub payees: Vec<PayeeShare>,
    pub pending: Amount,
    pub auto_flush: Amount,
    pub rate_per_unit: Amount,
    pub total_units_recorded: u64,
    pub deficits: Vec<(PayeeId, Amount)>,
    pub advances: Vec<(PayeeId, Amount)>,
    pub version: u64,
}

impl TrackSnapshot {
    pub fn outstanding_deficit(&self) -> Amount {
        self.deficits
            .iter()
            .fold(0, |acc, &(_, owed)| acc.saturating_add(owed))
    }
}

/// Every track the engine knows, as listed by `Engine::tracks`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackListing {
    /// Registered tracks ordered by track id.
    pub snapshots: Vec<TrackSnapshot>,
    /// Tracks whose lock was held past the timeout, ordered by track id.
    pub busy: Vec<TrackId>,
}

/// Ledger account of one track.
#[derive(Debug)]
pub struct TrackAccount {
    track: TrackId,
    inner: Mutex<TrackData>,
}

impl TrackAccount {
    pub fn new(track: TrackId) -> Self {
        Self {
            track,
            inner: Mutex::new(TrackData::new(track)),
        }
    }

    /// Locks the account, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Busy`] if another operation holds the lock for longer.
    pub fn lock_for(&self, timeout: Duration) -> Result<MutexGuard<'_, TrackData>, LedgerError> {
        self.inner.try_lock_for(timeout).ok_or_else(|| {
            tracing::warn!(track = %self.track, ?timeout, "track lock wait timed out");
            LedgerError::Busy { track: self.track }
        })
    }

    pub fn track(&self) -> TrackId {
        self.track
    }

    /// Snapshot taken under [`TrackAccount::lock_for`].
    pub fn snapshot(&self, timeout: Duration) -> Result<TrackSnapshot, LedgerError> {
        Ok(self.lock_for(timeout)?.snapshot())
    }
}
