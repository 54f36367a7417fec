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


//! Multi-track coordination.
//!
//! A [`LockedBatch`] holds the locks of every track an operation touches,
//! taken in ascending [`TrackId`] order so overlapping batches cannot
//! deadlock. Work is applied to staged copies of the track data and only
//! written back by [`LockedBatch::commit`]; dropping the batch instead
//! discards everything except advances recorded for a payout that failed
//! after some of its transfers went out.

use crate::account::{TrackAccount, TrackData};
use crate::base::TrackId;
use crate::error::LedgerError;
use crate::transfer::Remittance;
use parking_lot::MutexGuard;
use std::sync::Arc;
use std::time::Duration;

/// Sorts resolved accounts by track and drops repeats, giving the lock order.
pub(crate) fn lock_order(
    mut accounts: Vec<Arc<TrackAccount>>,
) -> Vec<Arc<TrackAccount>> {
    accounts.sort_by_key(|a| a.track());
    accounts.dedup_by_key(|a| a.track());
    accounts
}

pub(crate) struct LockedBatch<'a> {
    guards: Vec<MutexGuard<'a, TrackData>>,
    staged: Vec<TrackData>,
}

impl<'a> LockedBatch<'a> {
    /// Locks `accounts` in the order given, which must come from [`lock_order`].
    ///
    /// # Errors
    ///
    /// [`LedgerError::Busy`] if any lock is not acquired within `timeout`;
    /// locks taken so far are released.
    pub fn acquire(accounts: &'a [Arc<TrackAccount>], timeout: Duration) -> Result<Self, LedgerError> {
        debug_assert!(accounts.windows(2).all(|w| w[0].track() < w[1].track()));

        let mut guards = Vec::with_capacity(accounts.len());
        for account in accounts {
            guards.push(account.lock_for(timeout)?);
        }
        let staged = guards.iter().map(|guard| (**guard).clone()).collect();
        Ok(Self { guards, staged })
    }

    /// Staged copy of `track`'s data.
    pub fn staged(&mut self, track: TrackId) -> Result<&mut TrackData, LedgerError> {
        let slot = self
            .staged
            .binary_search_by_key(&track, TrackData::track)
            .map_err(|_| LedgerError::TrackNotFound { track })?;
        Ok(&mut self.staged[slot])
    }

    /// Applies `stage` to each entry of `tracks` in input order.
    ///
    /// Stops at the first error; nothing staged so far is visible outside.
    pub fn stage_each<R>(
        &mut self,
        tracks: &[TrackId],
        mut stage: impl FnMut(usize, &mut TrackData) -> Result<R, LedgerError>,
    ) -> Result<Vec<R>, LedgerError> {
        let mut outcomes = Vec::with_capacity(tracks.len());
        for (index, &track) in tracks.iter().enumerate() {
            let data = self.staged(track).map_err(|e| e.at_index(index))?;
            outcomes.push(stage(index, data)?);
        }
        Ok(outcomes)
    }

    /// Records `delivered` as advances on the live track data, bumping the
    /// version of each track involved once.
    ///
    /// Used when a payout fails after the rail accepted some of its
    /// transfers; the staged copies are left to be discarded.
    pub fn record_advances(&mut self, delivered: &[Remittance]) -> Result<(), LedgerError> {
        let mut touched: Vec<TrackId> = Vec::new();
        for remittance in delivered {
            let track = remittance.track;
            let slot = self
                .guards
                .binary_search_by_key(&track, |guard| guard.track())
                .map_err(|_| LedgerError::TrackNotFound { track })?;
            let data = &mut self.guards[slot];
            data.record_advance(remittance.payee, remittance.amount)?;
            if !touched.contains(&track) {
                data.bump_version();
                touched.push(track);
            }
        }
        Ok(())
    }

    /// Writes the staged data back, bumping every touched track's version.
    ///
    /// The locks stay held until the batch is dropped.
    pub fn commit(&mut self) {
        for (guard, mut staged) in self.guards.iter_mut().zip(self.staged.drain(..)) {
            staged.bump_version();
            **guard = staged;
        }
    }
}
