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


//! Funds transfer collaborator.
//!
//! The ledger never holds money itself. Payouts are requested from a
//! [`FundsTransfer`] rail, one call per payee per distributing operation.

use crate::base::{Amount, PayeeId, TrackId};
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;

/// Why the rail refused a transfer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferFailure {
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("rail unavailable")]
    Unavailable,

    #[error("insufficient funds on rail")]
    InsufficientFunds,
}

/// One transfer a payout asks the rail to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Remittance {
    pub track: TrackId,
    pub payee: PayeeId,
    pub amount: Amount,
}

/// Payment rail or token ledger that actually moves funds.
pub trait FundsTransfer: Send + Sync {
    fn transfer_to(&self, payee: PayeeId, amount: Amount) -> Result<(), TransferFailure>;

    fn available_balance(&self) -> Amount;
}

/// In-process rail backed by a treasury balance.
///
/// Records the running total received by every payee and can be told to
/// refuse transfers to specific payees.
#[derive(Debug)]
pub struct MemoryRail {
    treasury: Mutex<Amount>,
    received: DashMap<PayeeId, Amount>,
    failing: DashMap<PayeeId, TransferFailure>,
}

impl MemoryRail {
    pub fn new(treasury: Amount) -> Self {
        Self {
            treasury: Mutex::new(treasury),
            received: DashMap::new(),
            failing: DashMap::new(),
        }
    }

    /// A rail whose treasury never runs dry in practice.
    pub fn unlimited() -> Self {
        Self::new(Amount::MAX)
    }

    /// Adds funds to the treasury.
    pub fn fund(&self, amount: Amount) {
        let mut treasury = self.treasury.lock();
        *treasury = treasury.saturating_add(amount);
    }

    /// Makes every transfer to `payee` fail with `reason` until healed.
    pub fn fail_payee(&self, payee: PayeeId, reason: TransferFailure) {
        self.failing.insert(payee, reason);
    }

    pub fn heal_payee(&self, payee: PayeeId) {
        self.failing.remove(&payee);
    }

    /// Total transferred to `payee` so far.
    pub fn received(&self, payee: PayeeId) -> Amount {
        self.received.get(&payee).map(|r| *r).unwrap_or(0)
    }

    /// All payees with their received totals, ordered by payee id.
    pub fn payouts(&self) -> Vec<(PayeeId, Amount)> {
        let mut payouts: Vec<_> = self.received.iter().map(|r| (*r.key(), *r.value())).collect();
        payouts.sort_by_key(|(payee, _)| *payee);
        payouts
    }
}

impl FundsTransfer for MemoryRail {
    fn transfer_to(&self, payee: PayeeId, amount: Amount) -> Result<(), TransferFailure> {
        if let Some(reason) = self.failing.get(&payee) {
            return Err(reason.clone());
        }

        let mut treasury = self.treasury.lock();
        if *treasury < amount {
            return Err(TransferFailure::InsufficientFunds);
        }

        let mut received = self.received.entry(payee).or_insert(0);
        *received = received
            .checked_add(amount)
            .ok_or_else(|| TransferFailure::Rejected("payee balance overflow".to_string()))?;
        *treasury -= amount;
        Ok(())
    }

    fn available_balance(&self) -> Amount {
        *self.treasury.lock()
    }
}
