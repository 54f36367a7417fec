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


//! Retroactive adjustments and the per-payee deficit ledger.
//!
//! Funds already transferred are never clawed back. A negative adjustment is
//! split like a payout and recorded as a deficit per payee, which is then
//! withheld from that payee's future payouts until it is paid down.
//!
//! The reverse also happens: when a payout fails partway, the transfers the
//! rail already accepted are kept as advances. They are counted against the
//! same payees' next payouts, so a retried payout only sends what is missing.

use crate::base::{Amount, PayeeId};
use crate::distribution::Distribution;
use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sign of a retroactive adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Pay the amount out now, like a distribution.
    Credit,
    /// Record the amount as owed by the payees.
    Debit,
}

/// Outstanding deficits of one track, keyed by payee.
///
/// Entries are always positive; a fully paid-down payee is dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeficitLedger {
    owed: HashMap<PayeeId, Amount>,
}

impl DeficitLedger {
    pub fn owed(&self, payee: PayeeId) -> Amount {
        self.owed.get(&payee).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.owed.is_empty()
    }

    /// Outstanding deficits ordered by payee id.
    pub fn entries(&self) -> Vec<(PayeeId, Amount)> {
        let mut entries: Vec<_> = self.owed.iter().map(|(&p, &a)| (p, a)).collect();
        entries.sort_by_key(|(payee, _)| *payee);
        entries
    }

    /// Sum of everything owed, for reporting.
    pub fn outstanding(&self) -> Amount {
        self.owed.values().fold(0, |acc, &a| acc.saturating_add(a))
    }

    /// Adds `parts` to the deficits; all or nothing on overflow.
    pub(crate) fn record(&mut self, parts: &[(PayeeId, Amount)]) -> Result<(), LedgerError> {
        let mut updated = self.owed.clone();
        for &(payee, amount) in parts {
            if amount == 0 {
                continue;
            }
            let owed = updated.entry(payee).or_insert(0);
            *owed = owed
                .checked_add(amount)
                .ok_or(LedgerError::ArithmeticOverflow)?;
        }
        self.owed = updated;
        Ok(())
    }

    /// Withholds up to `gross` from `payee`'s deficit and returns what was withheld.
    pub(crate) fn net(&mut self, payee: PayeeId, gross: Amount) -> Amount {
        let Some(owed) = self.owed.get_mut(&payee) else {
            return 0;
        };
        let applied = (*owed).min(gross);
        *owed -= applied;
        if *owed == 0 {
            self.owed.remove(&payee);
        }
        applied
    }
}

/// Transfers the rail accepted for payouts that never committed, keyed by payee.
///
/// Entries are always positive; a fully consumed advance is dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvanceLedger {
    paid: HashMap<PayeeId, Amount>,
}

impl AdvanceLedger {
    pub fn paid(&self, payee: PayeeId) -> Amount {
        self.paid.get(&payee).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.paid.is_empty()
    }

    /// Outstanding advances ordered by payee id.
    pub fn entries(&self) -> Vec<(PayeeId, Amount)> {
        let mut entries: Vec<_> = self.paid.iter().map(|(&p, &a)| (p, a)).collect();
        entries.sort_by_key(|(payee, _)| *payee);
        entries
    }

    /// Records a transfer that went out ahead of its payout's commit.
    pub(crate) fn record(&mut self, payee: PayeeId, amount: Amount) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        let paid = self.paid.entry(payee).or_insert(0);
        *paid = paid.checked_add(amount).ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Counts up to `net` of `payee`'s advance as already sent; returns the rest to send.
    pub(crate) fn remaining(&mut self, payee: PayeeId, net: Amount) -> Amount {
        let Some(paid) = self.paid.get_mut(&payee) else {
            return net;
        };
        let covered = (*paid).min(net);
        *paid -= covered;
        if *paid == 0 {
            self.paid.remove(&payee);
        }
        net - covered
    }
}

/// What an adjustment did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdjustmentOutcome {
    Paid(Distribution),
    DeficitRecorded {
        amount: Amount,
        parts: Vec<(PayeeId, Amount)>,
    },
}

impl AdjustmentOutcome {
    pub fn direction(&self) -> Direction {
        match self {
            Self::Paid(_) => Direction::Credit,
            Self::DeficitRecorded { .. } => Direction::Debit,
        }
    }
}
