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


//! Distribution records and the settlement step shared by every payout path.

use crate::base::{Amount, PayeeId, TrackId};
use crate::error::LedgerError;
use crate::reconciliation::DeficitLedger;
use crate::registry::{PayeeShares, exact_split};
use serde::Serialize;

/// One payee's slice of a distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Payout {
    pub payee: PayeeId,
    /// Exact proportional share of the distributed amount.
    pub gross: Amount,
    /// Portion of `gross` withheld to pay down an outstanding deficit.
    pub deficit_applied: Amount,
    /// Amount actually transferred.
    pub net: Amount,
}

/// Result of a distribute, flush or positive adjustment.
///
/// The `gross` values of `payouts` always add up to `amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Distribution {
    pub track: TrackId,
    pub amount: Amount,
    pub payouts: Vec<Payout>,
}

impl Distribution {
    pub fn payout(&self, payee: PayeeId) -> Option<&Payout> {
        self.payouts.iter().find(|p| p.payee == payee)
    }

    /// `(payee, net)` pairs in registry order.
    pub fn net_amounts(&self) -> Vec<(PayeeId, Amount)> {
        self.payouts.iter().map(|p| (p.payee, p.net)).collect()
    }

    /// `(payee, gross)` pairs in registry order.
    pub fn gross_amounts(&self) -> Vec<(PayeeId, Amount)> {
        self.payouts.iter().map(|p| (p.payee, p.gross)).collect()
    }

    /// Sum of net payouts; never exceeds `amount`.
    pub fn net_total(&self) -> Amount {
        // each net <= gross and the grosses sum to `amount`
        self.payouts.iter().map(|p| p.net).sum()
    }
}

/// Splits `amount` over `payees` and nets each slice against `deficits`.
///
/// Mutates `deficits`, so callers run it on a staged copy of the track.
pub(crate) fn settle(
    track: TrackId,
    amount: Amount,
    payees: &PayeeShares,
    total_units: u32,
    deficits: &mut DeficitLedger,
) -> Result<Distribution, LedgerError> {
    if payees.is_empty() {
        return Err(LedgerError::NoPayees { track });
    }

    let payouts = exact_split(amount, payees.as_slice(), total_units)?
        .into_iter()
        .map(|(payee, gross)| {
            let deficit_applied = deficits.net(payee, gross);
            Payout {
                payee,
                gross,
                deficit_applied,
                net: gross - deficit_applied,
            }
        })
        .collect();

    Ok(Distribution {
        track,
        amount,
        payouts,
    })
}
