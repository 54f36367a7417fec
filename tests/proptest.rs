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


//! Property-based tests for the royalty ledger.
//!
//! These tests verify invariants that should hold for any valid share
//! configuration and any sequence of amounts.

use proptest::prelude::*;
use royalty_ledger_rs::registry::exact_split;
use royalty_ledger_rs::{
    Amount, CallerId, Capability, CapabilityTable, Direction, Engine, EventLog, LedgerConfig,
    LedgerError, MemoryRail, PayeeId, PayeeShares, TrackId, TransferFailure,
};
use std::collections::BTreeSet;
use std::sync::Arc;

const TOTAL: u32 = 10_000;
const ADMIN: CallerId = CallerId(1);
const TRACK: TrackId = TrackId(1);

// =============================================================================
// Arbitrary Strategies
// =============================================================================

/// Share units that sum to `TOTAL`, built from sorted cut points.
fn arb_units() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::btree_set(1u32..TOTAL, 0..12).prop_map(|cuts: BTreeSet<u32>| {
        let mut units = Vec::with_capacity(cuts.len() + 1);
        let mut previous = 0;
        for cut in cuts.into_iter().chain(std::iter::once(TOTAL)) {
            units.push(cut - previous);
            previous = cut;
        }
        units
    })
}

fn payees_for(units: &[u32]) -> Vec<PayeeId> {
    (1..=units.len() as u32).map(PayeeId).collect()
}

fn shares_for(units: &[u32]) -> PayeeShares {
    PayeeShares::new(&payees_for(units), units, TOTAL, 64).unwrap()
}

fn engine_for(units: &[u32], rail: Arc<MemoryRail>) -> Engine {
    let capabilities = Arc::new(CapabilityTable::new());
    capabilities.grant(ADMIN, Capability::Admin);
    let config = LedgerConfig {
        global_minimum: 0,
        ..LedgerConfig::default()
    };
    let engine = Engine::new(config, rail, capabilities, Arc::new(EventLog::new()));
    engine
        .register_payees(ADMIN, TRACK, &payees_for(units), units)
        .unwrap();
    engine
}

// =============================================================================
// Split Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// Parts always add up to the amount, for any amount.
    #[test]
    fn split_sums_to_amount(units in arb_units(), amount in any::<Amount>()) {
        let shares = shares_for(&units);
        let parts = exact_split(amount, shares.as_slice(), TOTAL).unwrap();

        let sum: u128 = parts.iter().map(|&(_, a)| u128::from(a)).sum();
        prop_assert_eq!(sum, u128::from(amount));
        prop_assert_eq!(parts.len(), units.len());
    }

    /// Every payee but the last gets exactly the floor of its proportion.
    #[test]
    fn split_floors_all_but_last(units in arb_units(), amount in 0u64..1_000_000_000) {
        let shares = shares_for(&units);
        let parts = exact_split(amount, shares.as_slice(), TOTAL).unwrap();

        for (part, &u) in parts.iter().zip(&units).take(units.len() - 1) {
            let floor = u128::from(amount) * u128::from(u) / u128::from(TOTAL);
            prop_assert_eq!(u128::from(part.1), floor);
        }
    }

    /// A single payee receives everything.
    #[test]
    fn single_payee_takes_all(amount in any::<Amount>()) {
        let shares = shares_for(&[TOTAL]);
        let parts = exact_split(amount, shares.as_slice(), TOTAL).unwrap();
        prop_assert_eq!(parts, vec![(PayeeId(1), amount)]);
    }
}

// =============================================================================
// Registry Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Removing any payee keeps the share sum and never shrinks a survivor.
    #[test]
    fn removal_preserves_share_sum(units in arb_units(), pick in any::<prop::sample::Index>()) {
        prop_assume!(units.len() >= 2);
        let engine = engine_for(&units, Arc::new(MemoryRail::unlimited()));
        let removed = PayeeId(pick.index(units.len()) as u32 + 1);

        engine.remove_payee(ADMIN, TRACK, removed).unwrap();

        let after = engine.shares(TRACK).unwrap();
        prop_assert_eq!(after.len(), units.len() - 1);
        prop_assert_eq!(after.iter().map(|s| u64::from(s.share_units)).sum::<u64>(), u64::from(TOTAL));
        for share in &after {
            prop_assert!(share.payee != removed);
            let before = units[share.payee.0 as usize - 1];
            prop_assert!(share.share_units >= before);
        }
    }

    /// Repeated removals down to one payee always end at the full total.
    #[test]
    fn removal_down_to_one_payee(units in arb_units()) {
        let engine = engine_for(&units, Arc::new(MemoryRail::unlimited()));
        for payee in payees_for(&units).into_iter().skip(1) {
            engine.remove_payee(ADMIN, TRACK, payee).unwrap();
        }
        let after = engine.shares(TRACK).unwrap();
        prop_assert_eq!(after.len(), 1);
        prop_assert_eq!(after[0].share_units, TOTAL);
        prop_assert_eq!(
            engine.remove_payee(ADMIN, TRACK, PayeeId(1)),
            Err(LedgerError::LastPayee { track: TRACK, payee: PayeeId(1) })
        );
    }
}

// =============================================================================
// Accrual and Distribution Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// Accruing a and b then flushing moves the same total as flushing each.
    #[test]
    fn accrual_flush_total_is_order_independent(
        units in arb_units(),
        a in 1u64..1_000_000,
        b in 1u64..1_000_000,
    ) {
        let together_rail = Arc::new(MemoryRail::unlimited());
        let together = engine_for(&units, together_rail.clone());
        together.accumulate_deposit(ADMIN, TRACK, a).unwrap();
        together.accumulate_deposit(ADMIN, TRACK, b).unwrap();
        let flushed = together.flush_pending(ADMIN, TRACK).unwrap();

        let apart_rail = Arc::new(MemoryRail::unlimited());
        let apart = engine_for(&units, apart_rail.clone());
        apart.accumulate_deposit(ADMIN, TRACK, a).unwrap();
        apart.flush_pending(ADMIN, TRACK).unwrap();
        apart.accumulate_deposit(ADMIN, TRACK, b).unwrap();
        apart.flush_pending(ADMIN, TRACK).unwrap();

        let paid = |rail: &MemoryRail| rail.payouts().iter().map(|&(_, a)| a).sum::<u64>();
        prop_assert_eq!(flushed.amount, a + b);
        prop_assert_eq!(paid(&together_rail), a + b);
        prop_assert_eq!(paid(&apart_rail), a + b);
    }

    /// Net payouts plus withheld deficits always equal the amount.
    #[test]
    fn netting_conserves_amount(
        units in arb_units(),
        deficit in 1u64..10_000,
        amount in 0u64..10_000,
    ) {
        let engine = engine_for(&units, Arc::new(MemoryRail::unlimited()));
        engine.apply_adjustment(ADMIN, TRACK, deficit, Direction::Debit).unwrap();

        let distribution = engine.distribute(ADMIN, TRACK, amount).unwrap();

        let withheld: u64 = distribution.payouts.iter().map(|p| p.deficit_applied).sum();
        prop_assert_eq!(distribution.net_total() + withheld, amount);
        let outstanding: u64 = engine.deficits(TRACK).unwrap().iter().map(|&(_, a)| a).sum();
        prop_assert_eq!(outstanding + withheld, deficit);
        for payout in &distribution.payouts {
            prop_assert!(payout.net <= payout.gross);
        }
    }

    /// A distribution retried after a transfer failure pays what a clean
    /// first attempt would have paid.
    #[test]
    fn retry_after_transfer_failure_is_idempotent(
        units in arb_units(),
        deficit in 0u64..5_000,
        amount in 1u64..1_000_000,
    ) {
        let setup = |rail: Arc<MemoryRail>| {
            let engine = engine_for(&units, rail);
            if deficit > 0 {
                engine.apply_adjustment(ADMIN, TRACK, deficit, Direction::Debit).unwrap();
            }
            engine
        };

        let clean = setup(Arc::new(MemoryRail::unlimited()))
            .distribute(ADMIN, TRACK, amount)
            .unwrap();

        let rail = Arc::new(MemoryRail::unlimited());
        let engine = setup(rail.clone());
        let last = PayeeId(units.len() as u32);
        rail.fail_payee(last, TransferFailure::Unavailable);
        let failed = engine.distribute(ADMIN, TRACK, amount);
        rail.heal_payee(last);
        let retried = engine.distribute(ADMIN, TRACK, amount).unwrap();

        if clean.payout(last).map(|p| p.net) == Some(0) {
            // nothing was sent to the failing payee, so the first attempt succeeded
            prop_assert!(failed.is_ok());
        } else {
            prop_assert!(failed.is_err());
            prop_assert_eq!(&retried, &clean);
            let delivered: Vec<_> = clean.net_amounts().into_iter().filter(|&(_, a)| a > 0).collect();
            prop_assert_eq!(rail.payouts(), delivered);
        }
    }
}
