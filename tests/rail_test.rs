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


//! Tests for the engine's collaborator seams.
//!
//! Each test plugs a hand-written rail, capability check or event sink
//! into the engine and verifies what the engine asks of it.

use parking_lot::Mutex;
use royalty_ledger_rs::{
    Amount, CallerId, Capability, CapabilityCheck, CapabilityTable, Direction, Engine, EventLog,
    EventSink, FundsTransfer, LedgerConfig, LedgerError, LedgerEvent, PayeeId, SequencedEvent,
    TrackId, TransferFailure,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

const ADMIN: CallerId = CallerId(1);
const A: PayeeId = PayeeId(1);
const B: PayeeId = PayeeId(2);
const C: PayeeId = PayeeId(3);
const T1: TrackId = TrackId(1);

// === Collaborators ===

/// Logs every transfer in call order against a fixed balance.
struct RecordingRail {
    transfers: Mutex<Vec<(PayeeId, Amount)>>,
    balance: Amount,
}

impl RecordingRail {
    fn with_balance(balance: Amount) -> Self {
        Self {
            transfers: Mutex::new(Vec::new()),
            balance,
        }
    }

    fn transfers(&self) -> Vec<(PayeeId, Amount)> {
        self.transfers.lock().clone()
    }
}

impl FundsTransfer for RecordingRail {
    fn transfer_to(&self, payee: PayeeId, amount: Amount) -> Result<(), TransferFailure> {
        self.transfers.lock().push((payee, amount));
        Ok(())
    }

    fn available_balance(&self) -> Amount {
        self.balance
    }
}

/// Refuses every transfer until `recover_after` attempts have been made.
struct FlakyRail {
    attempts: AtomicU32,
    recover_after: u32,
    delivered: Mutex<Vec<(PayeeId, Amount)>>,
}

impl FundsTransfer for FlakyRail {
    fn transfer_to(&self, payee: PayeeId, amount: Amount) -> Result<(), TransferFailure> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) < self.recover_after {
            return Err(TransferFailure::Rejected("gateway timeout".to_string()));
        }
        self.delivered.lock().push((payee, amount));
        Ok(())
    }

    fn available_balance(&self) -> Amount {
        Amount::MAX
    }
}

/// Reports plenty of funds but can only spend `budget`, like a treasury
/// drained by someone else between the balance check and the transfers.
struct DrainedRail {
    budget: Mutex<Amount>,
    delivered: Mutex<Vec<(PayeeId, Amount)>>,
}

impl FundsTransfer for DrainedRail {
    fn transfer_to(&self, payee: PayeeId, amount: Amount) -> Result<(), TransferFailure> {
        let mut budget = self.budget.lock();
        if *budget < amount {
            return Err(TransferFailure::InsufficientFunds);
        }
        *budget -= amount;
        self.delivered.lock().push((payee, amount));
        Ok(())
    }

    fn available_balance(&self) -> Amount {
        Amount::MAX
    }
}

/// Grants exactly one capability to exactly one caller.
struct SingleGrant {
    caller: CallerId,
    capability: Capability,
}

impl CapabilityCheck for SingleGrant {
    fn has_capability(&self, caller: CallerId, capability: Capability) -> bool {
        caller == self.caller && capability == self.capability
    }
}

/// Keeps every emitted event.
#[derive(Default)]
struct CollectingSink {
    events: Mutex<Vec<SequencedEvent>>,
}

impl EventSink for CollectingSink {
    fn emit(&self, event: SequencedEvent) {
        self.events.lock().push(event);
    }
}

fn admin_table() -> Arc<CapabilityTable> {
    let table = Arc::new(CapabilityTable::new());
    table.grant(ADMIN, Capability::Admin);
    table
}

fn engine_on(rail: Arc<dyn FundsTransfer>) -> Engine {
    let engine = Engine::new(LedgerConfig::default(), rail, admin_table(), Arc::new(EventLog::new()));
    engine
        .register_payees(ADMIN, T1, &[A, B, C], &[5_000, 3_000, 2_000])
        .unwrap();
    engine
}

// === Rail ===

#[test]
fn transfers_follow_registration_order() {
    let rail = Arc::new(RecordingRail::with_balance(1_000));
    let engine = engine_on(rail.clone());

    engine.distribute(ADMIN, T1, 1_000).unwrap();

    assert_eq!(rail.transfers(), vec![(A, 500), (B, 300), (C, 200)]);
}

#[test]
fn zero_net_payouts_are_not_sent() {
    let rail = Arc::new(RecordingRail::with_balance(1_000));
    let engine = engine_on(rail.clone());
    // every payee now owes its full share of the next 1000
    engine.apply_adjustment(ADMIN, T1, 1_000, Direction::Debit).unwrap();

    let distribution = engine.distribute(ADMIN, T1, 1_000).unwrap();

    assert_eq!(distribution.net_total(), 0);
    assert!(rail.transfers().is_empty());
    assert!(engine.deficits(T1).unwrap().is_empty());
}

#[test]
fn short_rail_balance_rejects_before_any_transfer() {
    let rail = Arc::new(RecordingRail::with_balance(999));
    let engine = engine_on(rail.clone());

    let result = engine.distribute(ADMIN, T1, 1_000);

    assert_eq!(
        result,
        Err(LedgerError::InsufficientBalance {
            required: 1_000,
            available: 999
        })
    );
    assert!(rail.transfers().is_empty());
    assert_eq!(engine.version(T1).unwrap(), 1);
}

#[test]
fn batch_balance_check_covers_every_entry() {
    let rail = Arc::new(RecordingRail::with_balance(1_500));
    let engine = engine_on(rail.clone());
    engine
        .register_payees(ADMIN, TrackId(2), &[A], &[10_000])
        .unwrap();

    let result = engine.batch_distribute(ADMIN, &[T1, TrackId(2)], &[1_000, 1_000]);

    assert_eq!(
        result,
        Err(LedgerError::InsufficientBalance {
            required: 2_000,
            available: 1_500
        })
    );
    assert!(rail.transfers().is_empty());
}

#[test]
fn refused_transfer_is_retryable_until_the_rail_recovers() {
    let rail = Arc::new(FlakyRail {
        attempts: AtomicU32::new(0),
        recover_after: 2,
        delivered: Mutex::new(Vec::new()),
    });
    let engine = engine_on(rail.clone());
    engine.accumulate_deposit(ADMIN, T1, 100).unwrap();

    for _ in 0..2 {
        let err = engine.flush_pending(ADMIN, T1).unwrap_err();
        assert!(matches!(err, LedgerError::TransferFailed { payee: A, .. }));
        assert!(err.is_retryable());
        assert_eq!(engine.pending(T1).unwrap(), 100);
    }

    let distribution = engine.flush_pending(ADMIN, T1).unwrap();
    assert_eq!(distribution.net_amounts(), vec![(A, 50), (B, 30), (C, 20)]);
    assert_eq!(*rail.delivered.lock(), vec![(A, 50), (B, 30), (C, 20)]);
    assert_eq!(engine.pending(T1).unwrap(), 0);
}

#[test]
fn rail_running_dry_mid_payout_never_pays_twice() {
    let rail = Arc::new(DrainedRail {
        budget: Mutex::new(500),
        delivered: Mutex::new(Vec::new()),
    });
    let engine = engine_on(rail.clone());

    let err = engine.distribute(ADMIN, T1, 1_000).unwrap_err();
    assert_eq!(
        err,
        LedgerError::TransferFailed {
            payee: B,
            reason: TransferFailure::InsufficientFunds
        }
    );
    assert_eq!(engine.advances(T1), Ok(vec![(A, 500)]));

    *rail.budget.lock() += 500;
    let distribution = engine.distribute(ADMIN, T1, 1_000).unwrap();

    assert_eq!(distribution.net_amounts(), vec![(A, 500), (B, 300), (C, 200)]);
    assert_eq!(*rail.delivered.lock(), vec![(A, 500), (B, 300), (C, 200)]);
    assert_eq!(*rail.budget.lock(), 0);
}

// === Capabilities ===

#[test]
fn custom_capability_check_gates_operations() {
    let distributor = CallerId(7);
    let engine = Engine::new(
        LedgerConfig::default(),
        Arc::new(RecordingRail::with_balance(Amount::MAX)),
        Arc::new(SingleGrant {
            caller: distributor,
            capability: Capability::Distributor,
        }),
        Arc::new(EventLog::new()),
    );

    assert_eq!(
        engine.register_payees(distributor, T1, &[A], &[10_000]),
        Err(LedgerError::Unauthorized {
            caller: distributor,
            capability: Capability::Admin
        })
    );
    // Nothing registered, so the distributor reaches the track lookup.
    assert_eq!(
        engine.distribute(distributor, T1, 100),
        Err(LedgerError::TrackNotFound { track: T1 })
    );
    assert_eq!(
        engine.distribute(ADMIN, T1, 100),
        Err(LedgerError::Unauthorized {
            caller: ADMIN,
            capability: Capability::Distributor
        })
    );
}

#[test]
fn revoked_admin_loses_distribution_rights() {
    let table = admin_table();
    let engine = Engine::new(
        LedgerConfig::default(),
        Arc::new(RecordingRail::with_balance(Amount::MAX)),
        table.clone(),
        Arc::new(EventLog::new()),
    );
    engine.register_payees(ADMIN, T1, &[A], &[10_000]).unwrap();

    table.revoke(ADMIN, Capability::Admin);

    let err = engine.distribute(ADMIN, T1, 100).unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized { .. }));
}

// === Events ===

#[test]
fn sink_receives_events_in_sequence_order() {
    let sink = Arc::new(CollectingSink::default());
    let engine = Engine::new(
        LedgerConfig::default(),
        Arc::new(RecordingRail::with_balance(Amount::MAX)),
        admin_table(),
        sink.clone(),
    );
    engine.register_payees(ADMIN, T1, &[A, B], &[6_000, 4_000]).unwrap();
    engine.accumulate_deposit(ADMIN, T1, 50).unwrap();
    engine.remove_payee(ADMIN, T1, B).unwrap();

    let events = sink.events.lock().clone();
    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert!(matches!(events[0].event, LedgerEvent::PayeesRegistered { .. }));
    assert_eq!(
        events[1].event,
        LedgerEvent::DepositAccumulated {
            track: T1,
            amount: 50,
            pending: 50
        }
    );
    assert_eq!(
        events[2].event,
        LedgerEvent::PayeeRemoved {
            track: T1,
            payee: B,
            redistributed_units: 4_000
        }
    );
}

#[test]
fn rejected_operations_emit_nothing() {
    let sink = Arc::new(CollectingSink::default());
    let engine = Engine::new(
        LedgerConfig::default(),
        Arc::new(RecordingRail::with_balance(10)),
        admin_table(),
        sink.clone(),
    );
    engine.register_payees(ADMIN, T1, &[A], &[10_000]).unwrap();

    assert!(engine.distribute(ADMIN, T1, 100).is_err());
    assert!(engine.remove_payee(ADMIN, T1, A).is_err());

    assert_eq!(sink.events.lock().len(), 1);
}

#[test]
fn concurrent_tracks_never_reuse_a_sequence_number() {
    let sink = Arc::new(CollectingSink::default());
    let engine = Arc::new(Engine::new(
        LedgerConfig::default(),
        Arc::new(RecordingRail::with_balance(Amount::MAX)),
        admin_table(),
        sink.clone(),
    ));
    for t in 1..=8 {
        engine
            .register_payees(ADMIN, TrackId(t), &[A, B], &[5_000, 5_000])
            .unwrap();
    }

    let handles: Vec<_> = (1..=8)
        .map(|t| {
            let engine = engine.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    engine.distribute(ADMIN, TrackId(t), 10).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    let mut sequences: Vec<u64> = sink.events.lock().iter().map(|e| e.sequence).collect();
    sequences.sort_unstable();
    let expected: Vec<u64> = (1..=8 + 8 * 50).collect();
    assert_eq!(sequences, expected);
}

#[test]
fn event_serializes_with_flattened_sequence() {
    let sink = Arc::new(CollectingSink::default());
    let engine = Engine::new(
        LedgerConfig::default(),
        Arc::new(RecordingRail::with_balance(Amount::MAX)),
        admin_table(),
        sink.clone(),
    );
    engine.register_payees(ADMIN, T1, &[A, B], &[6_000, 4_000]).unwrap();
    engine.apply_adjustment(ADMIN, T1, 10, Direction::Debit).unwrap();

    let events = sink.events.lock().clone();
    let json = serde_json::to_value(&events[1]).unwrap();

    assert_eq!(
        json,
        serde_json::json!({
            "sequence": 2,
            "type": "adjustment_applied",
            "track": 1,
            "amount": 10,
            "direction": "debit",
            "parts": [[1, 6], [2, 4]]
        })
    );
}
