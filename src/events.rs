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


//! Ledger events and an in-memory deduplicating event log.
//!
//! Events carry a monotonic sequence number. Delivery is at-least-once, so
//! consumers deduplicate on that number; [`EventLog`] does exactly that.

use crate::base::{Amount, PayeeId, TrackId};
use crate::distribution::Payout;
use crate::reconciliation::Direction;
use crate::registry::PayeeShare;
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    PayeesRegistered {
        track: TrackId,
        payees: Vec<PayeeShare>,
    },
    PayeeRemoved {
        track: TrackId,
        payee: PayeeId,
        redistributed_units: u32,
    },
    DepositAccumulated {
        track: TrackId,
        amount: Amount,
        pending: Amount,
    },
    DistributionCompleted {
        track: TrackId,
        amount: Amount,
        payouts: Vec<Payout>,
    },
    AdjustmentApplied {
        track: TrackId,
        amount: Amount,
        direction: Direction,
        parts: Vec<(PayeeId, Amount)>,
    },
}

impl LedgerEvent {
    pub fn track(&self) -> TrackId {
        match self {
            Self::PayeesRegistered { track, .. }
            | Self::PayeeRemoved { track, .. }
            | Self::DepositAccumulated { track, .. }
            | Self::DistributionCompleted { track, .. }
            | Self::AdjustmentApplied { track, .. } => *track,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequencedEvent {
    pub sequence: u64,
    #[serde(flatten)]
    pub event: LedgerEvent,
}

/// Receives ledger events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SequencedEvent);
}

/// A thread-safe event log with duplicate detection.
///
/// Combines a [`DashMap`] of seen sequence numbers with a [`SegQueue`] that
/// preserves arrival order until the events are drained.
#[derive(Debug, Default)]
pub struct EventLog {
    /// Every sequence number ever accepted, for duplicate detection.
    seen: DashMap<u64, Arc<SequencedEvent>>,

    /// Events not yet drained, in arrival order.
    pending: SegQueue<Arc<SequencedEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts an event unless its sequence number was seen before.
    ///
    /// Returns `false` for duplicates.
    pub fn record(&self, event: SequencedEvent) -> bool {
        // Entry API makes check-and-insert atomic under concurrent redelivery
        match self.seen.entry(event.sequence) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                let event = Arc::new(event);
                entry.insert(Arc::clone(&event));
                self.pending.push(event);
                true
            }
        }
    }

    /// Number of distinct events ever accepted.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Removes and returns the undrained events in arrival order.
    pub fn drain(&self) -> Vec<SequencedEvent> {
        let mut events = Vec::with_capacity(self.pending.len());
        while let Some(event) = self.pending.pop() {
            events.push((*event).clone());
        }
        events
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: SequencedEvent) {
        if !self.record(event) {
            tracing::debug!("dropped duplicate ledger event");
        }
    }
}
