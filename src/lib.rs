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


//! # Royalty Ledger
//!
//! This library splits revenue for content tracks exactly among weighted
//! payees. Revenue arrives as one-off proceeds or metered usage, accrues per
//! track, and is distributed on demand or automatically once a threshold is
//! reached. Retroactive adjustments either pay out or record deficits that are
//! withheld from future payouts.
//!
//! ## Core Components
//!
//! - [`Engine`]: Entry point for every operation; locking and commit protocol
//! - [`TrackAccount`]: Per-track payees, accrual, meter and deficits
//! - [`PayeeShares`]: Validated payee set and the exact split algorithm
//! - [`FundsTransfer`], [`CapabilityCheck`], [`EventSink`]: Collaborator seams
//! - [`LedgerError`]: Error types for ledger operations
//!
//! ## Example
//!
//! ```
//! use royalty_ledger_rs::{
//!     CallerId, Capability, CapabilityTable, Engine, EventLog, LedgerConfig, MemoryRail,
//!     PayeeId, TrackId,
//! };
//! use std::sync::Arc;
//!
//! let admin = CallerId(1);
//! let capabilities = Arc::new(CapabilityTable::new());
//! capabilities.grant(admin, Capability::Admin);
//! let rail = Arc::new(MemoryRail::unlimited());
//!
//! let engine = Engine::new(
//!     LedgerConfig::default(),
//!     rail.clone(),
//!     capabilities,
//!     Arc::new(EventLog::new()),
//! );
//!
//! engine
//!     .register_payees(admin, TrackId(1), &[PayeeId(1), PayeeId(2)], &[6_000, 4_000])
//!     .unwrap();
//! engine.distribute(admin, TrackId(1), 100).unwrap();
//!
//! assert_eq!(rail.received(PayeeId(1)), 60);
//! assert_eq!(rail.received(PayeeId(2)), 40);
//! ```
//!
//! ## Thread Safety
//!
//! Operations on different tracks run in parallel. Operations on the same
//! track are serialized by a per-track lock with a bounded wait; a caller that
//! cannot get the lock in time receives [`LedgerError::Busy`].

pub mod access;
pub mod account;
pub mod accrual;
mod base;
mod batch;
pub mod config;
pub mod distribution;
mod engine;
pub mod error;
pub mod events;
pub mod meter;
pub mod reconciliation;
pub mod registry;
pub mod transfer;

pub use access::{Capability, CapabilityCheck, CapabilityTable};
pub use account::{TrackAccount, TrackListing, TrackSnapshot};
pub use accrual::DepositReceipt;
pub use base::{Amount, CallerId, PayeeId, TrackId};
pub use config::{ConfigError, LedgerConfig};
pub use distribution::{Distribution, Payout};
pub use engine::Engine;
pub use error::{ErrorCategory, LedgerError};
pub use events::{EventLog, EventSink, LedgerEvent, SequencedEvent};
pub use meter::UsageReceipt;
pub use reconciliation::{AdjustmentOutcome, AdvanceLedger, DeficitLedger, Direction};
pub use registry::{PayeeShare, PayeeShares};
pub use transfer::{FundsTransfer, MemoryRail, TransferFailure};
