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


//! Royalty distribution engine.
//!
//! The [`Engine`] is the entry point for every ledger operation. It checks
//! capabilities, serializes work per track, and runs the commit protocol:
//!
//! 1. Lock the involved track(s), in ascending id order for batches.
//! 2. Apply the whole operation to staged copies of the track data.
//! 3. Check the rail balance against every net payout, then transfer.
//! 4. Write the staged copies back, bump versions and emit events.
//!
//! A failure at any step leaves every track's balances as they were, so a
//! call that failed with a retryable error can simply be repeated. The one
//! thing a failure does keep is the set of transfers the rail accepted before
//! it refused one: those are recorded as advances and the retry only sends
//! what is still missing.
//!
//! # Thread Safety
//!
//! Accounts live in a [`DashMap`] of `Arc<TrackAccount>`. The map guard is
//! released before a track lock is taken, so operations on different tracks
//! run fully in parallel and only same-track operations contend.

use crate::access::{Capability, CapabilityCheck};
use crate::account::{Accrued, TrackAccount, TrackData, TrackListing, TrackSnapshot};
use crate::accrual::{DepositReceipt, ThresholdPolicy};
use crate::base::{Amount, CallerId, PayeeId, TrackId};
use crate::batch::{LockedBatch, lock_order};
use crate::config::LedgerConfig;
use crate::distribution::Distribution;
use crate::error::LedgerError;
use crate::events::{EventSink, LedgerEvent, SequencedEvent};
use crate::meter::UsageReceipt;
use crate::reconciliation::{AdjustmentOutcome, Direction};
use crate::registry::{PayeeShare, PayeeShares};
use crate::transfer::{FundsTransfer, Remittance};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Staged result of one operation on one track.
trait Staged {
    /// Whether the operation may run on a track that has no payees yet.
    const CREATES_TRACK: bool = false;

    /// Distribution whose payouts must be transferred before commit.
    fn settled(&self) -> Option<&Distribution>;

    fn events(&self) -> Vec<LedgerEvent>;
}

impl Staged for () {
    fn settled(&self) -> Option<&Distribution> {
        None
    }

    fn events(&self) -> Vec<LedgerEvent> {
        Vec::new()
    }
}

impl Staged for Distribution {
    fn settled(&self) -> Option<&Distribution> {
        Some(self)
    }

    fn events(&self) -> Vec<LedgerEvent> {
        vec![LedgerEvent::DistributionCompleted {
            track: self.track,
            amount: self.amount,
            payouts: self.payouts.clone(),
        }]
    }
}

fn accrual_events(track: TrackId, amount: Amount, accrued: Amount, flushed: Option<&Distribution>) -> Vec<LedgerEvent> {
    let mut events = vec![LedgerEvent::DepositAccumulated {
        track,
        amount,
        pending: accrued,
    }];
    events.extend(flushed.map(Staged::events).unwrap_or_default());
    events
}

impl Staged for DepositReceipt {
    fn settled(&self) -> Option<&Distribution> {
        self.flushed.as_ref()
    }

    fn events(&self) -> Vec<LedgerEvent> {
        accrual_events(self.track, self.amount, self.accrued, self.flushed.as_ref())
    }
}

impl Staged for UsageReceipt {
    fn settled(&self) -> Option<&Distribution> {
        self.flushed.as_ref()
    }

    fn events(&self) -> Vec<LedgerEvent> {
        accrual_events(self.track, self.deposit, self.accrued, self.flushed.as_ref())
    }
}

/// An adjustment staged on a track; the outcome alone does not carry the track.
struct StagedAdjustment {
    track: TrackId,
    outcome: AdjustmentOutcome,
}

impl Staged for StagedAdjustment {
    fn settled(&self) -> Option<&Distribution> {
        match &self.outcome {
            AdjustmentOutcome::Paid(distribution) => Some(distribution),
            AdjustmentOutcome::DeficitRecorded { .. } => None,
        }
    }

    fn events(&self) -> Vec<LedgerEvent> {
        match &self.outcome {
            AdjustmentOutcome::Paid(distribution) => {
                let mut events = vec![LedgerEvent::AdjustmentApplied {
                    track: self.track,
                    amount: distribution.amount,
                    direction: Direction::Credit,
                    parts: distribution.net_amounts(),
                }];
                events.extend(distribution.events());
                events
            }
            AdjustmentOutcome::DeficitRecorded { amount, parts } => {
                vec![LedgerEvent::AdjustmentApplied {
                    track: self.track,
                    amount: *amount,
                    direction: Direction::Debit,
                    parts: parts.clone(),
                }]
            }
        }
    }
}

struct StagedRegistration {
    track: TrackId,
    shares: PayeeShares,
}

impl Staged for StagedRegistration {
    const CREATES_TRACK: bool = true;

    fn settled(&self) -> Option<&Distribution> {
        None
    }

    fn events(&self) -> Vec<LedgerEvent> {
        vec![LedgerEvent::PayeesRegistered {
            track: self.track,
            payees: self.shares.as_slice().to_vec(),
        }]
    }
}

struct StagedRemoval {
    track: TrackId,
    payee: PayeeId,
    redistributed_units: u32,
}

impl Staged for StagedRemoval {
    fn settled(&self) -> Option<&Distribution> {
        None
    }

    fn events(&self) -> Vec<LedgerEvent> {
        vec![LedgerEvent::PayeeRemoved {
            track: self.track,
            payee: self.payee,
            redistributed_units: self.redistributed_units,
        }]
    }
}

/// Royalty distribution engine managing track accounts.
///
/// # Invariants
///
/// - Every registered track's share units sum to `total_share_units`.
/// - Every distribution's gross payouts sum to the distributed amount.
/// - At most one mutating operation is in flight per track.
/// - No operation is partially applied.
pub struct Engine {
    /// Track accounts indexed by track id.
    accounts: DashMap<TrackId, Arc<TrackAccount>>,
    config: LedgerConfig,
    thresholds: ThresholdPolicy,
    rail: Arc<dyn FundsTransfer>,
    capabilities: Arc<dyn CapabilityCheck>,
    events: Arc<dyn EventSink>,
    /// Next event sequence number.
    sequence: AtomicU64,
}

impl Engine {
    /// Creates an engine with no tracks.
    pub fn new(
        config: LedgerConfig,
        rail: Arc<dyn FundsTransfer>,
        capabilities: Arc<dyn CapabilityCheck>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Engine {
            accounts: DashMap::new(),
            thresholds: ThresholdPolicy::new(config.global_minimum),
            config,
            rail,
            capabilities,
            events,
            sequence: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // === Registry ===

    /// Replaces the payee set of `track`, creating the track if needed.
    ///
    /// Pending accrual, deficits and meter settings are kept.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Unauthorized`] - Caller is not an admin.
    /// - Any validation error of [`PayeeShares::new`].
    /// - [`LedgerError::Busy`] - Track lock not acquired in time.
    pub fn register_payees(
        &self,
        caller: CallerId,
        track: TrackId,
        payees: &[PayeeId],
        share_units: &[u32],
    ) -> Result<(), LedgerError> {
        self.require(caller, Capability::Admin)?;
        let total_units = self.config.total_share_units;
        let shares = PayeeShares::new(payees, share_units, total_units, self.config.max_payees)?;

        // Validated first so a rejected registration never creates the track.
        let account = self
            .accounts
            .entry(track)
            .or_insert_with(|| Arc::new(TrackAccount::new(track)))
            .clone();
        let registration = self.run(account, |data| {
            data.replace_payees(shares.clone(), total_units);
            Ok(StagedRegistration { track, shares })
        })?;
        info!(%track, payees = registration.shares.len(), "payees registered");
        Ok(())
    }

    /// Removes `payee` from `track`, redistributing its share proportionally.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Unauthorized`] - Caller is not an admin.
    /// - [`LedgerError::TrackNotFound`] - Track was never registered.
    /// - [`LedgerError::PayeeNotFound`] - Payee is not on the track.
    /// - [`LedgerError::LastPayee`] - Payee is the only one left.
    pub fn remove_payee(&self, caller: CallerId, track: TrackId, payee: PayeeId) -> Result<(), LedgerError> {
        self.require(caller, Capability::Admin)?;
        let total_units = self.config.total_share_units;
        let removal = self.run(self.account(track)?, |data| {
            let redistributed_units = data.remove_payee(payee, total_units)?;
            Ok(StagedRemoval {
                track,
                payee,
                redistributed_units,
            })
        })?;
        info!(%track, %payee, units = removal.redistributed_units, "payee removed");
        Ok(())
    }

    /// Current payees of `track` in registration order.
    pub fn shares(&self, track: TrackId) -> Result<Vec<PayeeShare>, LedgerError> {
        Ok(self.snapshot(track)?.payees)
    }

    pub fn payee_count(&self, track: TrackId) -> Result<usize, LedgerError> {
        Ok(self.snapshot(track)?.payees.len())
    }

    // === Streaming meter ===

    /// Sets the price per usage unit; zero disables usage recording.
    pub fn set_rate(&self, caller: CallerId, track: TrackId, rate: Amount) -> Result<(), LedgerError> {
        self.require(caller, Capability::Admin)?;
        self.run(self.account(track)?, |data| {
            data.set_rate(rate);
            Ok(())
        })?;
        info!(%track, rate, "usage rate set");
        Ok(())
    }

    /// Records `units` of usage, depositing `units * rate`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::RateNotSet`] - Rate is zero.
    /// - [`LedgerError::InvalidUsage`] - `units` is zero.
    /// - [`LedgerError::ArithmeticOverflow`] - Deposit or counters overflow.
    /// - Transfer errors if the deposit triggers an auto-flush.
    pub fn record_usage(&self, caller: CallerId, track: TrackId, units: u64) -> Result<UsageReceipt, LedgerError> {
        self.require(caller, Capability::Distributor)?;
        let total_units = self.config.total_share_units;
        let receipt = self.run(self.account(track)?, |data| usage(data, units, total_units))?;
        debug!(%track, units, deposit = receipt.deposit, "usage recorded");
        Ok(receipt)
    }

    /// Records usage for several tracks; all pairs apply or none do.
    ///
    /// # Errors
    ///
    /// [`LedgerError::BatchRejected`] naming the first failing index.
    pub fn batch_record_usage(
        &self,
        caller: CallerId,
        tracks: &[TrackId],
        units: &[u64],
    ) -> Result<Vec<UsageReceipt>, LedgerError> {
        self.require(caller, Capability::Distributor)?;
        check_lengths(tracks.len(), units.len())?;
        let total_units = self.config.total_share_units;
        let receipts = self.run_batch(tracks, |index, data| {
            usage(data, units[index], total_units).map_err(|e| e.at_index(index))
        })?;
        debug!(entries = receipts.len(), "usage batch recorded");
        Ok(receipts)
    }

    pub fn rate(&self, track: TrackId) -> Result<Amount, LedgerError> {
        Ok(self.snapshot(track)?.rate_per_unit)
    }

    pub fn total_usage(&self, track: TrackId) -> Result<u64, LedgerError> {
        Ok(self.snapshot(track)?.total_units_recorded)
    }

    // === Accrual and thresholds ===

    /// Adds revenue to `track`'s pending balance, flushing it when the
    /// auto-flush threshold is reached.
    ///
    /// If the flush cannot be paid out, the deposit is rejected as well.
    pub fn accumulate_deposit(
        &self,
        caller: CallerId,
        track: TrackId,
        amount: Amount,
    ) -> Result<DepositReceipt, LedgerError> {
        self.require(caller, Capability::Distributor)?;
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let total_units = self.config.total_share_units;
        let receipt = self.run(self.account(track)?, |data| {
            let Accrued { accrued, flushed } = data.deposit(amount, total_units)?;
            Ok(DepositReceipt {
                track,
                amount,
                accrued,
                flushed,
            })
        })?;
        debug!(%track, amount, pending = receipt.accrued, "deposit accumulated");
        Ok(receipt)
    }

    /// Distributes `track`'s entire pending balance now.
    ///
    /// Skips the global minimum, like automatic flushes.
    pub fn flush_pending(&self, caller: CallerId, track: TrackId) -> Result<Distribution, LedgerError> {
        self.require(caller, Capability::Distributor)?;
        let total_units = self.config.total_share_units;
        let distribution = self.run(self.account(track)?, |data| data.flush(total_units))?;
        info!(%track, amount = distribution.amount, "pending balance flushed");
        Ok(distribution)
    }

    /// Sets `track`'s auto-flush threshold; zero disables auto-flush.
    pub fn set_auto_flush_threshold(
        &self,
        caller: CallerId,
        track: TrackId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.require(caller, Capability::Admin)?;
        self.run(self.account(track)?, |data| {
            data.set_auto_flush(amount);
            Ok(())
        })?;
        info!(%track, threshold = amount, "auto-flush threshold set");
        Ok(())
    }

    pub fn set_global_minimum(&self, caller: CallerId, amount: Amount) -> Result<(), LedgerError> {
        self.require(caller, Capability::Admin)?;
        self.thresholds.set_global_minimum(amount);
        info!(minimum = amount, "global minimum set");
        Ok(())
    }

    pub fn global_minimum(&self) -> Amount {
        self.thresholds.global_minimum()
    }

    pub fn pending(&self, track: TrackId) -> Result<Amount, LedgerError> {
        Ok(self.snapshot(track)?.pending)
    }

    pub fn auto_flush_threshold(&self, track: TrackId) -> Result<Amount, LedgerError> {
        Ok(self.snapshot(track)?.auto_flush)
    }

    // === Distribution ===

    /// Splits `amount` exactly across `track`'s payees and pays them.
    ///
    /// Outstanding deficits are withheld from the affected payees.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Unauthorized`] - Caller is not a distributor.
    /// - [`LedgerError::BelowMinimum`] - `amount` is under the global minimum.
    /// - [`LedgerError::TrackNotFound`] / [`LedgerError::NoPayees`] - Nobody to pay.
    /// - [`LedgerError::InsufficientBalance`] / [`LedgerError::TransferFailed`] - Rail refused.
    pub fn distribute(&self, caller: CallerId, track: TrackId, amount: Amount) -> Result<Distribution, LedgerError> {
        self.require(caller, Capability::Distributor)?;
        self.thresholds.check(amount)?;
        let total_units = self.config.total_share_units;
        let distribution = self.run(self.account(track)?, |data| data.settle(amount, total_units))?;
        info!(%track, amount, payees = distribution.payouts.len(), "distribution completed");
        Ok(distribution)
    }

    /// Distributes to several tracks; every entry is validated before any
    /// transfer and the batch commits as a unit.
    ///
    /// # Errors
    ///
    /// [`LedgerError::BatchRejected`] naming the first failing index, or a
    /// lock or transfer error affecting the whole batch.
    pub fn batch_distribute(
        &self,
        caller: CallerId,
        tracks: &[TrackId],
        amounts: &[Amount],
    ) -> Result<Vec<Distribution>, LedgerError> {
        self.require(caller, Capability::Distributor)?;
        check_lengths(tracks.len(), amounts.len())?;
        for (index, &amount) in amounts.iter().enumerate() {
            self.thresholds.check(amount).map_err(|e| e.at_index(index))?;
        }
        let total_units = self.config.total_share_units;
        let distributions = self.run_batch(tracks, |index, data| {
            data.settle(amounts[index], total_units)
                .map_err(|e| e.at_index(index))
        })?;
        info!(entries = distributions.len(), "distribution batch completed");
        Ok(distributions)
    }

    // === Reconciliation ===

    /// Applies a retroactive adjustment.
    ///
    /// A credit is paid out like [`Engine::distribute`]. A debit is split the
    /// same way and recorded as deficits against the payees.
    pub fn apply_adjustment(
        &self,
        caller: CallerId,
        track: TrackId,
        amount: Amount,
        direction: Direction,
    ) -> Result<AdjustmentOutcome, LedgerError> {
        self.require(caller, Capability::Admin)?;
        match direction {
            Direction::Credit => self.thresholds.check(amount)?,
            Direction::Debit if amount == 0 => return Err(LedgerError::InvalidAmount),
            Direction::Debit => {}
        }
        let total_units = self.config.total_share_units;
        let staged = self.run(self.account(track)?, |data| {
            let outcome = data.adjust(amount, direction, total_units)?;
            Ok(StagedAdjustment { track, outcome })
        })?;
        info!(%track, amount, ?direction, "adjustment applied");
        Ok(staged.outcome)
    }

    /// Transfers delivered to payees of `track` by payouts that failed before
    /// committing, ordered by payee. They count against the next payouts.
    pub fn advances(&self, track: TrackId) -> Result<Vec<(PayeeId, Amount)>, LedgerError> {
        Ok(self.snapshot(track)?.advances)
    }

    /// Outstanding deficits of `track`, ordered by payee.
    pub fn deficits(&self, track: TrackId) -> Result<Vec<(PayeeId, Amount)>, LedgerError> {
        Ok(self.snapshot(track)?.deficits)
    }

    // === Queries ===

    pub fn snapshot(&self, track: TrackId) -> Result<TrackSnapshot, LedgerError> {
        let account = self.account(track)?;
        let data = account.lock_for(self.config.lock_timeout())?;
        if data.payees().is_empty() {
            return Err(LedgerError::TrackNotFound { track });
        }
        Ok(data.snapshot())
    }

    pub fn version(&self, track: TrackId) -> Result<u64, LedgerError> {
        Ok(self.snapshot(track)?.version)
    }

    /// Snapshots of every registered track, ordered by track id.
    ///
    /// Tracks whose lock is not acquired in time are listed as busy instead
    /// of failing the whole listing.
    pub fn tracks(&self) -> TrackListing {
        let accounts: Vec<_> = self.accounts.iter().map(|r| Arc::clone(r.value())).collect();
        let mut listing = TrackListing::default();
        for account in accounts {
            match account.lock_for(self.config.lock_timeout()) {
                Ok(data) if !data.payees().is_empty() => listing.snapshots.push(data.snapshot()),
                Ok(_) => {}
                Err(_) => listing.busy.push(account.track()),
            }
        }
        listing.snapshots.sort_by_key(|s| s.track);
        listing.busy.sort_unstable();
        listing
    }

    // === Internals ===

    fn require(&self, caller: CallerId, capability: Capability) -> Result<(), LedgerError> {
        if self.capabilities.has_capability(caller, capability) {
            Ok(())
        } else {
            warn!(%caller, %capability, "capability check failed");
            Err(LedgerError::Unauthorized { caller, capability })
        }
    }

    /// Looks up a track, releasing the map guard before returning.
    fn account(&self, track: TrackId) -> Result<Arc<TrackAccount>, LedgerError> {
        self.accounts
            .get(&track)
            .map(|r| Arc::clone(r.value()))
            .ok_or(LedgerError::TrackNotFound { track })
    }

    fn emit(&self, event: LedgerEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.events.emit(SequencedEvent { sequence, event });
    }

    /// Runs a single-track operation under the commit protocol.
    fn run<R: Staged>(
        &self,
        account: Arc<TrackAccount>,
        stage: impl FnOnce(&mut TrackData) -> Result<R, LedgerError>,
    ) -> Result<R, LedgerError> {
        let track = account.track();
        let accounts = [account];
        let mut batch = LockedBatch::acquire(&accounts, self.config.lock_timeout())?;
        let data = batch.staged(track)?;
        if !R::CREATES_TRACK && data.payees().is_empty() {
            // registration has inserted the account but not committed yet
            return Err(LedgerError::TrackNotFound { track });
        }
        let outcome = stage(data)?;
        let remittances = remittances_for(&mut batch, outcome.settled().into_iter())?;
        self.pay_out(&mut batch, &remittances)?;
        batch.commit();
        // Emitted under the lock so a track's events are sequenced in commit order.
        for event in outcome.events() {
            self.emit(event);
        }
        Ok(outcome)
    }

    /// Runs a multi-track operation under the commit protocol.
    fn run_batch<R: Staged>(
        &self,
        tracks: &[TrackId],
        mut stage: impl FnMut(usize, &mut TrackData) -> Result<R, LedgerError>,
    ) -> Result<Vec<R>, LedgerError> {
        let mut resolved = Vec::with_capacity(tracks.len());
        for (index, &track) in tracks.iter().enumerate() {
            resolved.push(self.account(track).map_err(|e| e.at_index(index))?);
        }
        let accounts = lock_order(resolved);

        let mut batch = LockedBatch::acquire(&accounts, self.config.lock_timeout())?;
        let outcomes = batch
            .stage_each(tracks, |index, data| {
                if !R::CREATES_TRACK && data.payees().is_empty() {
                    return Err(LedgerError::TrackNotFound { track: data.track() }.at_index(index));
                }
                stage(index, data)
            })
            .inspect_err(|e| {
                warn!(error = %e, "batch rejected");
            })?;
        let remittances = remittances_for(&mut batch, outcomes.iter().filter_map(Staged::settled))?;
        self.pay_out(&mut batch, &remittances)?;
        batch.commit();
        for outcome in &outcomes {
            for event in outcome.events() {
                self.emit(event);
            }
        }
        Ok(outcomes)
    }

    /// Sends `remittances` over the rail.
    ///
    /// Checks the rail can cover all of them before the first transfer. If
    /// the rail refuses one, the transfers it already accepted are recorded
    /// as advances on their tracks before the error is returned.
    fn pay_out(&self, batch: &mut LockedBatch<'_>, remittances: &[Remittance]) -> Result<(), LedgerError> {
        let required = remittances
            .iter()
            .try_fold(0 as Amount, |acc, r| acc.checked_add(r.amount))
            .ok_or(LedgerError::ArithmeticOverflow)?;
        if required == 0 {
            return Ok(());
        }

        let available = self.rail.available_balance();
        if available < required {
            warn!(required, available, "rail balance too low for payout");
            return Err(LedgerError::InsufficientBalance { required, available });
        }

        for (sent, remittance) in remittances.iter().enumerate() {
            if let Err(reason) = self.rail.transfer_to(remittance.payee, remittance.amount) {
                warn!(
                    track = %remittance.track,
                    payee = %remittance.payee,
                    %reason,
                    delivered = sent,
                    "transfer failed"
                );
                batch.record_advances(&remittances[..sent])?;
                return Err(LedgerError::TransferFailed {
                    payee: remittance.payee,
                    reason,
                });
            }
        }
        Ok(())
    }
}

/// Transfers owed for `distributions`, net of outstanding advances.
///
/// Consumes advances on the staged copies only.
fn remittances_for<'d>(
    batch: &mut LockedBatch<'_>,
    distributions: impl Iterator<Item = &'d Distribution>,
) -> Result<Vec<Remittance>, LedgerError> {
    let mut remittances = Vec::new();
    for distribution in distributions {
        let track = distribution.track;
        let owed = batch.staged(track)?.remit(distribution);
        remittances.extend(
            owed.into_iter()
                .map(|(payee, amount)| Remittance { track, payee, amount }),
        );
    }
    Ok(remittances)
}

fn usage(data: &mut TrackData, units: u64, total_units: u32) -> Result<UsageReceipt, LedgerError> {
    let (deposit, Accrued { accrued, flushed }) = data.record_usage(units, total_units)?;
    Ok(UsageReceipt {
        track: data.track(),
        units,
        deposit,
        accrued,
        flushed,
    })
}

fn check_lengths(left: usize, right: usize) -> Result<(), LedgerError> {
    if left != right {
        return Err(LedgerError::LengthMismatch { left, right });
    }
    Ok(())
}
