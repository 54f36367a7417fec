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


//! Error types for ledger operations.

use crate::access::Capability;
use crate::base::{Amount, CallerId, PayeeId, TrackId};
use crate::transfer::TransferFailure;
use thiserror::Error;

/// How a transport layer should surface a [`LedgerError`] to its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request itself is wrong; retrying it unchanged will fail again.
    Client,
    /// The caller lacks the capability for the operation.
    PermissionDenied,
    /// Transient or server-side; the same request may succeed later.
    Retryable,
}

/// Ledger operation errors.
///
/// Every error is raised before any state is committed, so a failed call
/// leaves all tracks exactly as they were.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Payee list is empty
    #[error("payee list is empty")]
    EmptyPayees,

    /// Parallel input arrays differ in length
    #[error("length mismatch: {left} entries vs {right} entries")]
    LengthMismatch { left: usize, right: usize },

    /// A payee was given zero share units
    #[error("payee {payee} has zero share units")]
    ZeroShare { payee: PayeeId },

    /// The same payee appears twice in one registration
    #[error("payee {payee} listed more than once")]
    DuplicatePayee { payee: PayeeId },

    /// Share units do not add up to the configured total
    #[error("share units sum to {actual}, expected {expected}")]
    ShareSumMismatch { expected: u32, actual: u64 },

    /// Registration exceeds the per-track payee cap
    #[error("{count} payees exceeds the maximum of {max}")]
    TooManyPayees { count: usize, max: usize },

    /// Usage units must be positive
    #[error("usage units must be positive")]
    InvalidUsage,

    /// Amount must be positive
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// No payees were ever registered for the track
    #[error("track {track} not found")]
    TrackNotFound { track: TrackId },

    /// Payee is not registered on the track
    #[error("payee {payee} not registered on track {track}")]
    PayeeNotFound { track: TrackId, payee: PayeeId },

    /// Removing the payee would leave the track without payees
    #[error("payee {payee} is the last payee of track {track}")]
    LastPayee { track: TrackId, payee: PayeeId },

    /// Track has no payees to distribute to
    #[error("track {track} has no payees")]
    NoPayees { track: TrackId },

    /// Usage recording is disabled for the track
    #[error("usage rate not set for track {track}")]
    RateNotSet { track: TrackId },

    /// Caller lacks the required capability
    #[error("caller {caller} lacks {capability} capability")]
    Unauthorized {
        caller: CallerId,
        capability: Capability,
    },

    /// Explicit distribution below the global minimum
    #[error("amount {amount} is below the minimum of {minimum}")]
    BelowMinimum { amount: Amount, minimum: Amount },

    /// Checked arithmetic overflowed
    #[error("arithmetic overflow")]
    ArithmeticOverflow,

    /// The funds rail refused a payout
    #[error("transfer to payee {payee} failed: {reason}")]
    TransferFailed {
        payee: PayeeId,
        reason: TransferFailure,
    },

    /// The funds rail cannot cover the payouts of the call
    #[error("insufficient rail balance: required {required}, available {available}")]
    InsufficientBalance { required: Amount, available: Amount },

    /// The track lock could not be acquired in time
    #[error("track {track} is busy")]
    Busy { track: TrackId },

    /// One entry of a batch failed; nothing in the batch was applied
    #[error("batch entry {index} rejected: {source}")]
    BatchRejected {
        index: usize,
        source: Box<LedgerError>,
    },
}

impl LedgerError {
    /// Maps the error onto the class a transport layer reports.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Unauthorized { .. } => ErrorCategory::PermissionDenied,
            Self::ArithmeticOverflow
            | Self::TransferFailed { .. }
            | Self::InsufficientBalance { .. }
            | Self::Busy { .. } => ErrorCategory::Retryable,
            Self::BatchRejected { source, .. } => source.category(),
            _ => ErrorCategory::Client,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Retryable
    }

    pub(crate) fn at_index(self, index: usize) -> Self {
        Self::BatchRejected {
            index,
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(LedgerError::EmptyPayees.to_string(), "payee list is empty");
        assert_eq!(
            LedgerError::ShareSumMismatch {
                expected: 10_000,
                actual: 9_999
            }
            .to_string(),
            "share units sum to 9999, expected 10000"
        );
        assert_eq!(
            LedgerError::LastPayee {
                track: TrackId(1),
                payee: PayeeId(7)
            }
            .to_string(),
            "payee 7 is the last payee of track 1"
        );
        assert_eq!(
            LedgerError::Unauthorized {
                caller: CallerId(3),
                capability: Capability::Admin
            }
            .to_string(),
            "caller 3 lacks admin capability"
        );
        assert_eq!(LedgerError::Busy { track: TrackId(2) }.to_string(), "track 2 is busy");
        assert_eq!(
            LedgerError::InvalidUsage.at_index(4).to_string(),
            "batch entry 4 rejected: usage units must be positive"
        );
    }

    #[test]
    fn categories_follow_transport_mapping() {
        assert_eq!(LedgerError::EmptyPayees.category(), ErrorCategory::Client);
        assert_eq!(
            LedgerError::TrackNotFound { track: TrackId(1) }.category(),
            ErrorCategory::Client
        );
        assert_eq!(
            LedgerError::BelowMinimum {
                amount: 0,
                minimum: 1
            }
            .category(),
            ErrorCategory::Client
        );
        assert_eq!(
            LedgerError::Unauthorized {
                caller: CallerId(1),
                capability: Capability::Distributor
            }
            .category(),
            ErrorCategory::PermissionDenied
        );
        assert!(LedgerError::ArithmeticOverflow.is_retryable());
        assert!(LedgerError::Busy { track: TrackId(1) }.is_retryable());
        assert!(
            LedgerError::TransferFailed {
                payee: PayeeId(1),
                reason: TransferFailure::Unavailable
            }
            .is_retryable()
        );
    }

    #[test]
    fn batch_rejection_inherits_category() {
        let busy = LedgerError::Busy { track: TrackId(9) }.at_index(0);
        assert!(busy.is_retryable());
        let bad = LedgerError::InvalidAmount.at_index(2);
        assert_eq!(bad.category(), ErrorCategory::Client);
    }
}
