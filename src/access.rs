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


//! Capability checks for privileged operations.
//!
//! The ledger does not own identities or roles. It asks a [`CapabilityCheck`]
//! collaborator whether a caller may perform an operation before touching any
//! state.

use crate::base::CallerId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A grant permitting privileged operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Configures payees, rates, thresholds and adjustments.
    Admin,
    /// Feeds revenue in and triggers distributions.
    Distributor,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Admin => write!(f, "admin"),
            Capability::Distributor => write!(f, "distributor"),
        }
    }
}

/// Access-control collaborator.
pub trait CapabilityCheck: Send + Sync {
    fn has_capability(&self, caller: CallerId, capability: Capability) -> bool;
}

/// In-memory grant table.
///
/// `Admin` implies `Distributor`.
#[derive(Debug, Default)]
pub struct CapabilityTable {
    grants: DashMap<CallerId, HashSet<Capability>>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, caller: CallerId, capability: Capability) {
        self.grants.entry(caller).or_default().insert(capability);
    }

    pub fn revoke(&self, caller: CallerId, capability: Capability) {
        if let Some(mut granted) = self.grants.get_mut(&caller) {
            granted.remove(&capability);
        }
    }
}

impl CapabilityCheck for CapabilityTable {
    fn has_capability(&self, caller: CallerId, capability: Capability) -> bool {
        let Some(granted) = self.grants.get(&caller) else {
            return false;
        };
        match capability {
            Capability::Admin => granted.contains(&Capability::Admin),
            Capability::Distributor => {
                granted.contains(&Capability::Distributor) || granted.contains(&Capability::Admin)
            }
        }
    }
}
