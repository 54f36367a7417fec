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


//! Ledger configuration.
//!
//! Loaded from TOML; every field has a default, so an empty file is valid.
//!
//! ```toml
//! total_share_units = 10000
//! global_minimum = 1
//! lock_timeout_ms = 250
//! max_payees = 64
//! ```

use crate::base::Amount;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Share units every track's payees must add up to.
    #[serde(default = "default_total_share_units")]
    pub total_share_units: u32,
    /// Smallest amount an explicit distribution may move.
    #[serde(default = "default_global_minimum")]
    pub global_minimum: Amount,
    /// How long an operation waits for a track lock before failing as busy.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_max_payees")]
    pub max_payees: usize,
}

fn default_total_share_units() -> u32 {
    10_000
}

fn default_global_minimum() -> Amount {
    1
}

fn default_lock_timeout_ms() -> u64 {
    250
}

fn default_max_payees() -> usize {
    64
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            total_share_units: default_total_share_units(),
            global_minimum: default_global_minimum(),
            lock_timeout_ms: default_lock_timeout_ms(),
            max_payees: default_max_payees(),
        }
    }
}

impl LedgerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LedgerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total_share_units == 0 {
            return Err(ConfigError::Invalid("total_share_units must be positive"));
        }
        if self.max_payees == 0 {
            return Err(ConfigError::Invalid("max_payees must be positive"));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
