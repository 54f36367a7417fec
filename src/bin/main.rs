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


use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use royalty_ledger_rs::{
    Amount, CallerId, Capability, CapabilityTable, Direction, Engine, EventLog, LedgerConfig,
    LedgerError, MemoryRail, PayeeId, TrackId,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

/// Identity the replay runs as; it holds every capability.
const OPERATOR: CallerId = CallerId(0);

/// Royalty Ledger - Replay royalty operations from a CSV file
///
/// Reads operations from a CSV file and writes the resulting payee payouts
/// (or track summaries) to stdout.
#[derive(Parser, Debug)]
#[command(name = "royalty-ledger-rs")]
#[command(about = "A royalty ledger that replays operation CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: op,track,payees,shares,amount
    /// Example: cargo run -- operations.csv > payouts.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// TOML ledger configuration
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Funds available for payouts (unlimited when omitted)
    #[arg(long, value_name = "AMOUNT")]
    treasury: Option<Amount>,

    /// Write track summaries instead of payee payouts
    #[arg(long)]
    tracks: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("royalty_ledger_rs=info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match LedgerConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Error loading config '{}': {}", path.display(), e);
                process::exit(1);
            }
        },
        None => LedgerConfig::default(),
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            error!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let rail = Arc::new(args.treasury.map_or_else(MemoryRail::unlimited, MemoryRail::new));
    let engine = operator_engine(config, Arc::clone(&rail));

    if let Err(e) = process_operations(&engine, BufReader::new(file)) {
        error!("Error processing operations: {}", e);
        process::exit(1);
    }

    let result = if args.tracks {
        write_tracks(&engine, std::io::stdout())
    } else {
        write_payouts(&rail, std::io::stdout())
    };
    if let Err(e) = result {
        error!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Builds an engine on `rail` where [`OPERATOR`] is an admin.
fn operator_engine(config: LedgerConfig, rail: Arc<MemoryRail>) -> Engine {
    let capabilities = Arc::new(CapabilityTable::new());
    capabilities.grant(OPERATOR, Capability::Admin);
    Engine::new(config, rail, capabilities, Arc::new(EventLog::new()))
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, track, payees, shares, amount`. List fields are `;` separated.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    track: u32,
    #[serde(default)]
    payees: String,
    #[serde(default)]
    shares: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<Amount>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
    Register {
        track: TrackId,
        payees: Vec<PayeeId>,
        shares: Vec<u32>,
    },
    Remove {
        track: TrackId,
        payee: PayeeId,
    },
    Rate {
        track: TrackId,
        rate: Amount,
    },
    Threshold {
        track: TrackId,
        amount: Amount,
    },
    Minimum {
        amount: Amount,
    },
    Deposit {
        track: TrackId,
        amount: Amount,
    },
    Usage {
        track: TrackId,
        units: u64,
    },
    Distribute {
        track: TrackId,
        amount: Amount,
    },
    Flush {
        track: TrackId,
    },
    Adjust {
        track: TrackId,
        amount: Amount,
        direction: Direction,
    },
}

fn parse_list<T: std::str::FromStr>(field: &str) -> Option<Vec<T>> {
    field
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect()
}

impl CsvRecord {
    /// Converts a CSV record to an [`Operation`].
    ///
    /// Returns `None` for unknown ops or missing required fields.
    fn into_operation(self) -> Option<Operation> {
        let track = TrackId(self.track);

        match self.op.to_lowercase().as_str() {
            "register" => Some(Operation::Register {
                track,
                payees: parse_list::<u32>(&self.payees)?
                    .into_iter()
                    .map(PayeeId)
                    .collect(),
                shares: parse_list(&self.shares)?,
            }),
            "remove" => {
                let payees: Vec<u32> = parse_list(&self.payees)?;
                match payees.as_slice() {
                    [payee] => Some(Operation::Remove {
                        track,
                        payee: PayeeId(*payee),
                    }),
                    _ => None,
                }
            }
            "rate" => Some(Operation::Rate {
                track,
                rate: self.amount?,
            }),
            "threshold" => Some(Operation::Threshold {
                track,
                amount: self.amount?,
            }),
            "minimum" => Some(Operation::Minimum {
                amount: self.amount?,
            }),
            "deposit" => Some(Operation::Deposit {
                track,
                amount: self.amount?,
            }),
            "usage" => Some(Operation::Usage {
                track,
                units: self.amount?,
            }),
            "distribute" => Some(Operation::Distribute {
                track,
                amount: self.amount?,
            }),
            "flush" => Some(Operation::Flush { track }),
            "credit" => Some(Operation::Adjust {
                track,
                amount: self.amount?,
                direction: Direction::Credit,
            }),
            "debit" => Some(Operation::Adjust {
                track,
                amount: self.amount?,
                direction: Direction::Debit,
            }),
            _ => None,
        }
    }
}

fn apply(engine: &Engine, operation: Operation) -> Result<(), LedgerError> {
    match operation {
        Operation::Register {
            track,
            payees,
            shares,
        } => engine.register_payees(OPERATOR, track, &payees, &shares),
        Operation::Remove { track, payee } => engine.remove_payee(OPERATOR, track, payee),
        Operation::Rate { track, rate } => engine.set_rate(OPERATOR, track, rate),
        Operation::Threshold { track, amount } => {
            engine.set_auto_flush_threshold(OPERATOR, track, amount)
        }
        Operation::Minimum { amount } => engine.set_global_minimum(OPERATOR, amount),
        Operation::Deposit { track, amount } => engine
            .accumulate_deposit(OPERATOR, track, amount)
            .map(|_| ()),
        Operation::Usage { track, units } => {
            engine.record_usage(OPERATOR, track, units).map(|_| ())
        }
        Operation::Distribute { track, amount } => {
            engine.distribute(OPERATOR, track, amount).map(|_| ())
        }
        Operation::Flush { track } => engine.flush_pending(OPERATOR, track).map(|_| ()),
        Operation::Adjust {
            track,
            amount,
            direction,
        } => engine
            .apply_adjustment(OPERATOR, track, amount, direction)
            .map(|_| ()),
    }
}

/// Replays operations from a CSV reader against `engine`.
///
/// Streams the input, so arbitrarily large files are fine. Malformed rows and
/// rejected operations are logged and skipped.
///
/// # CSV Format
///
/// Expected columns: `op, track, payees, shares, amount`
///
/// ```csv
/// op,track,payees,shares,amount
/// register,1,1;2,6000;4000,
/// distribute,1,,,100
/// usage,1,,,10
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
fn process_operations<R: Read>(engine: &Engine, reader: R) -> Result<(), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (row, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                debug!(row, "skipping malformed row: {}", e);
                continue;
            }
        };

        let Some(operation) = record.into_operation() else {
            debug!(row, "skipping invalid operation record");
            continue;
        };

        if let Err(e) = apply(engine, operation) {
            debug!(row, "skipping rejected operation: {}", e);
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct PayoutRow {
    payee: PayeeId,
    received: Amount,
}

/// Writes every payee's received total as CSV.
///
/// Columns: `payee, received`
fn write_payouts<W: Write>(rail: &MemoryRail, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for (payee, received) in rail.payouts() {
        wtr.serialize(PayoutRow { payee, received })?;
    }
    wtr.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct TrackRow {
    track: TrackId,
    payees: usize,
    pending: Amount,
    rate: Amount,
    usage: u64,
    auto_flush: Amount,
    deficit: Amount,
    version: u64,
}

/// Writes a summary row per registered track as CSV, skipping busy tracks.
///
/// Columns: `track, payees, pending, rate, usage, auto_flush, deficit, version`
fn write_tracks<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let listing = engine.tracks();
    for track in &listing.busy {
        warn!(%track, "track busy, left out of summary");
    }

    let mut wtr = Writer::from_writer(writer);
    for snapshot in listing.snapshots {
        wtr.serialize(TrackRow {
            track: snapshot.track,
            payees: snapshot.payees.len(),
            pending: snapshot.pending,
            rate: snapshot.rate_per_unit,
            usage: snapshot.total_units_recorded,
            auto_flush: snapshot.auto_flush,
            deficit: snapshot.outstanding_deficit(),
            version: snapshot.version,
        })?;
    }
    wtr.flush()?;
    Ok(())
}
