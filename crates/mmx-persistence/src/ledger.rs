//! Append-only JSON Lines event ledger.
//!
//! One record per line in `ledger_<YYYY-MM-DD>.jsonl`, dated by the
//! record's own timestamp. Lines are never rewritten; a torn last line only
//! loses that record.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use mmx_core::{Fill, OrderUpdate, Position};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::PersistenceResult;

/// Ledger entry payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Fill(Fill),
    Order(OrderUpdate),
    Balance {
        total_equity: Decimal,
        wallet_balance: Decimal,
        available_balance: Decimal,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub ts: DateTime<Utc>,
    pub event: LedgerEvent,
}

struct ActiveFile {
    writer: BufWriter<File>,
    date: String,
    records_written: usize,
}

/// Buffered ledger writer. Flushes when the buffer fills, on `flush`, and
/// on drop.
pub struct LedgerWriter {
    base_dir: PathBuf,
    buffer: Vec<LedgerRecord>,
    max_buffer_size: usize,
    active: Option<ActiveFile>,
}

impl LedgerWriter {
    pub fn new(base_dir: impl Into<PathBuf>, max_buffer_size: usize) -> PersistenceResult<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            buffer: Vec::with_capacity(max_buffer_size),
            max_buffer_size: max_buffer_size.max(1),
            active: None,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn append(&mut self, event: LedgerEvent) -> PersistenceResult<()> {
        self.append_at(event, Utc::now())
    }

    pub fn append_at(&mut self, event: LedgerEvent, ts: DateTime<Utc>) -> PersistenceResult<()> {
        self.buffer.push(LedgerRecord { ts, event });
        if self.buffer.len() >= self.max_buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn open(&mut self, date: &str) -> PersistenceResult<()> {
        let path = self.base_dir.join(format!("ledger_{date}.jsonl"));
        info!(path = %path.display(), "Opening ledger (append mode)");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.active = Some(ActiveFile {
            writer: BufWriter::new(file),
            date: date.to_string(),
            records_written: 0,
        });
        Ok(())
    }

    fn close_active(&mut self) {
        if let Some(mut active) = self.active.take() {
            if let Err(e) = active.writer.flush() {
                warn!(?e, "Failed to flush ledger on close");
            }
            info!(
                date = %active.date,
                records = active.records_written,
                "Closed ledger file"
            );
        }
    }

    pub fn flush(&mut self) -> PersistenceResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let records = std::mem::take(&mut self.buffer);
        let count = records.len();

        for record in &records {
            let date = record.ts.format("%Y-%m-%d").to_string();
            if self.active.as_ref().is_some_and(|a| a.date != date) {
                self.close_active();
            }
            if self.active.is_none() {
                self.open(&date)?;
            }
            let line = serde_json::to_string(record)?;
            if let Some(active) = self.active.as_mut() {
                writeln!(active.writer, "{line}")?;
                active.records_written += 1;
            }
        }
        if let Some(active) = self.active.as_mut() {
            active.writer.flush()?;
            active.writer.get_ref().sync_data()?;
        }

        debug!(records = count, "Flushed ledger");
        Ok(())
    }

    pub fn close(&mut self) -> PersistenceResult<()> {
        self.flush()?;
        self.close_active();
        Ok(())
    }
}

impl Drop for LedgerWriter {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(?e, "Failed to flush ledger on drop");
        }
        self.close_active();
    }
}

/// Read every record in the ledger directory, oldest file first. Lines that
/// fail to parse are skipped.
pub fn read_records(base_dir: &Path) -> PersistenceResult<Vec<LedgerRecord>> {
    let mut files: Vec<PathBuf> = fs::read_dir(base_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("ledger_") && n.ends_with(".jsonl"))
        })
        .collect();
    files.sort();

    let mut records = Vec::new();
    for path in files {
        let reader = BufReader::new(File::open(&path)?);
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerRecord>(&line) {
                Ok(r) => records.push(r),
                Err(e) => warn!(
                    file = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "Skipping unreadable ledger line"
                ),
            }
        }
    }
    Ok(records)
}

/// Rebuild a position for `symbol` from the fills in the ledger.
/// Duplicate execution ids are applied once.
pub fn replay_fills(base_dir: &Path, symbol: &str) -> PersistenceResult<Position> {
    let mut position = Position::flat(symbol);
    let mut seen = HashSet::new();
    for record in read_records(base_dir)? {
        if let LedgerEvent::Fill(fill) = record.event {
            if fill.symbol == symbol && seen.insert(fill.exec_id.clone()) {
                position.apply_fill(&fill);
            }
        }
    }
    info!(
        symbol,
        qty = %position.qty,
        realized = %position.realized_pnl,
        fills = position.fill_count,
        "Ledger replayed"
    );
    Ok(position)
}
