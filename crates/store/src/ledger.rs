//! Append-only JSONL trade log.

use anyhow::{Context, Result};
use keeper_core::LedgerRecord;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One JSON object per line, append-only. Rows are never rewritten; the
/// file is the audit trail of everything the keeper did.
#[derive(Debug, Clone)]
pub struct TradeLedger {
    path: PathBuf,
}

impl TradeLedger {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a single line.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or written.
    pub fn append(&self, record: &LedgerRecord) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).with_context(|| {
                    format!("Failed to create ledger directory {}", dir.display())
                })?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open trade ledger {}", self.path.display()))?;
        let mut line =
            serde_json::to_string(record).context("Failed to serialize ledger record")?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to append to trade ledger {}", self.path.display()))?;
        Ok(())
    }

    /// Reads every record, oldest first. A missing file is an empty ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a line fails to parse.
    pub fn read_all(&self) -> Result<Vec<LedgerRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read trade ledger {}", self.path.display()))?;
        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).with_context(|| {
                    format!("Bad ledger row at {}:{}", self.path.display(), idx + 1)
                })
            })
            .collect()
    }

    /// Reads the most recent `limit` records, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates `read_all` failures.
    pub fn read_tail(&self, limit: usize) -> Result<Vec<LedgerRecord>> {
        let mut rows = self.read_all()?;
        if rows.len() > limit {
            rows.drain(..rows.len() - limit);
        }
        Ok(rows)
    }
}
