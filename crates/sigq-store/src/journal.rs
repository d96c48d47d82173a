//! JSON Lines journal for queued signal mutations.
//!
//! Every store mutation is appended as one JSON object per line:
//! - Partial file corruption only affects individual lines
//! - The file can be replayed even if a write was interrupted
//! - Replaying all lines in order rebuilds the store contents

use crate::error::StoreResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sigq_core::{QueuedSignal, SignalId};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A single store mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalEntry {
    /// Signal inserted or replaced as a whole.
    Upsert { signal: QueuedSignal },
    /// Signal removed.
    Delete { id: SignalId },
}

/// Journal line: entry plus write timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub timestamp_ms: i64,
    #[serde(flatten)]
    pub entry: JournalEntry,
}

/// Append-only JSON Lines writer.
pub struct JsonLinesJournal {
    path: PathBuf,
    writer: BufWriter<File>,
    records_written: usize,
}

impl JsonLinesJournal {
    /// Open (or create) a journal file in append mode.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!(path = %path.display(), "Opening signal journal (append mode)");

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            records_written: 0,
        })
    }

    /// Append one entry and flush it to the OS.
    pub fn append(&mut self, entry: &JournalEntry) -> StoreResult<()> {
        let record = JournalRecord {
            timestamp_ms: Utc::now().timestamp_millis(),
            entry: entry.clone(),
        };
        let line = serde_json::to_string(&record)?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        self.records_written += 1;
        Ok(())
    }

    /// Number of records appended through this handle.
    pub fn records_written(&self) -> usize {
        self.records_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every decodable entry from a journal file, in order.
    ///
    /// A missing file yields no entries. Corrupt lines are skipped.
    pub fn read_entries(path: impl AsRef<Path>) -> StoreResult<Vec<JournalEntry>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(path)?);
        let mut entries = Vec::new();
        let mut skipped = 0usize;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalRecord>(&line) {
                Ok(record) => entries.push(record.entry),
                Err(e) => {
                    skipped += 1;
                    warn!(line = line_no + 1, error = %e, "Skipping corrupt journal line");
                }
            }
        }

        debug!(
            path = %path.display(),
            entries = entries.len(),
            skipped,
            "Read signal journal"
        );

        Ok(entries)
    }
}

impl Drop for JsonLinesJournal {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(?e, "Failed to flush signal journal on close");
        }
    }
}
