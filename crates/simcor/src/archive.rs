// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transaction archive.
//!
//! Archiving is best-effort: a failed write is logged and never reaches the
//! state machine.

use crate::transaction::TransactionRecord;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Sink for finished transactions.
pub trait Archive: Send + Sync {
    /// Whether the engine should bother calling [`Archive::log_transaction`].
    fn is_archiving_enabled(&self) -> bool;

    /// Fire-and-forget record of a finished transaction.
    fn log_transaction(&self, record: TransactionRecord);
}

/// Archiving disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoArchive;

impl Archive for NoArchive {
    fn is_archiving_enabled(&self) -> bool {
        false
    }

    fn log_transaction(&self, _record: TransactionRecord) {}
}

/// Appends one JSON document per transaction to a file.
pub struct JsonLinesArchive {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesArchive {
    /// Open (or create) `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Archive for JsonLinesArchive {
    fn is_archiving_enabled(&self) -> bool {
        true
    }

    fn log_transaction(&self, record: TransactionRecord) {
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!("Archive: cannot serialize {}: {}", record.core().identity, e);
                return;
            }
        };

        let mut writer = self.writer.lock();
        let written = writeln!(writer, "{}", line).and_then(|()| writer.flush());
        if let Err(e) = written {
            warn!("Archive: write to {} failed: {}", self.path.display(), e);
        }
    }
}
