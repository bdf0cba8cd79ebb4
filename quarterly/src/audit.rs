//! Append-only audit trail.
//!
//! Every consolidation, location and reconciliation decision is written as
//! one human-readable line. The engine only needs [`AuditSink::record`];
//! where the lines end up is the sink's business.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{QuarterlyError, StorageError};

/// Local timestamp format used in the permanent log.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Receiver for audit lines.
pub trait AuditSink {
    /// Records one line. Sinks must not fail the caller; I/O problems are
    /// reported through `tracing` instead.
    fn record(&mut self, line: &str);
}

/// Records a storage failure that ends the current pass and returns it as
/// the pass error.
pub(crate) fn record_abort(
    audit: &mut dyn AuditSink,
    context: &str,
    e: StorageError,
) -> QuarterlyError {
    tracing::error!(error = %e, "{}, aborting", context.trim());
    audit.record(&format!("{context}: {e}, aborting"));
    e.into()
}

/// Appends `<local time> <program> <text>` lines to a file and mirrors each
/// line to `tracing` at info level.
pub struct PermanentLog {
    program: String,
    path: Option<PathBuf>,
    file: Option<File>,
}

impl PermanentLog {
    /// Opens `path` for appending, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, program: impl Into<String>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            program: program.into(),
            path: Some(path),
            file: Some(file),
        })
    }

    /// A log that only mirrors lines to `tracing`.
    pub fn tracing_only(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            path: None,
            file: None,
        }
    }

    /// Syncs written lines to disk.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from the underlying file.
    pub fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.sync_data(),
            None => Ok(()),
        }
    }
}

impl AuditSink for PermanentLog {
    fn record(&mut self, line: &str) {
        let text = line.trim();
        tracing::info!(target: "quarterly::audit", "{text}");

        let Some(file) = self.file.as_mut() else {
            return;
        };

        let now = chrono::Local::now().format(TIME_FORMAT);
        let entry = format!("{now} {} {text}\n", self.program);
        if let Err(e) = file.write_all(entry.as_bytes()) {
            let path = self.path.as_deref().map(Path::display);
            tracing::warn!("audit write to {path:?} failed: {e}");
        }
    }
}

/// Keeps audit lines in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryAudit {
    /// Recorded lines, oldest first.
    pub lines: Vec<String>,
}

impl MemoryAudit {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if any recorded line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }
}

impl AuditSink for MemoryAudit {
    fn record(&mut self, line: &str) {
        self.lines.push(line.trim().to_string());
    }
}
