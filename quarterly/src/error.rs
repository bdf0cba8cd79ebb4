//! Error types for the quarterly consolidation engine.
//!
//! The variants follow the engine's failure taxonomy: storage errors abort a
//! run, remote-log errors are scoped to a single quarter, and publish errors
//! only affect one destination for one cycle.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all quarterly operations.
#[derive(Error, Debug)]
pub enum QuarterlyError {
    /// Error reading from or writing to the sample store.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Error talking to the remote device log.
    #[error("remote log error: {0}")]
    RemoteLog(#[from] RemoteLogError),

    /// Error delivering a quarter to a destination.
    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    /// Error loading or validating configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by a [`SampleStore`](crate::store::SampleStore).
///
/// Always fatal for the current run: each quarter write is atomic, so the
/// store is left consistent and the next run resumes where this one stopped.
#[derive(Error, Debug)]
pub enum StorageError {
    /// An SQLite statement failed.
    #[error("sqlite {operation} failed: {source}")]
    Sqlite {
        /// The operation that was being performed.
        operation: &'static str,
        /// The underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },

    /// A stored row could not be mapped back to a typed record.
    #[error("corrupt {table} row {key}: {reason}")]
    CorruptRow {
        /// The table holding the row.
        table: &'static str,
        /// The row key.
        key: i64,
        /// Description of what was invalid.
        reason: String,
    },

    /// The store cannot serve the request.
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// Why the store is unavailable.
        reason: String,
    },
}

/// Errors raised while querying the remote device log.
///
/// These are distinct from "record not found": a transport failure leaves
/// the quarter unresolved so a later run can retry it.
#[derive(Error, Debug)]
pub enum RemoteLogError {
    /// Failed to create the HTTP client.
    #[error("failed to create HTTP client: {source}")]
    ClientCreate {
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// The HTTP request could not be completed.
    #[error("request to {url} failed: {source}")]
    Request {
        /// The requested URL.
        url: String,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// The device answered with a non-success status.
    #[error("{url} returned status {status}")]
    HttpStatus {
        /// The requested URL.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The device answer could not be decoded into a log record.
    #[error("failed to decode log record{}: {reason}", slot.map(|s| format!(" at slot {s}")).unwrap_or_default())]
    Decode {
        /// The physical slot being decoded, if the answer was a log entry.
        slot: Option<u64>,
        /// Description of the decode failure.
        reason: String,
    },
}

/// Errors raised by a [`Transport`](crate::publish::Transport) while
/// delivering to a destination.
#[derive(Error, Debug)]
pub enum PublishError {
    /// Failed to create the HTTP client.
    #[error("failed to create HTTP client: {source}")]
    ClientCreate {
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// The delivery request could not be completed.
    #[error("delivery to {code} failed: {source}")]
    Request {
        /// The destination code.
        code: String,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// The destination could not be reached for a reason other than HTTP.
    #[error("delivery to {code} failed: {reason}")]
    Unreachable {
        /// The destination code.
        code: String,
        /// Description of the failure.
        reason: String,
    },
}

/// Errors that can occur while loading an [`EngineConfig`](crate::config::EngineConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for the expected shape.
    #[error("failed to parse config '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The config parsed but its values are inconsistent.
    #[error("invalid config: {reason}")]
    Invalid {
        /// Description of what is invalid.
        reason: String,
    },
}

/// Type alias for `Result<T, QuarterlyError>`.
pub type Result<T> = std::result::Result<T, QuarterlyError>;
