//! # quarterly
//!
//! Quarter-hour consolidation, device log backfill and publish
//! reconciliation for weather station samples.
//!
//! A poller writes raw samples into a store at irregular intervals.
//! quarterly turns them into one summary per 900-second window, fills
//! windows the poller missed from the device's own circular log, and makes
//! sure every window with data is delivered to each configured reporting
//! destination exactly once.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Idempotent runs: every pass can be repeated and resumes from the store
//! - Atomic quarter writes: a failed run never leaves a half-written quarter
//! - Monotone consolidation: a quarter is only rebuilt from more samples
//! - Per-destination acknowledgment bits, persisted as soon as confirmed
//! - Single-threaded and synchronous, no background work
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quarterly::{Consolidator, MemoryAudit, SqliteStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = SqliteStore::open("weather.db")?;
//! let mut audit = MemoryAudit::new();
//!
//! let mut consolidator = Consolidator::new(&mut store, &mut audit);
//! let created = consolidator.condense_new()?;
//! let rebuilt = consolidator.recondense(13)?;
//! println!("{} new quarters, {} rebuilt", created.created, rebuilt.rewritten);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`SampleStore`]: Raw samples and quarters; [`SqliteStore`] and [`MemoryStore`]
//! - [`Consolidator`]: Folds samples into quarters with the [`reduce`] rules
//! - [`LogLocator`]: Binary search over a [`RemoteLog`] with a per-run cache
//! - [`Backfill`]: Recovers empty quarters through the locator
//! - [`Reconciler`]: Delivers quarters through a [`Transport`] and tracks acknowledgments
//! - [`AuditSink`]: Receives one line per decision
//!
//! ## Modules
//!
//! - [`quarter`]: Quarter index arithmetic
//! - [`sample`]: Reading, sample and quarter records
//! - [`reduce`]: Per-field reducers
//! - [`store`]: Store trait and in-memory backend
//! - [`sqlite`]: SQLite backend
//! - [`consolidate`]: Condense and recondense passes
//! - [`remote_log`]: Device log access and search
//! - [`backfill`]: Device log recovery pass
//! - [`publish`]: Destinations, payloads and reconciliation
//! - [`summary`]: Store overview
//! - [`audit`]: Audit sinks
//! - [`config`]: Engine configuration
//! - [`error`]: Error types

pub mod audit;
pub mod backfill;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod publish;
pub mod quarter;
pub mod reduce;
pub mod remote_log;
pub mod sample;
pub mod sqlite;
pub mod store;
pub mod summary;

// Re-export primary API types at crate root for convenience.
pub use audit::{AuditSink, MemoryAudit, PermanentLog};
pub use backfill::{Backfill, BackfillMode, BackfillReport};
pub use config::EngineConfig;
pub use consolidate::{CondenseReport, Consolidator, RecondenseReport};
pub use error::{QuarterlyError, Result};
pub use publish::{Destination, HttpTransport, ReconcileReport, Reconciler, Transport};
pub use remote_log::{HttpRemoteLog, LogCursor, LogLocator, LogRecord, RemoteLog};
pub use sample::{AckMask, LogStatus, Quarter, RawSample, Reading};
pub use sqlite::SqliteStore;
pub use store::{MemoryStore, SampleStore};
pub use summary::Summary;
