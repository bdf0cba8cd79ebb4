//! Recovery of empty quarters from the device log.
//!
//! A quarter with no samples may still have been logged by the device
//! while the poller was down. The backfill pass searches the device log for
//! each such quarter's centre and either writes the found entry into the
//! quarter or marks the quarter as missing so it is not searched again.
//!
//! Remote failures only affect the quarter being searched: it keeps an
//! unknown status and is retried on the next run. Storage failures abort
//! the pass.

use crate::audit::{AuditSink, record_abort};
use crate::error::Result;
use crate::quarter::quarter_center;
use crate::remote_log::{LogLocator, RemoteLog};
use crate::sample::{AckMask, LogStatus, Quarter};
use crate::store::{SampleStore, StoreResult};

/// Default sample count below which diagnostic mode searches a quarter.
pub const DEFAULT_DIAGNOSTIC_BELOW: u32 = 14;

/// Which quarters a backfill pass searches, and whether it writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackfillMode {
    /// Search empty quarters whose log status is unknown and record the
    /// outcome.
    #[default]
    Normal,
    /// Search every quarter with fewer than `below` samples and only report
    /// what the log holds.
    Diagnostic {
        /// Sample count threshold.
        below: u32,
    },
}

impl BackfillMode {
    /// Returns true if the pass must not write.
    pub fn is_diagnostic(self) -> bool {
        matches!(self, Self::Diagnostic { .. })
    }
}

/// Outcome of a [`Backfill::run`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Quarters searched.
    pub candidates: usize,
    /// Quarters for which a log entry was found.
    pub recovered: usize,
    /// Quarters the log holds no entry for.
    pub missing: usize,
    /// Quarters whose search failed; left for the next run.
    pub failed: usize,
    /// Log entries examined, cache hits included.
    pub probes: u64,
}

/// Drives a [`LogLocator`] over the quarters missing data.
pub struct Backfill<'a, L> {
    store: &'a mut dyn SampleStore,
    audit: &'a mut dyn AuditSink,
    locator: &'a mut LogLocator<L>,
    mode: BackfillMode,
}

impl<'a, L: RemoteLog> Backfill<'a, L> {
    /// Creates a normal-mode pass.
    pub fn new(
        store: &'a mut dyn SampleStore,
        audit: &'a mut dyn AuditSink,
        locator: &'a mut LogLocator<L>,
    ) -> Self {
        Self {
            store,
            audit,
            locator,
            mode: BackfillMode::Normal,
        }
    }

    /// Sets the pass mode.
    #[must_use]
    pub fn with_mode(mut self, mode: BackfillMode) -> Self {
        self.mode = mode;
        self
    }

    /// Searches the device log for every candidate quarter.
    ///
    /// # Errors
    ///
    /// Returns a storage error if reading candidates or writing an outcome
    /// fails; the abort is audited first. Remote log errors are audited and
    /// counted instead.
    pub fn run(&mut self) -> Result<BackfillReport> {
        let mut report = BackfillReport::default();
        let probes_before = self.locator.probes();

        self.audit.record("query missing data from device log");
        let candidates = match self.candidates() {
            Ok(candidates) => candidates,
            Err(e) => return Err(record_abort(self.audit, "  db read error", e)),
        };
        if candidates.is_empty() {
            self.audit.record("  no new quarters are missing data");
            return Ok(report);
        }

        for quarter in candidates {
            report.candidates += 1;
            let index = quarter.index;
            let target = quarter_center(index);
            self.audit
                .record(&format!("  seeking data for quarter {index} (epoch {target})"));

            match self.locator.locate(target) {
                Ok(Some(found)) => {
                    report.recovered += 1;
                    if self.mode.is_diagnostic() {
                        self.audit.record(&format!(
                            "    quarter {index} found in device log slot {} ({} samples stored)",
                            found.slot, quarter.sample_count
                        ));
                        continue;
                    }
                    let recovered = Quarter {
                        index,
                        reading: found.record.to_reading(),
                        sample_count: 1,
                        log_status: LogStatus::Recovered,
                        ack_mask: AckMask::NONE,
                    };
                    if let Err(e) = self.store.replace_quarter(&recovered) {
                        let context = format!("    quarter {index} db write error");
                        return Err(record_abort(self.audit, &context, e));
                    }
                    self.audit
                        .record(&format!("    quarter {index} data pulled from device log"));
                }
                Ok(None) => {
                    report.missing += 1;
                    if !self.mode.is_diagnostic()
                        && let Err(e) = self.store.set_log_status(index, LogStatus::Missing)
                    {
                        let context = format!("    quarter {index} db write error");
                        return Err(record_abort(self.audit, &context, e));
                    }
                    self.audit
                        .record(&format!("    quarter {index} data not found in device log"));
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(quarter = index, error = %e, "device log search failed");
                    self.audit
                        .record(&format!("    quarter {index} error querying device log: {e}"));
                }
            }
        }

        report.probes = self.locator.probes() - probes_before;
        Ok(report)
    }

    fn candidates(&self) -> StoreResult<Vec<Quarter>> {
        let quarters = match self.mode {
            BackfillMode::Normal => self
                .store
                .quarters()?
                .into_iter()
                .filter(|q| !q.has_data() && q.log_status == LogStatus::Unknown)
                .collect(),
            BackfillMode::Diagnostic { below } => self.store.quarters_below(below)?,
        };
        Ok(quarters)
    }
}
