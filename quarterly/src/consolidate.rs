//! Consolidation of raw samples into quarter summaries.
//!
//! # Design
//!
//! The consolidator:
//! - scans the raw samples of one quarter
//! - folds them with the field reducers
//! - atomically replaces the quarter row
//!
//! A quarter is only rewritten when the scan found strictly more samples
//! than the summary it would replace was built from. A partial re-scan can
//! therefore never regress a richer quarter.
//!
//! # Passes
//!
//! ```text
//! samples ─► condense_new ─► quarters (every index, contiguous)
//!                             │
//!                             └─► recondense(below) ─► thin quarters rebuilt
//! ```
//!
//! Storage errors abort a pass. Quarters written before the failure stay
//! intact and the next run resumes from them.

use chrono::TimeZone;

use crate::audit::{AuditSink, TIME_FORMAT, record_abort};
use crate::error::Result;
use crate::quarter::{quarter_index, quarter_span, quarter_start};
use crate::reduce::reduce_samples;
use crate::sample::{LogStatus, Quarter};
use crate::store::SampleStore;

/// Default sample count below which `recondense` revisits a quarter.
pub const DEFAULT_RECONDENSE_BELOW: u32 = 13;

/// Outcome of a [`Consolidator::condense_new`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CondenseReport {
    /// Quarter indices written by this pass.
    pub created: usize,
    /// Of those, quarters that received at least one sample.
    pub with_data: usize,
}

/// Outcome of a [`Consolidator::recondense`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecondenseReport {
    /// Quarters rewritten from a richer sample set.
    pub rewritten: usize,
    /// Quarters left as they were.
    pub unchanged: usize,
}

/// Builds quarter summaries from the raw samples in a [`SampleStore`].
pub struct Consolidator<'a> {
    store: &'a mut dyn SampleStore,
    audit: &'a mut dyn AuditSink,
}

impl<'a> Consolidator<'a> {
    /// Creates a consolidator over `store`, recording decisions to `audit`.
    pub fn new(store: &'a mut dyn SampleStore, audit: &'a mut dyn AuditSink) -> Self {
        Self { store, audit }
    }

    /// Consolidates quarter `index`.
    ///
    /// With `overwrite_above = None` the quarter is always written, even if
    /// no samples fall in it. With `Some(n)` it is written only when more
    /// than `n` samples are found. The new quarter starts with an unknown
    /// log status and the OR of the samples' acknowledgment masks.
    ///
    /// Returns whether the quarter was written.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the scan or the write fails. Nothing is
    /// written for `index` in that case.
    pub fn consolidate(&mut self, index: i64, overwrite_above: Option<u32>) -> Result<bool> {
        let samples = match self.store.samples_between(quarter_span(index)) {
            Ok(samples) => samples,
            Err(e) => {
                let context = format!("  quarter {index} db read error");
                return Err(record_abort(self.audit, &context, e));
            }
        };
        let reduction = reduce_samples(&samples);

        if let Some(previous) = overwrite_above
            && reduction.sample_count <= previous
        {
            return Ok(false);
        }

        let quarter = Quarter {
            index,
            reading: reduction.reading,
            sample_count: reduction.sample_count,
            log_status: LogStatus::Unknown,
            ack_mask: reduction.ack_mask,
        };
        if let Err(e) = self.store.replace_quarter(&quarter) {
            let context = format!("  quarter {index} db write error");
            return Err(record_abort(self.audit, &context, e));
        }

        let when = local_time(quarter_start(index));
        match overwrite_above {
            Some(previous) => self.audit.record(&format!(
                "  recondense quarter {index} ({when}) from {} sample records (was {previous} records)",
                reduction.sample_count
            )),
            None => self.audit.record(&format!(
                "  condense quarter {index} ({when}) from {} sample records",
                reduction.sample_count
            )),
        }

        Ok(true)
    }

    /// Creates every quarter covered by the raw samples that does not exist
    /// yet.
    ///
    /// The target range is the union of the existing quarter range and the
    /// quarters spanned by the samples, so the quarter table stays free of
    /// gaps even when sampling resumes after an outage.
    ///
    /// # Errors
    ///
    /// Returns the first storage error; quarters created before it remain.
    pub fn condense_new(&mut self) -> Result<CondenseReport> {
        let mut report = CondenseReport::default();

        let Some((first_sample, last_sample)) = self.store.sample_range()? else {
            self.audit.record("  no samples to condense");
            return Ok(report);
        };

        let existing = self.store.quarter_range()?;
        let mut first = quarter_index(first_sample);
        let mut last = quarter_index(last_sample);
        if let Some((q_min, q_max)) = existing {
            first = first.min(q_min);
            last = last.max(q_max);
        }

        for index in first..=last {
            if existing.is_some_and(|(q_min, q_max)| (q_min..=q_max).contains(&index)) {
                continue;
            }
            self.consolidate(index, None)?;
            report.created += 1;
            if self.store.quarter(index)?.is_some_and(|q| q.has_data()) {
                report.with_data += 1;
            }
        }

        if report.created > 0 {
            self.audit
                .record(&format!("  condensed {} new quarters", report.created));
        } else {
            self.audit.record("  no new quarters to condense");
        }

        Ok(report)
    }

    /// Rebuilds every quarter with fewer than `below` samples if more
    /// samples are now available for it.
    ///
    /// # Errors
    ///
    /// Returns the first storage error; quarters rewritten before it remain.
    pub fn recondense(&mut self, below: u32) -> Result<RecondenseReport> {
        let mut report = RecondenseReport::default();
        let total = self.store.quarter_range()?.map_or(0, |(lo, hi)| hi - lo + 1);

        for quarter in self.store.quarters_below(below)? {
            if self.consolidate(quarter.index, Some(quarter.sample_count))? {
                report.rewritten += 1;
            }
        }

        let total = usize::try_from(total).unwrap_or(usize::MAX);
        report.unchanged = total.saturating_sub(report.rewritten);
        self.audit.record(&format!(
            "  recondensed {} quarters, {} quarters unchanged",
            report.rewritten, report.unchanged
        ));

        Ok(report)
    }
}

/// Formats a Unix timestamp in local time for audit lines.
pub(crate) fn local_time(timestamp: i64) -> String {
    chrono::Local
        .timestamp_opt(timestamp, 0)
        .single()
        .map_or_else(|| timestamp.to_string(), |t| t.format(TIME_FORMAT).to_string())
}
