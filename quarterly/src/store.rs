//! Sample store abstraction.
//!
//! The engine reads raw samples and reads and writes quarters through the
//! [`SampleStore`] trait. Two backends ship with the crate:
//!
//! - [`SqliteStore`](crate::sqlite::SqliteStore): persistent, used by the CLI
//! - [`MemoryStore`]: in-process, for tests and embedding
//!
//! # Contract
//!
//! - `samples_between` returns samples in ascending timestamp order.
//! - `replace_quarter` is atomic: readers see either the old row or the new
//!   one, never neither.
//! - Any error is a [`StorageError`] and is treated as fatal by callers.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::StorageError;
use crate::sample::{AckMask, LogStatus, Quarter, RawSample};

/// Result type used at the store boundary.
pub type StoreResult<T> = std::result::Result<T, StorageError>;

/// Keyed storage for raw samples and quarter summaries.
pub trait SampleStore {
    /// Inserts a raw sample. Replaces an existing sample with the same
    /// timestamp.
    fn insert_sample(&mut self, sample: &RawSample) -> StoreResult<()>;

    /// Returns the oldest and newest sample timestamps, or `None` if the
    /// store holds no samples.
    fn sample_range(&self) -> StoreResult<Option<(i64, i64)>>;

    /// Returns the samples with `span.start <= timestamp < span.end`, in
    /// timestamp order.
    fn samples_between(&self, span: Range<i64>) -> StoreResult<Vec<RawSample>>;

    /// Returns the lowest and highest quarter index, or `None` if no quarter
    /// has been written yet.
    fn quarter_range(&self) -> StoreResult<Option<(i64, i64)>>;

    /// Looks up one quarter.
    fn quarter(&self, index: i64) -> StoreResult<Option<Quarter>>;

    /// Returns every quarter in index order.
    fn quarters(&self) -> StoreResult<Vec<Quarter>>;

    /// Atomically replaces (or creates) the quarter at `quarter.index`.
    fn replace_quarter(&mut self, quarter: &Quarter) -> StoreResult<()>;

    /// Overwrites the acknowledgment mask of an existing quarter.
    fn set_ack_mask(&mut self, index: i64, mask: AckMask) -> StoreResult<()>;

    /// Overwrites the log status of an existing quarter.
    fn set_log_status(&mut self, index: i64, status: LogStatus) -> StoreResult<()>;

    /// Returns quarters holding data that `full` is not yet a subset of.
    fn unacknowledged_quarters(&self, full: AckMask) -> StoreResult<Vec<Quarter>> {
        Ok(self
            .quarters()?
            .into_iter()
            .filter(|q| q.has_data() && !q.ack_mask.is_complete(full))
            .collect())
    }

    /// Counts quarters holding data that every destination in `full` has
    /// acknowledged.
    fn acknowledged_count(&self, full: AckMask) -> StoreResult<usize> {
        Ok(self
            .quarters()?
            .iter()
            .filter(|q| q.has_data() && q.ack_mask.is_complete(full))
            .count())
    }

    /// Returns quarters with fewer than `count` samples, in index order.
    fn quarters_below(&self, count: u32) -> StoreResult<Vec<Quarter>> {
        Ok(self
            .quarters()?
            .into_iter()
            .filter(|q| q.sample_count < count)
            .collect())
    }
}

/// An in-memory [`SampleStore`] backed by ordered maps.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    samples: BTreeMap<i64, RawSample>,
    quarters: BTreeMap<i64, Quarter>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of raw samples held.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    fn quarter_mut(&mut self, index: i64) -> StoreResult<&mut Quarter> {
        self.quarters
            .get_mut(&index)
            .ok_or_else(|| StorageError::Unavailable {
                reason: format!("quarter {index} does not exist"),
            })
    }
}

impl SampleStore for MemoryStore {
    fn insert_sample(&mut self, sample: &RawSample) -> StoreResult<()> {
        self.samples.insert(sample.timestamp, *sample);
        Ok(())
    }

    fn sample_range(&self) -> StoreResult<Option<(i64, i64)>> {
        let first = self.samples.keys().next().copied();
        let last = self.samples.keys().next_back().copied();
        Ok(first.zip(last))
    }

    fn samples_between(&self, span: Range<i64>) -> StoreResult<Vec<RawSample>> {
        if span.start >= span.end {
            return Ok(Vec::new());
        }
        Ok(self.samples.range(span).map(|(_, s)| *s).collect())
    }

    fn quarter_range(&self) -> StoreResult<Option<(i64, i64)>> {
        let first = self.quarters.keys().next().copied();
        let last = self.quarters.keys().next_back().copied();
        Ok(first.zip(last))
    }

    fn quarter(&self, index: i64) -> StoreResult<Option<Quarter>> {
        Ok(self.quarters.get(&index).copied())
    }

    fn quarters(&self) -> StoreResult<Vec<Quarter>> {
        Ok(self.quarters.values().copied().collect())
    }

    fn replace_quarter(&mut self, quarter: &Quarter) -> StoreResult<()> {
        self.quarters.insert(quarter.index, *quarter);
        Ok(())
    }

    fn set_ack_mask(&mut self, index: i64, mask: AckMask) -> StoreResult<()> {
        self.quarter_mut(index)?.ack_mask = mask;
        Ok(())
    }

    fn set_log_status(&mut self, index: i64, status: LogStatus) -> StoreResult<()> {
        self.quarter_mut(index)?.log_status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Reading;

    fn sample(timestamp: i64) -> RawSample {
        RawSample {
            timestamp,
            reading: Reading::default(),
            ack_mask: AckMask::NONE,
        }
    }

    #[test]
    fn test_memory_sample_range_and_scan() {
        let mut store = MemoryStore::new();
        assert_eq!(store.sample_range().unwrap(), None);

        for t in [940, 900, 1800, 920] {
            store.insert_sample(&sample(t)).unwrap();
        }

        assert_eq!(store.sample_range().unwrap(), Some((900, 1800)));

        let scanned: Vec<_> = store
            .samples_between(900..1800)
            .unwrap()
            .iter()
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(scanned, vec![900, 920, 940]);
        assert!(store.samples_between(1800..900).unwrap().is_empty());
    }

    #[test]
    fn test_memory_point_updates_require_existing_quarter() {
        let mut store = MemoryStore::new();
        assert!(store.set_ack_mask(3, AckMask::bit(0)).is_err());

        store.replace_quarter(&Quarter::empty(3)).unwrap();
        store.set_ack_mask(3, AckMask::bit(0)).unwrap();
        store.set_log_status(3, LogStatus::Missing).unwrap();

        let quarter = store.quarter(3).unwrap().unwrap();
        assert_eq!(quarter.ack_mask, AckMask::bit(0));
        assert_eq!(quarter.log_status, LogStatus::Missing);
    }

    #[test]
    fn test_default_filters() {
        let mut store = MemoryStore::new();
        let full = AckMask::bit(0) | AckMask::bit(1);

        let mut complete = Quarter::empty(1);
        complete.sample_count = 5;
        complete.ack_mask = full;
        let mut partial = Quarter::empty(2);
        partial.sample_count = 1;
        partial.ack_mask = AckMask::bit(1);
        let empty = Quarter::empty(3);

        for q in [complete, partial, empty] {
            store.replace_quarter(&q).unwrap();
        }

        let pending: Vec<_> = store
            .unacknowledged_quarters(full)
            .unwrap()
            .iter()
            .map(|q| q.index)
            .collect();
        assert_eq!(pending, vec![2]);
        assert_eq!(store.acknowledged_count(full).unwrap(), 1);

        let thin: Vec<_> = store.quarters_below(2).unwrap().iter().map(|q| q.index).collect();
        assert_eq!(thin, vec![2, 3]);
    }
}
