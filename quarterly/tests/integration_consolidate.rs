//! Integration tests for the condense and recondense passes.
//!
//! These tests run the consolidator against on-disk SQLite stores and
//! against a store wrapper that fails on demand, covering resumption after
//! partial runs.

use std::ops::Range;

use quarterly::error::StorageError;
use quarterly::sample::{AckMask, LogStatus, Quarter, RawSample, Reading};
use quarterly::store::{SampleStore, StoreResult};
use quarterly::{Consolidator, MemoryAudit, MemoryStore, QuarterlyError, SqliteStore};
use tempfile::tempdir;

/// Helper to build a sample with the given temperature and wind direction.
fn sample(timestamp: i64, temp_f: f64, wind_direction: f64) -> RawSample {
    RawSample {
        timestamp,
        reading: Reading {
            temp_f,
            wind_direction,
            humidity_pct: 50,
            pressure_inhg: 30.0,
            ..Reading::default()
        },
        ack_mask: AckMask::NONE,
    }
}

/// Delegates to a [`MemoryStore`] but refuses to write quarter `fail_at`.
struct FailingStore {
    inner: MemoryStore,
    fail_at: i64,
}

impl SampleStore for FailingStore {
    fn insert_sample(&mut self, sample: &RawSample) -> StoreResult<()> {
        self.inner.insert_sample(sample)
    }

    fn sample_range(&self) -> StoreResult<Option<(i64, i64)>> {
        self.inner.sample_range()
    }

    fn samples_between(&self, span: Range<i64>) -> StoreResult<Vec<RawSample>> {
        self.inner.samples_between(span)
    }

    fn quarter_range(&self) -> StoreResult<Option<(i64, i64)>> {
        self.inner.quarter_range()
    }

    fn quarter(&self, index: i64) -> StoreResult<Option<Quarter>> {
        self.inner.quarter(index)
    }

    fn quarters(&self) -> StoreResult<Vec<Quarter>> {
        self.inner.quarters()
    }

    fn replace_quarter(&mut self, quarter: &Quarter) -> StoreResult<()> {
        if quarter.index == self.fail_at {
            return Err(StorageError::Unavailable {
                reason: "disk full".to_string(),
            });
        }
        self.inner.replace_quarter(quarter)
    }

    fn set_ack_mask(&mut self, index: i64, mask: AckMask) -> StoreResult<()> {
        self.inner.set_ack_mask(index, mask)
    }

    fn set_log_status(&mut self, index: i64, status: LogStatus) -> StoreResult<()> {
        self.inner.set_log_status(index, status)
    }
}

#[test]
fn test_three_samples_make_one_quarter_on_disk() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("weather.db");

    {
        let mut store = SqliteStore::open(&path).unwrap();
        for (t, temp) in [(900, 70.0), (920, 71.0), (940, 72.0)] {
            store.insert_sample(&sample(t, temp, 90.0)).unwrap();
        }
        let mut audit = MemoryAudit::new();
        let report = Consolidator::new(&mut store, &mut audit)
            .condense_new()
            .unwrap();
        assert_eq!(report.created, 1);
    }

    let store = SqliteStore::open(&path).unwrap();
    let quarter = store.quarter(1).unwrap().unwrap();
    assert_eq!(quarter.reading.temp_f, 71.0);
    assert_eq!(quarter.sample_count, 3);
    assert_eq!(quarter.log_status, LogStatus::Unknown);
}

#[test]
fn test_wind_direction_is_last_in_scan_order() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    // Inserted out of order; the scan is by timestamp.
    store.insert_sample(&sample(950, 70.0, 270.0)).unwrap();
    store.insert_sample(&sample(900, 70.0, 90.0)).unwrap();
    store.insert_sample(&sample(1000, 70.0, 180.0)).unwrap();

    let mut audit = MemoryAudit::new();
    Consolidator::new(&mut store, &mut audit)
        .consolidate(1, None)
        .unwrap();

    assert_eq!(store.quarter(1).unwrap().unwrap().reading.wind_direction, 180.0);
}

#[test]
fn test_ack_mask_is_or_of_samples() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    for (t, bits) in [(900, 0x01), (920, 0x02), (940, 0x00)] {
        let mut s = sample(t, 70.0, 0.0);
        s.ack_mask = AckMask::from_bits(bits);
        store.insert_sample(&s).unwrap();
    }

    let mut audit = MemoryAudit::new();
    Consolidator::new(&mut store, &mut audit)
        .consolidate(1, None)
        .unwrap();

    assert_eq!(store.quarter(1).unwrap().unwrap().ack_mask.bits(), 0x03);
}

#[test]
fn test_storage_failure_keeps_earlier_quarters() {
    let mut inner = MemoryStore::new();
    for index in 1..=5 {
        inner.insert_sample(&sample(index * 900 + 5, 60.0, 0.0)).unwrap();
    }
    let mut store = FailingStore { inner, fail_at: 3 };
    let mut audit = MemoryAudit::new();

    let err = Consolidator::new(&mut store, &mut audit)
        .condense_new()
        .unwrap_err();

    assert!(matches!(
        err,
        QuarterlyError::Storage(StorageError::Unavailable { .. })
    ));
    assert!(store.quarter(1).unwrap().is_some());
    assert!(store.quarter(2).unwrap().is_some());
    assert!(store.quarter(3).unwrap().is_none());
    assert!(store.quarter(4).unwrap().is_none());
    assert!(audit.contains("quarter 3 db write error: store unavailable: disk full, aborting"));

    // The next run picks up where the failed one stopped.
    let mut store = store.inner;
    let report = Consolidator::new(&mut store, &mut audit)
        .condense_new()
        .unwrap();
    assert_eq!(report.created, 3);
    assert_eq!(store.quarters().unwrap().len(), 5);
}

#[test]
fn test_recondense_after_late_samples_on_disk() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("weather.db");
    let mut store = SqliteStore::open(&path).unwrap();
    let mut audit = MemoryAudit::new();

    store.insert_sample(&sample(900, 70.0, 0.0)).unwrap();
    store.insert_sample(&sample(1800, 70.0, 0.0)).unwrap();
    Consolidator::new(&mut store, &mut audit).condense_new().unwrap();

    // A late sample for quarter 1 arrives after it was condensed.
    store.insert_sample(&sample(1000, 80.0, 0.0)).unwrap();
    let report = Consolidator::new(&mut store, &mut audit)
        .recondense(13)
        .unwrap();

    assert_eq!(report.rewritten, 1);
    let quarter = store.quarter(1).unwrap().unwrap();
    assert_eq!(quarter.sample_count, 2);
    assert_eq!(quarter.reading.temp_f, 75.0);
    assert!(audit.contains("(was 1 records)"));

    // Running again changes nothing.
    let report = Consolidator::new(&mut store, &mut audit)
        .recondense(13)
        .unwrap();
    assert_eq!(report.rewritten, 0);
}
