//! SQLite sample store.
//!
//! Persistent [`SampleStore`] backend. Every statement is parameterized.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE sample (
//!     id             INTEGER PRIMARY KEY,  -- Unix seconds
//!     boot_count     INTEGER NOT NULL,
//!     ...                                  -- one column per Reading field
//!     ack_mask       INTEGER NOT NULL
//! );
//! CREATE TABLE quarter (
//!     id             INTEGER PRIMARY KEY,  -- floor(timestamp / 900)
//!     ...                                  -- one column per Reading field
//!     ack_mask       INTEGER NOT NULL,
//!     log_mask       INTEGER NOT NULL,     -- 0 unknown, 1 recovered, 2 missing
//!     sample_count   INTEGER NOT NULL
//! );
//! ```

use std::ops::Range;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::StorageError;
use crate::sample::{AckMask, LogStatus, Quarter, RawSample, Reading};
use crate::store::{SampleStore, StoreResult};

const READING_COLUMNS: &str = "boot_count, uptime_minutes, temp_f, dewpoint_f, humidity_pct, \
     pressure_inhg, wind_mph, wind_direction, rain_in, rain_day_in, \
     alert_status, alert_queries, alert_replies, log_next, log_full";

const READING_DDL: &str = "boot_count     INTEGER NOT NULL,
    uptime_minutes INTEGER NOT NULL,
    temp_f         REAL    NOT NULL,
    dewpoint_f     REAL    NOT NULL,
    humidity_pct   INTEGER NOT NULL,
    pressure_inhg  REAL    NOT NULL,
    wind_mph       INTEGER NOT NULL,
    wind_direction REAL    NOT NULL,
    rain_in        REAL    NOT NULL,
    rain_day_in    REAL    NOT NULL,
    alert_status   INTEGER NOT NULL,
    alert_queries  INTEGER NOT NULL,
    alert_replies  INTEGER NOT NULL,
    log_next       INTEGER NOT NULL,
    log_full       INTEGER NOT NULL";

/// Maps a rusqlite error into a [`StorageError`] tagged with the operation.
fn sql_err(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> StorageError {
    move |source| StorageError::Sqlite { operation, source }
}

/// Quarter row before the log mask has been validated.
struct QuarterRow {
    index: i64,
    reading: Reading,
    ack_mask: u8,
    log_mask: i64,
    sample_count: u32,
}

impl QuarterRow {
    fn into_quarter(self) -> StoreResult<Quarter> {
        let log_status =
            LogStatus::from_mask(self.log_mask).ok_or_else(|| StorageError::CorruptRow {
                table: "quarter",
                key: self.index,
                reason: format!("unknown log_mask {}", self.log_mask),
            })?;
        Ok(Quarter {
            index: self.index,
            reading: self.reading,
            sample_count: self.sample_count,
            log_status,
            ack_mask: AckMask::from_bits(self.ack_mask),
        })
    }
}

/// SQLite-backed [`SampleStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) a database file and ensures the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Sqlite`] if the file cannot be opened or the
    /// schema cannot be created.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(sql_err("open"))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Creates an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Sqlite`] if the schema cannot be created.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(sql_err("open"))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS sample (
                    id INTEGER PRIMARY KEY,
                    {READING_DDL},
                    ack_mask INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS quarter (
                    id INTEGER PRIMARY KEY,
                    {READING_DDL},
                    ack_mask INTEGER NOT NULL,
                    log_mask INTEGER NOT NULL,
                    sample_count INTEGER NOT NULL
                );"
            ))
            .map_err(sql_err("init schema"))
    }

    /// Reads the 15 reading columns starting at column `offset`.
    fn row_to_reading(row: &Row<'_>, offset: usize) -> rusqlite::Result<Reading> {
        Ok(Reading {
            boot_count: row.get(offset)?,
            uptime_minutes: row.get(offset + 1)?,
            temp_f: row.get(offset + 2)?,
            dewpoint_f: row.get(offset + 3)?,
            humidity_pct: row.get(offset + 4)?,
            pressure_inhg: row.get(offset + 5)?,
            wind_mph: row.get(offset + 6)?,
            wind_direction: row.get(offset + 7)?,
            rain_in: row.get(offset + 8)?,
            rain_day_in: row.get(offset + 9)?,
            alert_status: row.get(offset + 10)?,
            alert_queries: row.get(offset + 11)?,
            alert_replies: row.get(offset + 12)?,
            log_next: row.get(offset + 13)?,
            log_full: row.get(offset + 14)?,
        })
    }

    fn row_to_sample(row: &Row<'_>) -> rusqlite::Result<RawSample> {
        Ok(RawSample {
            timestamp: row.get(0)?,
            reading: Self::row_to_reading(row, 1)?,
            ack_mask: AckMask::from_bits(row.get(16)?),
        })
    }

    fn row_to_quarter(row: &Row<'_>) -> rusqlite::Result<QuarterRow> {
        Ok(QuarterRow {
            index: row.get(0)?,
            reading: Self::row_to_reading(row, 1)?,
            ack_mask: row.get(16)?,
            log_mask: row.get(17)?,
            sample_count: row.get(18)?,
        })
    }

    fn select_quarters(&self, clause: &str, args: &[&dyn rusqlite::ToSql]) -> StoreResult<Vec<Quarter>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT id, {READING_COLUMNS}, ack_mask, log_mask, sample_count
                 FROM quarter {clause} ORDER BY id ASC"
            ))
            .map_err(sql_err("prepare quarter scan"))?;

        let rows = stmt
            .query_map(args, Self::row_to_quarter)
            .map_err(sql_err("scan quarters"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err("scan quarters"))?;

        rows.into_iter().map(QuarterRow::into_quarter).collect()
    }

    fn min_max(&self, table: &'static str) -> StoreResult<Option<(i64, i64)>> {
        let (min, max): (Option<i64>, Option<i64>) = self
            .conn
            .query_row(&format!("SELECT min(id), max(id) FROM {table}"), [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(sql_err("range"))?;
        Ok(min.zip(max))
    }

    fn expect_updated(updated: usize, index: i64) -> StoreResult<()> {
        if updated == 0 {
            return Err(StorageError::Unavailable {
                reason: format!("quarter {index} does not exist"),
            });
        }
        Ok(())
    }
}

impl SampleStore for SqliteStore {
    fn insert_sample(&mut self, sample: &RawSample) -> StoreResult<()> {
        let r = &sample.reading;
        self.conn
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO sample (id, {READING_COLUMNS}, ack_mask)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
                ),
                params![
                    sample.timestamp,
                    r.boot_count,
                    r.uptime_minutes,
                    r.temp_f,
                    r.dewpoint_f,
                    r.humidity_pct,
                    r.pressure_inhg,
                    r.wind_mph,
                    r.wind_direction,
                    r.rain_in,
                    r.rain_day_in,
                    r.alert_status,
                    r.alert_queries,
                    r.alert_replies,
                    r.log_next,
                    r.log_full,
                    sample.ack_mask.bits(),
                ],
            )
            .map_err(sql_err("insert sample"))?;
        Ok(())
    }

    fn sample_range(&self) -> StoreResult<Option<(i64, i64)>> {
        self.min_max("sample")
    }

    fn samples_between(&self, span: Range<i64>) -> StoreResult<Vec<RawSample>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!(
                "SELECT id, {READING_COLUMNS}, ack_mask FROM sample
                 WHERE id >= ?1 AND id < ?2 ORDER BY id ASC"
            ))
            .map_err(sql_err("prepare sample scan"))?;

        let samples = stmt
            .query_map(params![span.start, span.end], Self::row_to_sample)
            .map_err(sql_err("scan samples"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err("scan samples"))?;
        Ok(samples)
    }

    fn quarter_range(&self) -> StoreResult<Option<(i64, i64)>> {
        self.min_max("quarter")
    }

    fn quarter(&self, index: i64) -> StoreResult<Option<Quarter>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT id, {READING_COLUMNS}, ack_mask, log_mask, sample_count
                     FROM quarter WHERE id = ?1"
                ),
                params![index],
                Self::row_to_quarter,
            )
            .optional()
            .map_err(sql_err("read quarter"))?;
        row.map(QuarterRow::into_quarter).transpose()
    }

    fn quarters(&self) -> StoreResult<Vec<Quarter>> {
        self.select_quarters("", &[])
    }

    fn replace_quarter(&mut self, quarter: &Quarter) -> StoreResult<()> {
        let tx = self.conn.transaction().map_err(sql_err("begin replace"))?;

        tx.execute("DELETE FROM quarter WHERE id = ?1", params![quarter.index])
            .map_err(sql_err("delete quarter"))?;

        let r = &quarter.reading;
        tx.execute(
            &format!(
                "INSERT INTO quarter (id, {READING_COLUMNS}, ack_mask, log_mask, sample_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
            ),
            params![
                quarter.index,
                r.boot_count,
                r.uptime_minutes,
                r.temp_f,
                r.dewpoint_f,
                r.humidity_pct,
                r.pressure_inhg,
                r.wind_mph,
                r.wind_direction,
                r.rain_in,
                r.rain_day_in,
                r.alert_status,
                r.alert_queries,
                r.alert_replies,
                r.log_next,
                r.log_full,
                quarter.ack_mask.bits(),
                quarter.log_status.as_mask(),
                quarter.sample_count,
            ],
        )
        .map_err(sql_err("insert quarter"))?;

        tx.commit().map_err(sql_err("commit replace"))
    }

    fn set_ack_mask(&mut self, index: i64, mask: AckMask) -> StoreResult<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE quarter SET ack_mask = ?1 WHERE id = ?2",
                params![mask.bits(), index],
            )
            .map_err(sql_err("update ack_mask"))?;
        Self::expect_updated(updated, index)
    }

    fn set_log_status(&mut self, index: i64, status: LogStatus) -> StoreResult<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE quarter SET log_mask = ?1 WHERE id = ?2",
                params![status.as_mask(), index],
            )
            .map_err(sql_err("update log_mask"))?;
        Self::expect_updated(updated, index)
    }

    fn unacknowledged_quarters(&self, full: AckMask) -> StoreResult<Vec<Quarter>> {
        self.select_quarters(
            "WHERE sample_count > 0 AND (ack_mask & ?1) <> ?1",
            &[&full.bits()],
        )
    }

    fn acknowledged_count(&self, full: AckMask) -> StoreResult<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT count(*) FROM quarter WHERE sample_count > 0 AND (ack_mask & ?1) = ?1",
                params![full.bits()],
                |row| row.get(0),
            )
            .map_err(sql_err("count acknowledged"))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn quarters_below(&self, count: u32) -> StoreResult<Vec<Quarter>> {
        self.select_quarters("WHERE sample_count < ?1", &[&count])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp: i64, temp_f: f64) -> RawSample {
        RawSample {
            timestamp,
            reading: Reading {
                temp_f,
                pressure_inhg: 29.921,
                humidity_pct: 64,
                log_full: true,
                ..Reading::default()
            },
            ack_mask: AckMask::bit(1),
        }
    }

    #[test]
    fn test_sample_insert_and_scan() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.sample_range().unwrap(), None);

        for (t, temp) in [(940, 72.0), (900, 70.0), (920, 71.0), (1800, 60.0)] {
            store.insert_sample(&sample(t, temp)).unwrap();
        }

        assert_eq!(store.sample_range().unwrap(), Some((900, 1800)));

        let scanned = store.samples_between(900..1800).unwrap();
        assert_eq!(scanned.len(), 3);
        assert_eq!(scanned[0], sample(900, 70.0));
        assert_eq!(scanned[2].reading.temp_f, 72.0);
    }

    #[test]
    fn test_replace_quarter_overwrites() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        let mut quarter = Quarter::empty(7);
        store.replace_quarter(&quarter).unwrap();

        quarter.sample_count = 4;
        quarter.reading.temp_f = 66.6;
        quarter.log_status = LogStatus::Recovered;
        store.replace_quarter(&quarter).unwrap();

        assert_eq!(store.quarters().unwrap(), vec![quarter]);
        assert_eq!(store.quarter(7).unwrap(), Some(quarter));
        assert_eq!(store.quarter(8).unwrap(), None);
        assert_eq!(store.quarter_range().unwrap(), Some((7, 7)));
    }

    #[test]
    fn test_point_updates() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.replace_quarter(&Quarter::empty(1)).unwrap();

        store.set_ack_mask(1, AckMask::from_bits(0x03)).unwrap();
        store.set_log_status(1, LogStatus::Missing).unwrap();

        let quarter = store.quarter(1).unwrap().unwrap();
        assert_eq!(quarter.ack_mask.bits(), 0x03);
        assert_eq!(quarter.log_status, LogStatus::Missing);

        assert!(matches!(
            store.set_ack_mask(2, AckMask::NONE),
            Err(StorageError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_sql_filters_match_default_filters() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let full = AckMask::from_bits(0x03);

        for (index, count, mask) in [(1, 5, 0x03), (2, 1, 0x02), (3, 0, 0x00), (4, 14, 0x01)] {
            let mut q = Quarter::empty(index);
            q.sample_count = count;
            q.ack_mask = AckMask::from_bits(mask);
            store.replace_quarter(&q).unwrap();
        }

        let pending: Vec<_> = store
            .unacknowledged_quarters(full)
            .unwrap()
            .iter()
            .map(|q| q.index)
            .collect();
        assert_eq!(pending, vec![2, 4]);
        assert_eq!(store.acknowledged_count(full).unwrap(), 1);

        let thin: Vec<_> = store.quarters_below(13).unwrap().iter().map(|q| q.index).collect();
        assert_eq!(thin, vec![1, 2, 3]);
    }

    #[test]
    fn test_corrupt_log_mask_is_reported() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.replace_quarter(&Quarter::empty(9)).unwrap();
        store
            .conn
            .execute("UPDATE quarter SET log_mask = 9 WHERE id = 9", [])
            .unwrap();

        assert!(matches!(
            store.quarter(9),
            Err(StorageError::CorruptRow { table: "quarter", key: 9, .. })
        ));
    }

    #[test]
    fn test_reopen_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather.db");

        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.insert_sample(&sample(900, 70.0)).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.samples_between(0..2000).unwrap().len(), 1);
    }
}
