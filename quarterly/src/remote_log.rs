//! Access to the weather device's circular log.
//!
//! The device keeps a fixed number of log entries in a ring. Its status
//! endpoint reports the write cursor ([`LogCursor`]); individual entries are
//! fetched by physical slot. Entries are written in time order, so the
//! logical sequence (oldest to newest) is sorted by timestamp and can be
//! binary searched.
//!
//! # Addressing
//!
//! ```text
//! not full:  logical [0, next)            physical = logical
//! full:      logical [next, next + size)  physical = logical % size
//! ```
//!
//! # Caching
//!
//! [`LogLocator`] owns a [`LogCache`] keyed by physical slot. Each search
//! starts by reading the cursor; slots the device wrote since the previous
//! cursor are evicted before any cached entry is reused.

use std::collections::HashMap;
use std::ops::Range;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

use crate::error::RemoteLogError;
use crate::reduce::round_to;
use crate::sample::Reading;

/// Maximum distance, in seconds, between a log entry and the searched time
/// for the entry to count as a match.
pub const DEFAULT_TOLERANCE_SECS: i64 = 480;

/// Default pause before each remote fetch.
pub const DEFAULT_REQUEST_PAUSE: Duration = Duration::from_millis(500);

/// The device log write cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LogCursor {
    /// Capacity of the log, in entries.
    #[serde(rename = "log.size")]
    pub size: u64,
    /// Physical slot the device writes next.
    #[serde(rename = "log.next")]
    pub next: u64,
    /// Whether the log has wrapped at least once.
    #[serde(rename = "log.full", deserialize_with = "flag")]
    pub full: bool,
}

impl LogCursor {
    /// Returns the logical index range holding valid entries, oldest first.
    ///
    /// Empty when the log has no capacity or nothing was written yet.
    pub fn logical_bounds(&self) -> Range<u64> {
        if self.size == 0 {
            return 0..0;
        }
        if self.full {
            self.next..self.next + self.size
        } else {
            0..self.next.min(self.size)
        }
    }

    /// Maps a logical index to the physical slot that holds it.
    pub fn physical(&self, logical: u64) -> u64 {
        if self.size == 0 { 0 } else { logical % self.size }
    }
}

/// One decoded device log entry.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LogRecord {
    /// Device boot counter.
    #[serde(rename = "boot.count", deserialize_with = "count")]
    pub boot_count: u32,
    /// Device uptime in minutes.
    #[serde(rename = "uptime.minutes", deserialize_with = "count")]
    pub uptime_minutes: u32,
    /// Air temperature, °C.
    #[serde(rename = "temp.c")]
    pub temp_c: f64,
    /// Dew point, °C.
    #[serde(rename = "dewpoint.c")]
    pub dewpoint_c: f64,
    /// Relative humidity, percent.
    #[serde(rename = "humidity.pct", deserialize_with = "count")]
    pub humidity_pct: u32,
    /// Barometric pressure, inHg.
    #[serde(rename = "pressure.inhg")]
    pub pressure_inhg: f64,
    /// Wind speed, mph.
    #[serde(rename = "wind.mph", deserialize_with = "count")]
    pub wind_mph: u32,
    /// Wind direction, degrees.
    #[serde(rename = "wind.direction")]
    pub wind_direction: f64,
    /// Rain rate, inches.
    #[serde(rename = "rain.in")]
    pub rain_in: f64,
    /// Rain since midnight, inches.
    #[serde(rename = "rain.day.in")]
    pub rain_day_in: f64,
    /// Alert unit status.
    #[serde(rename = "tau.status", deserialize_with = "count")]
    pub tau_status: u32,
    /// Alert unit queries.
    #[serde(rename = "tau.queries", deserialize_with = "count")]
    pub tau_queries: u32,
    /// Alert unit replies.
    #[serde(rename = "tau.replies", deserialize_with = "count")]
    pub tau_replies: u32,
    /// UTC year.
    #[serde(rename = "time.year")]
    pub year: i32,
    /// UTC month, 1-12.
    #[serde(rename = "time.month")]
    pub month: u32,
    /// UTC day of month.
    #[serde(rename = "time.day")]
    pub day: u32,
    /// UTC hour.
    #[serde(rename = "time.hour")]
    pub hour: u32,
    /// UTC minute.
    #[serde(rename = "time.minute")]
    pub minute: u32,
    /// UTC second.
    #[serde(rename = "time.second")]
    pub second: u32,
    /// Log write cursor when the entry was written.
    #[serde(rename = "log.next", deserialize_with = "count")]
    pub log_next: u32,
    /// Whether the log had wrapped when the entry was written.
    #[serde(rename = "log.full", deserialize_with = "flag")]
    pub log_full: bool,
    /// Log capacity. Not every firmware reports it in entries.
    #[serde(rename = "log.size", default)]
    pub log_size: u64,
}

impl LogRecord {
    /// Decodes a record from the device's JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteLogError::Decode`] if a key is missing or has the
    /// wrong type.
    pub fn from_json(text: &str, slot: Option<u64>) -> Result<Self, RemoteLogError> {
        serde_json::from_str(text).map_err(|e| RemoteLogError::Decode {
            slot,
            reason: e.to_string(),
        })
    }

    /// Returns the entry time as Unix seconds, or `None` if the calendar
    /// fields do not form a valid UTC time.
    pub fn timestamp(&self) -> Option<i64> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
            .and_then(|d| d.and_hms_opt(self.hour, self.minute, self.second))
            .map(|t| t.and_utc().timestamp())
    }

    /// Converts the entry into the stored reading shape.
    pub fn to_reading(&self) -> Reading {
        Reading {
            boot_count: self.boot_count,
            uptime_minutes: self.uptime_minutes,
            temp_f: celsius_to_fahrenheit(self.temp_c),
            dewpoint_f: celsius_to_fahrenheit(self.dewpoint_c),
            humidity_pct: self.humidity_pct,
            pressure_inhg: round_to(self.pressure_inhg, 3),
            wind_mph: self.wind_mph,
            wind_direction: round_to(self.wind_direction, 0),
            rain_in: round_to(self.rain_in, 2),
            rain_day_in: round_to(self.rain_day_in, 2),
            alert_status: self.tau_status,
            alert_queries: self.tau_queries,
            alert_replies: self.tau_replies,
            log_next: self.log_next,
            log_full: self.log_full,
        }
    }
}

/// `round(c * 1.8 + 32, 1)`.
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    round_to(celsius * 1.8 + 32.0, 1)
}

/// Accepts `true`/`false` or a number, nonzero meaning true.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(f64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Number(n) => n != 0.0,
    })
}

/// Accepts any non-negative number and rounds it to a whole count.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || value < 0.0 || value > f64::from(u32::MAX) {
        return Err(serde::de::Error::custom(format!(
            "expected a non-negative count, got {value}"
        )));
    }
    Ok(value.round() as u32)
}

/// Read access to a device log.
pub trait RemoteLog {
    /// Reads the current write cursor.
    fn cursor(&mut self) -> Result<LogCursor, RemoteLogError>;

    /// Reads the entry at physical `slot`.
    fn fetch(&mut self, slot: u64) -> Result<LogRecord, RemoteLogError>;
}

/// A [`RemoteLog`] served by the device's HTTP JSON endpoints.
///
/// - `GET {base}/now` returns the current status, including the cursor.
/// - `GET {base}/log?{slot}` returns one log entry.
pub struct HttpRemoteLog {
    base: String,
    client: reqwest::blocking::Client,
}

impl HttpRemoteLog {
    /// Creates a client for the device at `base`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteLogError::ClientCreate`] if the HTTP client cannot be
    /// built.
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, RemoteLogError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteLogError::ClientCreate { source: e })?;

        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn get(&self, url: String) -> Result<String, RemoteLogError> {
        let response = match self.client.get(&url).send() {
            Ok(r) => r,
            Err(e) => return Err(RemoteLogError::Request { url, source: e }),
        };

        let status = response.status().as_u16();
        if status != 200 {
            return Err(RemoteLogError::HttpStatus { url, status });
        }

        response
            .text()
            .map_err(|e| RemoteLogError::Request { url, source: e })
    }
}

impl RemoteLog for HttpRemoteLog {
    fn cursor(&mut self) -> Result<LogCursor, RemoteLogError> {
        let text = self.get(format!("{}/now", self.base))?;
        serde_json::from_str(&text).map_err(|e| RemoteLogError::Decode {
            slot: None,
            reason: e.to_string(),
        })
    }

    fn fetch(&mut self, slot: u64) -> Result<LogRecord, RemoteLogError> {
        let text = self.get(format!("{}/log?{slot}", self.base))?;
        LogRecord::from_json(&text, Some(slot))
    }
}

/// Log entries already fetched during this locator's lifetime.
#[derive(Debug, Default)]
pub struct LogCache {
    entries: HashMap<u64, LogRecord>,
    cursor: Option<LogCursor>,
}

impl LogCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fresh cursor, evicting every slot the device has written
    /// since the previous one.
    pub fn observe(&mut self, cursor: LogCursor) {
        let Some(previous) = self.cursor.replace(cursor) else {
            return;
        };

        // A resized or reset log invalidates every slot.
        if cursor.size == 0 || cursor.size != previous.size || (previous.full && !cursor.full) {
            self.entries.clear();
            return;
        }

        let size = cursor.size;
        let (from, to) = (previous.next % size, cursor.next % size);
        let written = if to >= from { to - from } else { to + size - from };
        if written == 0 {
            return;
        }
        if written >= size {
            self.entries.clear();
            return;
        }

        for offset in 0..written {
            self.entries.remove(&((from + offset) % size));
        }
        tracing::debug!(written, remaining = self.entries.len(), "log cache invalidated");
    }

    /// Returns the cached entry for `slot`.
    pub fn get(&self, slot: u64) -> Option<&LogRecord> {
        self.entries.get(&slot)
    }

    /// Caches the entry fetched from `slot`.
    pub fn insert(&mut self, slot: u64, record: LogRecord) {
        self.entries.insert(slot, record);
    }

    /// Drops every cached entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A log entry matched to a searched time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocatedSample {
    /// Physical slot of the entry.
    pub slot: u64,
    /// Entry time, Unix seconds.
    pub timestamp: i64,
    /// The decoded entry.
    pub record: LogRecord,
}

/// Binary searches a [`RemoteLog`] for the entry nearest a given time.
pub struct LogLocator<L> {
    log: L,
    cache: LogCache,
    pause: Duration,
    tolerance: i64,
    probes: u64,
}

impl<L: RemoteLog> LogLocator<L> {
    /// Creates a locator with the default pause and tolerance.
    pub fn new(log: L) -> Self {
        Self {
            log,
            cache: LogCache::new(),
            pause: DEFAULT_REQUEST_PAUSE,
            tolerance: DEFAULT_TOLERANCE_SECS,
            probes: 0,
        }
    }

    /// Sets the pause before each uncached fetch.
    #[must_use]
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Sets the match tolerance in seconds.
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: i64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Number of entries examined so far, cache hits included.
    pub fn probes(&self) -> u64 {
        self.probes
    }

    /// The locator's cache.
    pub fn cache(&self) -> &LogCache {
        &self.cache
    }

    /// The underlying log.
    pub fn log(&self) -> &L {
        &self.log
    }

    /// Consumes the locator and returns the underlying log.
    pub fn into_log(self) -> L {
        self.log
    }

    /// Finds the entry within the tolerance of `target` (Unix seconds).
    ///
    /// Returns `Ok(None)` when the log holds no such entry.
    ///
    /// # Errors
    ///
    /// Returns the transport or decode error of the first failed read.
    pub fn locate(&mut self, target: i64) -> Result<Option<LocatedSample>, RemoteLogError> {
        let cursor = self.log.cursor()?;
        self.cache.observe(cursor);

        let Range {
            start: mut low,
            end: mut high,
        } = cursor.logical_bounds();

        while low < high {
            let mid = low + (high - low) / 2;
            let slot = cursor.physical(mid);
            let record = self.probe(slot, low, high)?;

            let timestamp = record.timestamp().ok_or_else(|| RemoteLogError::Decode {
                slot: Some(slot),
                reason: format!(
                    "invalid time {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    record.year, record.month, record.day, record.hour, record.minute, record.second
                ),
            })?;

            let delta = timestamp - target;
            if delta.abs() <= self.tolerance {
                return Ok(Some(LocatedSample {
                    slot,
                    timestamp,
                    record,
                }));
            }

            if delta > 0 {
                if high == mid {
                    return Ok(None);
                }
                high = mid;
            } else {
                if low == mid {
                    return Ok(None);
                }
                low = mid;
            }
        }

        Ok(None)
    }

    fn probe(&mut self, slot: u64, low: u64, high: u64) -> Result<LogRecord, RemoteLogError> {
        self.probes += 1;

        if let Some(record) = self.cache.get(slot) {
            tracing::debug!(slot, low, high, "cache log");
            return Ok(*record);
        }

        if !self.pause.is_zero() {
            std::thread::sleep(self.pause);
        }
        tracing::debug!(slot, low, high, "query log");
        let record = self.log.fetch(slot)?;
        self.cache.insert(slot, record);
        Ok(record)
    }
}
