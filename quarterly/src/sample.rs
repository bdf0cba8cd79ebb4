//! Record types shared by the store, the reducers, and the publishers.
//!
//! A [`RawSample`] is a single observation written by the poller. A
//! [`Quarter`] is the consolidated summary of all samples that fall in one
//! 900-second window. Both carry the same fixed [`Reading`] shape.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// The metric set carried by every sample and quarter.
///
/// Temperatures are degrees Fahrenheit, pressure is inches of mercury,
/// rain is inches, wind speed is miles per hour. The `alert_*` fields are
/// counters reported by the tornado alert unit attached to the station.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Device boot counter.
    pub boot_count: u32,
    /// Device uptime in minutes.
    pub uptime_minutes: u32,
    /// Air temperature, °F.
    pub temp_f: f64,
    /// Dew point, °F.
    pub dewpoint_f: f64,
    /// Relative humidity, whole percent.
    pub humidity_pct: u32,
    /// Barometric pressure, inHg.
    pub pressure_inhg: f64,
    /// Wind speed, mph.
    pub wind_mph: u32,
    /// Wind direction, degrees.
    pub wind_direction: f64,
    /// Rain rate, inches.
    pub rain_in: f64,
    /// Rain accumulated since midnight, inches.
    pub rain_day_in: f64,
    /// Alert unit status code.
    pub alert_status: u32,
    /// Queries sent to the alert unit.
    pub alert_queries: u32,
    /// Replies received from the alert unit.
    pub alert_replies: u32,
    /// Device log write cursor at the time of the reading.
    pub log_next: u32,
    /// Whether the device log had wrapped at the time of the reading.
    pub log_full: bool,
}

/// A bitset with one bit per publishing destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AckMask(u8);

impl AckMask {
    /// No destination has acknowledged.
    pub const NONE: Self = Self(0);

    /// Wraps raw mask bits.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Returns the mask with only destination bit `bit` set.
    ///
    /// Bits beyond 7 do not fit the mask and yield [`AckMask::NONE`];
    /// configuration validation rejects them before they get here.
    pub const fn bit(bit: u8) -> Self {
        if bit < 8 { Self(1 << bit) } else { Self(0) }
    }

    /// Returns the raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if `self` covers every destination in `full`.
    pub const fn is_complete(self, full: Self) -> bool {
        self.contains(full)
    }

    /// Returns `self` with the bits of `other` added.
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for AckMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

impl BitOrAssign for AckMask {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.with(rhs);
    }
}

impl fmt::Display for AckMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Whether a quarter's data came from the device log, or is known to be
/// unavailable there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogStatus {
    /// The device log has not been consulted, or the last attempt failed.
    #[default]
    Unknown,
    /// The quarter was recovered from a device log entry.
    Recovered,
    /// The device log was searched and holds no entry for the quarter.
    Missing,
}

impl LogStatus {
    /// Returns the legacy integer encoding used by the quarter table.
    pub const fn as_mask(self) -> u8 {
        match self {
            Self::Unknown => 0x00,
            Self::Recovered => 0x01,
            Self::Missing => 0x02,
        }
    }

    /// Decodes the legacy integer encoding, or `None` if it is not one of
    /// the known values.
    pub const fn from_mask(mask: i64) -> Option<Self> {
        match mask {
            0x00 => Some(Self::Unknown),
            0x01 => Some(Self::Recovered),
            0x02 => Some(Self::Missing),
            _ => None,
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Recovered => "recovered",
            Self::Missing => "missing",
        };
        f.write_str(name)
    }
}

/// One sensor observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Observation time, Unix seconds. Primary key.
    pub timestamp: i64,
    /// The observed metrics.
    pub reading: Reading,
    /// Destinations the poller already delivered this sample to.
    pub ack_mask: AckMask,
}

/// The consolidated summary of one 900-second window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quarter {
    /// Quarter index, `floor(timestamp / 900)`. Primary key.
    pub index: i64,
    /// The reduced metrics.
    pub reading: Reading,
    /// Number of raw samples folded into `reading`.
    pub sample_count: u32,
    /// Device log recovery state.
    pub log_status: LogStatus,
    /// Destinations that have acknowledged this quarter.
    pub ack_mask: AckMask,
}

impl Quarter {
    /// Creates an empty quarter: zeroed reading, no samples, nothing
    /// acknowledged.
    pub fn empty(index: i64) -> Self {
        Self {
            index,
            reading: Reading::default(),
            sample_count: 0,
            log_status: LogStatus::Unknown,
            ack_mask: AckMask::NONE,
        }
    }

    /// Returns true if the quarter holds any data.
    pub fn has_data(&self) -> bool {
        self.sample_count > 0
    }
}
