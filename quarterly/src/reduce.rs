//! Per-field reducers that fold a quarter's raw samples into one summary.
//!
//! Every [`Reading`] field has a fixed aggregation rule:
//!
//! | Rule | Fields |
//! |---|---|
//! | [`Reducer::Max`] | boot count, uptime, wind speed, rain rate, daily rain, alert counters, log cursor, log-full flag |
//! | [`Reducer::Average`] | temperature, dew point, humidity, pressure |
//! | [`Reducer::Last`] | wind direction |
//! | [`Reducer::BitOr`] | acknowledgment mask |
//!
//! Wind direction takes the last value in scan order. Directions cannot be
//! averaged linearly across the 0°/360° seam.

use serde::{Deserialize, Serialize};

use crate::sample::{AckMask, RawSample, Reading};

/// Aggregation rule applied to one field across a quarter's samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reducer {
    /// Largest value.
    Max,

    /// Arithmetic mean rounded to `decimals` places.
    Average {
        /// Decimal places kept after rounding.
        decimals: u8,
    },

    /// Value of the last sample.
    Last,

    /// Bitwise OR of the values taken as unsigned integers.
    BitOr,
}

impl Reducer {
    /// Applies this reducer to a slice of values.
    ///
    /// Non-finite values are skipped. If nothing is left the result is
    /// `0.0`, the identity for every rule.
    ///
    /// ```rust
    /// use quarterly::reduce::Reducer;
    ///
    /// let values = [10.0, 20.0, 30.0];
    /// assert_eq!(Reducer::Max.apply(&values), 30.0);
    /// assert_eq!(Reducer::Average { decimals: 1 }.apply(&values), 20.0);
    /// assert_eq!(Reducer::Last.apply(&values), 30.0);
    /// assert_eq!(Reducer::BitOr.apply(&[1.0, 2.0]), 3.0);
    /// ```
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)] // masks and counts are small
    pub fn apply(self, values: &[f64]) -> f64 {
        let mut finite = values.iter().copied().filter(|v| v.is_finite()).peekable();
        if finite.peek().is_none() {
            return 0.0;
        }

        match self {
            Self::Max => finite.fold(f64::NEG_INFINITY, f64::max),
            Self::Average { decimals } => {
                let (sum, count) = finite.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                round_to(sum / count as f64, decimals)
            }
            Self::Last => finite.last().unwrap_or(0.0),
            Self::BitOr => finite.fold(0u64, |acc, v| acc | v.max(0.0) as u64) as f64,
        }
    }
}

/// Rounds `value` to `decimals` places, halves away from zero.
pub fn round_to(value: f64, decimals: u8) -> f64 {
    let scale = 10f64.powi(i32::from(decimals));
    (value * scale).round() / scale
}

/// A [`Reading`] field together with its aggregation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// [`Reading::boot_count`]
    BootCount,
    /// [`Reading::uptime_minutes`]
    UptimeMinutes,
    /// [`Reading::temp_f`]
    TempF,
    /// [`Reading::dewpoint_f`]
    DewpointF,
    /// [`Reading::humidity_pct`]
    HumidityPct,
    /// [`Reading::pressure_inhg`]
    PressureInhg,
    /// [`Reading::wind_mph`]
    WindMph,
    /// [`Reading::wind_direction`]
    WindDirection,
    /// [`Reading::rain_in`]
    RainIn,
    /// [`Reading::rain_day_in`]
    RainDayIn,
    /// [`Reading::alert_status`]
    AlertStatus,
    /// [`Reading::alert_queries`]
    AlertQueries,
    /// [`Reading::alert_replies`]
    AlertReplies,
    /// [`Reading::log_next`]
    LogNext,
    /// [`Reading::log_full`]
    LogFull,
}

impl Field {
    /// Every field of [`Reading`], in column order.
    pub const ALL: [Self; 15] = [
        Self::BootCount,
        Self::UptimeMinutes,
        Self::TempF,
        Self::DewpointF,
        Self::HumidityPct,
        Self::PressureInhg,
        Self::WindMph,
        Self::WindDirection,
        Self::RainIn,
        Self::RainDayIn,
        Self::AlertStatus,
        Self::AlertQueries,
        Self::AlertReplies,
        Self::LogNext,
        Self::LogFull,
    ];

    /// The aggregation rule for this field.
    pub const fn reducer(self) -> Reducer {
        match self {
            Self::TempF | Self::DewpointF => Reducer::Average { decimals: 1 },
            Self::HumidityPct => Reducer::Average { decimals: 0 },
            Self::PressureInhg => Reducer::Average { decimals: 3 },
            Self::WindDirection => Reducer::Last,
            Self::BootCount
            | Self::UptimeMinutes
            | Self::WindMph
            | Self::RainIn
            | Self::RainDayIn
            | Self::AlertStatus
            | Self::AlertQueries
            | Self::AlertReplies
            | Self::LogNext
            | Self::LogFull => Reducer::Max,
        }
    }

    /// The column name used by the store.
    pub const fn name(self) -> &'static str {
        match self {
            Self::BootCount => "boot_count",
            Self::UptimeMinutes => "uptime_minutes",
            Self::TempF => "temp_f",
            Self::DewpointF => "dewpoint_f",
            Self::HumidityPct => "humidity_pct",
            Self::PressureInhg => "pressure_inhg",
            Self::WindMph => "wind_mph",
            Self::WindDirection => "wind_direction",
            Self::RainIn => "rain_in",
            Self::RainDayIn => "rain_day_in",
            Self::AlertStatus => "alert_status",
            Self::AlertQueries => "alert_queries",
            Self::AlertReplies => "alert_replies",
            Self::LogNext => "log_next",
            Self::LogFull => "log_full",
        }
    }

    /// Reads this field from `reading` as `f64`.
    pub fn get(self, reading: &Reading) -> f64 {
        match self {
            Self::BootCount => f64::from(reading.boot_count),
            Self::UptimeMinutes => f64::from(reading.uptime_minutes),
            Self::TempF => reading.temp_f,
            Self::DewpointF => reading.dewpoint_f,
            Self::HumidityPct => f64::from(reading.humidity_pct),
            Self::PressureInhg => reading.pressure_inhg,
            Self::WindMph => f64::from(reading.wind_mph),
            Self::WindDirection => reading.wind_direction,
            Self::RainIn => reading.rain_in,
            Self::RainDayIn => reading.rain_day_in,
            Self::AlertStatus => f64::from(reading.alert_status),
            Self::AlertQueries => f64::from(reading.alert_queries),
            Self::AlertReplies => f64::from(reading.alert_replies),
            Self::LogNext => f64::from(reading.log_next),
            Self::LogFull => f64::from(u8::from(reading.log_full)),
        }
    }

    /// Writes `value` into this field of `reading`, rounding integer fields.
    pub fn set(self, reading: &mut Reading, value: f64) {
        match self {
            Self::BootCount => reading.boot_count = to_u32(value),
            Self::UptimeMinutes => reading.uptime_minutes = to_u32(value),
            Self::TempF => reading.temp_f = value,
            Self::DewpointF => reading.dewpoint_f = value,
            Self::HumidityPct => reading.humidity_pct = to_u32(value),
            Self::PressureInhg => reading.pressure_inhg = value,
            Self::WindMph => reading.wind_mph = to_u32(value),
            Self::WindDirection => reading.wind_direction = value,
            Self::RainIn => reading.rain_in = value,
            Self::RainDayIn => reading.rain_day_in = value,
            Self::AlertStatus => reading.alert_status = to_u32(value),
            Self::AlertQueries => reading.alert_queries = to_u32(value),
            Self::AlertReplies => reading.alert_replies = to_u32(value),
            Self::LogNext => reading.log_next = to_u32(value),
            Self::LogFull => reading.log_full = value >= 0.5,
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // clamped to u32 range first
fn to_u32(value: f64) -> u32 {
    value.round().clamp(0.0, f64::from(u32::MAX)) as u32
}

/// The result of reducing one quarter's samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reduction {
    /// The reduced metrics.
    pub reading: Reading,
    /// OR of every sample's acknowledgment mask.
    pub ack_mask: AckMask,
    /// Number of samples reduced.
    pub sample_count: u32,
}

/// Reduces `samples` field by field.
///
/// Samples must be in timestamp order, which is the order the store returns
/// them in; [`Reducer::Last`] depends on it. An empty slice yields a zeroed
/// reading with `sample_count = 0`.
#[allow(clippy::cast_possible_truncation)] // a quarter holds at most 900 one-second samples
pub fn reduce_samples(samples: &[RawSample]) -> Reduction {
    let mut reading = Reading::default();
    let mut column = Vec::with_capacity(samples.len());

    for field in Field::ALL {
        column.clear();
        column.extend(samples.iter().map(|s| field.get(&s.reading)));
        field.set(&mut reading, field.reducer().apply(&column));
    }

    column.clear();
    column.extend(samples.iter().map(|s| f64::from(s.ack_mask.bits())));
    let ack_bits = Reducer::BitOr.apply(&column);

    Reduction {
        reading,
        ack_mask: AckMask::from_bits(to_u32(ack_bits).min(u32::from(u8::MAX)) as u8),
        sample_count: samples.len().min(u32::MAX as usize) as u32,
    }
}
