//! Quarter-hour time bucket arithmetic.
//!
//! A quarter is a fixed 900-second window identified by
//! `floor(timestamp / 900)`. All timestamps are Unix seconds.

use std::ops::Range;

/// Width of a quarter in seconds.
pub const QUARTER_SECS: i64 = 900;

/// Offset from the start of a quarter to its centre.
pub const QUARTER_CENTER_OFFSET: i64 = QUARTER_SECS / 2;

/// Returns the quarter index containing `timestamp`.
///
/// Uses floor division, so timestamps before the epoch map to negative
/// indices rather than being rounded toward zero.
///
/// ```rust
/// use quarterly::quarter::quarter_index;
///
/// assert_eq!(quarter_index(899), 0);
/// assert_eq!(quarter_index(900), 1);
/// assert_eq!(quarter_index(-1), -1);
/// ```
#[inline]
pub fn quarter_index(timestamp: i64) -> i64 {
    timestamp.div_euclid(QUARTER_SECS)
}

/// Returns the first second of quarter `index`.
///
/// Saturates at the `i64` bounds for indices beyond `i64::MAX / 900`.
#[inline]
pub fn quarter_start(index: i64) -> i64 {
    index.saturating_mul(QUARTER_SECS)
}

/// Returns the centre of quarter `index`, the target used when searching
/// the device log.
#[inline]
pub fn quarter_center(index: i64) -> i64 {
    quarter_start(index).saturating_add(QUARTER_CENTER_OFFSET)
}

/// Returns the half-open timestamp range covered by quarter `index`.
#[inline]
pub fn quarter_span(index: i64) -> Range<i64> {
    quarter_start(index)..quarter_start(index.saturating_add(1))
}
