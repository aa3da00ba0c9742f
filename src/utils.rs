//! Utility functions

use crate::error::{Result, XcubeError};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};

/// Parse a tile size given as `"N"` or `"W,H"` of positive integers
pub fn parse_tile_size(text: &str) -> Result<(usize, usize)> {
    let invalid = || {
        XcubeError::InvalidValue(format!(
            "tile size must be a positive integer or a pair W,H, got {text:?}"
        ))
    };
    let parts: Vec<usize> = text
        .split(',')
        .map(|part| part.trim().parse::<usize>().map_err(|_| invalid()))
        .collect::<Result<_>>()?;
    let size = match parts.as_slice() {
        [n] => (*n, *n),
        [w, h] => (*w, *h),
        _ => return Err(invalid()),
    };
    if size.0 == 0 || size.1 == 0 {
        return Err(invalid());
    }
    Ok(size)
}

/// Parse a date-time label.
///
/// Accepts `2017-01-16 10:09:21`, `2017-01-16T10:09:21`, plain dates and
/// RFC 3339 timestamps; the latter are converted to UTC.
pub fn parse_datetime(label: &str) -> Result<NaiveDateTime> {
    let label = label.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(label) {
        return Ok(dt.naive_utc());
    }
    let trimmed = label.trim_end_matches('Z');
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| XcubeError::InvalidValue(format!("invalid date-time {label:?}")))
}

/// Format a date-time as ISO 8601 in UTC, e.g. `2010-01-01T12:00:00Z`
pub fn format_datetime(dt: &NaiveDateTime) -> String {
    Utc.from_utc_datetime(dt)
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

/// Parsed CF time units such as `days since 1970-01-01`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CfTimeUnits {
    pub seconds_per_unit: f64,
    pub epoch: NaiveDateTime,
}

impl CfTimeUnits {
    pub fn parse(units: &str) -> Result<Self> {
        let invalid = || XcubeError::InvalidValue(format!("invalid CF time units {units:?}"));
        let (unit, epoch) = units.split_once(" since ").ok_or_else(invalid)?;
        let seconds_per_unit = match unit.trim() {
            "days" | "day" | "d" => 86400.0,
            "hours" | "hour" | "h" => 3600.0,
            "minutes" | "minute" | "min" => 60.0,
            "seconds" | "second" | "s" => 1.0,
            "milliseconds" | "millisecond" | "ms" => 0.001,
            _ => return Err(invalid()),
        };
        let epoch = parse_datetime(epoch).map_err(|_| invalid())?;
        Ok(Self {
            seconds_per_unit,
            epoch,
        })
    }

    /// Convert a numeric time value into a date-time
    pub fn decode(&self, value: f64) -> Result<NaiveDateTime> {
        let out_of_range =
            || XcubeError::OutOfBounds(format!("time value {value} is out of range"));
        let millis = value * self.seconds_per_unit * 1000.0;
        if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
            return Err(out_of_range());
        }
        TimeDelta::try_milliseconds(millis.round() as i64)
            .and_then(|delta| self.epoch.checked_add_signed(delta))
            .ok_or_else(out_of_range)
    }

    /// Convert a date-time into a numeric time value
    pub fn encode(&self, dt: &NaiveDateTime) -> f64 {
        let millis = (*dt - self.epoch).num_milliseconds() as f64;
        millis / 1000.0 / self.seconds_per_unit
    }
}
