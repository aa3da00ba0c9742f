//! Numeric helpers for grid mappings

use crate::error::{Result, XcubeError};
use num_rational::Ratio;

/// Rounding resolutions keyed by `round(100 * resolution)`,
/// mapped to the integer resolution and its extra digits
const RESOLUTIONS: [(i64, (i64, i32)); 5] = [
    (10, (1, 0)),
    (20, (2, 0)),
    (25, (25, 1)),
    (50, (5, 0)),
    (100, (1, -1)),
];

/// Round `value` at the position given by significant `digits` and
/// return the result as a fraction.
///
/// `resolution` is the rounding resolution of the least significant digit
/// and must be one of 0.1, 0.2, 0.25, 0.5 or 1.
pub fn round_to_fraction(value: f64, digits: i32, resolution: f64) -> Result<Ratio<i64>> {
    if digits < 1 {
        return Err(XcubeError::InvalidValue(
            "digits must be a positive integer".to_string(),
        ));
    }
    let resolution_key = (100.0 * resolution).round() as i64;
    let entry = RESOLUTIONS
        .iter()
        .find(|(key, _)| *key == resolution_key)
        .filter(|_| (100.0 * resolution - resolution_key as f64).abs() < 1e-9);
    let Some(&(_, (resolution, resolution_digits))) = entry else {
        return Err(XcubeError::InvalidValue(
            "resolution must be one of 0.1, 0.2, 0.25, 0.5, 1".to_string(),
        ));
    };
    if value == 0.0 {
        return Ok(Ratio::from_integer(0));
    }
    if !value.is_finite() {
        return Err(XcubeError::InvalidValue(format!(
            "cannot round non-finite value {value}"
        )));
    }
    let sign = if value < 0.0 { -1 } else { 1 };
    let value = value.abs();

    let exponent = value.log10().floor() as i32 - digits - resolution_digits;
    if exponent.abs() > 18 {
        return Err(XcubeError::InvalidValue(format!(
            "value {value} out of range for {digits} digits"
        )));
    }
    let power = 10i64.pow(exponent.unsigned_abs());
    let magnitude = if exponent >= 0 {
        power as f64
    } else {
        1.0 / power as f64
    };
    let scaled_value = value / magnitude;
    let discrete_value = resolution * (scaled_value / resolution as f64).round_ties_even() as i64;
    let numerator = sign * discrete_value;
    Ok(if exponent >= 0 {
        Ratio::from_integer(numerator * power)
    } else {
        Ratio::new(numerator, power)
    })
}

/// Convert a longitude from [-180, 180] into [0, 360]
pub fn to_lon_360(lon: f64) -> f64 {
    if lon >= 0.0 {
        lon
    } else {
        lon + 360.0
    }
}

/// Convert a longitude from [0, 360] into [-180, 180]
pub fn from_lon_360(lon: f64) -> f64 {
    if lon <= 180.0 {
        lon
    } else {
        lon - 360.0
    }
}

/// Snap values that are within 1e-10 of an integer onto that integer
pub fn snap_to_int(x: f64) -> f64 {
    let xi = x.trunc();
    if (x - xi).abs() <= 1e-10 {
        xi
    } else {
        let xr = x.round();
        if (x - xr).abs() <= 1e-10 {
            xr
        } else {
            x
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_fraction() {
        assert_eq!(round_to_fraction(0.0012345, 2, 1.0).unwrap(), Ratio::new(3, 2500));
        assert_eq!(round_to_fraction(-0.0012345, 2, 1.0).unwrap(), Ratio::new(-3, 2500));
        assert_eq!(round_to_fraction(0.0012345, 2, 0.5).unwrap(), Ratio::new(1, 800));
        assert_eq!(round_to_fraction(0.0012345, 1, 0.25).unwrap(), Ratio::new(1, 800));
        assert_eq!(round_to_fraction(1234.5, 3, 1.0).unwrap(), Ratio::from_integer(1230));
        assert_eq!(round_to_fraction(0.0, 2, 1.0).unwrap(), Ratio::from_integer(0));
    }

    #[test]
    fn test_round_to_fraction_invalid() {
        assert!(round_to_fraction(1.5, 0, 1.0).is_err());
        assert!(round_to_fraction(1.5, 2, 0.3).is_err());
        assert!(round_to_fraction(f64::NAN, 2, 1.0).is_err());
    }

    #[test]
    fn test_lon_360() {
        assert_eq!(to_lon_360(-170.0), 190.0);
        assert_eq!(to_lon_360(10.0), 10.0);
        assert_eq!(from_lon_360(190.0), -170.0);
        assert_eq!(from_lon_360(180.0), 180.0);
    }

    #[test]
    fn test_snap_to_int() {
        assert_eq!(snap_to_int(2.00000000000001), 2.0);
        assert_eq!(snap_to_int(2.99999999999999), 3.0);
        assert_eq!(snap_to_int(-1.0000000000001), -1.0);
        assert_eq!(snap_to_int(0.5), 0.5);
    }
}
