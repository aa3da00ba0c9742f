//! Coordinate reference systems known to the toolkit

use crate::error::{Result, XcubeError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis description of a CRS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrsAxis {
    pub name: &'static str,
    pub abbrev: &'static str,
    pub direction: &'static str,
    pub unit: &'static str,
}

const LAT_AXIS: CrsAxis = CrsAxis {
    name: "Geodetic latitude",
    abbrev: "Lat",
    direction: "north",
    unit: "degree",
};

const LON_AXIS: CrsAxis = CrsAxis {
    name: "Geodetic longitude",
    abbrev: "Lon",
    direction: "east",
    unit: "degree",
};

const EASTING_AXIS: CrsAxis = CrsAxis {
    name: "Easting",
    abbrev: "X",
    direction: "east",
    unit: "metre",
};

const NORTHING_AXIS: CrsAxis = CrsAxis {
    name: "Northing",
    abbrev: "Y",
    direction: "north",
    unit: "metre",
};

/// A coordinate reference system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    /// WGS 84 with longitude/latitude axis order
    Crs84,
    /// An EPSG code, e.g. 4326 or 3857
    Epsg(u32),
}

impl Crs {
    pub const WGS84: Crs = Crs::Epsg(4326);
    pub const WEB_MERCATOR: Crs = Crs::Epsg(3857);

    /// Parse a CRS from a short name, URI or URN
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let upper = text.to_ascii_uppercase();
        if upper == "CRS84"
            || upper == "OGC:CRS84"
            || upper.ends_with("/OGC/1.3/CRS84")
            || upper.ends_with(":OGC:1.3:CRS84")
            || upper.ends_with("/OGC/0/CRS84")
        {
            return Ok(Crs::Crs84);
        }
        let code = upper
            .strip_prefix("EPSG:")
            .or_else(|| upper.strip_prefix("URN:OGC:DEF:CRS:EPSG::"))
            .or_else(|| upper.rsplit_once("/EPSG/0/").map(|(_, code)| code));
        match code.and_then(|code| code.parse::<u32>().ok()) {
            Some(code) => Ok(Crs::Epsg(code)),
            None if upper == "WGS84" || upper == "WGS 84" => Ok(Crs::WGS84),
            None => Err(XcubeError::InvalidValue(format!("unknown CRS {text:?}"))),
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Crs84 | Crs::Epsg(4326))
    }

    /// Short name such as `EPSG:4326` or `OGC:CRS84`
    pub fn name(&self) -> String {
        match self {
            Crs::Crs84 => "OGC:CRS84".to_string(),
            Crs::Epsg(code) => format!("EPSG:{code}"),
        }
    }

    /// OGC URI, e.g. `http://www.opengis.net/def/crs/EPSG/0/4326`
    pub fn uri(&self) -> String {
        match self {
            Crs::Crs84 => "http://www.opengis.net/def/crs/OGC/1.3/CRS84".to_string(),
            Crs::Epsg(code) => format!("http://www.opengis.net/def/crs/EPSG/0/{code}"),
        }
    }

    /// OGC URN, e.g. `urn:ogc:def:crs:EPSG::3857`
    pub fn urn(&self) -> String {
        match self {
            Crs::Crs84 => "urn:ogc:def:crs:OGC:1.3:CRS84".to_string(),
            Crs::Epsg(code) => format!("urn:ogc:def:crs:EPSG::{code}"),
        }
    }

    /// Axes in their authoritative order
    pub fn axis_info(&self) -> Vec<CrsAxis> {
        match self {
            Crs::Epsg(4326) => vec![LAT_AXIS, LON_AXIS],
            Crs::Crs84 => vec![LON_AXIS, LAT_AXIS],
            Crs::Epsg(_) => vec![EASTING_AXIS, NORTHING_AXIS],
        }
    }

    /// Whether the first axis is the horizontal one
    pub fn is_xy(&self) -> bool {
        self.axis_info()
            .first()
            .map_or(true, |axis| axis.direction == "east")
    }

    /// Default names of the spatial dimensions
    pub fn default_xy_dim_names(&self) -> (&'static str, &'static str) {
        if self.is_geographic() {
            ("lon", "lat")
        } else {
            ("x", "y")
        }
    }
}

impl Default for Crs {
    fn default() -> Self {
        Crs::WGS84
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl TryFrom<String> for Crs {
    type Error = XcubeError;

    fn try_from(value: String) -> Result<Self> {
        Crs::parse(&value)
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(Crs::parse("EPSG:4326").unwrap(), Crs::WGS84);
        assert_eq!(Crs::parse("epsg:3857").unwrap(), Crs::WEB_MERCATOR);
        assert_eq!(Crs::parse("CRS84").unwrap(), Crs::Crs84);
        assert_eq!(
            Crs::parse("http://www.opengis.net/def/crs/OGC/1.3/CRS84").unwrap(),
            Crs::Crs84
        );
        assert_eq!(
            Crs::parse("http://www.opengis.net/def/crs/EPSG/0/32632").unwrap(),
            Crs::Epsg(32632)
        );
        assert_eq!(
            Crs::parse("urn:ogc:def:crs:EPSG::3857").unwrap(),
            Crs::WEB_MERCATOR
        );
        assert!(Crs::parse("PROJCS[...]").is_err());
    }

    #[test]
    fn test_names() {
        assert_eq!(Crs::WGS84.to_string(), "EPSG:4326");
        assert_eq!(Crs::Crs84.urn(), "urn:ogc:def:crs:OGC:1.3:CRS84");
        assert_eq!(Crs::WEB_MERCATOR.urn(), "urn:ogc:def:crs:EPSG::3857");
        assert_eq!(Crs::WGS84.uri(), "http://www.opengis.net/def/crs/EPSG/0/4326");
    }

    #[test]
    fn test_axis_order() {
        assert!(!Crs::WGS84.is_xy());
        assert!(Crs::Crs84.is_xy());
        assert!(Crs::WEB_MERCATOR.is_xy());
        assert_eq!(Crs::WGS84.axis_info()[0].abbrev, "Lat");
        assert_eq!(Crs::WEB_MERCATOR.default_xy_dim_names(), ("x", "y"));
        assert_eq!(Crs::Crs84.default_xy_dim_names(), ("lon", "lat"));
    }

    #[test]
    fn test_serde() {
        let json = serde_json::to_string(&Crs::WEB_MERCATOR).unwrap();
        assert_eq!(json, "\"EPSG:3857\"");
        let crs: Crs = serde_json::from_str("\"CRS84\"").unwrap();
        assert_eq!(crs, Crs::Crs84);
    }
}
