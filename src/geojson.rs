//! GeoJSON inspection and simple geometries

use crate::error::{Result, XcubeError};
use serde_json::Value;

const GEOMETRY_TYPES: [&str; 6] = [
    "Point",
    "MultiPoint",
    "LineString",
    "MultiLineString",
    "Polygon",
    "MultiPolygon",
];

/// Checks on GeoJSON objects given as JSON values
pub struct GeoJson;

impl GeoJson {
    pub fn is_point(obj: &Value) -> bool {
        Self::get_type_name(obj) == Some("Point") && Self::is_geometry(obj)
    }

    /// Whether `obj` is a geometry; its coordinates may be `null`
    pub fn is_geometry(obj: &Value) -> bool {
        match Self::get_type_name(obj) {
            Some("GeometryCollection") => obj.get("geometries").is_some(),
            Some(type_name) if GEOMETRY_TYPES.contains(&type_name) => {
                obj.get("coordinates").is_some()
            }
            _ => false,
        }
    }

    pub fn is_feature(obj: &Value) -> bool {
        Self::get_type_name(obj) == Some("Feature") && obj.get("geometry").is_some()
    }

    pub fn is_feature_collection(obj: &Value) -> bool {
        Self::get_type_name(obj) == Some("FeatureCollection") && obj.get("features").is_some()
    }

    /// The `type` member of an object
    pub fn get_type_name(obj: &Value) -> Option<&str> {
        obj.as_object()?.get("type")?.as_str()
    }

    /// Geometry of a feature, if it is a valid geometry
    pub fn get_feature_geometry(obj: &Value) -> Option<&Value> {
        if Self::get_type_name(obj) != Some("Feature") {
            return None;
        }
        obj.get("geometry").filter(|g| Self::is_geometry(g))
    }

    /// Members of a geometry collection, `null` counting as empty
    pub fn get_geometry_collection_geometries(obj: &Value) -> Option<Vec<&Value>> {
        if Self::get_type_name(obj) != Some("GeometryCollection") {
            return None;
        }
        match obj.get("geometries")? {
            Value::Null => Some(Vec::new()),
            Value::Array(geometries) => Some(geometries.iter().collect()),
            _ => None,
        }
    }
}

/// A position `(x, y)`
pub type Position = (f64, f64);

/// A ring of positions, closed or not
pub type Ring = Vec<Position>;

/// Geometries supported for spatial queries
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    /// Exterior ring followed by holes
    Polygon(Vec<Ring>),
    MultiPolygon(Vec<Vec<Ring>>),
}

impl Geometry {
    /// Parse a geometry, or the geometry of a feature
    pub fn from_value(obj: &Value) -> Result<Self> {
        let obj = GeoJson::get_feature_geometry(obj).unwrap_or(obj);
        if !GeoJson::is_geometry(obj) {
            return Err(XcubeError::InvalidValue(
                "object is not a valid GeoJSON geometry".to_string(),
            ));
        }
        let coordinates = obj.get("coordinates").unwrap_or(&Value::Null);
        let invalid = || {
            XcubeError::InvalidValue(format!("invalid GeoJSON coordinates: {coordinates}"))
        };
        match GeoJson::get_type_name(obj) {
            Some("Point") => Ok(Geometry::Point(position(coordinates).ok_or_else(invalid)?)),
            Some("MultiPoint") => Ok(Geometry::MultiPoint(
                positions(coordinates).ok_or_else(invalid)?,
            )),
            Some("LineString") => Ok(Geometry::LineString(
                positions(coordinates).ok_or_else(invalid)?,
            )),
            Some("Polygon") => Ok(Geometry::Polygon(rings(coordinates).ok_or_else(invalid)?)),
            Some("MultiPolygon") => Ok(Geometry::MultiPolygon(
                coordinates
                    .as_array()
                    .ok_or_else(invalid)?
                    .iter()
                    .map(rings)
                    .collect::<Option<_>>()
                    .ok_or_else(invalid)?,
            )),
            Some(other) => Err(XcubeError::InvalidValue(format!(
                "geometry type {other:?} is not supported"
            ))),
            None => Err(invalid()),
        }
    }

    pub fn is_point(&self) -> bool {
        matches!(self, Geometry::Point(_))
    }

    /// `(x_min, y_min, x_max, y_max)` of all positions
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        self.positions().fold(None, |acc, (x, y)| match acc {
            None => Some((x, y, x, y)),
            Some((x0, y0, x1, y1)) => Some((x0.min(x), y0.min(y), x1.max(x), y1.max(y))),
        })
    }

    /// Whether `(x, y)` lies inside the polygonal area, holes excluded
    pub fn contains(&self, x: f64, y: f64) -> bool {
        match self {
            Geometry::Polygon(rings) => polygon_contains(rings, x, y),
            Geometry::MultiPolygon(polygons) => {
                polygons.iter().any(|rings| polygon_contains(rings, x, y))
            }
            _ => false,
        }
    }

    fn positions(&self) -> Box<dyn Iterator<Item = Position> + '_> {
        match self {
            Geometry::Point(p) => Box::new(std::iter::once(*p)),
            Geometry::MultiPoint(ps) | Geometry::LineString(ps) => Box::new(ps.iter().copied()),
            Geometry::Polygon(rings) => Box::new(rings.iter().flatten().copied()),
            Geometry::MultiPolygon(polygons) => {
                Box::new(polygons.iter().flatten().flatten().copied())
            }
        }
    }
}

fn position(value: &Value) -> Option<Position> {
    match value.as_array()?.as_slice() {
        [x, y, ..] => Some((x.as_f64()?, y.as_f64()?)),
        _ => None,
    }
}

fn positions(value: &Value) -> Option<Vec<Position>> {
    value.as_array()?.iter().map(position).collect()
}

fn rings(value: &Value) -> Option<Vec<Ring>> {
    let rings: Vec<Ring> = value.as_array()?.iter().map(positions).collect::<Option<_>>()?;
    (!rings.is_empty() && rings.iter().all(|r| r.len() >= 3)).then_some(rings)
}

fn polygon_contains(rings: &[Ring], x: f64, y: f64) -> bool {
    match rings.split_first() {
        Some((exterior, holes)) => {
            ring_contains(exterior, x, y) && !holes.iter().any(|hole| ring_contains(hole, x, y))
        }
        None => false,
    }
}

/// Even-odd ray casting test
fn ring_contains(ring: &[Position], x: f64, y: f64) -> bool {
    let mut inside = false;
    let n = ring.len();
    for i in 0..n {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[(i + n - 1) % n];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_point() {
        assert!(GeoJson::is_point(&json!({"type": "Point", "coordinates": [2.13, 42.2]})));
        assert!(!GeoJson::is_point(&json!({"type": "Feature", "properties": null})));
    }

    #[test]
    fn test_is_geometry() {
        assert!(GeoJson::is_geometry(&json!({"type": "Point", "coordinates": [2.13, 42.2]})));
        assert!(GeoJson::is_geometry(&json!({"type": "Point", "coordinates": null})));
        assert!(!GeoJson::is_geometry(&json!({"type": "Point"})));
        assert!(GeoJson::is_geometry(&json!({"type": "GeometryCollection", "geometries": null})));
        assert!(GeoJson::is_geometry(&json!({"type": "GeometryCollection", "geometries": []})));
        assert!(!GeoJson::is_geometry(&json!({"type": "GeometryCollection"})));
        assert!(!GeoJson::is_geometry(&json!({"type": "Feature", "properties": null})));
    }

    #[test]
    fn test_get_type_name() {
        assert_eq!(GeoJson::get_type_name(&json!({"type": "Feature"})), Some("Feature"));
        assert_eq!(GeoJson::get_type_name(&json!({"pype": "Feature"})), None);
        assert_eq!(GeoJson::get_type_name(&json!({})), None);
        assert_eq!(GeoJson::get_type_name(&json!(17)), None);
    }

    #[test]
    fn test_get_feature_geometry() {
        let point = json!({"type": "Point", "coordinates": [2.13, 42.2]});
        assert_eq!(
            GeoJson::get_feature_geometry(&json!({"type": "Feature", "geometry": point})),
            Some(&point)
        );
        assert_eq!(
            GeoJson::get_feature_geometry(&json!({"type": "Pleature", "geometry": point})),
            None
        );
        assert_eq!(
            GeoJson::get_feature_geometry(&json!({"type": "Feature", "geometry": {"type": "Point"}})),
            None
        );
        assert_eq!(
            GeoJson::get_feature_geometry(&json!({"type": "Feature", "geometry": 17})),
            None
        );
    }

    #[test]
    fn test_collections() {
        assert!(GeoJson::is_feature(&json!({"type": "Feature", "geometry": null})));
        assert!(GeoJson::is_feature_collection(&json!({"type": "FeatureCollection", "features": []})));
        assert_eq!(
            GeoJson::get_geometry_collection_geometries(
                &json!({"type": "GeometryCollection", "geometries": null})
            ),
            Some(vec![])
        );
        assert_eq!(
            GeoJson::get_geometry_collection_geometries(&json!({"type": "Point"})),
            None
        );
    }

    #[test]
    fn test_polygon_with_hole() {
        let polygon = Geometry::from_value(&json!({
            "type": "Polygon",
            "coordinates": [
                [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]],
                [[4.0, 4.0], [6.0, 4.0], [6.0, 6.0], [4.0, 6.0], [4.0, 4.0]]
            ]
        }))
        .unwrap();
        assert!(polygon.contains(1.0, 1.0));
        assert!(!polygon.contains(5.0, 5.0));
        assert!(!polygon.contains(11.0, 5.0));
        assert_eq!(polygon.bounds(), Some((0.0, 0.0, 10.0, 10.0)));
    }

    #[test]
    fn test_from_feature_and_errors() {
        let feature = json!({
            "type": "Feature",
            "properties": {},
            "geometry": {"type": "Point", "coordinates": [1.5, 2.5]}
        });
        assert_eq!(Geometry::from_value(&feature).unwrap(), Geometry::Point((1.5, 2.5)));
        assert!(Geometry::from_value(&json!({"type": "Point", "coordinates": [1.5]})).is_err());
        assert!(Geometry::from_value(&json!({"type": "Polygon", "coordinates": [[[0, 0]]]})).is_err());
        assert!(Geometry::from_value(&json!({"type": "Circle", "coordinates": [0, 0]})).is_err());
        assert!(Geometry::from_value(&json!({"type": "MultiLineString", "coordinates": []})).is_err());
    }
}
