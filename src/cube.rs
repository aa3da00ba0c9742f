//! In-memory data cube model: variables, datasets and demo cube generation

use crate::crs::Crs;
use crate::error::{Result, XcubeError};
use crate::types::DataType;
use crate::utils::{format_datetime, parse_datetime, CfTimeUnits};
use chrono::{NaiveDateTime, TimeDelta};
use indexmap::IndexMap;
use ndarray::{ArrayD, Axis, IxDyn, Slice};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

/// Default CF units of generated time coordinates
pub const DEFAULT_TIME_UNITS: &str = "days since 1970-01-01";
/// Default CF calendar of generated time coordinates
pub const DEFAULT_CALENDAR: &str = "proleptic_gregorian";

/// A named-dimension array with attributes
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub dims: Vec<String>,
    pub data: ArrayD<f64>,
    pub dtype: DataType,
    pub attrs: Map<String, Value>,
    pub fill_value: Option<f64>,
    /// Chunk sizes the variable was stored with, if known
    pub chunks: Option<Vec<usize>>,
}

impl Variable {
    /// Create a `float64` variable, one dimension name per array axis
    pub fn new<S: Into<String>>(dims: Vec<S>, data: ArrayD<f64>) -> Result<Self> {
        let dims: Vec<String> = dims.into_iter().map(Into::into).collect();
        if dims.len() != data.ndim() {
            return Err(XcubeError::InvalidDimensions(format!(
                "{} dimension names given for an array of {} dimensions",
                dims.len(),
                data.ndim()
            )));
        }
        Ok(Self {
            dims,
            data,
            dtype: DataType::F64,
            attrs: Map::new(),
            fill_value: None,
            chunks: None,
        })
    }

    /// Create a 1-D variable from values
    pub fn from_vec(dim: impl Into<String>, values: Vec<f64>) -> Self {
        let len = values.len();
        Self {
            dims: vec![dim.into()],
            data: ArrayD::from_shape_vec(IxDyn(&[len]), values)
                .unwrap_or_else(|_| ArrayD::zeros(IxDyn(&[0]))),
            dtype: DataType::F64,
            attrs: Map::new(),
            fill_value: None,
            chunks: None,
        }
    }

    pub fn with_dtype(mut self, dtype: DataType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn with_fill_value(mut self, fill_value: f64) -> Self {
        self.fill_value = Some(fill_value);
        self
    }

    pub fn with_chunks(mut self, chunks: Vec<usize>) -> Self {
        self.chunks = Some(chunks);
        self
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    /// Values of a 1-D variable
    pub fn values_1d(&self) -> Result<Vec<f64>> {
        if self.ndim() != 1 {
            return Err(XcubeError::InvalidDimensions(format!(
                "expected a 1-D variable, got dimensions {:?}",
                self.dims
            )));
        }
        Ok(self.data.iter().copied().collect())
    }

    /// Slice the variable along the given dimensions
    fn slice_dims(&self, slices: &HashMap<&str, Slice>) -> Variable {
        let data = self
            .data
            .slice_each_axis(|ax| {
                slices
                    .get(self.dims[ax.axis.index()].as_str())
                    .copied()
                    .unwrap_or_else(|| Slice::from(..))
            })
            .to_owned();
        Variable {
            data,
            chunks: None,
            ..self.clone()
        }
    }
}

/// A set of variables sharing named dimensions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub dims: IndexMap<String, usize>,
    pub coords: IndexMap<String, Variable>,
    pub data_vars: IndexMap<String, Variable>,
    pub attrs: Map<String, Value>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    fn register_dims(&mut self, name: &str, var: &Variable) -> Result<()> {
        for (dim, &size) in var.dims.iter().zip(var.shape()) {
            match self.dims.get(dim) {
                Some(&existing) if existing != size => {
                    return Err(XcubeError::InvalidDimensions(format!(
                        "variable {name:?} has size {size} along dimension {dim:?}, \
                         expected {existing}"
                    )))
                }
                Some(_) => {}
                None => {
                    self.dims.insert(dim.clone(), size);
                }
            }
        }
        Ok(())
    }

    /// Add or replace a coordinate variable
    pub fn add_coord(&mut self, name: impl Into<String>, var: Variable) -> Result<()> {
        let name = name.into();
        self.register_dims(&name, &var)?;
        self.coords.insert(name, var);
        Ok(())
    }

    /// Add or replace a data variable
    pub fn add_var(&mut self, name: impl Into<String>, var: Variable) -> Result<()> {
        let name = name.into();
        self.register_dims(&name, &var)?;
        self.data_vars.insert(name, var);
        Ok(())
    }

    /// Look up a coordinate or data variable
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.coords.get(name).or_else(|| self.data_vars.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variable(name).is_some()
    }

    pub fn dim_size(&self, dim: &str) -> Option<usize> {
        self.dims.get(dim).copied()
    }

    /// All variables, coordinates first
    pub fn variables(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.coords.iter().chain(self.data_vars.iter())
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    /// Values of the 1-D coordinate variable named like `dim`
    pub fn coord_values(&self, dim: &str) -> Result<Vec<f64>> {
        self.coords
            .get(dim)
            .or_else(|| self.data_vars.get(dim))
            .ok_or_else(|| XcubeError::NotFound(format!("coordinate {dim:?}")))?
            .values_1d()
    }

    /// Names of the horizontal and vertical spatial dimensions, if any
    pub fn spatial_dims(&self) -> Option<(String, String)> {
        let find = |prefixes: &[&str]| {
            self.dims
                .keys()
                .find(|d| {
                    let lower = d.to_lowercase();
                    prefixes.iter().any(|p| lower.starts_with(p))
                })
                .cloned()
        };
        Some((find(&["lon", "x"])?, find(&["lat", "y"])?))
    }

    fn rebuild<F>(&self, f: F) -> Result<Dataset>
    where
        F: Fn(&Variable) -> Result<Option<Variable>>,
    {
        let mut ds = Dataset {
            attrs: self.attrs.clone(),
            ..Dataset::default()
        };
        for (name, var) in &self.coords {
            if let Some(var) = f(var)? {
                ds.add_coord(name.clone(), var)?;
            }
        }
        for (name, var) in &self.data_vars {
            if let Some(var) = f(var)? {
                ds.add_var(name.clone(), var)?;
            }
        }
        let order: HashMap<&str, usize> = self
            .dims
            .keys()
            .enumerate()
            .map(|(i, k)| (k.as_str(), i))
            .collect();
        ds.dims
            .sort_by(|a, _, b, _| order.get(a.as_str()).cmp(&order.get(b.as_str())));
        Ok(ds)
    }

    /// Select index ranges along dimensions
    pub fn isel(&self, ranges: &[(&str, Range<usize>)]) -> Result<Dataset> {
        let mut slices = HashMap::new();
        for (dim, range) in ranges {
            let size = self
                .dim_size(dim)
                .ok_or_else(|| XcubeError::NotFound(format!("dimension {dim:?}")))?;
            if range.start > range.end || range.end > size {
                return Err(XcubeError::OutOfBounds(format!(
                    "range {range:?} exceeds dimension {dim:?} of size {size}"
                )));
            }
            slices.insert(*dim, Slice::from(range.clone()));
        }
        let mut ds = self.rebuild(|var| Ok(Some(var.slice_dims(&slices))))?;
        for (dim, range) in ranges {
            ds.dims.insert(dim.to_string(), range.len());
        }
        Ok(ds)
    }

    /// Take every n-th element along dimensions
    pub fn strided(&self, steps: &[(&str, usize)]) -> Result<Dataset> {
        let mut slices = HashMap::new();
        for (dim, step) in steps {
            if *step == 0 {
                return Err(XcubeError::InvalidValue("step must not be zero".to_string()));
            }
            if !self.dims.contains_key(*dim) {
                return Err(XcubeError::NotFound(format!("dimension {dim:?}")));
            }
            slices.insert(*dim, Slice::new(0, None, *step as isize));
        }
        self.rebuild(|var| Ok(Some(var.slice_dims(&slices))))
    }

    /// Nearest-neighbour resampling to the given dimension sizes.
    ///
    /// Output index `i` of a dimension of size `n` reduced to `m` takes source
    /// index `floor(i * n / m)`. Sizes must not exceed the source sizes.
    pub fn resampled(&self, sizes: &[(&str, usize)]) -> Result<Dataset> {
        let mut indices: HashMap<&str, Vec<usize>> = HashMap::new();
        for (dim, size) in sizes {
            let source = self
                .dim_size(dim)
                .ok_or_else(|| XcubeError::NotFound(format!("dimension {dim:?}")))?;
            if *size == 0 || *size > source {
                return Err(XcubeError::InvalidValue(format!(
                    "cannot resample dimension {dim:?} of size {source} to {size}"
                )));
            }
            let step = source as f64 / *size as f64;
            let selected = (0..*size)
                .map(|i| ((i as f64 * step) as usize).min(source - 1))
                .collect();
            indices.insert(*dim, selected);
        }
        self.rebuild(|var| {
            let mut data = var.data.clone();
            for (axis, dim) in var.dims.iter().enumerate() {
                if let Some(selected) = indices.get(dim.as_str()) {
                    data = data.select(Axis(axis), selected);
                }
            }
            Ok(Some(Variable {
                data,
                chunks: None,
                ..var.clone()
            }))
        })
    }

    /// Select one index along a dimension, dropping the dimension
    pub fn index_select(&self, dim: &str, index: usize) -> Result<Dataset> {
        let size = self
            .dim_size(dim)
            .ok_or_else(|| XcubeError::NotFound(format!("dimension {dim:?}")))?;
        if index >= size {
            return Err(XcubeError::OutOfBounds(format!(
                "index {index} exceeds dimension {dim:?} of size {size}"
            )));
        }
        let mut ds = self.rebuild(|var| {
            Ok(Some(match var.axis_of(dim) {
                Some(axis) => {
                    let mut dims = var.dims.clone();
                    dims.remove(axis);
                    Variable {
                        dims,
                        data: var.data.index_axis(Axis(axis), index).to_owned(),
                        chunks: None,
                        ..var.clone()
                    }
                }
                None => var.clone(),
            }))
        })?;
        ds.dims.shift_remove(dim);
        Ok(ds)
    }

    /// Keep only the named data variables
    pub fn select_vars(&self, names: &[&str]) -> Result<Dataset> {
        if let Some(unknown) = names.iter().find(|n| !self.data_vars.contains_key(**n)) {
            return Err(XcubeError::NotFound(format!("variable {unknown:?}")));
        }
        let mut ds = self.clone();
        ds.data_vars.retain(|name, _| names.contains(&name.as_str()));
        Ok(ds)
    }

    /// Index of the coordinate label nearest to `value`
    pub fn sel_nearest(&self, dim: &str, value: f64) -> Result<usize> {
        nearest_index(&self.coord_values(dim)?, value)
            .ok_or_else(|| XcubeError::OutOfBounds(format!("dimension {dim:?} is empty")))
    }

    /// Index range of coordinate labels within `[lower, upper]`, in either order.
    ///
    /// Open bounds are given as `None`.
    pub fn sel_range(
        &self,
        dim: &str,
        lower: Option<f64>,
        upper: Option<f64>,
    ) -> Result<Range<usize>> {
        let values = self.coord_values(dim)?;
        let (lo, hi) = match (lower, upper) {
            (Some(a), Some(b)) => (a.min(b), a.max(b)),
            (a, b) => (a.unwrap_or(f64::NEG_INFINITY), b.unwrap_or(f64::INFINITY)),
        };
        let inside: Vec<usize> = values
            .iter()
            .enumerate()
            .filter(|(_, v)| **v >= lo && **v <= hi)
            .map(|(i, _)| i)
            .collect();
        Ok(match (inside.first(), inside.last()) {
            (Some(&first), Some(&last)) => first..last + 1,
            _ => 0..0,
        })
    }

    /// Decoded labels of the `time` coordinate
    pub fn time_labels(&self) -> Result<Vec<NaiveDateTime>> {
        let time = self
            .coords
            .get("time")
            .ok_or_else(|| XcubeError::NotFound("coordinate \"time\"".to_string()))?;
        let units = CfTimeUnits::parse(time.attr_str("units").unwrap_or(DEFAULT_TIME_UNITS))?;
        time.values_1d()?.iter().map(|v| units.decode(*v)).collect()
    }

    /// Index of the time label nearest to an ISO 8601 date-time
    pub fn sel_time(&self, label: &str) -> Result<usize> {
        let target = parse_datetime(label)?;
        let labels = self.time_labels()?;
        let offsets: Vec<f64> = labels
            .iter()
            .map(|t| (*t - target).num_milliseconds() as f64)
            .collect();
        nearest_index(&offsets, 0.0)
            .ok_or_else(|| XcubeError::OutOfBounds("dimension \"time\" is empty".to_string()))
    }

    /// Index range of time labels within an optional closed interval
    pub fn sel_time_range(
        &self,
        lower: Option<&str>,
        upper: Option<&str>,
    ) -> Result<Range<usize>> {
        let lower = lower.map(parse_datetime).transpose()?;
        let upper = upper.map(parse_datetime).transpose()?;
        let labels = self.time_labels()?;
        let inside: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, t)| lower.map_or(true, |lo| **t >= lo) && upper.map_or(true, |hi| **t <= hi))
            .map(|(i, _)| i)
            .collect();
        Ok(match (inside.first(), inside.last()) {
            (Some(&first), Some(&last)) => first..last + 1,
            _ => 0..0,
        })
    }
}

/// Index of the value nearest to `target`, first one wins on ties
pub fn nearest_index(values: &[f64], target: f64) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, v)| {
            let distance = (v - target).abs();
            match best {
                Some((_, d)) if d <= distance => best,
                _ => Some((i, distance)),
            }
        })
        .map(|(i, _)| i)
}

/// Value generator for a variable of a generated cube
#[derive(Clone)]
pub enum CubeVariable {
    Constant(f64),
    /// Function of the `(time, y, x)` indexes
    Function(Arc<dyn Fn(usize, usize, usize) -> f64 + Send + Sync>),
}

impl std::fmt::Debug for CubeVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CubeVariable::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            CubeVariable::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Parameters for [`new_cube`]
#[derive(Debug, Clone)]
pub struct NewCubeParams {
    pub title: String,
    pub width: usize,
    pub height: usize,
    pub x_name: String,
    pub y_name: String,
    pub x_start: f64,
    pub y_start: f64,
    pub spatial_res: f64,
    pub inverse_y: bool,
    pub crs: Crs,
    pub time_name: String,
    pub time_start: String,
    pub time_periods: usize,
    pub time_freq_days: f64,
    pub variables: Vec<(String, CubeVariable)>,
}

impl Default for NewCubeParams {
    fn default() -> Self {
        Self {
            title: "Test Cube".to_string(),
            width: 360,
            height: 180,
            x_name: "lon".to_string(),
            y_name: "lat".to_string(),
            x_start: -180.0,
            y_start: -90.0,
            spatial_res: 1.0,
            inverse_y: false,
            crs: Crs::WGS84,
            time_name: "time".to_string(),
            time_start: "2010-01-01T00:00:00".to_string(),
            time_periods: 5,
            time_freq_days: 1.0,
            variables: Vec::new(),
        }
    }
}

impl NewCubeParams {
    pub fn with_variable(mut self, name: impl Into<String>, variable: CubeVariable) -> Self {
        self.variables.push((name.into(), variable));
        self
    }
}

/// Create a regular time/lat/lon demo cube with pixel-centre coordinates
pub fn new_cube(params: &NewCubeParams) -> Result<Dataset> {
    if params.width == 0 || params.height == 0 {
        return Err(XcubeError::InvalidValue(
            "width and height must be positive".to_string(),
        ));
    }
    if params.spatial_res.is_nan() || params.spatial_res <= 0.0 {
        return Err(XcubeError::InvalidValue(
            "spatial_res must be positive".to_string(),
        ));
    }
    let res = params.spatial_res;
    let geographic = params.crs.is_geographic();
    let x_end = params.x_start + params.width as f64 * res;
    let y_end = params.y_start + params.height as f64 * res;
    if geographic && (params.x_start < -180.0 || x_end > 180.0) {
        return Err(XcubeError::InvalidValue(
            "longitude range exceeds [-180, 180]".to_string(),
        ));
    }
    if geographic && (params.y_start < -90.0 || y_end > 90.0) {
        return Err(XcubeError::InvalidValue(
            "latitude range exceeds [-90, 90]".to_string(),
        ));
    }

    let x_values: Vec<f64> = (0..params.width)
        .map(|i| params.x_start + res * (i as f64 + 0.5))
        .collect();
    let mut y_values: Vec<f64> = (0..params.height)
        .map(|j| params.y_start + res * (j as f64 + 0.5))
        .collect();
    if params.inverse_y {
        y_values.reverse();
    }

    let units = CfTimeUnits::parse(DEFAULT_TIME_UNITS)?;
    let time_start = parse_datetime(&params.time_start)?;
    let period_millis = params.time_freq_days * 86_400_000.0;
    if !period_millis.is_finite() || period_millis <= 0.0 || period_millis >= i64::MAX as f64 {
        return Err(XcubeError::InvalidValue(
            "time_freq_days must be positive".to_string(),
        ));
    }
    let period = TimeDelta::try_milliseconds(period_millis as i64).ok_or_else(|| {
        XcubeError::InvalidValue("time_freq_days is out of range".to_string())
    })?;
    let time_at = |k: usize, offset: TimeDelta| {
        i32::try_from(k)
            .ok()
            .and_then(|k| period.checked_mul(k))
            .and_then(|delta| delta.checked_add(&offset))
            .and_then(|delta| time_start.checked_add_signed(delta))
            .ok_or_else(|| {
                XcubeError::OutOfBounds(format!(
                    "time period {k} after {} is out of range",
                    params.time_start
                ))
            })
    };
    let time_end = time_at(params.time_periods, TimeDelta::zero())?;
    let time_values: Vec<f64> = (0..params.time_periods)
        .map(|k| time_at(k, period / 2).map(|t| units.encode(&t)))
        .collect::<Result<_>>()?;

    let mut ds = Dataset::new();
    let (x_attrs, y_attrs) = if geographic {
        (
            json!({"units": "degrees_east", "long_name": "longitude", "standard_name": "longitude"}),
            json!({"units": "degrees_north", "long_name": "latitude", "standard_name": "latitude"}),
        )
    } else {
        (
            json!({"units": "m", "long_name": "x coordinate of projection", "standard_name": "projection_x_coordinate"}),
            json!({"units": "m", "long_name": "y coordinate of projection", "standard_name": "projection_y_coordinate"}),
        )
    };
    ds.add_coord(
        params.x_name.clone(),
        with_attrs(Variable::from_vec(params.x_name.clone(), x_values), x_attrs),
    )?;
    ds.add_coord(
        params.y_name.clone(),
        with_attrs(Variable::from_vec(params.y_name.clone(), y_values), y_attrs),
    )?;
    ds.add_coord(
        params.time_name.clone(),
        Variable::from_vec(params.time_name.clone(), time_values)
            .with_attr("units", DEFAULT_TIME_UNITS)
            .with_attr("calendar", DEFAULT_CALENDAR)
            .with_attr("standard_name", "time")
            .with_attr("long_name", "time"),
    )?;
    if !geographic {
        let crs_var = ArrayD::zeros(IxDyn(&[]));
        ds.add_var(
            "crs",
            Variable::new(Vec::<String>::new(), crs_var)?
                .with_dtype(DataType::I32)
                .with_attr("spatial_ref", params.crs.name()),
        )?;
    }

    let shape = IxDyn(&[params.time_periods, params.height, params.width]);
    for (name, init) in &params.variables {
        let data = match init {
            CubeVariable::Constant(value) => ArrayD::from_elem(shape.clone(), *value),
            CubeVariable::Function(f) => {
                ArrayD::from_shape_fn(shape.clone(), |idx| f(idx[0], idx[1], idx[2]))
            }
        };
        let dims = vec![
            params.time_name.clone(),
            params.y_name.clone(),
            params.x_name.clone(),
        ];
        ds.add_var(name.clone(), Variable::new(dims, data)?)?;
    }

    let (x_key, y_key) = if geographic { ("lon", "lat") } else { ("x", "y") };
    let attrs = json!({
        "Conventions": "CF-1.7",
        "title": params.title,
        "time_coverage_start": format_datetime(&time_start),
        "time_coverage_end": format_datetime(&time_end),
        format!("geospatial_{x_key}_min"): params.x_start,
        format!("geospatial_{x_key}_max"): x_end,
        format!("geospatial_{x_key}_units"): if geographic { "degrees_east" } else { "m" },
        format!("geospatial_{x_key}_resolution"): res,
        format!("geospatial_{y_key}_min"): params.y_start,
        format!("geospatial_{y_key}_max"): y_end,
        format!("geospatial_{y_key}_units"): if geographic { "degrees_north" } else { "m" },
        format!("geospatial_{y_key}_resolution"): res,
    });
    if let Value::Object(attrs) = attrs {
        ds.attrs = attrs;
    }
    Ok(ds)
}

fn with_attrs(mut var: Variable, attrs: Value) -> Variable {
    if let Value::Object(attrs) = attrs {
        var.attrs.extend(attrs);
    }
    var
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube() -> Dataset {
        let params = NewCubeParams::default()
            .with_variable("precipitation", CubeVariable::Constant(0.4))
            .with_variable(
                "index",
                CubeVariable::Function(Arc::new(|t, y, x| (t * 1000 + y * 10 + x) as f64)),
            );
        new_cube(&params).unwrap()
    }

    #[test]
    fn test_new_cube_defaults() {
        let ds = cube();
        assert_eq!(
            ds.dims.iter().map(|(k, v)| (k.as_str(), *v)).collect::<Vec<_>>(),
            vec![("lon", 360), ("lat", 180), ("time", 5)]
        );
        let lon = ds.coord_values("lon").unwrap();
        assert_eq!(lon[0], -179.5);
        assert_eq!(lon[359], 179.5);
        let lat = ds.coord_values("lat").unwrap();
        assert_eq!(lat[0], -89.5);
        assert_eq!(ds.attr_str("Conventions"), Some("CF-1.7"));
        assert_eq!(ds.attr_str("time_coverage_start"), Some("2010-01-01T00:00:00Z"));
        assert_eq!(ds.attr_str("time_coverage_end"), Some("2010-01-06T00:00:00Z"));
        assert_eq!(ds.attrs["geospatial_lon_min"], json!(-180.0));

        let labels = ds.time_labels().unwrap();
        assert_eq!(format_datetime(&labels[0]), "2010-01-01T12:00:00Z");
        assert_eq!(format_datetime(&labels[4]), "2010-01-05T12:00:00Z");

        let var = &ds.data_vars["precipitation"];
        assert_eq!(var.shape(), &[5, 180, 360]);
        assert_eq!(var.data[[2, 10, 20]], 0.4);
        assert_eq!(ds.data_vars["index"].data[[1, 2, 3]], 1023.0);
    }

    #[test]
    fn test_new_cube_inverse_y() {
        let params = NewCubeParams {
            width: 4,
            height: 2,
            spatial_res: 10.0,
            inverse_y: true,
            ..NewCubeParams::default()
        };
        let ds = new_cube(&params).unwrap();
        assert_eq!(ds.coord_values("lat").unwrap(), vec![-75.0, -85.0]);
    }

    #[test]
    fn test_new_cube_invalid() {
        let params = NewCubeParams {
            x_start: -200.0,
            ..NewCubeParams::default()
        };
        assert!(new_cube(&params).is_err());
        let params = NewCubeParams {
            width: 0,
            ..NewCubeParams::default()
        };
        assert!(new_cube(&params).is_err());
        let params = NewCubeParams {
            time_freq_days: 1.0e12,
            ..NewCubeParams::default()
        };
        assert!(new_cube(&params).is_err());
        let params = NewCubeParams {
            width: 2,
            height: 2,
            time_periods: 1_000_000,
            time_freq_days: 1.0e6,
            ..NewCubeParams::default()
        };
        assert!(matches!(new_cube(&params), Err(XcubeError::OutOfBounds(_))));
    }

    #[test]
    fn test_time_labels_out_of_range() {
        let mut ds = Dataset::new();
        ds.add_coord(
            "time",
            Variable::from_vec("time", vec![14610.5, 1.0e9])
                .with_attr("units", "days since 1970-01-01"),
        )
        .unwrap();
        assert!(matches!(ds.time_labels(), Err(XcubeError::OutOfBounds(_))));
        assert!(ds.sel_time("2010-01-01").is_err());
    }

    #[test]
    fn test_add_var_checks_dims() {
        let mut ds = Dataset::new();
        ds.add_coord("x", Variable::from_vec("x", vec![0.0, 1.0, 2.0]))
            .unwrap();
        let result = ds.add_var("v", Variable::from_vec("x", vec![0.0, 1.0]));
        assert!(matches!(result, Err(XcubeError::InvalidDimensions(_))));
        assert!(Variable::new(vec!["x", "y"], ArrayD::zeros(IxDyn(&[3]))).is_err());
    }

    #[test]
    fn test_isel_and_strided() {
        let ds = cube();
        let subset = ds.isel(&[("lon", 10..20), ("time", 1..3)]).unwrap();
        assert_eq!(subset.dim_size("lon"), Some(10));
        assert_eq!(subset.dim_size("time"), Some(2));
        assert_eq!(subset.dim_size("lat"), Some(180));
        assert_eq!(subset.data_vars["index"].data[[0, 0, 0]], 1010.0);
        assert_eq!(subset.coord_values("lon").unwrap()[0], -169.5);
        assert!(ds.isel(&[("lon", 0..400)]).is_err());

        let coarse = ds.strided(&[("lon", 2), ("lat", 2)]).unwrap();
        assert_eq!(coarse.dim_size("lon"), Some(180));
        assert_eq!(coarse.dim_size("lat"), Some(90));
        assert_eq!(coarse.data_vars["index"].data[[0, 1, 1]], 22.0);
        assert_eq!(
            coarse.dims.keys().collect::<Vec<_>>(),
            vec!["lon", "lat", "time"]
        );
    }

    #[test]
    fn test_resampled() {
        let ds = cube();
        let resampled = ds.resampled(&[("lon", 240), ("lat", 90)]).unwrap();
        assert_eq!(resampled.dim_size("lon"), Some(240));
        assert_eq!(resampled.dim_size("lat"), Some(90));
        assert_eq!(resampled.dim_size("time"), Some(5));
        let lon = resampled.coord_values("lon").unwrap();
        assert_eq!(lon.len(), 240);
        // 360 / 240 = 1.5, so source indices 0, 1, 3, 4, 6
        assert_eq!(&lon[..5], &[-179.5, -178.5, -176.5, -175.5, -173.5]);
        assert_eq!(
            resampled.dims.keys().collect::<Vec<_>>(),
            vec!["lon", "lat", "time"]
        );

        let same = ds.resampled(&[("lon", 360)]).unwrap();
        assert_eq!(same.data_vars["index"].data, ds.data_vars["index"].data);
        assert!(ds.resampled(&[("lon", 361)]).is_err());
        assert!(ds.resampled(&[("lon", 0)]).is_err());
        assert!(ds.resampled(&[("x", 10)]).is_err());
    }

    #[test]
    fn test_index_select() {
        let ds = cube();
        let slice = ds.index_select("time", 2).unwrap();
        assert!(!slice.dims.contains_key("time"));
        assert_eq!(slice.data_vars["index"].dims, vec!["lat", "lon"]);
        assert_eq!(slice.data_vars["index"].data[[1, 1]], 2011.0);
        assert!(ds.index_select("time", 5).is_err());
    }

    #[test]
    fn test_sel() {
        let ds = cube();
        assert_eq!(ds.sel_nearest("lon", 0.2).unwrap(), 180);
        assert_eq!(ds.sel_nearest("lat", -1000.0).unwrap(), 0);
        assert_eq!(ds.sel_range("lat", Some(10.0), Some(20.0)).unwrap(), 100..110);
        assert_eq!(ds.sel_range("lat", Some(20.0), Some(10.0)).unwrap(), 100..110);
        assert_eq!(ds.sel_range("lat", None, Some(-88.0)).unwrap(), 0..2);
        assert_eq!(ds.sel_range("lat", Some(100.0), None).unwrap(), 0..0);
        assert_eq!(ds.sel_time("2010-01-03").unwrap(), 1);
        assert_eq!(ds.sel_time("2010-01-03 13:00:00").unwrap(), 2);
        assert_eq!(
            ds.sel_time_range(Some("2010-01-02"), Some("2010-01-04")).unwrap(),
            1..3
        );
        assert!(ds.sel_time("not a time").is_err());
    }

    #[test]
    fn test_select_vars() {
        let ds = cube();
        let selected = ds.select_vars(&["index"]).unwrap();
        assert_eq!(selected.data_vars.len(), 1);
        assert_eq!(selected.coords.len(), 3);
        assert!(ds.select_vars(&["nope"]).is_err());
    }

    #[test]
    fn test_spatial_dims() {
        let ds = cube();
        assert_eq!(
            ds.spatial_dims(),
            Some(("lon".to_string(), "lat".to_string()))
        );
        assert_eq!(Dataset::new().spatial_dims(), None);
    }
}
