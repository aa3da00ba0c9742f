//! OGC API - Coverages: domain sets, range types, envelopes and subsets

use crate::crs::Crs;
use crate::cube::Dataset;
use crate::error::{Result, XcubeError};
use crate::gridmapping::crs_from_dataset;
use crate::server::api::{ApiError, ApiResult};
use crate::server::context::DatasetsContext;
use crate::types::DataType;
use crate::utils::{format_datetime, CfTimeUnits};
use indexmap::IndexMap;
use log::debug;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::ops::Range;

/// Largest number of spatial cells a coverage request may return
pub const COVERAGE_SIZE_LIMIT: usize = 4000 * 4000;

const TIME_DIM: &str = "time";

/// A value of a `subset` axis specifier
#[derive(Debug, Clone, PartialEq)]
pub enum SubsetValue {
    /// `Axis(value)`
    Point(String),
    /// `Axis(low:high)`, `*` gives an open bound
    Range(Option<String>, Option<String>),
}

/// The `datetime` parameter
#[derive(Debug, Clone, PartialEq)]
pub enum DatetimeSpec {
    Instant(String),
    /// `start/end`, `..` or an empty bound is open
    Interval(Option<String>, Option<String>),
}

/// Parsed query parameters of a coverage request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageRequest {
    pub bbox: Option<[f64; 4]>,
    pub bbox_crs: Crs,
    pub datetime: Option<DatetimeSpec>,
    pub subset: Option<IndexMap<String, SubsetValue>>,
    pub subset_crs: Crs,
    pub properties: Option<Vec<String>>,
    pub scale_factor: Option<f64>,
    pub scale_axes: Option<IndexMap<String, f64>>,
    pub scale_size: Option<IndexMap<String, usize>>,
    pub crs: Option<Crs>,
    pub format: Option<String>,
}

impl CoverageRequest {
    /// Parse query arguments; malformed values give `InvalidValue`
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self> {
        let mut request = CoverageRequest {
            bbox_crs: Crs::Crs84,
            subset_crs: Crs::Crs84,
            ..CoverageRequest::default()
        };
        if let Some(bbox) = query.get("bbox") {
            request.bbox = Some(parse_bbox(bbox)?);
        }
        if let Some(crs) = query.get("bbox-crs") {
            request.bbox_crs = parse_crs(crs)?;
        }
        if let Some(datetime) = query.get("datetime") {
            request.datetime = Some(parse_datetime_spec(datetime)?);
        }
        if let Some(subset) = query.get("subset") {
            request.subset = Some(parse_subset(subset)?);
        }
        if let Some(crs) = query.get("subset-crs") {
            request.subset_crs = parse_crs(crs)?;
        }
        if let Some(properties) = query.get("properties") {
            request.properties = Some(
                properties
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }
        if let Some(factor) = query.get("scale-factor") {
            let factor = parse_positive(factor, "scale-factor")?;
            request.scale_factor = Some(factor);
        }
        if let Some(axes) = query.get("scale-axes") {
            let mut scale_axes = IndexMap::new();
            for (axis, value) in parse_axis_values(axes)? {
                scale_axes.insert(axis, parse_positive(&value, "scale-axes")?);
            }
            request.scale_axes = Some(scale_axes);
        }
        if let Some(sizes) = query.get("scale-size") {
            let mut scale_size = IndexMap::new();
            for (axis, value) in parse_axis_values(sizes)? {
                let size = value
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| invalid(format!("invalid scale-size value {value:?}")))?;
                scale_size.insert(axis, size);
            }
            request.scale_size = Some(scale_size);
        }
        if let Some(crs) = query.get("crs") {
            request.crs = Some(parse_crs(crs)?);
        }
        request.format = query.get("f").cloned();
        Ok(request)
    }
}

fn invalid(message: String) -> XcubeError {
    XcubeError::InvalidValue(message)
}

fn parse_bbox(text: &str) -> Result<[f64; 4]> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| invalid(format!("invalid bbox {text:?}")))?;
    <[f64; 4]>::try_from(values)
        .map_err(|_| invalid(format!("bbox must have 4 values, got {text:?}")))
}

/// Accepts plain names, URIs and bracketed CURIEs like `[EPSG:4326]`
fn parse_crs(text: &str) -> Result<Crs> {
    let text = text.trim();
    let text = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(text);
    Crs::parse(text)
}

fn parse_positive(text: &str, name: &str) -> Result<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| invalid(format!("invalid {name} value {text:?}")))
}

fn parse_datetime_spec(text: &str) -> Result<DatetimeSpec> {
    let bound = |s: &str| {
        let s = s.trim();
        (!s.is_empty() && s != "..").then(|| s.to_string())
    };
    match text.split_once('/') {
        Some((start, end)) => {
            let (start, end) = (bound(start), bound(end));
            if start.is_none() && end.is_none() {
                return Err(invalid(format!("invalid datetime interval {text:?}")));
            }
            Ok(DatetimeSpec::Interval(start, end))
        }
        None => bound(text)
            .map(DatetimeSpec::Instant)
            .ok_or_else(|| invalid(format!("invalid datetime {text:?}"))),
    }
}

/// Split `A(x),B("y:z")` into `("A", "x")` and `("B", "\"y:z\"")`
fn split_axis_specifiers(text: &str) -> Result<Vec<(String, String)>> {
    let mut items = Vec::new();
    let mut rest = text.trim();
    while !rest.is_empty() {
        let open = rest
            .find('(')
            .ok_or_else(|| invalid(format!("missing \"(\" in {rest:?}")))?;
        let axis = rest[..open].trim();
        if axis.is_empty() {
            return Err(invalid(format!("missing axis name in {text:?}")));
        }
        let mut in_quotes = false;
        let mut close = None;
        for (i, c) in rest[open + 1..].char_indices() {
            match c {
                '"' => in_quotes = !in_quotes,
                ')' if !in_quotes => {
                    close = Some(open + 1 + i);
                    break;
                }
                _ => {}
            }
        }
        let close = close.ok_or_else(|| invalid(format!("missing \")\" in {rest:?}")))?;
        items.push((axis.to_string(), rest[open + 1..close].trim().to_string()));
        rest = rest[close + 1..].trim_start();
        if let Some(next) = rest.strip_prefix(',') {
            rest = next.trim_start();
        } else if !rest.is_empty() {
            return Err(invalid(format!("unexpected {rest:?} in {text:?}")));
        }
    }
    Ok(items)
}

fn unquote(text: &str) -> &str {
    let text = text.trim();
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
}

fn parse_axis_values(text: &str) -> Result<Vec<(String, String)>> {
    Ok(split_axis_specifiers(text)?
        .into_iter()
        .map(|(axis, value)| (axis, unquote(&value).to_string()))
        .collect())
}

/// Parse a `subset` parameter such as `Lat(10:20),time("2010-01-02")`
pub fn parse_subset(text: &str) -> Result<IndexMap<String, SubsetValue>> {
    let mut subset = IndexMap::new();
    for (axis, value) in split_axis_specifiers(text)? {
        let mut in_quotes = false;
        let colon = value.char_indices().find_map(|(i, c)| match c {
            '"' => {
                in_quotes = !in_quotes;
                None
            }
            ':' if !in_quotes => Some(i),
            _ => None,
        });
        let spec = match colon {
            Some(i) => {
                let bound = |s: &str| {
                    let s = unquote(s);
                    (s != "*").then(|| s.to_string())
                };
                SubsetValue::Range(bound(&value[..i]), bound(&value[i + 1..]))
            }
            None => SubsetValue::Point(unquote(&value).to_string()),
        };
        if subset.insert(axis.clone(), spec).is_some() {
            return Err(invalid(format!("axis {axis:?} is subset more than once")));
        }
    }
    Ok(subset)
}

fn prefix3(name: &str) -> String {
    name.chars().take(3).collect::<String>().to_lowercase()
}

fn is_h_name(name: &str) -> bool {
    matches!(prefix3(name).as_str(), "x" | "e" | "lon" | "eas")
}

fn is_v_name(name: &str) -> bool {
    matches!(prefix3(name).as_str(), "y" | "n" | "lat" | "nor")
}

/// Horizontal and vertical dimension names of a dataset
fn spatial_dims(ds: &Dataset) -> ApiResult<(String, String)> {
    ds.spatial_dims()
        .ok_or_else(|| ApiError::bad_request("Dataset has no spatial dimensions"))
}

/// Map a CRS axis name like `Lat`, `E` or `Northing` to a dimension name
pub fn axis_to_dim(axis_name: &str, ds: &Dataset, crs: &Crs) -> ApiResult<String> {
    enum Side {
        H,
        V,
    }
    let side = crs
        .axis_info()
        .into_iter()
        .find(|axis| axis.abbrev == axis_name || axis.name == axis_name)
        .and_then(|axis| {
            let abbrev = prefix3(axis.abbrev);
            let name = axis.name.to_lowercase();
            if matches!(abbrev.as_str(), "x" | "e" | "lon")
                || matches!(name.as_str(), "easting" | "geocentric x")
                || axis.direction == "east"
            {
                Some(Side::H)
            } else if matches!(abbrev.as_str(), "y" | "n" | "lat")
                || matches!(name.as_str(), "northing" | "geocentric y")
                || axis.direction == "north"
            {
                Some(Side::V)
            } else {
                None
            }
        })
        .or_else(|| {
            if is_h_name(axis_name) {
                Some(Side::H)
            } else if is_v_name(axis_name) {
                Some(Side::V)
            } else {
                None
            }
        });
    if let Some(side) = side {
        let (h_dim, v_dim) = spatial_dims(ds)?;
        return Ok(match side {
            Side::H => h_dim,
            Side::V => v_dim,
        });
    }
    if ds.dims.contains_key(axis_name) {
        return Ok(axis_name.to_string());
    }
    ds.dims
        .keys()
        .find(|d| d.eq_ignore_ascii_case(axis_name))
        .cloned()
        .ok_or_else(|| {
            ApiError::bad_request(format!(
                "Couldn't find a dataset dimension corresponding to the axis \"{axis_name}\"."
            ))
        })
}

/// Swap a vertical range whose direction differs from the coordinate's
pub fn correct_inverted_y_range(ds: &Dataset, dim: &str, range: (f64, f64)) -> (f64, f64) {
    let (y0, y1) = range;
    if !matches!(prefix3(dim).as_str(), "lat" | "nor" | "y") {
        return range;
    }
    let Ok(values) = ds.coord_values(dim) else {
        return range;
    };
    match (values.first(), values.last()) {
        (Some(first), Some(last)) if (y0 < y1) != (first < last) => (y1, y0),
        _ => range,
    }
}

/// Index range of a label slice, following the coordinate's direction.
///
/// On a descending coordinate `start` must be the larger label.
fn label_slice(
    ds: &Dataset,
    dim: &str,
    start: Option<f64>,
    stop: Option<f64>,
) -> Result<Range<usize>> {
    let values = ds.coord_values(dim)?;
    let ascending = values.len() < 2 || values[0] <= values[values.len() - 1];
    let inside = |v: f64| {
        if ascending {
            start.map_or(true, |s| v >= s) && stop.map_or(true, |s| v <= s)
        } else {
            start.map_or(true, |s| v <= s) && stop.map_or(true, |s| v >= s)
        }
    };
    let first = values.iter().position(|v| inside(*v));
    let last = values.iter().rposition(|v| inside(*v));
    Ok(match (first, last) {
        (Some(first), Some(last)) => first..last + 1,
        _ => 0..0,
    })
}

fn select_range(ds: &Dataset, dim: &str, lo: Option<f64>, hi: Option<f64>) -> ApiResult<Dataset> {
    let (lo, hi) = match (lo, hi) {
        (Some(lo), Some(hi)) => {
            let (lo, hi) = correct_inverted_y_range(ds, dim, (lo, hi));
            (Some(lo), Some(hi))
        }
        bounds => bounds,
    };
    let range = label_slice(ds, dim, lo, hi)?;
    Ok(ds.isel(&[(dim, range)])?)
}

/// CRSs whose coordinates need no transformation between each other
fn is_compatible_crs(a: &Crs, b: &Crs) -> bool {
    a == b || (a.is_geographic() && b.is_geographic())
}

fn check_compatible_crs(given: &Crs, native: &Crs, param: &str) -> ApiResult<()> {
    if is_compatible_crs(given, native) {
        Ok(())
    } else {
        Err(ApiError::not_implemented(format!(
            "Transforming {param} from {given} to {native} is not supported"
        )))
    }
}

fn parse_label(value: &str, axis: &str) -> ApiResult<f64> {
    value.trim().parse::<f64>().map_err(|_| {
        ApiError::bad_request(format!("Invalid value {value:?} for axis \"{axis}\""))
    })
}

fn apply_subset(
    ds: Dataset,
    subset: &IndexMap<String, SubsetValue>,
    subset_crs: &Crs,
) -> ApiResult<Dataset> {
    let native_crs = crs_from_dataset(&ds);
    let mut ds = ds;
    for (axis, value) in subset {
        if axis == TIME_DIM {
            ds = match value {
                SubsetValue::Point(label) => {
                    let index = ds.sel_time(label)?;
                    ds.index_select(TIME_DIM, index)?
                }
                SubsetValue::Range(lo, hi) => {
                    let range = ds.sel_time_range(lo.as_deref(), hi.as_deref())?;
                    ds.isel(&[(TIME_DIM, range)])?
                }
            };
            continue;
        }
        let geographic = is_h_name(axis) || is_v_name(axis);
        if geographic {
            check_compatible_crs(subset_crs, &native_crs, "subset")?;
        }
        let dim = axis_to_dim(axis, &ds, &native_crs)?;
        ds = match value {
            SubsetValue::Point(label) => {
                let index = ds.sel_nearest(&dim, parse_label(label, axis)?)?;
                if geographic {
                    ds.isel(&[(dim.as_str(), index..index + 1)])?
                } else {
                    ds.index_select(&dim, index)?
                }
            }
            SubsetValue::Range(lo, hi) => {
                let lo = lo.as_deref().map(|v| parse_label(v, axis)).transpose()?;
                let hi = hi.as_deref().map(|v| parse_label(v, axis)).transpose()?;
                select_range(&ds, &dim, lo, hi)?
            }
        };
    }
    Ok(ds)
}

fn apply_bbox(ds: &Dataset, bbox: &[f64; 4], bbox_crs: &Crs) -> ApiResult<Dataset> {
    check_compatible_crs(bbox_crs, &crs_from_dataset(ds), "bbox")?;
    let (h_dim, v_dim) = spatial_dims(ds)?;
    let ds = select_range(ds, &h_dim, Some(bbox[0]), Some(bbox[2]))?;
    select_range(&ds, &v_dim, Some(bbox[1]), Some(bbox[3]))
}

fn check_coverage_size(ds: &Dataset) -> ApiResult<()> {
    let (h_dim, v_dim) = spatial_dims(ds)?;
    let h_size = ds.dim_size(&h_dim).unwrap_or(0);
    let v_size = ds.dim_size(&v_dim).unwrap_or(0);
    for (dim, size) in [(&h_dim, h_size), (&v_dim, v_size)] {
        if size == 0 {
            return Err(ApiError::not_found(format!(
                "Requested coverage contains no data: {dim} has zero size."
            )));
        }
    }
    if h_size * v_size > COVERAGE_SIZE_LIMIT {
        return Err(ApiError::content_too_large(format!(
            "Requested coverage is too large: {h_size} × {v_size} > {COVERAGE_SIZE_LIMIT}."
        )));
    }
    Ok(())
}

/// Scale and size of a coverage after applying the scaling parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageScaling {
    /// Scale factors `(x, y)`
    pub scale: (f64, f64),
    /// Output size `(width, height)`
    pub size: (usize, usize),
}

impl CoverageScaling {
    pub fn new(request: &CoverageRequest, crs: &Crs, ds: &Dataset) -> ApiResult<Self> {
        let (h_dim, v_dim) = spatial_dims(ds)?;
        let width = ds.dim_size(&h_dim).unwrap_or(0);
        let height = ds.dim_size(&v_dim).unwrap_or(0);
        for (dim, size) in [(&h_dim, width), (&v_dim, height)] {
            if size == 0 {
                return Err(ApiError::not_found(format!(
                    "Coverage has no data: {dim} has zero size."
                )));
            }
        }
        let (w, h) = (width as f64, height as f64);
        let sized = |scale: (f64, f64)| {
            (
                ((w / scale.0).round() as usize).max(1),
                ((h / scale.1).round() as usize).max(1),
            )
        };

        if let Some(factor) = request.scale_factor {
            let scale = (factor, factor);
            return Ok(Self {
                scale,
                size: sized(scale),
            });
        }
        if let Some(axes) = &request.scale_axes {
            let mut scale = (1.0, 1.0);
            for (axis, factor) in axes {
                let dim = axis_to_dim(axis, ds, crs)?;
                if dim == h_dim {
                    scale.0 = *factor;
                } else if dim == v_dim {
                    scale.1 = *factor;
                }
            }
            return Ok(Self {
                scale,
                size: sized(scale),
            });
        }
        if let Some(sizes) = &request.scale_size {
            let mut size = (width, height);
            for (axis, value) in sizes {
                let dim = axis_to_dim(axis, ds, crs)?;
                if dim == h_dim {
                    size.0 = *value;
                } else if dim == v_dim {
                    size.1 = *value;
                }
            }
            return Ok(Self {
                scale: (w / size.0 as f64, h / size.1 as f64),
                size,
            });
        }
        Ok(Self {
            scale: (1.0, 1.0),
            size: (width, height),
        })
    }

    pub fn is_identity(&self) -> bool {
        self.scale == (1.0, 1.0)
    }
}

/// A subset coverage with its bounding box in the output CRS axis order
#[derive(Debug, Clone)]
pub struct CoverageData {
    pub dataset: Dataset,
    pub bbox: [f64; 4],
    pub crs: Crs,
}

/// Bounding box from the outer spatial labels, with ascending y
pub fn get_bbox_from_dataset(ds: &Dataset) -> ApiResult<[f64; 4]> {
    let (h_dim, v_dim) = spatial_dims(ds)?;
    let h = ds.coord_values(&h_dim)?;
    let v = ds.coord_values(&v_dim)?;
    match (h.first(), h.last(), v.first(), v.last()) {
        (Some(&x0), Some(&x1), Some(&y0), Some(&y1)) => Ok([x0, y0.min(y1), x1, y0.max(y1)]),
        _ => Err(ApiError::not_found("Coverage contains no data")),
    }
}

/// Subset, time-select and scale a dataset according to a request
pub fn coverage_data(
    ds: &Dataset,
    request: &CoverageRequest,
    collection_id: &str,
) -> ApiResult<CoverageData> {
    let native_crs = crs_from_dataset(ds);
    let final_crs = request.crs.clone().unwrap_or_else(|| native_crs.clone());
    check_compatible_crs(&final_crs, &native_crs, "the coverage")?;
    let mut ds = ds.clone();

    if let Some(properties) = &request.properties {
        let unknown: Vec<&str> = properties
            .iter()
            .filter(|p| !ds.data_vars.contains_key(p.as_str()))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(ApiError::bad_request(format!(
                "The following properties are not present in the coverage {collection_id}: {}",
                unknown.join(", ")
            )));
        }
        let names: Vec<&str> = properties.iter().map(String::as_str).collect();
        ds = ds.select_vars(&names)?;
    }

    if let Some(datetime) = &request.datetime {
        if !ds.dims.contains_key(TIME_DIM) {
            return Err(ApiError::bad_request(format!(
                "\"datetime\" parameter invalid for coverage \"{collection_id}\", \
                 which has no \"time\" dimension."
            )));
        }
        ds = match datetime {
            DatetimeSpec::Instant(label) => {
                let index = ds.sel_time(label)?;
                ds.index_select(TIME_DIM, index)?
            }
            DatetimeSpec::Interval(start, end) => {
                let range = ds.sel_time_range(start.as_deref(), end.as_deref())?;
                ds.isel(&[(TIME_DIM, range)])?
            }
        };
    }

    if let Some(subset) = &request.subset {
        ds = apply_subset(ds, subset, &request.subset_crs)?;
    }
    if let Some(bbox) = &request.bbox {
        ds = apply_bbox(&ds, bbox, &request.bbox_crs)?;
    }

    check_coverage_size(&ds)?;

    let scaling = CoverageScaling::new(request, &native_crs, &ds)?;
    if !scaling.is_identity() {
        if scaling.scale.0 < 1.0 || scaling.scale.1 < 1.0 {
            return Err(ApiError::not_implemented(
                "Scaling a coverage up is not supported",
            ));
        }
        let (h_dim, v_dim) = spatial_dims(&ds)?;
        let sizes = [
            (h_dim.as_str(), scaling.size.0),
            (v_dim.as_str(), scaling.size.1),
        ];
        debug!("scaling coverage {collection_id} to sizes {sizes:?}");
        ds = ds.resampled(&sizes)?;
    }

    let mut bbox = get_bbox_from_dataset(&ds)?;
    if !final_crs.is_xy() {
        bbox = [bbox[1], bbox[0], bbox[3], bbox[2]];
    }
    Ok(CoverageData {
        dataset: ds,
        bbox,
        crs: final_crs,
    })
}

/// Coverage data of a dataset for the given query arguments
pub async fn get_coverage_data(
    ctx: &DatasetsContext,
    collection_id: &str,
    query: &HashMap<String, String>,
) -> ApiResult<CoverageData> {
    let ds = ctx.get_dataset(collection_id).await?;
    let request =
        CoverageRequest::from_query(query).map_err(|e| ApiError::bad_request(e.to_string()))?;
    coverage_data(&ds, &request, collection_id)
}

/// The `units` attribute of a coordinate, `unknown` if absent
pub fn get_units(ds: &Dataset, dim: &str) -> String {
    ds.coords
        .get(dim)
        .and_then(|c| c.attr_str("units"))
        .unwrap_or("unknown")
        .to_string()
}

pub fn dtype_to_opengis_datatype(dtype: DataType) -> String {
    dtype.to_opengis_data_type()
}

fn axis_bound(ds: &Dataset, dim: &str, value: f64) -> Value {
    if dim == TIME_DIM {
        if let Ok(dt) = CfTimeUnits::parse(&get_units(ds, dim)).and_then(|u| u.decode(value)) {
            return json!(format_datetime(&dt));
        }
    }
    json!(value)
}

fn axis_properties(ds: &Dataset, dim: &str) -> Value {
    let values = ds
        .coord_values(dim)
        .unwrap_or_else(|_| (0..ds.dim_size(dim).unwrap_or(0)).map(|i| i as f64).collect());
    let (first, last) = match (values.first(), values.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => (f64::NAN, f64::NAN),
    };
    let resolution = if values.is_empty() {
        0.0
    } else {
        ((last - first) / values.len() as f64).abs()
    };
    json!({
        "type": "RegularAxis",
        "axisLabel": dim,
        "lowerBound": axis_bound(ds, dim, first),
        "upperBound": axis_bound(ds, dim, last),
        "resolution": resolution,
        "uomLabel": get_units(ds, dim),
    })
}

fn axes_properties(ds: &Dataset) -> Vec<Value> {
    ds.dims.keys().map(|dim| axis_properties(ds, dim)).collect()
}

/// Domain set of a dataset-backed coverage
pub fn coverage_domainset(ds: &Dataset) -> Value {
    let axis_labels: Vec<&String> = ds.dims.keys().collect();
    let grid_limits = json!({
        "type": "GridLimits",
        "srsName": format!("http://www.opengis.net/def/crs/OGC/0/Index{}D", ds.dims.len()),
        "axisLabels": axis_labels,
        "axis": ds.dims.iter().map(|(dim, size)| json!({
            "type": "IndexAxis",
            "axisLabel": dim,
            "lowerBound": 0,
            "upperBound": size,
        })).collect::<Vec<_>>(),
    });
    json!({
        "type": "DomainSet",
        "generalGrid": {
            "type": "GeneralGridCoverage",
            "srsName": crs_from_dataset(ds).name(),
            "axisLabels": axis_labels,
            "axis": axes_properties(ds),
            "gridLimits": grid_limits,
        },
    })
}

fn variable_description(name: &str, attrs: &Map<String, Value>) -> String {
    ["description", "long_name", "standard_name", "name"]
        .iter()
        .find_map(|key| attrs.get(*key).and_then(Value::as_str))
        .unwrap_or(name)
        .to_string()
}

/// Range type describing the data variables of a coverage
pub fn coverage_rangetype(ds: &Dataset) -> Value {
    let fields: Vec<Value> = ds
        .data_vars
        .iter()
        .map(|(name, var)| {
            json!({
                "type": "Quantity",
                "name": name,
                "description": variable_description(name, &var.attrs),
                "encodingInfo": {"dataType": dtype_to_opengis_datatype(var.dtype)},
            })
        })
        .collect();
    json!({"type": "DataRecord", "field": fields})
}

/// Extents of all dimensions of a coverage
pub fn collection_envelope(ds: &Dataset) -> Value {
    json!({
        "type": "EnvelopeByAxis",
        "srsName": crs_from_dataset(ds).name(),
        "axisLabels": ds.dims.keys().collect::<Vec<_>>(),
        "axis": axes_properties(ds),
    })
}

pub async fn get_coverage_domainset(
    ctx: &DatasetsContext,
    collection_id: &str,
) -> ApiResult<Value> {
    Ok(coverage_domainset(&*ctx.get_dataset(collection_id).await?))
}

pub async fn get_coverage_rangetype(
    ctx: &DatasetsContext,
    collection_id: &str,
) -> ApiResult<Value> {
    Ok(coverage_rangetype(&*ctx.get_dataset(collection_id).await?))
}

pub async fn get_collection_envelope(
    ctx: &DatasetsContext,
    collection_id: &str,
) -> ApiResult<Value> {
    Ok(collection_envelope(&*ctx.get_dataset(collection_id).await?))
}

/// The attributes of a dataset
pub async fn get_collection_metadata(
    ctx: &DatasetsContext,
    collection_id: &str,
) -> ApiResult<Value> {
    Ok(Value::Object(ctx.get_dataset(collection_id).await?.attrs.clone()))
}

/// JSON representation of a coverage without its range set
pub async fn get_coverage_as_json(ctx: &DatasetsContext, collection_id: &str) -> ApiResult<Value> {
    let ds = ctx.get_dataset(collection_id).await?;
    Ok(json!({
        "id": collection_id,
        "type": "CoverageByDomainAndRange",
        "envelope": collection_envelope(&ds),
        "domainSet": coverage_domainset(&ds),
        "rangeType": coverage_rangetype(&ds),
        "metadata": Value::Object(ds.attrs.clone()),
    }))
}
