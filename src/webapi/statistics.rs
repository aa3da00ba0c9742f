//! Statistics of a variable within a point or polygon

use crate::cube::Dataset;
use crate::geojson::Geometry;
use crate::mldataset::MultiLevelDataset;
use crate::server::api::{ApiError, ApiResult};
use crate::server::context::DatasetsContext;
use log::debug;
use ndarray::Ix2;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Instant;

/// Number of histogram bins
pub const HISTOGRAM_BINS: usize = 100;

fn empty_result() -> Value {
    json!({"count": 0})
}

/// Compute statistics of `var_name` in dataset `ds_id` for a GeoJSON
/// geometry at the time given by the `time` parameter.
pub async fn compute_statistics(
    ctx: &DatasetsContext,
    ds_id: &str,
    var_name: &str,
    geo_json: &Value,
    params: &HashMap<String, String>,
) -> ApiResult<Value> {
    let time = params
        .get("time")
        .ok_or_else(|| ApiError::bad_request("Missing query parameter \"time\""))?;
    let started = Instant::now();
    let ml_dataset = ctx.get_ml_dataset(ds_id).await?;
    let result = compute_dataset_statistics(ml_dataset.as_ref(), var_name, geo_json, time).await;
    debug!(
        "computing statistics of {ds_id}/{var_name} took {:.3}s",
        started.elapsed().as_secs_f64()
    );
    result
}

/// Statistics of a variable of a multi-level dataset at level 0
pub async fn compute_dataset_statistics(
    ml_dataset: &dyn MultiLevelDataset,
    var_name: &str,
    geo_json: &Value,
    time: &str,
) -> ApiResult<Value> {
    let geometry = Geometry::from_value(geo_json)
        .map_err(|_| ApiError::bad_request("Invalid GeoJSON geometry encountered"))?;
    let dataset = ml_dataset.get_dataset(0).await?;
    if !dataset.data_vars.contains_key(var_name) {
        return Err(ApiError::not_found(format!(
            "Variable \"{var_name}\" not found in dataset \"{}\"",
            ml_dataset.ds_id()
        )));
    }
    let time_index = dataset.sel_time(time)?;
    let dataset = dataset.index_select("time", time_index)?;
    let (x_name, y_name) = &ml_dataset.grid_mapping().xy_dim_names;
    let (x0, y0, x1, y1) = ml_dataset.grid_mapping().xy_bbox;

    match &geometry {
        Geometry::Point((x, y)) => {
            if *x < x0 || *x > x1 || *y < y0 || *y > y1 {
                return Ok(empty_result());
            }
            let i = dataset.sel_nearest(x_name, *x)?;
            let j = dataset.sel_nearest(y_name, *y)?;
            let values = variable_2d(&dataset, var_name, x_name, y_name)?;
            let value = values[[j, i]];
            // a fill value is not a sample, as in the polygon case
            if value.is_nan() {
                return Ok(empty_result());
            }
            Ok(json!({
                "count": 1,
                "minimum": value,
                "maximum": value,
                "mean": value,
                "deviation": 0.0,
            }))
        }
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) => {
            let Some((gx0, gy0, gx1, gy1)) = geometry.bounds() else {
                return Ok(empty_result());
            };
            if gx1 < x0 || gx0 > x1 || gy1 < y0 || gy0 > y1 {
                return Ok(empty_result());
            }
            let x_coords = dataset.coord_values(x_name)?;
            let y_coords = dataset.coord_values(y_name)?;
            let i_range = dataset.sel_range(x_name, Some(gx0), Some(gx1))?;
            let j_range = dataset.sel_range(y_name, Some(gy0), Some(gy1))?;
            let values = variable_2d(&dataset, var_name, x_name, y_name)?;
            let mut masked = Vec::new();
            for j in j_range {
                for i in i_range.clone() {
                    let value = values[[j, i]];
                    if !value.is_nan() && geometry.contains(x_coords[i], y_coords[j]) {
                        masked.push(value);
                    }
                }
            }
            Ok(summarize(&masked))
        }
        _ => Err(ApiError::bad_request(
            "Only Point, Polygon and MultiPolygon geometries are supported",
        )),
    }
}

/// The `(y, x)` array of a variable with all other dimensions selected away
fn variable_2d(
    dataset: &Dataset,
    var_name: &str,
    x_name: &str,
    y_name: &str,
) -> ApiResult<ndarray::Array2<f64>> {
    let var = dataset
        .data_vars
        .get(var_name)
        .ok_or_else(|| ApiError::not_found(format!("Variable \"{var_name}\" not found")))?;
    if var.dims != [y_name, x_name] {
        return Err(ApiError::bad_request(format!(
            "Variable \"{var_name}\" has dimensions {:?}, expected [{y_name:?}, {x_name:?}]",
            var.dims
        )));
    }
    var.data
        .clone()
        .into_dimensionality::<Ix2>()
        .map_err(|e| ApiError::internal_server_error(e.to_string()))
}

fn summarize(values: &[f64]) -> Value {
    if values.is_empty() {
        return empty_result();
    }
    let count = values.len();
    let minimum = values.iter().copied().fold(f64::INFINITY, f64::min);
    let maximum = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / count as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    let (hist_values, edges) = histogram(values, HISTOGRAM_BINS, (minimum, maximum));
    json!({
        "count": count,
        "minimum": minimum,
        "maximum": maximum,
        "mean": mean,
        "deviation": variance.sqrt(),
        "histogram": {
            "values": hist_values,
            "edges": edges,
        },
    })
}

/// Density histogram with `bins` equal bins over `range`.
///
/// The last bin includes its right edge. An empty range is widened
/// by 0.5 on both sides. Returns bin densities and `bins + 1` edges.
pub fn histogram(values: &[f64], bins: usize, range: (f64, f64)) -> (Vec<f64>, Vec<f64>) {
    let (mut lo, mut hi) = range;
    if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }
    let width = (hi - lo) / bins as f64;
    let edges: Vec<f64> = (0..=bins).map(|k| lo + k as f64 * width).collect();
    let mut counts = vec![0usize; bins];
    let mut total = 0usize;
    for &v in values {
        if v.is_nan() || v < lo || v > hi {
            continue;
        }
        let bin = (((v - lo) / width) as usize).min(bins - 1);
        counts[bin] += 1;
        total += 1;
    }
    let densities = counts
        .iter()
        .map(|&c| {
            if total == 0 {
                0.0
            } else {
                c as f64 / (total as f64 * width)
            }
        })
        .collect();
    (densities, edges)
}
