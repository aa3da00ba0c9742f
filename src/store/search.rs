//! Dataset search over data store descriptors

use crate::error::{Result, XcubeError};
use crate::store::descriptor::DatasetDescriptor;
use crate::utils::parse_datetime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A search request.
///
/// Supported parameters:
/// * `title`: case-insensitive substring of the `title` attribute
/// * `bbox`: `[x_min, y_min, x_max, y_max]` intersecting the dataset's bbox
/// * `time_range`: `[start, end]` overlapping the dataset's time range,
///   either bound may be `null`
///
/// Any other parameter must equal the dataset attribute of the same name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetSearch {
    #[serde(default)]
    pub search_params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl DatasetSearch {
    pub fn new(search_params: Map<String, Value>) -> Self {
        Self {
            search_params,
            ..Self::default()
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Check whether a dataset matches all search parameters
    pub fn matches(&self, descriptor: &DatasetDescriptor) -> Result<bool> {
        for (name, value) in &self.search_params {
            let matched = match name.as_str() {
                "title" => {
                    let pattern = value.as_str().ok_or_else(|| invalid_param(name, value))?;
                    descriptor
                        .title()
                        .is_some_and(|t| t.to_lowercase().contains(&pattern.to_lowercase()))
                }
                "bbox" => {
                    let bbox = parse_bbox(value).ok_or_else(|| invalid_param(name, value))?;
                    descriptor.bbox.is_some_and(|ds_bbox| bbox_intersects(bbox, ds_bbox))
                }
                "time_range" => {
                    let (start, end) = parse_time_range(value)
                        .ok_or_else(|| invalid_param(name, value))?;
                    match &descriptor.time_range {
                        Some((ds_start, ds_end)) => {
                            let ds_start = parse_datetime(ds_start)?;
                            let ds_end = parse_datetime(ds_end)?;
                            let start = start.map(|s| parse_datetime(&s)).transpose()?;
                            let end = end.map(|e| parse_datetime(&e)).transpose()?;
                            start.map_or(true, |s| s <= ds_end) && end.map_or(true, |e| e >= ds_start)
                        }
                        None => false,
                    }
                }
                _ => descriptor.attrs.get(name) == Some(value),
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Apply offset and maximum count to all matching descriptors
    pub fn paginate(
        &self,
        service_id: impl Into<String>,
        matching: Vec<DatasetDescriptor>,
    ) -> DatasetSearchResult {
        let offset = self.offset.unwrap_or(0);
        let total = matching.len();
        let datasets: Vec<DatasetDescriptor> = matching
            .into_iter()
            .skip(offset)
            .take(self.max_results.unwrap_or(usize::MAX))
            .collect();
        let end = offset + datasets.len();
        DatasetSearchResult {
            search: self.clone(),
            offset,
            next_offset: (end < total).then_some(end),
            service_id: service_id.into(),
            datasets,
        }
    }
}

/// One page of search results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSearchResult {
    pub search: DatasetSearch,
    pub offset: usize,
    /// Offset of the next page, if more results exist
    pub next_offset: Option<usize>,
    pub service_id: String,
    pub datasets: Vec<DatasetDescriptor>,
}

fn invalid_param(name: &str, value: &Value) -> XcubeError {
    XcubeError::InvalidValue(format!("invalid search parameter {name}={value}"))
}

fn parse_bbox(value: &Value) -> Option<(f64, f64, f64, f64)> {
    match value.as_array()?.as_slice() {
        [x0, y0, x1, y1] => Some((x0.as_f64()?, y0.as_f64()?, x1.as_f64()?, y1.as_f64()?)),
        _ => None,
    }
}

fn parse_time_range(value: &Value) -> Option<(Option<String>, Option<String>)> {
    let bound = |v: &Value| match v {
        Value::Null => Some(None),
        Value::String(s) => Some(Some(s.clone())),
        _ => None,
    };
    match value.as_array()?.as_slice() {
        [start, end] => Some((bound(start)?, bound(end)?)),
        _ => None,
    }
}

fn bbox_intersects(a: (f64, f64, f64, f64), b: (f64, f64, f64, f64)) -> bool {
    a.0 <= b.2 && b.0 <= a.2 && a.1 <= b.3 && b.1 <= a.3
}
