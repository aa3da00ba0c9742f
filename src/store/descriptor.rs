//! Descriptions of stored datasets

use crate::cube::Dataset;
use crate::gridmapping::{crs_from_dataset, GridMapping};
use crate::types::DataType;
use crate::utils::format_datetime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Describes a data variable of a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    pub name: String,
    pub dtype: DataType,
    pub dims: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attrs: Map<String, Value>,
}

/// Describes a dataset without its data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub data_id: String,
    pub dims: IndexMap<String, usize>,
    /// `(x_min, y_min, x_max, y_max)` in the dataset's CRS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<(f64, f64, f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spatial_res: Option<f64>,
    /// First and last time label as ISO 8601 strings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<(String, String)>,
    pub data_vars: Vec<VariableDescriptor>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attrs: Map<String, Value>,
}

impl DatasetDescriptor {
    /// Describe `dataset` stored under `data_id`
    pub fn from_dataset(data_id: impl Into<String>, dataset: &Dataset) -> Self {
        let grid_mapping = GridMapping::from_dataset(dataset, None).ok();
        let time_range = dataset.time_labels().ok().and_then(|labels| {
            let first = labels.iter().min()?;
            let last = labels.iter().max()?;
            Some((format_datetime(first), format_datetime(last)))
        });
        let data_vars = dataset
            .data_vars
            .iter()
            .map(|(name, var)| VariableDescriptor {
                name: name.clone(),
                dtype: var.dtype,
                dims: var.dims.clone(),
                attrs: var.attrs.clone(),
            })
            .collect();
        Self {
            data_id: data_id.into(),
            dims: dataset.dims.clone(),
            bbox: grid_mapping.as_ref().map(|gm| gm.xy_bbox),
            crs: grid_mapping
                .as_ref()
                .map(|gm| gm.crs.name())
                .or_else(|| Some(crs_from_dataset(dataset).name())),
            spatial_res: grid_mapping.as_ref().map(|gm| gm.xy_res.0),
            time_range,
            data_vars,
            attrs: dataset.attrs.clone(),
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.attrs.get("title").and_then(Value::as_str)
    }
}
