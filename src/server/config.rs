//! Server configuration loaded from YAML or JSON files

use crate::error::{Result, XcubeError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

fn default_port() -> u16 {
    8080
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

/// Root of the server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_address")]
    pub address: String,
    /// Directory relative dataset paths are resolved against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_url_prefix: Option<String>,
    #[serde(default)]
    pub data_stores: Vec<DataStoreConfig>,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
    #[serde(default)]
    pub styles: Vec<StyleConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_provider: Option<ServiceProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stac: Option<StacConfig>,
    /// Settings of APIs this crate does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            address: default_address(),
            base_dir: None,
            url_prefix: None,
            reverse_url_prefix: None,
            data_stores: Vec::new(),
            datasets: Vec::new(),
            styles: Vec::new(),
            service_provider: None,
            stac: None,
            extra: Map::new(),
        }
    }
}

/// A data store whose datasets are published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStoreConfig {
    pub identifier: String,
    /// Filesystem protocol, e.g. `file`, `memory` or `https`
    pub store_id: String,
    #[serde(default)]
    pub root: String,
    /// Datasets of this store; all of them if empty
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

/// A published dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Identifier of the data store holding the dataset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<String>,
    /// Data identifier within the store, or a local path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_size: Option<[usize; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

/// Colour mappings of variables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleConfig {
    pub identifier: String,
    #[serde(default)]
    pub color_mappings: indexmap::IndexMap<String, ColorMappingConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorMappingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_bar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_range: Option<[f64; 2]>,
}

/// Provider information shown in service metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceProviderConfig {
    #[serde(default)]
    pub provider_name: String,
    #[serde(default)]
    pub provider_site: String,
    #[serde(default)]
    pub individual_name: String,
    #[serde(default)]
    pub position_name: String,
    #[serde(default)]
    pub phone_voice: String,
    #[serde(default)]
    pub delivery_point: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub electronic_mail_address: String,
}

/// Identity of the STAC catalog and of its single dataset collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StacConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<StacCollectionConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StacCollectionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ServerConfig {
    /// Load a configuration file, YAML or JSON by extension.
    ///
    /// A missing `base_dir` defaults to the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        let mut config = match extension.as_deref() {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text)?,
            Some("json") => Self::from_json_str(&text)?,
            _ => {
                return Err(XcubeError::Configuration(format!(
                    "unsupported configuration file format: {}",
                    path.display()
                )))
            }
        };
        if config.base_dir.is_none() {
            config.base_dir = path.parent().map(Path::to_path_buf);
        }
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// All dataset configurations, including those of data stores.
    ///
    /// Entries of a data store get its identifier as `store_id`.
    pub fn dataset_configs(&self) -> Vec<DatasetConfig> {
        let store_datasets = self.data_stores.iter().flat_map(|store| {
            store.datasets.iter().map(|ds| DatasetConfig {
                store_id: Some(store.identifier.clone()),
                ..ds.clone()
            })
        });
        self.datasets.iter().cloned().chain(store_datasets).collect()
    }

    pub fn data_store(&self, identifier: &str) -> Option<&DataStoreConfig> {
        self.data_stores.iter().find(|s| s.identifier == identifier)
    }

    pub fn style(&self, identifier: &str) -> Option<&StyleConfig> {
        self.styles.iter().find(|s| s.identifier == identifier)
    }

    /// Resolve a path against `base_dir`
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match &self.base_dir {
            Some(base_dir) if path.is_relative() => base_dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Check identifiers are unique and references resolve
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for dataset in self.dataset_configs() {
            if !seen.insert(dataset.identifier.clone()) {
                return Err(XcubeError::Configuration(format!(
                    "duplicate dataset identifier {:?}",
                    dataset.identifier
                )));
            }
            if let Some(store_id) = &dataset.store_id {
                if self.data_store(store_id).is_none() {
                    return Err(XcubeError::Configuration(format!(
                        "dataset {:?} refers to unknown data store {store_id:?}",
                        dataset.identifier
                    )));
                }
            } else if dataset.path.is_none() {
                return Err(XcubeError::Configuration(format!(
                    "dataset {:?} needs a store_id or a path",
                    dataset.identifier
                )));
            }
            if let Some(style) = &dataset.style {
                if self.style(style).is_none() {
                    return Err(XcubeError::Configuration(format!(
                        "dataset {:?} refers to unknown style {style:?}",
                        dataset.identifier
                    )));
                }
            }
        }
        Ok(())
    }

    /// `url_prefix` normalized to `""` or `/segment[/segment...]`
    pub fn url_prefix(&self) -> String {
        normalize_prefix(self.url_prefix.as_deref())
    }

    /// `reverse_url_prefix`, falling back to the URL prefix
    pub fn reverse_url_prefix(&self) -> String {
        match self.reverse_url_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => normalize_prefix(Some(prefix)),
            _ => self.url_prefix(),
        }
    }
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    let trimmed = prefix.unwrap_or("").trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}
