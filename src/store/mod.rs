//! Data stores: named datasets kept on a filesystem
//!
//! Datasets are stored as Zarr groups (`*.zarr`) or as multi-level
//! pyramids (`*.levels`) whose levels are Zarr groups.

pub mod descriptor;
pub mod search;
pub mod zarr;

pub use descriptor::{DatasetDescriptor, VariableDescriptor};
pub use search::{DatasetSearch, DatasetSearchResult};

use crate::codec::Codec;
use crate::cube::Dataset;
use crate::error::{Result, XcubeError};
use crate::fs::{join_key, new_filesystem, FileSystem, Protocol};
use crate::mldataset::{
    level_name, link_name, resolve_level_path, BaseMultiLevelDataset, LevelsInfo,
    MultiLevelDataset, StoredMultiLevelDataset, LEVELS_INFO,
};
use crate::progress::ProgressTracker;
use async_trait::async_trait;
use log::info;
use std::collections::HashMap;
use std::sync::Arc;

/// Suffix of single-level datasets
pub const ZARR_SUFFIX: &str = ".zarr";
/// Suffix of multi-level datasets
pub const LEVELS_SUFFIX: &str = ".levels";

/// Storage format of a data identifier, derived from its suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Zarr,
    Levels,
}

impl DataFormat {
    pub fn from_data_id(data_id: &str) -> Result<Self> {
        let data_id = data_id.trim_end_matches('/');
        if data_id.ends_with(ZARR_SUFFIX) {
            Ok(DataFormat::Zarr)
        } else if data_id.ends_with(LEVELS_SUFFIX) {
            Ok(DataFormat::Levels)
        } else {
            Err(XcubeError::InvalidValue(format!(
                "unsupported data format of {data_id:?}, \
                 expected suffix {ZARR_SUFFIX:?} or {LEVELS_SUFFIX:?}"
            )))
        }
    }
}

/// Options of [`DataStore::write_levels`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteLevelsOptions {
    /// Spatial chunk size of all levels, defaults to the grid mapping's tile size
    pub tile_size: Option<(usize, usize)>,
    pub num_levels_max: Option<usize>,
    pub replace: bool,
    /// Data identifier of a Zarr dataset in this store that level 0 links
    /// to instead of being written
    pub base_dataset_id: Option<String>,
}

/// A store of named datasets
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Identifier of the store, reported in search results
    fn store_id(&self) -> &str;

    /// Identifiers of all stored datasets, sorted
    async fn get_data_ids(&self) -> Result<Vec<String>>;

    async fn has_data(&self, data_id: &str) -> Result<bool>;

    async fn describe_data(&self, data_id: &str) -> Result<DatasetDescriptor>;

    /// Open a dataset, level 0 for multi-level datasets
    async fn open_data(&self, data_id: &str) -> Result<Dataset>;

    /// Open a dataset as multi-level dataset.
    ///
    /// Single-level datasets get their levels computed on demand.
    async fn open_ml_dataset(
        &self,
        data_id: &str,
        tile_size: Option<(usize, usize)>,
    ) -> Result<Arc<dyn MultiLevelDataset>>;

    /// Write a dataset, failing if it exists unless `replace` is set
    async fn write_data(&self, dataset: &Dataset, data_id: &str, replace: bool) -> Result<String>;

    /// Write the resolution pyramid of a dataset as `.levels` directory
    async fn write_levels(
        &self,
        dataset: Dataset,
        data_id: &str,
        options: &WriteLevelsOptions,
        progress: Option<&ProgressTracker>,
    ) -> Result<String>;

    async fn delete_data(&self, data_id: &str) -> Result<()>;

    async fn search_data(&self, search: &DatasetSearch) -> Result<DatasetSearchResult>;
}

/// A data store on top of any [`FileSystem`]
pub struct FsDataStore {
    store_id: String,
    fs: Arc<dyn FileSystem>,
    root: String,
    compressor: Option<Arc<dyn Codec>>,
}

impl FsDataStore {
    pub fn new(store_id: impl Into<String>, fs: Arc<dyn FileSystem>, root: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            fs,
            root: root.into().trim_matches('/').to_string(),
            compressor: None,
        }
    }

    /// Compress chunks of written datasets
    pub fn with_compressor(mut self, compressor: Arc<dyn Codec>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Path of a dataset relative to the filesystem root
    pub fn data_path(&self, data_id: &str) -> String {
        join_key(&self.root, data_id.trim_matches('/'))
    }

    async fn prepare_write(&self, data_id: &str, replace: bool) -> Result<String> {
        let path = self.data_path(data_id);
        if self.fs.exists(&path).await? {
            if !replace {
                return Err(XcubeError::AlreadyExists(format!(
                    "data resource {data_id:?} already exists"
                )));
            }
            self.fs.delete_dir(&path).await?;
        }
        Ok(path)
    }
}

/// Create a filesystem data store for a protocol
pub fn new_fs_data_store(
    store_id: impl Into<String>,
    protocol: Protocol,
    root: &str,
) -> Result<FsDataStore> {
    let fs = new_filesystem(protocol, root)?;
    // local and HTTP filesystems are rooted at `root` already
    let store_root = match protocol {
        Protocol::Memory => root,
        _ => "",
    };
    Ok(FsDataStore::new(store_id, fs, store_root))
}

#[async_trait]
impl DataStore for FsDataStore {
    fn store_id(&self) -> &str {
        &self.store_id
    }

    async fn get_data_ids(&self) -> Result<Vec<String>> {
        let mut data_ids: Vec<String> = self
            .fs
            .list(&self.root)
            .await?
            .into_iter()
            .filter(|name| DataFormat::from_data_id(name).is_ok())
            .collect();
        data_ids.sort();
        Ok(data_ids)
    }

    async fn has_data(&self, data_id: &str) -> Result<bool> {
        let path = self.data_path(data_id);
        match DataFormat::from_data_id(data_id) {
            Ok(DataFormat::Zarr) => zarr::is_zarr_group(self.fs.as_ref(), &path).await,
            Ok(DataFormat::Levels) => self.fs.exists(&path).await,
            Err(_) => Ok(false),
        }
    }

    async fn describe_data(&self, data_id: &str) -> Result<DatasetDescriptor> {
        let dataset = self.open_data(data_id).await?;
        Ok(DatasetDescriptor::from_dataset(data_id, &dataset))
    }

    async fn open_data(&self, data_id: &str) -> Result<Dataset> {
        let path = self.data_path(data_id);
        match DataFormat::from_data_id(data_id)? {
            DataFormat::Zarr => zarr::read_zarr(self.fs.as_ref(), &path).await,
            DataFormat::Levels => {
                let base_path = resolve_level_path(self.fs.as_ref(), &path, 0).await?;
                zarr::read_zarr(self.fs.as_ref(), &base_path).await
            }
        }
    }

    async fn open_ml_dataset(
        &self,
        data_id: &str,
        tile_size: Option<(usize, usize)>,
    ) -> Result<Arc<dyn MultiLevelDataset>> {
        match DataFormat::from_data_id(data_id)? {
            DataFormat::Zarr => {
                let dataset = self.open_data(data_id).await?;
                Ok(Arc::new(BaseMultiLevelDataset::new(
                    data_id, dataset, tile_size, None,
                )?))
            }
            DataFormat::Levels => Ok(Arc::new(
                StoredMultiLevelDataset::open(
                    Arc::clone(&self.fs),
                    self.data_path(data_id),
                    data_id,
                )
                .await?,
            )),
        }
    }

    async fn write_data(&self, dataset: &Dataset, data_id: &str, replace: bool) -> Result<String> {
        if DataFormat::from_data_id(data_id)? != DataFormat::Zarr {
            return Err(XcubeError::InvalidValue(format!(
                "cannot write a single dataset as {data_id:?}, use write_levels"
            )));
        }
        let path = self.prepare_write(data_id, replace).await?;
        zarr::write_zarr(
            self.fs.as_ref(),
            &path,
            dataset,
            &HashMap::new(),
            self.compressor.clone(),
        )
        .await?;
        info!("written dataset {data_id:?} to store {:?}", self.store_id);
        Ok(data_id.to_string())
    }

    async fn write_levels(
        &self,
        dataset: Dataset,
        data_id: &str,
        options: &WriteLevelsOptions,
        progress: Option<&ProgressTracker>,
    ) -> Result<String> {
        if DataFormat::from_data_id(data_id)? != DataFormat::Levels {
            return Err(XcubeError::InvalidValue(format!(
                "levels must be written as {LEVELS_SUFFIX:?}, got {data_id:?}"
            )));
        }
        if let Some(base_id) = &options.base_dataset_id {
            if DataFormat::from_data_id(base_id)? != DataFormat::Zarr {
                return Err(XcubeError::InvalidValue(format!(
                    "linked base dataset must be a {ZARR_SUFFIX:?} dataset, got {base_id:?}"
                )));
            }
            if !self.has_data(base_id).await? {
                return Err(XcubeError::NotFound(format!(
                    "linked base dataset {base_id:?} does not exist"
                )));
            }
        }
        let ml_dataset = BaseMultiLevelDataset::new(
            data_id,
            dataset,
            options.tile_size,
            options.num_levels_max,
        )?;
        let num_levels = ml_dataset.num_levels();
        let tile_size = ml_dataset.grid_mapping().tile_size;
        let path = self.prepare_write(data_id, options.replace).await?;

        let tracker = progress.cloned().unwrap_or_default();
        let outer = tracker.observe(format!("Writing {num_levels} levels"), num_levels as f64);
        for level in 0..num_levels {
            if let (0, Some(base_id)) = (level, &options.base_dataset_id) {
                let link_path = join_key(&path, &link_name(0));
                if let Err(e) = self.fs.write(&link_path, self.data_path(base_id).as_bytes()).await {
                    outer.fail(e.to_string());
                    return Err(e);
                }
                info!("linked level 1 of {num_levels} to {base_id:?}");
                outer.worked(1.0);
                continue;
            }
            let level_dataset = ml_dataset.compute_level(level)?;
            let level_path = join_key(&path, &level_name(level));
            let written = zarr::write_zarr(
                self.fs.as_ref(),
                &level_path,
                &level_dataset,
                &HashMap::new(),
                self.compressor.clone(),
            )
            .await;
            if let Err(e) = written {
                outer.fail(e.to_string());
                return Err(e);
            }
            info!(
                "written level {} of {} with size {:?}",
                level + 1,
                num_levels,
                ml_dataset.grid_mapping().derive_for_level(level).size
            );
            outer.worked(1.0);
        }
        let levels_info = serde_json::to_vec_pretty(&LevelsInfo::new(num_levels, tile_size))?;
        self.fs
            .write(&join_key(&path, LEVELS_INFO), &levels_info)
            .await?;
        Ok(data_id.to_string())
    }

    async fn delete_data(&self, data_id: &str) -> Result<()> {
        let path = self.data_path(data_id);
        if !self.fs.exists(&path).await? {
            return Err(XcubeError::NotFound(format!(
                "data resource {data_id:?} does not exist"
            )));
        }
        self.fs.delete_dir(&path).await
    }

    async fn search_data(&self, search: &DatasetSearch) -> Result<DatasetSearchResult> {
        let mut matching = Vec::new();
        for data_id in self.get_data_ids().await? {
            let descriptor = self.describe_data(&data_id).await?;
            if search.matches(&descriptor)? {
                matching.push(descriptor);
            }
        }
        Ok(search.paginate(self.store_id.clone(), matching))
    }
}
