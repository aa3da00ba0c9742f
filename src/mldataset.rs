//! Multi-level datasets: resolution pyramids of a dataset
//!
//! Level 0 is the base dataset. Each further level halves the spatial
//! resolution by taking every `2^level`-th pixel of the base.

use crate::cube::Dataset;
use crate::error::{Result, XcubeError};
use crate::fs::{join_key, FileSystem};
use crate::gridmapping::GridMapping;
use crate::store::zarr::read_zarr;
use async_trait::async_trait;
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the levels info file inside a `.levels` directory
pub const LEVELS_INFO: &str = ".zlevels";

/// Current version of the levels info format
pub const LEVELS_INFO_VERSION: &str = "1.0";

/// A dataset available at several spatial resolutions
#[async_trait]
pub trait MultiLevelDataset: Send + Sync {
    /// Identifier of the dataset
    fn ds_id(&self) -> &str;

    /// Grid mapping of level 0
    fn grid_mapping(&self) -> &GridMapping;

    fn num_levels(&self) -> usize;

    /// Get the dataset of a level, `0` being the base
    async fn get_dataset(&self, level: usize) -> Result<Arc<Dataset>>;

    async fn base_dataset(&self) -> Result<Arc<Dataset>> {
        self.get_dataset(0).await
    }

    /// Pixel sizes `(x_res, y_res)` of all levels
    fn resolutions(&self) -> Vec<(f64, f64)> {
        let (x_res, y_res) = self.grid_mapping().xy_res;
        (0..self.num_levels())
            .map(|level| {
                let factor = (1usize << level) as f64;
                (x_res * factor, y_res * factor)
            })
            .collect()
    }
}

/// Contents of the `.zlevels` file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelsInfo {
    pub version: String,
    pub num_levels: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_size: Option<[usize; 2]>,
}

impl LevelsInfo {
    pub fn new(num_levels: usize, tile_size: (usize, usize)) -> Self {
        Self {
            version: LEVELS_INFO_VERSION.to_string(),
            num_levels,
            tile_size: Some([tile_size.0, tile_size.1]),
        }
    }
}

fn check_level(level: usize, num_levels: usize) -> Result<()> {
    if level >= num_levels {
        return Err(XcubeError::OutOfBounds(format!(
            "level {level} out of range, dataset has {num_levels} levels"
        )));
    }
    Ok(())
}

/// Levels computed from an in-memory base dataset, cached once computed
pub struct BaseMultiLevelDataset {
    ds_id: String,
    base: Arc<Dataset>,
    grid_mapping: GridMapping,
    num_levels: usize,
    levels: RwLock<HashMap<usize, Arc<Dataset>>>,
}

impl BaseMultiLevelDataset {
    /// Create the pyramid of `base`, limited to `num_levels_max` levels if given
    pub fn new(
        ds_id: impl Into<String>,
        base: Dataset,
        tile_size: Option<(usize, usize)>,
        num_levels_max: Option<usize>,
    ) -> Result<Self> {
        let grid_mapping = GridMapping::from_dataset(&base, tile_size)?;
        let mut num_levels = grid_mapping.num_levels();
        if let Some(max) = num_levels_max {
            num_levels = num_levels.min(max.max(1));
        }
        Ok(Self {
            ds_id: ds_id.into(),
            base: Arc::new(base),
            grid_mapping,
            num_levels,
            levels: RwLock::new(HashMap::new()),
        })
    }

    /// Compute the dataset of a level without caching it
    pub fn compute_level(&self, level: usize) -> Result<Dataset> {
        check_level(level, self.num_levels)?;
        let (x_name, y_name) = &self.grid_mapping.xy_dim_names;
        let (tile_w, tile_h) = self.grid_mapping.derive_for_level(level).tile_size;
        let mut dataset = if level == 0 {
            self.base.as_ref().clone()
        } else {
            let step = 1usize << level;
            self.base
                .strided(&[(x_name.as_str(), step), (y_name.as_str(), step)])?
        };
        for var in dataset.data_vars.values_mut() {
            if var.axis_of(x_name).is_none() || var.axis_of(y_name).is_none() {
                continue;
            }
            let chunks = var
                .dims
                .iter()
                .zip(var.shape())
                .map(|(dim, &size)| {
                    let chunk = if dim == x_name {
                        tile_w
                    } else if dim == y_name {
                        tile_h
                    } else {
                        1
                    };
                    chunk.clamp(1, size.max(1))
                })
                .collect();
            var.chunks = Some(chunks);
        }
        Ok(dataset)
    }
}

#[async_trait]
impl MultiLevelDataset for BaseMultiLevelDataset {
    fn ds_id(&self) -> &str {
        &self.ds_id
    }

    fn grid_mapping(&self) -> &GridMapping {
        &self.grid_mapping
    }

    fn num_levels(&self) -> usize {
        self.num_levels
    }

    async fn get_dataset(&self, level: usize) -> Result<Arc<Dataset>> {
        let cached = self.levels.read().get(&level).cloned();
        if let Some(dataset) = cached {
            return Ok(dataset);
        }
        let dataset = Arc::new(self.compute_level(level)?);
        debug!("computed level {} of {}", level, self.ds_id);
        Ok(Arc::clone(
            self.levels.write().entry(level).or_insert(dataset),
        ))
    }
}

/// Levels stored as `{level}.zarr` groups of a `.levels` directory, read lazily
pub struct StoredMultiLevelDataset {
    ds_id: String,
    fs: Arc<dyn FileSystem>,
    path: String,
    grid_mapping: GridMapping,
    num_levels: usize,
    levels: RwLock<HashMap<usize, Arc<Dataset>>>,
}

impl StoredMultiLevelDataset {
    /// Open the levels directory at `path`.
    ///
    /// The number of levels is taken from `.zlevels` if present, otherwise
    /// from the consecutive `{level}.zarr` or `{level}.link` entries.
    /// Level 0 is read to derive the grid mapping.
    pub async fn open(
        fs: Arc<dyn FileSystem>,
        path: impl Into<String>,
        ds_id: impl Into<String>,
    ) -> Result<Self> {
        let path = path.into();
        let info = match fs.read(&join_key(&path, LEVELS_INFO)).await {
            Ok(bytes) => Some(serde_json::from_slice::<LevelsInfo>(&bytes)?),
            Err(XcubeError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let num_levels = match &info {
            Some(info) => info.num_levels,
            None => {
                let entries = fs.list(&path).await?;
                (0..)
                    .take_while(|level| {
                        entries.contains(&level_name(*level)) || entries.contains(&link_name(*level))
                    })
                    .count()
            }
        };
        if num_levels == 0 {
            return Err(XcubeError::NotFound(format!(
                "{path} does not contain any levels"
            )));
        }

        let base_path = resolve_level_path(fs.as_ref(), &path, 0).await?;
        let base = Arc::new(read_zarr(fs.as_ref(), &base_path).await?);
        let tile_size = match info.as_ref().and_then(|info| info.tile_size) {
            Some([w, h]) => Some((w, h)),
            None => tile_size_from_chunks(&base),
        };
        let grid_mapping = GridMapping::from_dataset(&base, tile_size)?;
        let levels = RwLock::new(HashMap::from([(0, base)]));
        Ok(Self {
            ds_id: ds_id.into(),
            fs,
            path,
            grid_mapping,
            num_levels,
            levels,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl MultiLevelDataset for StoredMultiLevelDataset {
    fn ds_id(&self) -> &str {
        &self.ds_id
    }

    fn grid_mapping(&self) -> &GridMapping {
        &self.grid_mapping
    }

    fn num_levels(&self) -> usize {
        self.num_levels
    }

    async fn get_dataset(&self, level: usize) -> Result<Arc<Dataset>> {
        check_level(level, self.num_levels)?;
        let cached = self.levels.read().get(&level).cloned();
        if let Some(dataset) = cached {
            return Ok(dataset);
        }
        let level_path = resolve_level_path(self.fs.as_ref(), &self.path, level).await?;
        let dataset = Arc::new(read_zarr(self.fs.as_ref(), &level_path).await?);
        debug!("opened level {} of {}", level, self.ds_id);
        Ok(Arc::clone(
            self.levels.write().entry(level).or_insert(dataset),
        ))
    }
}

/// Name of a level group, e.g. `"0.zarr"`
pub fn level_name(level: usize) -> String {
    format!("{level}.zarr")
}

/// Name of a file linking a level to a dataset stored elsewhere, e.g. `"0.link"`
pub fn link_name(level: usize) -> String {
    format!("{level}.link")
}

/// Path of a level's Zarr group, following a `{level}.link` file if present.
///
/// A link file holds the path of the linked dataset within the same filesystem.
pub async fn resolve_level_path(fs: &dyn FileSystem, path: &str, level: usize) -> Result<String> {
    match fs.read(&join_key(path, &link_name(level))).await {
        Ok(bytes) => {
            let target = std::str::from_utf8(&bytes)
                .map_err(|_| {
                    XcubeError::InvalidFormat(format!("link of level {level} in {path} is not UTF-8"))
                })?
                .trim();
            if target.is_empty() {
                return Err(XcubeError::InvalidFormat(format!(
                    "link of level {level} in {path} is empty"
                )));
            }
            Ok(target.to_string())
        }
        Err(XcubeError::NotFound(_)) => Ok(join_key(path, &level_name(level))),
        Err(e) => Err(e),
    }
}

/// Spatial chunk sizes of the first data variable having both spatial dims
fn tile_size_from_chunks(dataset: &Dataset) -> Option<(usize, usize)> {
    let (x_name, y_name) = dataset.spatial_dims()?;
    dataset.data_vars.values().find_map(|var| {
        let chunks = var.chunks.as_ref()?;
        let width = chunks.get(var.axis_of(&x_name)?)?;
        let height = chunks.get(var.axis_of(&y_name)?)?;
        Some((*width, *height))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::{new_cube, CubeVariable, NewCubeParams};
    use crate::fs::MemoryFileSystem;
    use crate::store::zarr::write_zarr;

    fn cube() -> Dataset {
        let params = NewCubeParams::default().with_variable(
            "index",
            CubeVariable::Function(Arc::new(|_, y, x| (y * 1000 + x) as f64)),
        );
        new_cube(&params).unwrap()
    }

    #[tokio::test]
    async fn test_base_multi_level_dataset() {
        let ml = BaseMultiLevelDataset::new("demo", cube(), Some((90, 90)), None).unwrap();
        assert_eq!(ml.ds_id(), "demo");
        assert_eq!(ml.num_levels(), 2);
        assert_eq!(ml.resolutions(), vec![(1.0, 1.0), (2.0, 2.0)]);

        let level_1 = ml.get_dataset(1).await.unwrap();
        assert_eq!(level_1.dim_size("lon"), Some(180));
        assert_eq!(level_1.dim_size("lat"), Some(90));
        assert_eq!(level_1.dim_size("time"), Some(5));
        assert_eq!(level_1.data_vars["index"].data[[0, 1, 1]], 2002.0);
        assert_eq!(level_1.data_vars["index"].chunks, Some(vec![1, 90, 90]));
        assert!(Arc::ptr_eq(&level_1, &ml.get_dataset(1).await.unwrap()));

        let base = ml.base_dataset().await.unwrap();
        assert_eq!(base.dim_size("lon"), Some(360));
        assert!(matches!(
            ml.get_dataset(2).await,
            Err(XcubeError::OutOfBounds(_))
        ));
    }

    #[test]
    fn test_num_levels_max() {
        let ml = BaseMultiLevelDataset::new("demo", cube(), Some((90, 90)), Some(1)).unwrap();
        assert_eq!(ml.num_levels(), 1);
    }

    #[tokio::test]
    async fn test_stored_multi_level_dataset() {
        let fs: Arc<dyn FileSystem> = Arc::new(MemoryFileSystem::new());
        let ml = BaseMultiLevelDataset::new("demo", cube(), Some((90, 90)), None).unwrap();
        for level in 0..ml.num_levels() {
            let dataset = ml.compute_level(level).unwrap();
            let path = format!("demo.levels/{}", level_name(level));
            write_zarr(fs.as_ref(), &path, &dataset, &HashMap::new(), None)
                .await
                .unwrap();
        }

        // without .zlevels, levels are counted and tiles taken from chunks
        let stored = StoredMultiLevelDataset::open(Arc::clone(&fs), "demo.levels", "demo")
            .await
            .unwrap();
        assert_eq!(stored.num_levels(), 2);
        assert_eq!(stored.grid_mapping().tile_size, (90, 90));
        let level_1 = stored.get_dataset(1).await.unwrap();
        assert_eq!(level_1.dim_size("lon"), Some(180));
        assert!(stored.get_dataset(2).await.is_err());

        let info = serde_json::to_vec(&LevelsInfo::new(1, (45, 45))).unwrap();
        fs.write("demo.levels/.zlevels", &info).await.unwrap();
        let stored = StoredMultiLevelDataset::open(Arc::clone(&fs), "demo.levels", "demo")
            .await
            .unwrap();
        assert_eq!(stored.num_levels(), 1);
        assert_eq!(stored.grid_mapping().tile_size, (45, 45));

        assert!(StoredMultiLevelDataset::open(fs, "other.levels", "other")
            .await
            .is_err());
    }

    #[test]
    fn test_tile_size_from_chunks() {
        let mut ds = cube();
        assert_eq!(tile_size_from_chunks(&ds), None);
        ds.data_vars.get_mut("index").unwrap().chunks = Some(vec![1, 90, 180]);
        assert_eq!(tile_size_from_chunks(&ds), Some((180, 90)));
        // chunk metadata of fewer dims than the variable has
        ds.data_vars.get_mut("index").unwrap().chunks = Some(vec![1]);
        assert_eq!(tile_size_from_chunks(&ds), None);
    }

    #[tokio::test]
    async fn test_resolve_level_path() {
        let fs = MemoryFileSystem::new();
        assert_eq!(
            resolve_level_path(&fs, "a.levels", 1).await.unwrap(),
            "a.levels/1.zarr"
        );
        fs.write("a.levels/0.link", b"base.zarr\n").await.unwrap();
        assert_eq!(resolve_level_path(&fs, "a.levels", 0).await.unwrap(), "base.zarr");
        fs.write("a.levels/2.link", b"  ").await.unwrap();
        assert!(matches!(
            resolve_level_path(&fs, "a.levels", 2).await,
            Err(XcubeError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_levels_info_json() {
        let info = LevelsInfo::new(3, (512, 256));
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"version": "1.0", "num_levels": 3, "tile_size": [512, 256]})
        );
    }
}
