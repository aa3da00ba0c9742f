//! Server and dataset contexts shared by all API controllers

use crate::cube::{Dataset, Variable};
use crate::error::Result;
use crate::fs::{LocalFileSystem, Protocol};
use crate::mldataset::MultiLevelDataset;
use crate::server::api::{default_server_apis, get_server_apis, Api, ApiError, ApiResult, ApiRoute};
use crate::server::config::{DatasetConfig, ServerConfig};
use crate::store::{new_fs_data_store, DataStore, FsDataStore};
use log::{debug, info};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Root context of a server: configuration, APIs and datasets
pub struct ServerContext {
    apis: Vec<Api>,
    datasets: DatasetsContext,
}

impl ServerContext {
    /// Create a context serving the default APIs
    pub fn new(config: ServerConfig) -> Result<Self> {
        Self::with_apis(config, default_server_apis())
    }

    pub fn with_apis(config: ServerConfig, apis: Vec<Api>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            apis: get_server_apis(apis)?,
            datasets: DatasetsContext::new(config),
        })
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.datasets.config()
    }

    /// APIs in dependency order
    pub fn apis(&self) -> &[Api] {
        &self.apis
    }

    pub fn get_api(&self, name: &str) -> Option<&Api> {
        self.apis.iter().find(|api| api.name == name)
    }

    pub fn datasets(&self) -> &DatasetsContext {
        &self.datasets
    }

    /// Find the route serving a request path, below the URL prefix
    pub fn find_route(&self, path: &str) -> Option<(&ApiRoute, HashMap<String, String>)> {
        let prefix = self.config().url_prefix();
        let path = path.strip_prefix(prefix.as_str())?;
        self.apis
            .iter()
            .flat_map(|api| api.routes.iter())
            .find_map(|route| route.match_path(path).map(|params| (route, params)))
    }

    /// Replace the configuration, dropping everything derived from the old one
    pub fn on_config_change(&self, config: ServerConfig) -> Result<()> {
        config.validate()?;
        self.datasets.update_config(config);
        info!("server configuration changed");
        Ok(())
    }
}

/// Resolves configured datasets into multi-level datasets.
///
/// Data stores and opened datasets are cached until the configuration
/// changes. Stores registered with [`DatasetsContext::register_data_store`]
/// are kept across configuration changes. Datasets opened under a
/// configuration that was replaced while they were opening are not cached.
pub struct DatasetsContext {
    config: RwLock<Arc<ServerConfig>>,
    /// Incremented whenever the caches are dropped
    generation: AtomicU64,
    registered_stores: RwLock<HashMap<String, Arc<dyn DataStore>>>,
    data_stores: RwLock<HashMap<String, Arc<dyn DataStore>>>,
    ml_datasets: RwLock<HashMap<String, Arc<dyn MultiLevelDataset>>>,
}

impl DatasetsContext {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            generation: AtomicU64::new(0),
            registered_stores: RwLock::new(HashMap::new()),
            data_stores: RwLock::new(HashMap::new()),
            ml_datasets: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.config.read())
    }

    /// The current configuration with its cache generation
    fn snapshot(&self) -> (Arc<ServerConfig>, u64) {
        let config = self.config.read();
        (Arc::clone(&config), self.generation.load(Ordering::Acquire))
    }

    fn update_config(&self, config: ServerConfig) {
        let mut current = self.config.write();
        *current = Arc::new(config);
        self.invalidate();
    }

    fn invalidate(&self) {
        let mut data_stores = self.data_stores.write();
        let mut ml_datasets = self.ml_datasets.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        data_stores.clear();
        ml_datasets.clear();
    }

    /// Provide a data store for a configured store identifier,
    /// e.g. one backed by object storage.
    pub fn register_data_store(&self, identifier: impl Into<String>, store: Arc<dyn DataStore>) {
        let identifier = identifier.into();
        self.registered_stores.write().insert(identifier, store);
        self.invalidate();
    }

    /// Whether a dataset has been opened and cached
    pub fn is_cached(&self, ds_id: &str) -> bool {
        self.ml_datasets.read().contains_key(ds_id)
    }

    /// All dataset configurations, hidden ones included
    pub fn get_dataset_configs(&self) -> Vec<DatasetConfig> {
        self.config().dataset_configs()
    }

    pub fn get_dataset_config(&self, ds_id: &str) -> ApiResult<DatasetConfig> {
        self.get_dataset_configs()
            .into_iter()
            .find(|c| c.identifier == ds_id)
            .ok_or_else(|| ApiError::not_found(format!("Dataset \"{ds_id}\" not found")))
    }

    async fn get_data_store(
        &self,
        config: &ServerConfig,
        generation: u64,
        store_id: &str,
    ) -> ApiResult<Arc<dyn DataStore>> {
        let registered = self.registered_stores.read().get(store_id).cloned();
        if let Some(store) = registered {
            return Ok(store);
        }
        let cached = self.data_stores.read().get(store_id).cloned();
        if let Some(store) = cached {
            return Ok(store);
        }
        let store_config = config.data_store(store_id).ok_or_else(|| {
            ApiError::invalid_server_config(format!("data store {store_id:?} is not configured"))
        })?;
        let protocol = Protocol::from_name(&store_config.store_id)
            .map_err(|e| ApiError::invalid_server_config(e.to_string()))?;
        let root = match protocol {
            Protocol::File => config
                .resolve_path(&store_config.root)
                .to_string_lossy()
                .into_owned(),
            _ => store_config.root.clone(),
        };
        let store: Arc<dyn DataStore> = Arc::new(
            new_fs_data_store(store_id, protocol, &root)
                .map_err(|e| ApiError::invalid_server_config(e.to_string()))?,
        );
        debug!("opened data store {store_id:?} at {root:?}");
        let mut data_stores = self.data_stores.write();
        if self.generation.load(Ordering::Acquire) == generation {
            data_stores.insert(store_id.to_string(), Arc::clone(&store));
        }
        Ok(store)
    }

    /// The multi-level dataset of a configured dataset, 404 if unknown
    pub async fn get_ml_dataset(&self, ds_id: &str) -> ApiResult<Arc<dyn MultiLevelDataset>> {
        let cached = self.ml_datasets.read().get(ds_id).cloned();
        if let Some(ml_dataset) = cached {
            return Ok(ml_dataset);
        }
        let (config, generation) = self.snapshot();
        let ds_config = config
            .dataset_configs()
            .into_iter()
            .find(|c| c.identifier == ds_id)
            .ok_or_else(|| ApiError::not_found(format!("Dataset \"{ds_id}\" not found")))?;
        let tile_size = ds_config.tile_size.map(|[w, h]| (w, h));
        let ml_dataset = match &ds_config.store_id {
            Some(store_id) => {
                let store = self.get_data_store(&config, generation, store_id).await?;
                let data_id = ds_config.path.as_deref().unwrap_or(ds_id);
                store.open_ml_dataset(data_id, tile_size).await?
            }
            None => {
                let path = ds_config.path.as_deref().ok_or_else(|| {
                    ApiError::invalid_server_config(format!("dataset {ds_id:?} has no path"))
                })?;
                let path = config.resolve_path(path);
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| {
                        ApiError::invalid_server_config(format!("invalid path of dataset {ds_id:?}"))
                    })?;
                let parent = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();
                let store = FsDataStore::new(ds_id, Arc::new(LocalFileSystem::new(parent)), "");
                store.open_ml_dataset(&file_name, tile_size).await?
            }
        };
        info!(
            "opened dataset {ds_id:?} with {} level(s)",
            ml_dataset.num_levels()
        );
        let mut ml_datasets = self.ml_datasets.write();
        if self.generation.load(Ordering::Acquire) == generation {
            ml_datasets.insert(ds_id.to_string(), Arc::clone(&ml_dataset));
        } else {
            debug!("configuration changed while opening {ds_id:?}, not caching it");
        }
        Ok(ml_dataset)
    }

    /// Level 0 of a configured dataset
    pub async fn get_dataset(&self, ds_id: &str) -> ApiResult<Arc<Dataset>> {
        Ok(self.get_ml_dataset(ds_id).await?.get_dataset(0).await?)
    }

    /// A data variable of a dataset at a pyramid level
    pub async fn get_variable_for_level(
        &self,
        ds_id: &str,
        var_name: &str,
        level: usize,
    ) -> ApiResult<Variable> {
        let ml_dataset = self.get_ml_dataset(ds_id).await?;
        let dataset = ml_dataset.get_dataset(0).await?;
        if !dataset.data_vars.contains_key(var_name) {
            return Err(ApiError::not_found(format!(
                "Variable \"{var_name}\" not found in dataset \"{ds_id}\""
            )));
        }
        if level >= ml_dataset.num_levels() {
            return Err(ApiError::not_found(format!(
                "Variable \"{var_name}\" has no level {level} in dataset \"{ds_id}\""
            )));
        }
        let dataset = ml_dataset.get_dataset(level).await?;
        dataset
            .data_vars
            .get(var_name)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("Variable \"{var_name}\" not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::{new_cube, CubeVariable, NewCubeParams};
    use crate::fs::MemoryFileSystem;
    use crate::progress::ProgressTracker;
    use crate::store::{DatasetDescriptor, DatasetSearch, DatasetSearchResult, WriteLevelsOptions};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    fn test_config() -> ServerConfig {
        ServerConfig::from_yaml_str(
            r#"
data_stores:
  - identifier: mem
    store_id: memory
    datasets:
      - identifier: demo
        path: demo.levels
      - identifier: single
        path: single.zarr
        hidden: true
"#,
        )
        .unwrap()
    }

    async fn memory_store() -> Arc<dyn DataStore> {
        let store = FsDataStore::new("mem", Arc::new(MemoryFileSystem::new()), "");
        let params = NewCubeParams {
            width: 40,
            height: 20,
            spatial_res: 9.0,
            time_periods: 2,
            ..NewCubeParams::default()
        }
        .with_variable("conc_chl", CubeVariable::Constant(2.5));
        let cube = new_cube(&params).unwrap();
        store.write_data(&cube, "single.zarr", false).await.unwrap();
        let options = WriteLevelsOptions {
            tile_size: Some((10, 10)),
            ..WriteLevelsOptions::default()
        };
        store
            .write_levels(cube, "demo.levels", &options, None)
            .await
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_get_ml_dataset() {
        let ctx = ServerContext::new(test_config()).unwrap();
        ctx.datasets().register_data_store("mem", memory_store().await);

        let ml_dataset = ctx.datasets().get_ml_dataset("demo").await.unwrap();
        assert_eq!(ml_dataset.num_levels(), 2);
        assert!(ctx.datasets().is_cached("demo"));

        let var = ctx
            .datasets()
            .get_variable_for_level("demo", "conc_chl", 1)
            .await
            .unwrap();
        assert_eq!(var.shape(), &[2, 10, 20]);

        let error = ctx
            .datasets()
            .get_variable_for_level("demo", "conc_chl", 2)
            .await
            .unwrap_err();
        assert_eq!(error.status_code, 404);

        let error = ctx
            .datasets()
            .get_variable_for_level("demo", "conc_ys", 0)
            .await
            .unwrap_err();
        assert_eq!(
            error.message.as_deref(),
            Some("Variable \"conc_ys\" not found in dataset \"demo\"")
        );

        let error = ctx.datasets().get_ml_dataset("demox").await.err().expect("expected an error");
        assert_eq!(error.status_code, 404);
        assert_eq!(error.message.as_deref(), Some("Dataset \"demox\" not found"));
    }

    #[tokio::test]
    async fn test_config_change_drops_caches() {
        let ctx = ServerContext::new(test_config()).unwrap();
        ctx.datasets().register_data_store("mem", memory_store().await);
        ctx.datasets().get_dataset("single").await.unwrap();
        assert!(ctx.datasets().is_cached("single"));

        let mut config = test_config();
        config.data_stores[0].datasets.remove(1);
        ctx.on_config_change(config).unwrap();
        assert!(!ctx.datasets().is_cached("single"));
        assert_eq!(ctx.datasets().get_dataset_configs().len(), 1);
        let error = ctx.datasets().get_dataset("single").await.unwrap_err();
        assert_eq!(error.status_code, 404);
        ctx.datasets().get_dataset("demo").await.unwrap();
    }

    /// Delegates to a store but holds `open_ml_dataset` until released
    struct GatedStore {
        inner: Arc<dyn DataStore>,
        opening: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl DataStore for GatedStore {
        fn store_id(&self) -> &str {
            self.inner.store_id()
        }

        async fn get_data_ids(&self) -> Result<Vec<String>> {
            self.inner.get_data_ids().await
        }

        async fn has_data(&self, data_id: &str) -> Result<bool> {
            self.inner.has_data(data_id).await
        }

        async fn describe_data(&self, data_id: &str) -> Result<DatasetDescriptor> {
            self.inner.describe_data(data_id).await
        }

        async fn open_data(&self, data_id: &str) -> Result<Dataset> {
            self.inner.open_data(data_id).await
        }

        async fn open_ml_dataset(
            &self,
            data_id: &str,
            tile_size: Option<(usize, usize)>,
        ) -> Result<Arc<dyn MultiLevelDataset>> {
            self.opening.notify_one();
            self.release.notified().await;
            self.inner.open_ml_dataset(data_id, tile_size).await
        }

        async fn write_data(&self, dataset: &Dataset, data_id: &str, replace: bool) -> Result<String> {
            self.inner.write_data(dataset, data_id, replace).await
        }

        async fn write_levels(
            &self,
            dataset: Dataset,
            data_id: &str,
            options: &WriteLevelsOptions,
            progress: Option<&ProgressTracker>,
        ) -> Result<String> {
            self.inner.write_levels(dataset, data_id, options, progress).await
        }

        async fn delete_data(&self, data_id: &str) -> Result<()> {
            self.inner.delete_data(data_id).await
        }

        async fn search_data(&self, search: &DatasetSearch) -> Result<DatasetSearchResult> {
            self.inner.search_data(search).await
        }
    }

    #[tokio::test]
    async fn test_config_change_while_opening() {
        let ctx = ServerContext::new(test_config()).unwrap();
        let opening = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let store = GatedStore {
            inner: memory_store().await,
            opening: Arc::clone(&opening),
            release: Arc::clone(&release),
        };
        ctx.datasets().register_data_store("mem", Arc::new(store));

        let change_config = async {
            opening.notified().await;
            ctx.on_config_change(test_config()).unwrap();
            release.notify_one();
        };
        let (ml_dataset, ()) = tokio::join!(ctx.datasets().get_ml_dataset("demo"), change_config);
        assert_eq!(ml_dataset.unwrap().num_levels(), 2);
        // opened under the replaced configuration
        assert!(!ctx.datasets().is_cached("demo"));

        release.notify_one();
        ctx.datasets().get_ml_dataset("demo").await.unwrap();
        assert!(ctx.datasets().is_cached("demo"));
    }

    #[test]
    fn test_find_route() {
        let mut config = test_config();
        config.url_prefix = Some("api".to_string());
        let ctx = ServerContext::new(config).unwrap();
        assert_eq!(ctx.apis()[0].name, "datasets");
        let (route, params) = ctx.find_route("/api/s3/demo/conc_chl/.zarray").unwrap();
        assert_eq!(route.operation_id, "get_object");
        assert_eq!(params["key"], "conc_chl/.zarray");
        assert!(ctx.find_route("/s3/demo").is_none());
        assert!(ctx.get_api("wmts").is_some());
    }
}
