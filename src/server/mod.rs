//! Server configuration, API descriptors and request contexts

pub mod api;
pub mod config;
pub mod context;

pub use api::{default_server_apis, get_server_apis, Api, ApiError, ApiResult, ApiRoute, HttpMethod};
pub use config::{
    DataStoreConfig, DatasetConfig, ServerConfig, ServiceProviderConfig, StacCollectionConfig,
    StacConfig, StyleConfig,
};
pub use context::{DatasetsContext, ServerContext};
