//! xcube - data cubes for Earth observation
//!
//! A pure Rust toolkit for chunked, multi-dimensional geospatial data cubes:
//! in-memory datasets with named dimensions, Zarr (v2) persistence, multi-level
//! pyramids, data stores over pluggable filesystems and the controllers of the
//! OGC-style web APIs (WMTS, coverages, statistics, S3 bucket listing).
//!
//! # Features
//!
//! - Datasets with coordinates, data variables and attributes backed by `ndarray`
//! - Zarr v2 groups with zlib or zstd chunk compression
//! - Multi-level (`.levels`) pyramids with lazily computed or stored levels
//! - Local, in-memory and (with the `http-client` feature) read-only HTTP filesystems
//! - Server configuration from YAML or JSON with cached dataset resolution
//!
//! # Example
//!
//! ```rust,ignore
//! use xcube::cube::{new_cube, CubeVariable, NewCubeParams};
//! use xcube::fs::Protocol;
//! use xcube::store::{new_fs_data_store, DataStore};
//!
//! # async fn example() -> xcube::Result<()> {
//! let params = NewCubeParams::default().with_variable("conc_chl", CubeVariable::Constant(0.5));
//! let cube = new_cube(&params)?;
//!
//! let store = new_fs_data_store("local", Protocol::File, "/data/cubes")?;
//! store.write_data(&cube, "demo.zarr", true).await?;
//! let ml_dataset = store.open_ml_dataset("demo.zarr", Some((90, 90))).await?;
//! println!("{} levels", ml_dataset.num_levels());
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod crs;
pub mod cube;
pub mod error;
pub mod fs;
pub mod geojson;
pub mod gridmapping;
pub mod mldataset;
pub mod progress;
pub mod server;
pub mod store;
pub mod tiling;
pub mod types;
pub mod utils;
pub mod webapi;
pub mod xml;
pub mod zarrstore;

// Re-exports
pub use codec::{Codec, ZlibCodec, ZstdCodec};
pub use crs::Crs;
pub use cube::{new_cube, Dataset, NewCubeParams, Variable};
pub use error::{Result, XcubeError};
pub use fs::{FileSystem, LocalFileSystem, MemoryFileSystem, Protocol};
pub use gridmapping::GridMapping;
pub use mldataset::{BaseMultiLevelDataset, MultiLevelDataset, StoredMultiLevelDataset};
pub use server::{ServerConfig, ServerContext};
pub use store::{DataStore, FsDataStore};
pub use tiling::TilingScheme;
pub use types::DataType;
pub use zarrstore::GenericZarrStore;

/// Version of the toolkit
pub const XCUBE_VERSION: &str = env!("CARGO_PKG_VERSION");
