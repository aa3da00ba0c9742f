//! Integration tests writing and reading data cubes on the local filesystem

use std::sync::Arc;
use tempfile::TempDir;
use xcube::cube::{new_cube, CubeVariable, NewCubeParams};
use xcube::fs::{FileSystem, LocalFileSystem};
use xcube::store::zarr::{is_zarr_group, ZMETADATA};
use xcube::store::{DataStore, FsDataStore, WriteLevelsOptions};
use xcube::{Dataset, XcubeError, ZstdCodec};

fn cube() -> Dataset {
    let params = NewCubeParams {
        width: 64,
        height: 32,
        spatial_res: 2.5,
        x_start: -80.0,
        y_start: -40.0,
        time_periods: 3,
        ..NewCubeParams::default()
    }
    .with_variable(
        "chl",
        CubeVariable::Function(Arc::new(|t, y, x| (t * 10_000 + y * 100 + x) as f64)),
    )
    .with_variable("kd489", CubeVariable::Constant(0.25));
    new_cube(&params).unwrap()
}

fn local_store(temp_dir: &TempDir) -> FsDataStore {
    FsDataStore::new("local", Arc::new(LocalFileSystem::new(temp_dir.path())), "")
}

#[tokio::test]
async fn test_zarr_roundtrip_with_zstd() {
    let temp_dir = TempDir::new().unwrap();
    let store = local_store(&temp_dir).with_compressor(Arc::new(ZstdCodec::new(3)));
    store.write_data(&cube(), "cube.zarr", false).await.unwrap();

    let fs = LocalFileSystem::new(temp_dir.path());
    assert!(is_zarr_group(&fs, "cube.zarr").await.unwrap());
    assert!(fs.exists(&format!("cube.zarr/{ZMETADATA}")).await.unwrap());

    // A fresh store must not depend on any state of the writer
    let ds = local_store(&temp_dir).open_data("cube.zarr").await.unwrap();
    assert_eq!(ds.dims["time"], 3);
    assert_eq!(ds.dims["lat"], 32);
    assert_eq!(ds.dims["lon"], 64);
    let chl = &ds.data_vars["chl"];
    assert_eq!(chl.dims, vec!["time", "lat", "lon"]);
    assert_eq!(chl.data[[0, 0, 0]], 0.0);
    assert_eq!(chl.data[[2, 31, 63]], 23_163.0);
    assert_eq!(ds.data_vars["kd489"].data[[1, 5, 7]], 0.25);
    assert_eq!(ds.coord_values("lon").unwrap()[0], -78.75);
}

#[tokio::test]
async fn test_levels_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let store = local_store(&temp_dir);
    let options = WriteLevelsOptions {
        tile_size: Some((16, 16)),
        ..WriteLevelsOptions::default()
    };
    store
        .write_levels(cube(), "cube.levels", &options, None)
        .await
        .unwrap();

    let ml_dataset = local_store(&temp_dir)
        .open_ml_dataset("cube.levels", None)
        .await
        .unwrap();
    assert_eq!(ml_dataset.num_levels(), 2);
    assert_eq!(ml_dataset.grid_mapping().tile_size, (16, 16));

    let level_0 = ml_dataset.get_dataset(0).await.unwrap();
    let level_1 = ml_dataset.get_dataset(1).await.unwrap();
    assert_eq!(level_0.dim_size("lon"), Some(64));
    assert_eq!(level_1.dim_size("lon"), Some(32));
    assert_eq!(level_1.dim_size("lat"), Some(16));
    // every second pixel survives downsampling
    assert_eq!(
        level_1.data_vars["chl"].data[[1, 3, 5]],
        level_0.data_vars["chl"].data[[1, 6, 10]]
    );
    assert!(matches!(
        ml_dataset.get_dataset(2).await,
        Err(XcubeError::OutOfBounds(_)) | Err(XcubeError::InvalidValue(_))
    ));

    let replaced = WriteLevelsOptions {
        num_levels_max: Some(1),
        replace: true,
        ..options
    };
    store
        .write_levels(cube(), "cube.levels", &replaced, None)
        .await
        .unwrap();
    let ml_dataset = store.open_ml_dataset("cube.levels", None).await.unwrap();
    assert_eq!(ml_dataset.num_levels(), 1);
}

#[tokio::test]
async fn test_open_single_level_as_pyramid() {
    let temp_dir = TempDir::new().unwrap();
    let store = local_store(&temp_dir);
    store.write_data(&cube(), "cube.zarr", false).await.unwrap();

    let ml_dataset = store
        .open_ml_dataset("cube.zarr", Some((16, 16)))
        .await
        .unwrap();
    assert_eq!(ml_dataset.num_levels(), 2);
    let level_1 = ml_dataset.get_dataset(1).await.unwrap();
    assert_eq!(level_1.data_vars["kd489"].shape(), &[3, 16, 32]);

    let descriptor = store.describe_data("cube.zarr").await.unwrap();
    assert_eq!(descriptor.dims["lon"], 64);
    assert_eq!(descriptor.bbox, Some((-80.0, -40.0, 80.0, 40.0)));
    assert_eq!(
        descriptor.time_range,
        Some((
            "2010-01-01T12:00:00Z".to_string(),
            "2010-01-03T12:00:00Z".to_string()
        ))
    );
}
