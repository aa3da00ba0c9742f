//! Reading and writing datasets as Zarr v2 groups on a [`FileSystem`]

use crate::codec::{codec_from_config, Codec};
use crate::cube::{Dataset, Variable};
use crate::error::{Result, XcubeError};
use crate::fs::{join_key, FileSystem};
use crate::types::DataType;
use crate::zarrstore::{
    decode_fill_value, format_chunk_key, get_array_slices, get_chunk_indexes, get_chunk_shape,
    GenericZarrStore, Order,
};
use futures::future::try_join_all;
use indexmap::IndexMap;
use log::{debug, info};
use ndarray::{ArrayD, IxDyn, ShapeBuilder, Slice};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the consolidated metadata key
pub const ZMETADATA: &str = ".zmetadata";

const ARRAY_DIMENSIONS: &str = "_ARRAY_DIMENSIONS";

/// Write a dataset as Zarr group at `path`, returning the number of chunks written
pub async fn write_zarr(
    fs: &dyn FileSystem,
    path: &str,
    dataset: &Dataset,
    chunk_sizes: &HashMap<String, usize>,
    compressor: Option<Arc<dyn Codec>>,
) -> Result<usize> {
    let store = GenericZarrStore::from_dataset(dataset, chunk_sizes, compressor)?;
    let keys: Vec<String> = store
        .keys()
        .into_iter()
        .filter(|key| store.array(key).is_none())
        .collect();
    let num_chunks = keys
        .iter()
        .filter(|key| !key.rsplit('/').next().is_some_and(|name| name.starts_with('.')))
        .count();

    let store = &store;
    try_join_all(keys.iter().map(|key| async move {
        let value = store.get(key)?;
        fs.write(&join_key(path, key), &value).await
    }))
    .await?;

    info!(
        "written {} with {} arrays and {} chunks",
        path,
        store.array_names().count(),
        num_chunks
    );
    Ok(num_chunks)
}

/// Read a Zarr group at `path` into a dataset.
///
/// Consolidated metadata is used if present. Chunks are read concurrently,
/// missing chunks take the array's fill value.
pub async fn read_zarr(fs: &dyn FileSystem, path: &str) -> Result<Dataset> {
    let metadata = read_metadata(fs, path).await?;
    let mut dataset = Dataset::new();
    if let Some(Value::Object(attrs)) = metadata.get(".zattrs") {
        dataset.attrs = attrs.clone();
    }

    let empty_attrs = Value::Object(Map::new());
    for (key, zarray) in &metadata {
        let Some(name) = key.strip_suffix("/.zarray") else {
            continue;
        };
        let zattrs = metadata
            .get(&format!("{name}/.zattrs"))
            .unwrap_or(&empty_attrs);
        let meta = ArrayMeta::parse(name, zarray, zattrs)?;
        let data = read_array_data(fs, &join_key(path, name), name, &meta).await?;

        let mut var = Variable::new(meta.dims.clone(), data)?.with_dtype(meta.dtype);
        var.attrs = meta.attrs;
        var.fill_value = meta.fill_value;
        var.chunks = Some(meta.chunks);
        if var.dims.len() == 1 && var.dims[0] == name {
            dataset.add_coord(name, var)?;
        } else {
            dataset.add_var(name, var)?;
        }
    }
    debug!("read {} with {} variables", path, dataset.variables().count());
    Ok(dataset)
}

/// Check whether `path` holds a Zarr group
pub async fn is_zarr_group(fs: &dyn FileSystem, path: &str) -> Result<bool> {
    Ok(fs.exists(&join_key(path, ".zgroup")).await?
        || fs.exists(&join_key(path, ZMETADATA)).await?)
}

/// Collect `.zgroup`, `.zattrs` and the per-array metadata items of a group
async fn read_metadata(fs: &dyn FileSystem, path: &str) -> Result<IndexMap<String, Value>> {
    match fs.read(&join_key(path, ZMETADATA)).await {
        Ok(bytes) => {
            let consolidated: Value = serde_json::from_slice(&bytes)?;
            let Some(Value::Object(items)) = consolidated.get("metadata") else {
                return Err(XcubeError::Metadata(format!(
                    "{path}: invalid consolidated metadata"
                )));
            };
            return Ok(items.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
        }
        Err(XcubeError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    let mut items = IndexMap::new();
    let zgroup = fs
        .read(&join_key(path, ".zgroup"))
        .await
        .map_err(|e| match e {
            XcubeError::NotFound(_) => XcubeError::NotFound(format!("{path} is not a Zarr group")),
            e => e,
        })?;
    items.insert(".zgroup".to_string(), serde_json::from_slice(&zgroup)?);
    if let Some(zattrs) = read_optional_json(fs, &join_key(path, ".zattrs")).await? {
        items.insert(".zattrs".to_string(), zattrs);
    }
    for name in fs.list(path).await? {
        let array_path = join_key(path, &name);
        let Some(zarray) = read_optional_json(fs, &join_key(&array_path, ".zarray")).await? else {
            continue;
        };
        items.insert(format!("{name}/.zarray"), zarray);
        if let Some(zattrs) = read_optional_json(fs, &join_key(&array_path, ".zattrs")).await? {
            items.insert(format!("{name}/.zattrs"), zattrs);
        }
    }
    Ok(items)
}

async fn read_optional_json(fs: &dyn FileSystem, path: &str) -> Result<Option<Value>> {
    match fs.read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(XcubeError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Parsed `.zarray` and `.zattrs` of one array
#[derive(Debug)]
struct ArrayMeta {
    dims: Vec<String>,
    dtype: DataType,
    shape: Vec<usize>,
    chunks: Vec<usize>,
    fill_value: Option<f64>,
    compressor: Option<Arc<dyn Codec>>,
    order: Order,
    attrs: Map<String, Value>,
}

impl ArrayMeta {
    fn parse(name: &str, zarray: &Value, zattrs: &Value) -> Result<Self> {
        let invalid = |message: &str| XcubeError::Metadata(format!("array {name:?}: {message}"));
        if zarray.get("zarr_format").and_then(Value::as_u64) != Some(2) {
            return Err(invalid("only zarr_format 2 is supported"));
        }
        let dtype = DataType::from_zarr_dtype(
            zarray
                .get("dtype")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("missing dtype"))?,
        )?;
        let shape = usize_list(zarray.get("shape")).ok_or_else(|| invalid("invalid shape"))?;
        let chunks = usize_list(zarray.get("chunks")).ok_or_else(|| invalid("invalid chunks"))?;
        if chunks.len() != shape.len() || chunks.iter().any(|&c| c == 0) {
            return Err(invalid("chunks do not match shape"));
        }
        let fill_value = decode_fill_value(zarray.get("fill_value").unwrap_or(&Value::Null))?;
        let compressor = match zarray.get("compressor") {
            None | Some(Value::Null) => None,
            Some(config) => Some(codec_from_config(config)?),
        };
        if !matches!(zarray.get("filters"), None | Some(Value::Null)) {
            return Err(invalid("filters are not supported"));
        }
        let order = match zarray.get("order").and_then(Value::as_str) {
            None | Some("C") => Order::C,
            Some("F") => Order::F,
            Some(other) => return Err(invalid(&format!("invalid order {other:?}"))),
        };

        let mut attrs = zattrs.as_object().cloned().unwrap_or_default();
        let dims: Vec<String> = match attrs.shift_remove(ARRAY_DIMENSIONS) {
            Some(Value::Array(dims)) => dims
                .iter()
                .map(|d| d.as_str().map(str::to_string))
                .collect::<Option<_>>()
                .ok_or_else(|| invalid("dimension names must be strings"))?,
            _ => return Err(invalid(&format!("missing {ARRAY_DIMENSIONS} attribute"))),
        };
        if dims.len() != shape.len() {
            return Err(invalid("dimension names do not match shape"));
        }
        Ok(Self {
            dims,
            dtype,
            shape,
            chunks,
            fill_value,
            compressor,
            order,
            attrs,
        })
    }
}

fn usize_list(value: Option<&Value>) -> Option<Vec<usize>> {
    value?
        .as_array()?
        .iter()
        .map(|v| v.as_u64().map(|n| n as usize))
        .collect()
}

async fn read_array_data(
    fs: &dyn FileSystem,
    array_path: &str,
    name: &str,
    meta: &ArrayMeta,
) -> Result<ArrayD<f64>> {
    let num_chunks: Vec<usize> = meta
        .shape
        .iter()
        .zip(&meta.chunks)
        .map(|(s, c)| s.div_ceil(*c))
        .collect();
    let chunk_indexes = get_chunk_indexes(&num_chunks);

    let chunk_data = try_join_all(chunk_indexes.iter().map(|index| async move {
        let key = format_chunk_key(name, index);
        let chunk_id = key.rsplit('/').next().unwrap_or_default();
        match fs.read(&join_key(array_path, chunk_id)).await {
            Ok(bytes) => Ok(Some((index, bytes))),
            Err(XcubeError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }))
    .await?;

    let mut data = ArrayD::from_elem(IxDyn(&meta.shape), meta.fill_value.unwrap_or(0.0));
    let chunk_size: usize = meta.chunks.iter().product();
    for (index, bytes) in chunk_data.into_iter().flatten() {
        let bytes = match &meta.compressor {
            Some(codec) => codec.decode(&bytes, Some(chunk_size * meta.dtype.size_in_bytes()))?,
            None => bytes.to_vec(),
        };
        let values = meta.dtype.decode_values(&bytes)?;
        if values.len() != chunk_size {
            return Err(XcubeError::InvalidFormat(format!(
                "{}: expected {} values, got {}",
                format_chunk_key(name, index),
                chunk_size,
                values.len()
            )));
        }
        let chunk = match meta.order {
            Order::C => ArrayD::from_shape_vec(IxDyn(&meta.chunks), values)?,
            Order::F => ArrayD::from_shape_vec(IxDyn(&meta.chunks).f(), values)?,
        };
        let chunk_shape = get_chunk_shape(&meta.shape, &meta.chunks, index);
        let slices = get_array_slices(&meta.shape, &meta.chunks, index);
        data.slice_each_axis_mut(|ax| Slice::from(slices[ax.axis.index()].clone()))
            .assign(&chunk.slice_each_axis(|ax| Slice::from(0..chunk_shape[ax.axis.index()])));
    }
    Ok(data)
}
