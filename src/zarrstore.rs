//! A read-only Zarr v2 store over generic arrays
//!
//! Arrays either hold static data or compute their chunks on demand through
//! a chunk getter. All arrays live in a flat, top-level Zarr group.

use crate::codec::Codec;
use crate::cube::Dataset;
use crate::error::{Result, XcubeError};
use crate::types::DataType;
use bytes::Bytes;
use indexmap::IndexMap;
use log::debug;
use ndarray::{ArrayD, IxDyn, Slice};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Location of a chunk within its array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    pub index: Vec<usize>,
    /// Shape of the chunk without padding
    pub shape: Vec<usize>,
    /// Array index ranges covered by the chunk
    pub slices: Vec<Range<usize>>,
}

/// Computes the data of a chunk
pub type GetData = Arc<dyn Fn(&ChunkInfo) -> Result<ArrayD<f64>> + Send + Sync>;

/// Called for each array when the store is closed
pub type OnClose = Arc<dyn Fn(&ArrayInfo) + Send + Sync>;

/// Memory order of chunk bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    C,
    F,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::C => "C",
            Order::F => "F",
        }
    }
}

/// Properties of an array to be added to a [`GenericZarrStore`].
///
/// All properties are optional here; [`GenericArray::finalize`] checks that
/// the required ones are present. Exactly one of `data` and `get_data` must
/// be given. With `data`, `dtype` defaults to `float64` and `shape` is taken
/// from the data.
#[derive(Clone, Default)]
pub struct GenericArray {
    pub name: Option<String>,
    pub dims: Option<Vec<String>>,
    pub dtype: Option<DataType>,
    pub shape: Option<Vec<usize>>,
    pub chunks: Option<Vec<usize>>,
    pub fill_value: Option<f64>,
    pub compressor: Option<Arc<dyn Codec>>,
    pub order: Option<String>,
    pub attrs: Option<Map<String, Value>>,
    pub data: Option<Arc<ArrayD<f64>>>,
    pub get_data: Option<GetData>,
    pub on_close: Option<OnClose>,
}

impl fmt::Debug for GenericArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericArray")
            .field("name", &self.name)
            .field("dims", &self.dims)
            .field("dtype", &self.dtype)
            .field("shape", &self.shape)
            .field("chunks", &self.chunks)
            .field("has_data", &self.data.is_some())
            .field("has_get_data", &self.get_data.is_some())
            .finish()
    }
}

impl GenericArray {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn dims<S: Into<String>>(mut self, dims: impl IntoIterator<Item = S>) -> Self {
        self.dims = Some(dims.into_iter().map(Into::into).collect());
        self
    }

    pub fn dtype(mut self, dtype: DataType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn shape(mut self, shape: impl Into<Vec<usize>>) -> Self {
        self.shape = Some(shape.into());
        self
    }

    pub fn chunks(mut self, chunks: impl Into<Vec<usize>>) -> Self {
        self.chunks = Some(chunks.into());
        self
    }

    pub fn fill_value(mut self, fill_value: f64) -> Self {
        self.fill_value = Some(fill_value);
        self
    }

    pub fn compressor(mut self, compressor: Arc<dyn Codec>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn attrs(mut self, attrs: Map<String, Value>) -> Self {
        self.attrs = Some(attrs);
        self
    }

    pub fn data(mut self, data: ArrayD<f64>) -> Self {
        self.data = Some(Arc::new(data));
        self
    }

    pub fn get_data<F>(mut self, get_data: F) -> Self
    where
        F: Fn(&ChunkInfo) -> Result<ArrayD<f64>> + Send + Sync + 'static,
    {
        self.get_data = Some(Arc::new(get_data));
        self
    }

    pub fn on_close<F>(mut self, on_close: F) -> Self
    where
        F: Fn(&ArrayInfo) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(on_close));
        self
    }

    /// Fill unset properties from `defaults`
    pub fn with_defaults(self, defaults: &GenericArray) -> Self {
        let defaults = defaults.clone();
        Self {
            name: self.name.or(defaults.name),
            dims: self.dims.or(defaults.dims),
            dtype: self.dtype.or(defaults.dtype),
            shape: self.shape.or(defaults.shape),
            chunks: self.chunks.or(defaults.chunks),
            fill_value: self.fill_value.or(defaults.fill_value),
            compressor: self.compressor.or(defaults.compressor),
            order: self.order.or(defaults.order),
            attrs: self.attrs.or(defaults.attrs),
            data: self.data.or(defaults.data),
            get_data: self.get_data.or(defaults.get_data),
            on_close: self.on_close.or(defaults.on_close),
        }
    }

    /// Validate and normalize the properties
    pub fn finalize(self) -> Result<ArrayInfo> {
        let name = self
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| XcubeError::InvalidValue("missing array name".to_string()))?;
        let invalid = |message: &str| XcubeError::InvalidValue(format!("array {name:?}: {message}"));

        let source = match (self.data, self.get_data) {
            (None, None) => return Err(invalid("either data or get_data must be defined")),
            (Some(_), Some(_)) => return Err(invalid("data and get_data cannot be defined together")),
            (Some(data), None) => ArraySource::Data(data),
            (None, Some(get_data)) => ArraySource::GetData(get_data),
        };

        let dims = self.dims.ok_or_else(|| invalid("missing dims"))?;
        let ndim = dims.len();

        let (dtype, shape) = match &source {
            ArraySource::Data(data) => (self.dtype.unwrap_or(DataType::F64), data.shape().to_vec()),
            ArraySource::GetData(_) => (
                self.dtype.ok_or_else(|| invalid("missing dtype"))?,
                self.shape.ok_or_else(|| invalid("missing shape"))?,
            ),
        };
        if shape.len() != ndim {
            return Err(invalid("dims and shape must have same length"));
        }
        let chunks = self.chunks.unwrap_or_else(|| shape.clone());
        if chunks.len() != ndim {
            return Err(invalid("dims and chunks must have same length"));
        }
        if chunks.iter().any(|&c| c == 0) {
            return Err(invalid("chunk sizes must be positive"));
        }
        let num_chunks = shape
            .iter()
            .zip(&chunks)
            .map(|(s, c)| s.div_ceil(*c))
            .collect();

        let order = match self.order.as_deref().unwrap_or("C") {
            "C" => Order::C,
            "F" => Order::F,
            other => return Err(invalid(&format!("order must be one of (\"C\", \"F\"), was {other:?}"))),
        };

        Ok(ArrayInfo {
            name,
            dims,
            dtype,
            shape,
            chunks,
            fill_value: self.fill_value,
            compressor: self.compressor,
            order,
            attrs: self.attrs.unwrap_or_default(),
            source,
            on_close: self.on_close,
            num_chunks,
        })
    }
}

#[derive(Clone)]
enum ArraySource {
    Data(Arc<ArrayD<f64>>),
    GetData(GetData),
}

/// A validated array of a [`GenericZarrStore`]
#[derive(Clone)]
pub struct ArrayInfo {
    pub name: String,
    pub dims: Vec<String>,
    pub dtype: DataType,
    pub shape: Vec<usize>,
    pub chunks: Vec<usize>,
    pub fill_value: Option<f64>,
    pub compressor: Option<Arc<dyn Codec>>,
    pub order: Order,
    pub attrs: Map<String, Value>,
    source: ArraySource,
    on_close: Option<OnClose>,
    /// Number of chunks along each dimension
    pub num_chunks: Vec<usize>,
}

impl fmt::Debug for ArrayInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayInfo")
            .field("name", &self.name)
            .field("dims", &self.dims)
            .field("dtype", &self.dtype)
            .field("shape", &self.shape)
            .field("chunks", &self.chunks)
            .field("num_chunks", &self.num_chunks)
            .finish()
    }
}

impl ArrayInfo {
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// The `.zarray` document
    fn spec_item(&self) -> Value {
        json!({
            "zarr_format": 2,
            "dtype": self.dtype.to_zarr_dtype(),
            "shape": self.shape,
            "chunks": self.chunks,
            "fill_value": encode_fill_value(self.fill_value, self.dtype),
            "compressor": self.compressor.as_ref().map(|c| c.config()),
            "filters": Value::Null,
            "order": self.order.as_str(),
        })
    }

    /// The `.zattrs` document, dimension names first
    fn attrs_item(&self) -> Value {
        let mut attrs = Map::new();
        attrs.insert("_ARRAY_DIMENSIONS".to_string(), json!(self.dims));
        for (key, value) in &self.attrs {
            attrs.insert(key.clone(), value.clone());
        }
        Value::Object(attrs)
    }

    fn parse_chunk_index(&self, index_id: &str) -> Option<Vec<usize>> {
        if self.shape.is_empty() {
            return (index_id == "0").then(Vec::new);
        }
        let index: Vec<usize> = index_id
            .split('.')
            .map(|part| part.parse().ok())
            .collect::<Option<_>>()?;
        let valid = index.len() == self.num_chunks.len()
            && index.iter().zip(&self.num_chunks).all(|(i, n)| i < n);
        valid.then_some(index)
    }

    /// Compute, pad, serialize and compress one chunk
    fn chunk_bytes(&self, chunk_index: &[usize]) -> Result<Vec<u8>> {
        let chunk_shape = get_chunk_shape(&self.shape, &self.chunks, chunk_index);
        let slices = get_array_slices(&self.shape, &self.chunks, chunk_index);
        let data = match &self.source {
            ArraySource::Data(data) => data
                .slice_each_axis(|ax| Slice::from(slices[ax.axis.index()].clone()))
                .to_owned(),
            ArraySource::GetData(get_data) => get_data(&ChunkInfo {
                index: chunk_index.to_vec(),
                shape: chunk_shape.clone(),
                slices,
            })?,
        };

        let data = if data.shape() == self.chunks.as_slice() {
            data
        } else if data.shape() == chunk_shape.as_slice() {
            let fill_value = self.fill_value.unwrap_or(0.0);
            let mut padded = ArrayD::from_elem(IxDyn(&self.chunks), fill_value);
            padded
                .slice_each_axis_mut(|ax| Slice::from(0..chunk_shape[ax.axis.index()]))
                .assign(&data);
            padded
        } else {
            return Err(XcubeError::InvalidDimensions(format!(
                "{}: data chunk must have shape {:?}, but was {:?}",
                format_chunk_key(&self.name, chunk_index),
                self.chunks,
                data.shape()
            )));
        };

        let bytes = match self.order {
            Order::C => self.dtype.encode_values(data.iter()),
            Order::F => self.dtype.encode_values(data.t().iter()),
        };
        match &self.compressor {
            Some(compressor) => compressor.encode(&bytes),
            None => Ok(bytes),
        }
    }

    fn keys(&self) -> Vec<String> {
        let mut keys = vec![
            format!("{}/.zarray", self.name),
            format!("{}/.zattrs", self.name),
        ];
        keys.extend(
            get_chunk_indexes(&self.num_chunks)
                .iter()
                .map(|index| format_chunk_key(&self.name, index)),
        );
        keys
    }
}

/// Encode a fill value as Zarr v2 JSON
pub fn encode_fill_value(fill_value: Option<f64>, dtype: DataType) -> Value {
    match fill_value {
        None => Value::Null,
        Some(v) if v.is_nan() => json!("NaN"),
        Some(v) if v.is_infinite() && v < 0.0 => json!("-Infinity"),
        Some(v) if v.is_infinite() => json!("Infinity"),
        Some(v) if !dtype.is_float() && v.fract() == 0.0 => json!(v as i64),
        Some(v) => json!(v),
    }
}

/// Decode a Zarr v2 JSON fill value
pub fn decode_fill_value(value: &Value) -> Result<Option<f64>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => match s.as_str() {
            "NaN" => Ok(Some(f64::NAN)),
            "Infinity" => Ok(Some(f64::INFINITY)),
            "-Infinity" => Ok(Some(f64::NEG_INFINITY)),
            _ => Err(XcubeError::Metadata(format!("unsupported fill value {s:?}"))),
        },
        Value::Bool(b) => Ok(Some(if *b { 1.0 } else { 0.0 })),
        other => Err(XcubeError::Metadata(format!("unsupported fill value {other}"))),
    }
}

/// A read-only Zarr v2 store that maintains generic arrays in a flat group
#[derive(Clone, Default)]
pub struct GenericZarrStore {
    attrs: Map<String, Value>,
    array_defaults: Option<GenericArray>,
    dim_sizes: IndexMap<String, usize>,
    arrays: IndexMap<String, ArrayInfo>,
}

impl fmt::Debug for GenericZarrStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericZarrStore")
            .field("dim_sizes", &self.dim_sizes)
            .field("arrays", &self.arrays.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl GenericZarrStore {
    pub fn new(attrs: Map<String, Value>) -> Self {
        Self {
            attrs,
            ..Self::default()
        }
    }

    /// Set defaults for properties not given to [`Self::add_array`]
    pub fn with_array_defaults(mut self, defaults: GenericArray) -> Self {
        self.array_defaults = Some(defaults);
        self
    }

    /// Add a new array
    pub fn add_array(&mut self, array: GenericArray) -> Result<()> {
        let array = match &self.array_defaults {
            Some(defaults) => array.with_defaults(defaults),
            None => array,
        };
        let array = array.finalize()?;
        let name = array.name.clone();
        if self.arrays.contains_key(&name) {
            return Err(XcubeError::AlreadyExists(format!(
                "array {name:?} is already defined"
            )));
        }
        for (dim_name, &dim_size) in array.dims.iter().zip(&array.shape) {
            match self.dim_sizes.get(dim_name) {
                Some(&old_dim_size) if old_dim_size != dim_size => {
                    return Err(XcubeError::InvalidDimensions(format!(
                        "array {name:?} defines dimension {dim_name:?} with size {dim_size}, \
                         but existing size is {old_dim_size}"
                    )))
                }
                _ => {}
            }
        }
        for (dim_name, &dim_size) in array.dims.iter().zip(&array.shape) {
            self.dim_sizes.entry(dim_name.clone()).or_insert(dim_size);
        }
        self.arrays.insert(name, array);
        Ok(())
    }

    /// Build a store for a dataset, chunked along dimensions by `chunk_sizes`.
    ///
    /// Dimensions missing from `chunk_sizes` use the variable's stored chunking,
    /// if any, otherwise a single chunk. Coordinates are always a single chunk.
    pub fn from_dataset(
        dataset: &Dataset,
        chunk_sizes: &HashMap<String, usize>,
        compressor: Option<Arc<dyn Codec>>,
    ) -> Result<Self> {
        let mut store = GenericZarrStore::new(dataset.attrs.clone());
        let coord_names: Vec<&String> = dataset.coords.keys().collect();
        for (name, var) in dataset.variables() {
            let is_coord = coord_names.contains(&name);
            let chunks: Vec<usize> = var
                .dims
                .iter()
                .zip(var.shape())
                .enumerate()
                .map(|(axis, (dim, &size))| {
                    let chunk = if is_coord {
                        size
                    } else {
                        chunk_sizes
                            .get(dim)
                            .copied()
                            .or_else(|| var.chunks.as_ref().and_then(|c| c.get(axis).copied()))
                            .unwrap_or(size)
                    };
                    chunk.clamp(1, size.max(1))
                })
                .collect();
            let mut array = GenericArray::new(name.clone())
                .dims(var.dims.clone())
                .dtype(var.dtype)
                .chunks(chunks)
                .attrs(var.attrs.clone())
                .data(var.data.clone());
            if let Some(fill_value) = var.fill_value {
                array = array.fill_value(fill_value);
            }
            if let Some(compressor) = &compressor {
                array = array.compressor(Arc::clone(compressor));
            }
            store.add_array(array)?;
        }
        Ok(store)
    }

    /// Always false, arrays in this store are generative
    pub fn is_writeable(&self) -> bool {
        false
    }

    pub fn attrs(&self) -> &Map<String, Value> {
        &self.attrs
    }

    pub fn array(&self, name: &str) -> Option<&ArrayInfo> {
        self.arrays.get(name)
    }

    pub fn array_names(&self) -> impl Iterator<Item = &String> {
        self.arrays.keys()
    }

    pub fn dim_sizes(&self) -> &IndexMap<String, usize> {
        &self.dim_sizes
    }

    /// All keys of this store, in a deterministic order
    pub fn keys(&self) -> Vec<String> {
        let mut keys = vec![
            ".zmetadata".to_string(),
            ".zgroup".to_string(),
            ".zattrs".to_string(),
        ];
        for (name, array) in &self.arrays {
            keys.push(name.clone());
            keys.extend(array.keys());
        }
        keys
    }

    pub fn len(&self) -> usize {
        3 + self
            .arrays
            .values()
            .map(|a| 3 + a.num_chunks.iter().product::<usize>())
            .sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// List the entries of the root (`""`) or of an array
    pub fn listdir(&self, path: &str) -> Result<Vec<String>> {
        if path.is_empty() {
            let mut entries = vec![
                ".zmetadata".to_string(),
                ".zgroup".to_string(),
                ".zattrs".to_string(),
            ];
            entries.extend(self.arrays.keys().cloned());
            return Ok(entries);
        }
        match self.arrays.get(path) {
            Some(array) if !path.contains('/') => Ok(array.keys()),
            _ => Err(XcubeError::InvalidValue(format!("{path} is not a directory"))),
        }
    }

    /// Remove an array, freeing dimensions no other array uses
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let array = self
            .arrays
            .shift_remove(path)
            .ok_or_else(|| XcubeError::InvalidValue(format!("{path}: can only remove arrays")))?;
        for dim_name in &array.dims {
            let dim_used = self.arrays.values().any(|a| a.dims.contains(dim_name));
            if !dim_used {
                self.dim_sizes.shift_remove(dim_name);
            }
        }
        Ok(())
    }

    /// Rename an array
    pub fn rename(&mut self, src_path: &str, dst_path: &str) -> Result<()> {
        if !self.arrays.contains_key(src_path) {
            return Err(XcubeError::InvalidValue(format!(
                "can only rename arrays, but {src_path:?} is not an array"
            )));
        }
        if self.arrays.contains_key(dst_path) {
            return Err(XcubeError::AlreadyExists(format!(
                "cannot rename array {src_path:?} into {dst_path:?} because it already exists"
            )));
        }
        if dst_path.contains('/') || dst_path.is_empty() {
            return Err(XcubeError::InvalidValue(format!(
                "cannot rename array {src_path:?} into {dst_path:?}"
            )));
        }
        if let Some(index) = self.arrays.get_index_of(src_path) {
            if let Some((_, mut array)) = self.arrays.shift_remove_index(index) {
                array.name = dst_path.to_string();
                self.arrays.shift_insert(index, dst_path.to_string(), array);
            }
        }
        Ok(())
    }

    /// Call the arrays' close handlers
    pub fn close(&self) {
        for array in self.arrays.values() {
            if let Some(on_close) = &array.on_close {
                on_close(array);
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        if matches!(key, ".zmetadata" | ".zgroup" | ".zattrs") || self.arrays.contains_key(key) {
            return true;
        }
        match self.parse_array_key(key) {
            Some((_, ".zarray" | ".zattrs")) => true,
            Some((array, index_id)) => array.parse_chunk_index(index_id).is_some(),
            None => false,
        }
    }

    /// Get the value of a key
    pub fn get(&self, key: &str) -> Result<Bytes> {
        match key {
            ".zmetadata" => return json_bytes(&self.metadata_item()),
            ".zgroup" => return json_bytes(&group_item()),
            ".zattrs" => return json_bytes(&Value::Object(self.attrs.clone())),
            _ => {}
        }
        if self.arrays.contains_key(key) {
            return Ok(Bytes::new());
        }
        let (array, value_id) = self
            .parse_array_key(key)
            .ok_or_else(|| XcubeError::NotFound(key.to_string()))?;
        match value_id {
            ".zarray" => json_bytes(&array.spec_item()),
            ".zattrs" => json_bytes(&array.attrs_item()),
            index_id => {
                let chunk_index = array
                    .parse_chunk_index(index_id)
                    .ok_or_else(|| XcubeError::NotFound(key.to_string()))?;
                debug!("computing chunk {key}");
                Ok(Bytes::from(array.chunk_bytes(&chunk_index)?))
            }
        }
    }

    /// Always fails, the store is read-only
    pub fn set(&mut self, key: &str, _value: &[u8]) -> Result<()> {
        Err(XcubeError::ReadOnly(format!(
            "GenericZarrStore is read-only, cannot set {key:?}"
        )))
    }

    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.rmdir(key)
    }

    fn parse_array_key<'a>(&self, key: &'a str) -> Option<(&ArrayInfo, &'a str)> {
        let (array_name, value_id) = key.rsplit_once('/')?;
        Some((self.arrays.get(array_name)?, value_id))
    }

    fn metadata_item(&self) -> Value {
        let mut metadata = Map::new();
        metadata.insert(".zgroup".to_string(), group_item());
        metadata.insert(".zattrs".to_string(), Value::Object(self.attrs.clone()));
        for (name, array) in &self.arrays {
            metadata.insert(format!("{name}/.zarray"), array.spec_item());
            metadata.insert(format!("{name}/.zattrs"), array.attrs_item());
        }
        json!({
            "zarr_consolidated_format": 1,
            "metadata": metadata,
        })
    }
}

fn group_item() -> Value {
    json!({"zarr_format": 2})
}

fn json_bytes(value: &Value) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec_pretty(value)?))
}

/// Shape of a chunk, smaller than `chunks` at the array's upper edges
pub fn get_chunk_shape(shape: &[usize], chunks: &[usize], chunk_index: &[usize]) -> Vec<usize> {
    shape
        .iter()
        .zip(chunks)
        .zip(chunk_index)
        .map(|((&s, &c), &i)| if (i + 1) * c <= s { c } else { s % c })
        .collect()
}

/// Padding `(before, after)` needed to extend a chunk to the full chunk shape
pub fn get_chunk_padding(
    shape: &[usize],
    chunks: &[usize],
    chunk_index: &[usize],
) -> Vec<(usize, usize)> {
    shape
        .iter()
        .zip(chunks)
        .zip(chunk_index)
        .map(|((&s, &c), &i)| (0, if (i + 1) * c <= s { 0 } else { c - s % c }))
        .collect()
}

/// Array index ranges covered by a chunk
pub fn get_array_slices(
    shape: &[usize],
    chunks: &[usize],
    chunk_index: &[usize],
) -> Vec<Range<usize>> {
    shape
        .iter()
        .zip(chunks)
        .zip(chunk_index)
        .map(|((&s, &c), &i)| {
            let start = i * c;
            start..start + if (i + 1) * c <= s { c } else { s % c }
        })
        .collect()
}

/// All chunk indexes in C order
pub fn get_chunk_indexes(num_chunks: &[usize]) -> Vec<Vec<usize>> {
    num_chunks.iter().fold(vec![Vec::new()], |indexes, &n| {
        indexes
            .iter()
            .flat_map(|prefix| {
                (0..n).map(move |i| {
                    let mut index = prefix.clone();
                    index.push(i);
                    index
                })
            })
            .collect()
    })
}

/// Format a chunk key such as `"conc/0.1.2"`; 0-d arrays use chunk `"0"`
pub fn format_chunk_key(array_name: &str, chunk_index: &[usize]) -> String {
    if chunk_index.is_empty() {
        return format!("{array_name}/0");
    }
    let chunk_id: Vec<String> = chunk_index.iter().map(usize::to_string).collect();
    format!("{}/{}", array_name, chunk_id.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ZlibCodec;
    use ndarray::Array;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn chl_array() -> GenericArray {
        GenericArray::new("chl")
            .dims(["time", "y", "x"])
            .dtype(DataType::F32)
            .shape([3, 5, 4])
            .chunks([1, 2, 3])
            .fill_value(f64::NAN)
            .get_data(|info: &ChunkInfo| {
                Ok(ArrayD::from_elem(IxDyn(&info.shape), info.index[0] as f64 + 0.5))
            })
    }

    fn store() -> GenericZarrStore {
        let mut attrs = Map::new();
        attrs.insert("title".to_string(), json!("Generic Store"));
        let mut store = GenericZarrStore::new(attrs);
        store
            .add_array(
                GenericArray::new("x")
                    .dims(["x"])
                    .data(Array::from_vec(vec![0.5, 1.5, 2.5, 3.5]).into_dyn()),
            )
            .unwrap();
        store.add_array(chl_array()).unwrap();
        store
    }

    fn json_item(store: &GenericZarrStore, key: &str) -> Value {
        serde_json::from_slice(&store.get(key).unwrap()).unwrap()
    }

    #[test]
    fn test_finalize_errors() {
        let err = |array: GenericArray| array.finalize().unwrap_err().to_string();
        assert!(err(GenericArray::default()).contains("missing array name"));
        assert!(err(GenericArray::new("a")).contains("either data or get_data must be defined"));
        let both = GenericArray::new("a")
            .data(ArrayD::zeros(IxDyn(&[2])))
            .get_data(|_: &ChunkInfo| Ok(ArrayD::zeros(IxDyn(&[2]))));
        assert!(err(both).contains("cannot be defined together"));
        let no_dims = GenericArray::new("a").data(ArrayD::zeros(IxDyn(&[2])));
        assert!(err(no_dims).contains("missing dims"));
        let no_dtype = GenericArray::new("a")
            .dims(["x"])
            .shape([2])
            .get_data(|_: &ChunkInfo| Ok(ArrayD::zeros(IxDyn(&[2]))));
        assert!(err(no_dtype).contains("missing dtype"));
        let bad_shape = chl_array().shape([3, 5]);
        assert!(err(bad_shape).contains("dims and shape must have same length"));
        let bad_chunks = chl_array().chunks([1, 2]);
        assert!(err(bad_chunks).contains("dims and chunks must have same length"));
        let bad_order = chl_array().order("X");
        assert!(err(bad_order).contains("order must be one of"));
    }

    #[test]
    fn test_finalize_num_chunks() {
        let array = chl_array().finalize().unwrap();
        assert_eq!(array.num_chunks, vec![3, 3, 2]);
        assert_eq!(array.order, Order::C);
    }

    #[test]
    fn test_add_array_conflicts() {
        let mut store = store();
        assert!(matches!(
            store.add_array(chl_array()),
            Err(XcubeError::AlreadyExists(_))
        ));
        let conflicting = GenericArray::new("y")
            .dims(["y"])
            .data(ArrayD::zeros(IxDyn(&[7])));
        assert!(matches!(
            store.add_array(conflicting),
            Err(XcubeError::InvalidDimensions(_))
        ));
        assert_eq!(
            store.dim_sizes().iter().map(|(k, v)| (k.as_str(), *v)).collect::<Vec<_>>(),
            vec![("x", 4), ("time", 3), ("y", 5)]
        );
    }

    #[test]
    fn test_keys() {
        let store = store();
        let keys = store.keys();
        assert_eq!(
            &keys[..9],
            &[
                ".zmetadata", ".zgroup", ".zattrs", "x", "x/.zarray", "x/.zattrs", "x/0",
                "chl", "chl/.zarray"
            ]
        );
        assert_eq!(keys[10], "chl/0.0.0");
        assert_eq!(keys[11], "chl/0.0.1");
        assert_eq!(keys[12], "chl/0.1.0");
        assert_eq!(keys.last().unwrap(), "chl/2.2.1");
        assert_eq!(keys.len(), store.len());
        assert_eq!(keys.len(), 3 + 4 + 3 + 18);
    }

    #[test]
    fn test_listdir() {
        let store = store();
        assert_eq!(
            store.listdir("").unwrap(),
            vec![".zmetadata", ".zgroup", ".zattrs", "x", "chl"]
        );
        assert_eq!(store.listdir("x").unwrap(), vec!["x/.zarray", "x/.zattrs", "x/0"]);
        assert!(store.listdir("chl/0.0.0").is_err());
    }

    #[test]
    fn test_contains() {
        let store = store();
        assert!(store.contains(".zmetadata"));
        assert!(store.contains("chl"));
        assert!(store.contains("chl/.zarray"));
        assert!(store.contains("chl/2.2.1"));
        assert!(!store.contains("chl/3.0.0"));
        assert!(!store.contains("chl/0.0"));
        assert!(!store.contains("chl/a.b.c"));
        assert!(!store.contains("sst/.zarray"));
    }

    #[test]
    fn test_json_items() {
        let store = store();
        assert_eq!(json_item(&store, ".zgroup"), json!({"zarr_format": 2}));
        assert_eq!(json_item(&store, ".zattrs"), json!({"title": "Generic Store"}));
        assert_eq!(
            json_item(&store, "chl/.zarray"),
            json!({
                "zarr_format": 2,
                "dtype": "<f4",
                "shape": [3, 5, 4],
                "chunks": [1, 2, 3],
                "fill_value": "NaN",
                "compressor": null,
                "filters": null,
                "order": "C"
            })
        );
        assert_eq!(
            json_item(&store, "chl/.zattrs"),
            json!({"_ARRAY_DIMENSIONS": ["time", "y", "x"]})
        );
        let text = String::from_utf8(store.get(".zgroup").unwrap().to_vec()).unwrap();
        assert_eq!(text, "{\n  \"zarr_format\": 2\n}");

        let metadata = json_item(&store, ".zmetadata");
        assert_eq!(metadata["zarr_consolidated_format"], json!(1));
        let keys: Vec<&String> = metadata["metadata"].as_object().unwrap().keys().collect();
        assert_eq!(
            keys,
            vec![".zgroup", ".zattrs", "x/.zarray", "x/.zattrs", "chl/.zarray", "chl/.zattrs"]
        );
        assert!(store.get("chl").unwrap().is_empty());
        assert!(matches!(store.get("chl/9.9.9"), Err(XcubeError::NotFound(_))));
    }

    #[test]
    fn test_chunk_data_padded() {
        let store = store();
        let bytes = store.get("chl/1.2.1").unwrap();
        let values = DataType::F32.decode_values(&bytes).unwrap();
        assert_eq!(values.len(), 6);
        // last y chunk holds one row, last x chunk one column
        assert_eq!(values[0], 1.5);
        assert!(values[1..].iter().all(|v| v.is_nan()));

        let bytes = store.get("x/0").unwrap();
        assert_eq!(DataType::F64.decode_values(&bytes).unwrap(), vec![0.5, 1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_chunk_data_order_and_compressor() {
        let data = Array::from_shape_vec((2, 3), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
            .unwrap()
            .into_dyn();
        let mut store = GenericZarrStore::default();
        store
            .add_array(
                GenericArray::new("f")
                    .dims(["y", "x"])
                    .dtype(DataType::U8)
                    .order("F")
                    .compressor(Arc::new(ZlibCodec::default()))
                    .data(data),
            )
            .unwrap();
        let compressed = store.get("f/0.0").unwrap();
        let bytes = ZlibCodec::default().decode(&compressed, None).unwrap();
        assert_eq!(bytes, vec![1, 4, 2, 5, 3, 6]);
        assert_eq!(
            json_item(&store, "f/.zarray")["compressor"],
            json!({"id": "zlib", "level": 1})
        );
    }

    #[test]
    fn test_chunk_data_wrong_shape() {
        let mut store = GenericZarrStore::default();
        store
            .add_array(
                GenericArray::new("bad")
                    .dims(["x"])
                    .dtype(DataType::F64)
                    .shape([4])
                    .get_data(|_: &ChunkInfo| Ok(ArrayD::zeros(IxDyn(&[3])))),
            )
            .unwrap();
        assert!(matches!(
            store.get("bad/0"),
            Err(XcubeError::InvalidDimensions(_))
        ));
    }

    #[test]
    fn test_rmdir_rename_close() {
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closed);
        let mut store = store();
        store
            .add_array(
                GenericArray::new("t")
                    .dims(["t"])
                    .data(ArrayD::zeros(IxDyn(&[2])))
                    .on_close(move |_| {
                        counter.fetch_add(1, AtomicOrdering::SeqCst);
                    }),
            )
            .unwrap();

        store.rename("chl", "chl_2").unwrap();
        assert_eq!(store.array("chl_2").unwrap().name, "chl_2");
        assert!(store.rename("nope", "x2").is_err());
        assert!(store.rename("x", "t").is_err());
        assert!(store.rename("x", "a/b").is_err());
        assert_eq!(store.listdir("").unwrap()[4], "chl_2");

        store.rmdir("chl_2").unwrap();
        assert!(!store.dim_sizes().contains_key("time"));
        assert!(store.dim_sizes().contains_key("x"));
        assert!(store.rmdir(".zattrs").is_err());

        assert!(matches!(store.set("x/0", b"0"), Err(XcubeError::ReadOnly(_))));
        assert!(!store.is_writeable());

        store.close();
        assert_eq!(closed.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_array_defaults() {
        let defaults = GenericArray::default()
            .dims(["x"])
            .dtype(DataType::I16)
            .fill_value(-1.0);
        let mut store = GenericZarrStore::default().with_array_defaults(defaults);
        store
            .add_array(GenericArray::new("a").data(ArrayD::zeros(IxDyn(&[3]))))
            .unwrap();
        let spec = json_item(&store, "a/.zarray");
        assert_eq!(spec["dtype"], json!("<i2"));
        assert_eq!(spec["fill_value"], json!(-1));
    }

    #[test]
    fn test_chunk_helpers() {
        let shape = [5, 4];
        let chunks = [2, 3];
        assert_eq!(get_chunk_shape(&shape, &chunks, &[0, 0]), vec![2, 3]);
        assert_eq!(get_chunk_shape(&shape, &chunks, &[2, 1]), vec![1, 1]);
        assert_eq!(get_chunk_padding(&shape, &chunks, &[2, 1]), vec![(0, 1), (0, 2)]);
        assert_eq!(get_chunk_padding(&shape, &chunks, &[0, 0]), vec![(0, 0), (0, 0)]);
        assert_eq!(get_array_slices(&shape, &chunks, &[2, 1]), vec![4..5, 3..4]);
        assert_eq!(
            get_chunk_indexes(&[2, 2]),
            vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
        );
        assert_eq!(get_chunk_indexes(&[]), vec![Vec::<usize>::new()]);
        assert_eq!(format_chunk_key("chl", &[0, 1, 2]), "chl/0.1.2");
        assert_eq!(format_chunk_key("crs", &[]), "crs/0");
    }

    #[test]
    fn test_fill_value_encoding() {
        assert_eq!(encode_fill_value(None, DataType::F32), Value::Null);
        assert_eq!(encode_fill_value(Some(f64::INFINITY), DataType::F32), json!("Infinity"));
        assert_eq!(encode_fill_value(Some(f64::NEG_INFINITY), DataType::F64), json!("-Infinity"));
        assert_eq!(encode_fill_value(Some(255.0), DataType::U8), json!(255));
        assert_eq!(encode_fill_value(Some(0.5), DataType::F64), json!(0.5));
        assert!(decode_fill_value(&json!("NaN")).unwrap().unwrap().is_nan());
        assert_eq!(decode_fill_value(&json!(3)).unwrap(), Some(3.0));
        assert!(decode_fill_value(&json!("oops")).is_err());
    }

    #[test]
    fn test_from_dataset() {
        use crate::cube::{new_cube, CubeVariable, NewCubeParams};
        let params = NewCubeParams {
            width: 8,
            height: 4,
            spatial_res: 10.0,
            ..NewCubeParams::default()
        }
        .with_variable("conc", CubeVariable::Constant(2.0));
        let ds = new_cube(&params).unwrap();
        let chunk_sizes = HashMap::from([("lon".to_string(), 5), ("lat".to_string(), 4)]);
        let store = GenericZarrStore::from_dataset(&ds, &chunk_sizes, None).unwrap();
        let conc = store.array("conc").unwrap();
        assert_eq!(conc.chunks, vec![5, 4, 5]);
        assert_eq!(conc.num_chunks, vec![1, 1, 2]);
        assert_eq!(store.array("lon").unwrap().chunks, vec![8]);
        assert_eq!(json_item(&store, ".zattrs")["title"], json!("Test Cube"));
        assert_eq!(
            json_item(&store, "time/.zattrs")["units"],
            json!("days since 1970-01-01")
        );
    }
}
