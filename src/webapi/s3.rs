//! S3-compatible bucket listing and object access
//!
//! Implements the `ListObjects` (v1) and `ListObjectsV2` responses over any
//! ordered key sequence, so that datasets can be read by S3 clients as
//! Zarr groups.

use crate::error::{Result, XcubeError};
use crate::fs::{join_key, FileSystem};
use crate::server::api::{ApiError, ApiResult};
use crate::server::context::DatasetsContext;
use crate::utils::format_datetime;
use crate::xml::Element;
use crate::zarrstore::GenericZarrStore;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::collections::{HashMap, HashSet};

/// XML namespace of S3 responses
pub const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

const DEFAULT_BUCKET_NAME: &str = "s3";
const DEFAULT_MAX_KEYS: usize = 1000;
const DEFAULT_STORAGE_CLASS: &str = "STANDARD";
/// Reported size of listed objects, which are not inspected
const UNKNOWN_SIZE: i64 = -1;

/// Quoted MD5 hex digest of a string
pub fn str_to_etag(s: &str) -> String {
    format!("\"{}\"", hex::encode(Md5::digest(s.as_bytes())))
}

/// Query parameters of a bucket listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListBucketParams {
    pub bucket_name: Option<String>,
    pub delimiter: Option<String>,
    pub prefix: Option<String>,
    pub max_keys: Option<usize>,
    /// First key to list, v1 only
    pub marker: Option<String>,
    /// List keys after this one, v2 only, ignored with a continuation token
    pub start_after: Option<String>,
    /// Position to continue from, v2 only
    pub continuation_token: Option<usize>,
    pub storage_class: Option<String>,
    /// Fixed `LastModified` of all entries, defaults to now
    pub last_modified: Option<String>,
}

impl ListBucketParams {
    /// Parse S3 query arguments such as `prefix` and `max-keys`
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self> {
        let get = |name: &str| query.get(name).filter(|v| !v.is_empty()).cloned();
        let parse_number = |name: &str| -> Result<Option<usize>> {
            get(name)
                .map(|v| {
                    v.parse::<usize>().map_err(|_| {
                        XcubeError::InvalidValue(format!("invalid value of {name}: {v:?}"))
                    })
                })
                .transpose()
        };
        Ok(Self {
            delimiter: get("delimiter"),
            prefix: get("prefix"),
            max_keys: parse_number("max-keys")?,
            marker: get("marker"),
            start_after: get("start-after"),
            continuation_token: parse_number("continuation-token")?,
            ..Self::default()
        })
    }
}

/// Version of the listing protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListVersion {
    V1,
    V2,
}

/// One listed object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: i64,
    pub last_modified: String,
    pub etag: String,
    pub storage_class: String,
}

/// Result of a bucket listing
#[derive(Debug, Clone, PartialEq)]
pub struct ListBucketResult {
    pub version: ListVersion,
    pub name: String,
    pub prefix: Option<String>,
    pub marker: Option<String>,
    pub start_after: Option<String>,
    pub continuation_token: Option<usize>,
    pub max_keys: usize,
    pub delimiter: Option<String>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
    pub next_continuation_token: Option<usize>,
    pub contents: Vec<ObjectEntry>,
    pub common_prefixes: Vec<String>,
}

/// Collects contents and common prefixes of a listing
struct Collector<'a> {
    params: &'a ListBucketParams,
    last_modified: String,
    contents: Vec<ObjectEntry>,
    common_prefixes: Vec<String>,
    seen_prefixes: HashSet<String>,
}

impl<'a> Collector<'a> {
    fn new(params: &'a ListBucketParams) -> Self {
        Self {
            params,
            last_modified: params
                .last_modified
                .clone()
                .unwrap_or_else(|| format_datetime(&Utc::now().naive_utc())),
            contents: Vec::new(),
            common_prefixes: Vec::new(),
            seen_prefixes: HashSet::new(),
        }
    }

    fn add(&mut self, key: &str) {
        let prefix = self.params.prefix.as_deref().unwrap_or("");
        if !key.starts_with(prefix) {
            return;
        }
        if let Some(delimiter) = self.params.delimiter.as_deref().filter(|d| !d.is_empty()) {
            if let Some(index) = key[prefix.len()..].find(delimiter) {
                let common = &key[..prefix.len() + index + delimiter.len()];
                if self.seen_prefixes.insert(common.to_string()) {
                    self.common_prefixes.push(common.to_string());
                }
                return;
            }
        }
        self.contents.push(ObjectEntry {
            key: key.to_string(),
            size: UNKNOWN_SIZE,
            last_modified: self.last_modified.clone(),
            etag: str_to_etag(key),
            storage_class: self
                .params
                .storage_class
                .clone()
                .unwrap_or_else(|| DEFAULT_STORAGE_CLASS.to_string()),
        });
    }
}

/// List keys like AWS `GET Bucket (List Objects) Version 1`.
///
/// Listing starts at `marker`, inclusive. Truncated results report the
/// first key not listed as `next_marker`.
pub fn list_s3_bucket_v1<I, S>(keys: I, params: &ListBucketParams) -> ListBucketResult
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let max_keys = params.max_keys.filter(|&n| n > 0).unwrap_or(DEFAULT_MAX_KEYS);
    let mut collector = Collector::new(params);
    let mut next_marker = None;
    let mut marker_seen = params.marker.is_none();

    for key in keys {
        let key = key.as_ref();
        if collector.contents.len() == max_keys {
            next_marker = Some(key.to_string());
            break;
        }
        if params.marker.as_deref() == Some(key) {
            marker_seen = true;
        }
        if marker_seen {
            collector.add(key);
        }
    }

    ListBucketResult {
        version: ListVersion::V1,
        name: bucket_name(params),
        prefix: params.prefix.clone(),
        marker: params.marker.clone(),
        start_after: None,
        continuation_token: None,
        max_keys,
        delimiter: params.delimiter.clone(),
        is_truncated: next_marker.is_some(),
        next_marker,
        next_continuation_token: None,
        contents: collector.contents,
        common_prefixes: collector.common_prefixes,
    }
}

/// List keys like AWS `GET Bucket (List Objects) Version 2`.
///
/// Continuation tokens are 1-based key positions in the full sequence.
pub fn list_s3_bucket_v2<I, S>(keys: I, params: &ListBucketParams) -> ListBucketResult
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let max_keys = params.max_keys.filter(|&n| n > 0).unwrap_or(DEFAULT_MAX_KEYS);
    let start_after = match params.continuation_token {
        Some(_) => None,
        None => params.start_after.clone(),
    };
    let mut collector = Collector::new(params);
    let mut next_continuation_token = None;
    let mut token_seen = params.continuation_token.is_none();
    let mut start_key_seen = start_after.is_none();

    for (position, key) in keys.into_iter().enumerate() {
        let key = key.as_ref();
        let token = position + 1;
        if collector.contents.len() == max_keys {
            next_continuation_token = Some(token);
            break;
        }
        if start_after.as_deref() == Some(key) {
            start_key_seen = true;
            continue;
        }
        if params.continuation_token == Some(token) {
            token_seen = true;
        }
        if token_seen && start_key_seen {
            collector.add(key);
        }
    }

    ListBucketResult {
        version: ListVersion::V2,
        name: bucket_name(params),
        prefix: params.prefix.clone(),
        marker: None,
        start_after,
        continuation_token: params.continuation_token,
        max_keys,
        delimiter: params.delimiter.clone(),
        is_truncated: next_continuation_token.is_some(),
        next_marker: None,
        next_continuation_token,
        contents: collector.contents,
        common_prefixes: collector.common_prefixes,
    }
}

fn bucket_name(params: &ListBucketParams) -> String {
    params
        .bucket_name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT_BUCKET_NAME.to_string())
}

fn optional_element(name: &str, value: Option<impl ToString>) -> Element {
    match value {
        Some(value) => Element::text_element(name, value),
        None => Element::new(name),
    }
}

impl ListBucketResult {
    pub fn to_element(&self) -> Element {
        let mut root = Element::new("ListBucketResult")
            .attr("xmlns", S3_NAMESPACE)
            .text_child("Name", &self.name)
            .child(optional_element("Prefix", self.prefix.as_ref()));
        root = match self.version {
            ListVersion::V1 => root.child(optional_element("Marker", self.marker.as_ref())),
            ListVersion::V2 => root.child(optional_element("StartAfter", self.start_after.as_ref())),
        };
        root = root
            .text_child("MaxKeys", self.max_keys)
            .child(optional_element("Delimiter", self.delimiter.as_ref()))
            .text_child("IsTruncated", self.is_truncated);
        root = match self.version {
            ListVersion::V1 => match &self.next_marker {
                Some(next_marker) => root.text_child("NextMarker", next_marker),
                None => root,
            },
            ListVersion::V2 => {
                let root = root.child(optional_element("ContinuationToken", self.continuation_token));
                match self.next_continuation_token {
                    Some(token) => root.text_child("NextContinuationToken", token),
                    None => root,
                }
            }
        };
        root.children(self.contents.iter().map(|entry| {
            Element::new("Contents")
                .text_child("Key", &entry.key)
                .text_child("Size", entry.size)
                .text_child("LastModified", &entry.last_modified)
                .text_child("ETag", &entry.etag)
                .text_child("StorageClass", &entry.storage_class)
        }))
        .children(
            self.common_prefixes
                .iter()
                .map(|prefix| Element::new("CommonPrefixes").text_child("Prefix", prefix)),
        )
    }

    /// Render the S3 XML response document
    pub fn to_xml(&self) -> String {
        self.to_element().to_document()
    }
}

/// Metadata of a stored object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: usize,
    pub etag: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Metadata of the object `key` below `root`
pub async fn head_object(fs: &dyn FileSystem, root: &str, key: &str) -> Result<ObjectInfo> {
    let path = join_key(root, key);
    if !fs.exists(&path).await? {
        return Err(XcubeError::NotFound(format!("object {key:?}")));
    }
    Ok(ObjectInfo {
        key: key.to_string(),
        size: fs.size(&path).await?,
        etag: str_to_etag(key),
        last_modified: fs.modified(&path).await?,
    })
}

/// Metadata and content of the object `key` below `root`
pub async fn get_object(fs: &dyn FileSystem, root: &str, key: &str) -> Result<(ObjectInfo, Bytes)> {
    let path = join_key(root, key);
    let data = fs.read(&path).await?;
    let info = ObjectInfo {
        key: key.to_string(),
        size: data.len(),
        etag: str_to_etag(key),
        last_modified: fs.modified(&path).await?,
    };
    Ok((info, data))
}

async fn dataset_store(ctx: &DatasetsContext, ds_id: &str) -> ApiResult<GenericZarrStore> {
    let dataset = ctx.get_dataset(ds_id).await?;
    Ok(GenericZarrStore::from_dataset(&dataset, &HashMap::new(), None)?)
}

/// List a dataset's Zarr keys as bucket named like the dataset
pub async fn list_dataset_bucket(
    ctx: &DatasetsContext,
    ds_id: &str,
    params: &ListBucketParams,
    version: ListVersion,
) -> ApiResult<ListBucketResult> {
    let store = dataset_store(ctx, ds_id).await?;
    let params = ListBucketParams {
        bucket_name: Some(ds_id.to_string()),
        ..params.clone()
    };
    // array directories are not objects
    let mut keys: Vec<String> = store
        .keys()
        .into_iter()
        .filter(|key| key.starts_with('.') || key.contains('/'))
        .collect();
    keys.sort();
    Ok(match version {
        ListVersion::V1 => list_s3_bucket_v1(&keys, &params),
        ListVersion::V2 => list_s3_bucket_v2(&keys, &params),
    })
}

/// Get a Zarr item of a dataset, 404 for unknown keys
pub async fn get_dataset_object(
    ctx: &DatasetsContext,
    ds_id: &str,
    key: &str,
) -> ApiResult<(ObjectInfo, Bytes)> {
    let store = dataset_store(ctx, ds_id).await?;
    if !store.contains(key) {
        return Err(ApiError::not_found(format!(
            "object \"{key}\" not found in bucket \"{ds_id}\""
        )));
    }
    let data = store.get(key)?;
    let info = ObjectInfo {
        key: key.to_string(),
        size: data.len(),
        etag: str_to_etag(key),
        last_modified: None,
    };
    Ok((info, data))
}
