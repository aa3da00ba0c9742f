//! Filesystem abstraction over local directories, memory and remote storage

use crate::error::{Result, XcubeError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Storage protocols a data store may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Local file system
    File,
    /// Process-local in-memory storage
    Memory,
    /// S3-compatible object storage
    S3,
    /// Read-only HTTP(S) storage
    Https,
}

impl Protocol {
    /// Parse a protocol name such as `"file"` or `"s3"`
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "file" | "local" => Ok(Protocol::File),
            "memory" => Ok(Protocol::Memory),
            "s3" => Ok(Protocol::S3),
            "http" | "https" => Ok(Protocol::Https),
            _ => Err(XcubeError::InvalidUrl(format!("Unknown protocol: {}", name))),
        }
    }

    /// Parse the protocol from a URL scheme, plain paths are local files
    pub fn from_url(url: &str) -> Result<Self> {
        match url.find("://") {
            Some(scheme_end) => Self::from_name(&url[..scheme_end]),
            None => Ok(Protocol::File),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Protocol::File => "file",
            Protocol::Memory => "memory",
            Protocol::S3 => "s3",
            Protocol::Https => "https",
        }
    }
}

/// Split `"proto://path"` into protocol and path
///
/// HTTP URLs keep their scheme in the returned path, as it is needed
/// to address the remote server.
pub fn split_protocol_and_path(url: &str) -> Result<(Protocol, String)> {
    let protocol = Protocol::from_url(url)?;
    let path = match protocol {
        Protocol::Https => url.to_string(),
        _ => match url.find("://") {
            Some(scheme_end) => url[scheme_end + 3..].to_string(),
            None => url.to_string(),
        },
    };
    Ok((protocol, path))
}

/// Trait for byte-level access to a storage backend.
///
/// Paths are `/`-separated keys relative to the filesystem's root.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read data from a path
    async fn read(&self, path: &str) -> Result<Bytes>;

    /// Write data to a path, creating parents as needed
    async fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Check if a file or directory exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Delete a single file
    async fn delete(&self, path: &str) -> Result<()>;

    /// Delete a directory and everything below it
    async fn delete_dir(&self, path: &str) -> Result<()>;

    /// List the direct children of a directory
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// List all file keys below a directory, sorted, relative to the root
    async fn list_recursive(&self, prefix: &str) -> Result<Vec<String>>;

    /// Get the size of a file
    async fn size(&self, path: &str) -> Result<usize>;

    /// Last modification time, if the backend tracks it
    async fn modified(&self, _path: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }

    /// Get the protocol of this filesystem
    fn protocol(&self) -> Protocol;
}

/// Join a directory key and a name with `/`
pub fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// File system storage rooted at a directory
pub struct LocalFileSystem {
    base_path: PathBuf,
}

impl LocalFileSystem {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    /// Resolve a key below the base path; keys may not leave it
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(XcubeError::InvalidValue(format!("invalid key {path:?}")));
        }
        Ok(self.base_path.join(relative))
    }

    async fn collect_files(&self, dir: PathBuf, key: String, keys: &mut Vec<String>) -> Result<()> {
        let mut pending = vec![(dir, key)];
        while let Some((dir, key)) = pending.pop() {
            let mut read_dir = fs::read_dir(&dir).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let child_key = join_key(&key, &name);
                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), child_key));
                } else {
                    keys.push(child_key);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn read(&self, path: &str) -> Result<Bytes> {
        let full_path = self.full_path(path)?;
        match fs::read(&full_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(XcubeError::NotFound(path.to_string()))
            }
            Err(e) => Err(XcubeError::Io(e)),
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&full_path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(fs::try_exists(self.full_path(path)?).await?)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        fs::remove_file(self.full_path(path)?).await?;
        Ok(())
    }

    async fn delete_dir(&self, path: &str) -> Result<()> {
        fs::remove_dir_all(self.full_path(path)?).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let full_path = self.full_path(prefix)?;
        let mut entries = Vec::new();
        if full_path.is_dir() {
            let mut read_dir = fs::read_dir(&full_path).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                if let Some(name) = entry.file_name().to_str() {
                    entries.push(name.to_string());
                }
            }
        }
        entries.sort();
        Ok(entries)
    }

    async fn list_recursive(&self, prefix: &str) -> Result<Vec<String>> {
        let full_path = self.full_path(prefix)?;
        let mut keys = Vec::new();
        if full_path.is_dir() {
            let key = prefix.trim_matches('/').to_string();
            self.collect_files(full_path, key, &mut keys).await?;
        }
        keys.sort();
        Ok(keys)
    }

    async fn size(&self, path: &str) -> Result<usize> {
        let metadata = fs::metadata(self.full_path(path)?).await?;
        Ok(metadata.len() as usize)
    }

    async fn modified(&self, path: &str) -> Result<Option<DateTime<Utc>>> {
        let metadata = fs::metadata(self.full_path(path)?).await?;
        Ok(metadata.modified().ok().map(DateTime::<Utc>::from))
    }

    fn protocol(&self) -> Protocol {
        Protocol::File
    }
}

/// In-memory storage, keys are kept sorted
#[derive(Default)]
pub struct MemoryFileSystem {
    entries: RwLock<BTreeMap<String, (Bytes, DateTime<Utc>)>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    fn dir_prefix(path: &str) -> String {
        let path = Self::normalize(path);
        if path.is_empty() {
            path
        } else {
            path + "/"
        }
    }

    /// Number of stored files
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn read(&self, path: &str) -> Result<Bytes> {
        self.entries
            .read()
            .get(&Self::normalize(path))
            .map(|(data, _)| data.clone())
            .ok_or_else(|| XcubeError::NotFound(path.to_string()))
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        self.entries.write().insert(
            Self::normalize(path),
            (Bytes::copy_from_slice(data), Utc::now()),
        );
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let key = Self::normalize(path);
        let prefix = Self::dir_prefix(path);
        let entries = self.entries.read();
        Ok(key.is_empty()
            || entries.contains_key(&key)
            || entries.range(prefix.clone()..).next().is_some_and(|(k, _)| k.starts_with(&prefix)))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.entries
            .write()
            .remove(&Self::normalize(path))
            .map(|_| ())
            .ok_or_else(|| XcubeError::NotFound(path.to_string()))
    }

    async fn delete_dir(&self, path: &str) -> Result<()> {
        let prefix = Self::dir_prefix(path);
        self.entries.write().retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = Self::dir_prefix(prefix);
        let entries = self.entries.read();
        let mut names: Vec<String> = entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| k[prefix.len()..].split('/').next().map(str::to_string))
            .collect();
        names.dedup();
        Ok(names)
    }

    async fn list_recursive(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = Self::dir_prefix(prefix);
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn size(&self, path: &str) -> Result<usize> {
        Ok(self.read(path).await?.len())
    }

    async fn modified(&self, path: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .entries
            .read()
            .get(&Self::normalize(path))
            .map(|(_, modified)| *modified))
    }

    fn protocol(&self) -> Protocol {
        Protocol::Memory
    }
}

/// Read-only storage served by an HTTP(S) endpoint
#[cfg(feature = "http-client")]
pub struct HttpFileSystem {
    base_url: String,
    client: reqwest::Client,
}

#[cfg(feature = "http-client")]
impl HttpFileSystem {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn read_only(path: &str) -> XcubeError {
        XcubeError::ReadOnly(format!("{path}: HTTP storage is read-only"))
    }
}

#[cfg(feature = "http-client")]
#[async_trait]
impl FileSystem for HttpFileSystem {
    async fn read(&self, path: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| XcubeError::Network(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(XcubeError::NotFound(path.to_string()));
        }
        let response = response
            .error_for_status()
            .map_err(|e| XcubeError::Network(e.to_string()))?;
        response
            .bytes()
            .await
            .map_err(|e| XcubeError::Network(e.to_string()))
    }

    async fn write(&self, path: &str, _data: &[u8]) -> Result<()> {
        Err(Self::read_only(path))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let response = self
            .client
            .head(self.url(path))
            .send()
            .await
            .map_err(|e| XcubeError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        Err(Self::read_only(path))
    }

    async fn delete_dir(&self, path: &str) -> Result<()> {
        Err(Self::read_only(path))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Err(XcubeError::StorageBackend(format!(
            "{prefix}: HTTP storage cannot list directories"
        )))
    }

    async fn list_recursive(&self, prefix: &str) -> Result<Vec<String>> {
        self.list(prefix).await
    }

    async fn size(&self, path: &str) -> Result<usize> {
        let response = self
            .client
            .head(self.url(path))
            .send()
            .await
            .map_err(|e| XcubeError::Network(e.to_string()))?;
        response
            .content_length()
            .map(|len| len as usize)
            .ok_or_else(|| XcubeError::StorageBackend(format!("{path}: unknown size")))
    }

    fn protocol(&self) -> Protocol {
        Protocol::Https
    }
}

/// Create a filesystem for a protocol, rooted at `root`
///
/// S3 storage is not bundled. Applications implement the `FileSystem`
/// trait with their preferred SDK and pass it to `FsDataStore::new`.
pub fn new_filesystem(protocol: Protocol, root: &str) -> Result<Arc<dyn FileSystem>> {
    match protocol {
        Protocol::File => Ok(Arc::new(LocalFileSystem::new(root))),
        Protocol::Memory => Ok(Arc::new(MemoryFileSystem::new())),
        #[cfg(feature = "http-client")]
        Protocol::Https => Ok(Arc::new(HttpFileSystem::new(root))),
        #[cfg(not(feature = "http-client"))]
        Protocol::Https => Err(XcubeError::Configuration(
            "HTTP storage requires the \"http-client\" feature".to_string(),
        )),
        Protocol::S3 => Err(XcubeError::Configuration(format!(
            "protocol {:?} is not supported out of the box, \
             implement the FileSystem trait for it",
            protocol.name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_file_system() {
        let temp_dir = TempDir::new().unwrap();
        let fs = LocalFileSystem::new(temp_dir.path());

        let data = b"Hello, cube!";
        fs.write("demo.zarr/.zgroup", data).await.unwrap();
        fs.write("demo.zarr/conc/0.0", b"x").await.unwrap();

        assert_eq!(&fs.read("demo.zarr/.zgroup").await.unwrap()[..], data);
        assert!(fs.exists("demo.zarr").await.unwrap());
        assert!(!fs.exists("other.zarr").await.unwrap());
        assert_eq!(fs.size("demo.zarr/.zgroup").await.unwrap(), data.len());
        assert!(fs.modified("demo.zarr/.zgroup").await.unwrap().is_some());

        assert_eq!(fs.list("demo.zarr").await.unwrap(), vec![".zgroup", "conc"]);
        assert_eq!(
            fs.list_recursive("demo.zarr").await.unwrap(),
            vec!["demo.zarr/.zgroup", "demo.zarr/conc/0.0"]
        );

        assert!(matches!(
            fs.read("missing").await,
            Err(XcubeError::NotFound(_))
        ));

        fs.delete("demo.zarr/.zgroup").await.unwrap();
        assert!(!fs.exists("demo.zarr/.zgroup").await.unwrap());
        fs.delete_dir("demo.zarr").await.unwrap();
        assert!(!fs.exists("demo.zarr").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_file_system_stays_below_root() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("outside.txt"), b"x").unwrap();
        let fs = LocalFileSystem::new(temp_dir.path().join("root"));
        fs.write("/inside.txt", b"y").await.unwrap();
        assert_eq!(&fs.read("inside.txt").await.unwrap()[..], b"y");

        for key in ["../outside.txt", "a/../../outside.txt", ".."] {
            assert!(matches!(fs.read(key).await, Err(XcubeError::InvalidValue(_))));
            assert!(fs.exists(key).await.is_err());
            assert!(fs.write(key, b"z").await.is_err());
        }
        assert_eq!(
            std::fs::read(temp_dir.path().join("outside.txt")).unwrap(),
            b"x"
        );
    }

    #[tokio::test]
    async fn test_memory_file_system() {
        let fs = MemoryFileSystem::new();
        fs.write("a.zarr/.zattrs", b"{}").await.unwrap();
        fs.write("a.zarr/x/0", b"0").await.unwrap();
        fs.write("a.zarr/x/1", b"1").await.unwrap();
        fs.write("b.zarr/.zgroup", b"{}").await.unwrap();

        assert_eq!(fs.len(), 4);
        assert!(fs.exists("a.zarr").await.unwrap());
        assert!(fs.exists("a.zarr/x").await.unwrap());
        assert!(!fs.exists("a.zar").await.unwrap());
        assert_eq!(fs.list("").await.unwrap(), vec!["a.zarr", "b.zarr"]);
        assert_eq!(fs.list("a.zarr").await.unwrap(), vec![".zattrs", "x"]);
        assert_eq!(
            fs.list_recursive("a.zarr/x").await.unwrap(),
            vec!["a.zarr/x/0", "a.zarr/x/1"]
        );

        fs.delete_dir("a.zarr").await.unwrap();
        assert_eq!(fs.list("").await.unwrap(), vec!["b.zarr"]);
        assert!(fs.delete("a.zarr/x/0").await.is_err());
    }

    #[test]
    fn test_protocol_from_url() {
        assert_eq!(Protocol::from_url("file:///data/cube").unwrap(), Protocol::File);
        assert_eq!(Protocol::from_url("/data/cube").unwrap(), Protocol::File);
        assert_eq!(Protocol::from_url("s3://bucket/cube").unwrap(), Protocol::S3);
        assert_eq!(Protocol::from_url("memory://cube").unwrap(), Protocol::Memory);
        assert_eq!(Protocol::from_url("https://host/cube").unwrap(), Protocol::Https);
        assert!(Protocol::from_url("ftp://host/cube").is_err());
    }

    #[test]
    fn test_split_protocol_and_path() {
        assert_eq!(
            split_protocol_and_path("s3://bucket/cube.zarr").unwrap(),
            (Protocol::S3, "bucket/cube.zarr".to_string())
        );
        assert_eq!(
            split_protocol_and_path("data/cube.zarr").unwrap(),
            (Protocol::File, "data/cube.zarr".to_string())
        );
        assert_eq!(
            split_protocol_and_path("https://host/cube.zarr").unwrap(),
            (Protocol::Https, "https://host/cube.zarr".to_string())
        );
    }

    #[test]
    fn test_new_filesystem() {
        assert_eq!(new_filesystem(Protocol::File, ".").unwrap().protocol(), Protocol::File);
        assert_eq!(new_filesystem(Protocol::Memory, "").unwrap().protocol(), Protocol::Memory);
        assert!(new_filesystem(Protocol::S3, "bucket").is_err());
    }
}
