//! Chunk compressors, configured the way Zarr v2 `compressor` entries are

use crate::error::{Result, XcubeError};
use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression as FlateCompression;
use serde_json::{json, Value};
use std::io::Read;
use std::sync::Arc;

/// Default compression level used when a config omits it
pub const DEFAULT_LEVEL: i32 = 1;

/// Trait for chunk compression/decompression
pub trait Codec: Send + Sync + std::fmt::Debug {
    /// Compress chunk bytes
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress chunk bytes
    fn decode(&self, data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>>;

    /// Codec identifier, e.g. `"zlib"`
    fn id(&self) -> &'static str;

    /// JSON configuration as written into `.zarray`
    fn config(&self) -> Value;
}

/// Zlib compression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZlibCodec {
    level: u32,
}

impl ZlibCodec {
    /// Create a zlib codec, levels above 9 are clamped
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }
}

impl Default for ZlibCodec {
    fn default() -> Self {
        Self::new(DEFAULT_LEVEL as u32)
    }
}

impl Codec for ZlibCodec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(data, FlateCompression::new(self.level));
        let mut compressed = Vec::new();
        encoder
            .read_to_end(&mut compressed)
            .map_err(|e| XcubeError::Codec(e.to_string()))?;
        Ok(compressed)
    }

    fn decode(&self, data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(data);
        let mut decompressed = match expected_size {
            Some(size) => Vec::with_capacity(size),
            None => Vec::new(),
        };
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| XcubeError::Codec(e.to_string()))?;
        Ok(decompressed)
    }

    fn id(&self) -> &'static str {
        "zlib"
    }

    fn config(&self) -> Value {
        json!({"id": self.id(), "level": self.level})
    }
}

/// Zstandard compression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }

    pub fn level(&self) -> i32 {
        self.level
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new(DEFAULT_LEVEL)
    }
}

impl Codec for ZstdCodec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, self.level).map_err(|e| XcubeError::Codec(e.to_string()))
    }

    fn decode(&self, data: &[u8], _expected_size: Option<usize>) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| XcubeError::Codec(e.to_string()))
    }

    fn id(&self) -> &'static str {
        "zstd"
    }

    fn config(&self) -> Value {
        json!({"id": self.id(), "level": self.level})
    }
}

/// Build a codec from a Zarr v2 compressor configuration
pub fn codec_from_config(config: &Value) -> Result<Arc<dyn Codec>> {
    let id = config
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| XcubeError::Codec(format!("missing codec id in {config}")))?;
    let level = config
        .get("level")
        .and_then(Value::as_i64)
        .unwrap_or(DEFAULT_LEVEL as i64);
    match id {
        "zlib" => Ok(Arc::new(ZlibCodec::new(level.max(0) as u32))),
        "zstd" => Ok(Arc::new(ZstdCodec::new(level as i32))),
        _ => Err(XcubeError::Codec(format!("unsupported codec {id:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zlib() {
        let codec = ZlibCodec::default();
        let data = b"Hello, cube! ".repeat(100);
        let compressed = codec.encode(&data).unwrap();
        assert!(compressed.len() < data.len());
        let decompressed = codec.decode(&compressed, Some(data.len())).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_zstd() {
        let codec = ZstdCodec::new(3);
        let data = vec![7u8; 4096];
        let compressed = codec.encode(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(codec.decode(&compressed, None).unwrap(), data);
    }

    #[test]
    fn test_zlib_level_is_clamped() {
        assert_eq!(ZlibCodec::new(42).level(), 9);
    }

    #[test]
    fn test_codec_from_config() {
        let codec = codec_from_config(&json!({"id": "zlib", "level": 5})).unwrap();
        assert_eq!(codec.id(), "zlib");
        assert_eq!(codec.config(), json!({"id": "zlib", "level": 5}));

        let codec = codec_from_config(&json!({"id": "zstd"})).unwrap();
        assert_eq!(codec.config(), json!({"id": "zstd", "level": 1}));

        assert!(codec_from_config(&json!({"id": "blosc"})).is_err());
        assert!(codec_from_config(&json!({"level": 1})).is_err());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(ZlibCodec::default().decode(b"not zlib", None).is_err());
    }
}
