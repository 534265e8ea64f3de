//! Value encodings used by remote tiers.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CacheError;

/// Turns cache values into bytes and back.
pub trait ValueSerializer: Send + Sync {
    fn serialize<V: Serialize>(&self, value: &V) -> Result<Vec<u8>, CacheError>;

    fn deserialize<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<V, CacheError>;
}

/// JSON via `serde_json`. Readable with any Redis client.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl ValueSerializer for JsonSerializer {
    fn serialize<V: Serialize>(&self, value: &V) -> Result<Vec<u8>, CacheError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<V, CacheError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// MessagePack via `rmp-serde`, with struct fields encoded by name.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessagePackSerializer;

impl ValueSerializer for MessagePackSerializer {
    fn serialize<V: Serialize>(&self, value: &V) -> Result<Vec<u8>, CacheError> {
        rmp_serde::to_vec_named(value).map_err(|e| CacheError::serialization(e.to_string()))
    }

    fn deserialize<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<V, CacheError> {
        rmp_serde::from_slice(bytes).map_err(|e| CacheError::serialization(e.to_string()))
    }
}

/// Gzip-compresses the output of another serializer.
#[derive(Debug, Clone, Copy)]
pub struct Compressed<Z> {
    inner: Z,
    level: Compression,
}

impl<Z> Compressed<Z> {
    pub fn new(inner: Z) -> Self {
        Self {
            inner,
            level: Compression::default(),
        }
    }

    /// Compression level from 0 (none) to 9 (best).
    pub fn with_level(inner: Z, level: u32) -> Self {
        Self {
            inner,
            level: Compression::new(level.min(9)),
        }
    }
}

impl<Z: Default> Default for Compressed<Z> {
    fn default() -> Self {
        Self::new(Z::default())
    }
}

impl<Z: ValueSerializer> ValueSerializer for Compressed<Z> {
    fn serialize<V: Serialize>(&self, value: &V) -> Result<Vec<u8>, CacheError> {
        let raw = self.inner.serialize(value)?;
        let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 2), self.level);
        encoder
            .write_all(&raw)
            .map_err(|e| CacheError::serialization(format!("gzip compression failed: {e}")))?;
        encoder
            .finish()
            .map_err(|e| CacheError::serialization(format!("gzip compression failed: {e}")))
    }

    fn deserialize<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<V, CacheError> {
        let mut decoder = GzDecoder::new(bytes);
        let mut raw = Vec::new();
        decoder
            .read_to_end(&mut raw)
            .map_err(|e| CacheError::serialization(format!("gzip decompression failed: {e}")))?;
        self.inner.deserialize(&raw)
    }
}
