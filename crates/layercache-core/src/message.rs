//! Wire format of invalidation broadcasts.
//!
//! ```text
//! +----------------------+---------------------------+
//! | origin (16 bytes)    | key (UTF-8, rest of frame) |
//! +----------------------+---------------------------+
//! ```
//!
//! There is no length prefix and no delimiter.

use uuid::Uuid;

use crate::error::CacheError;

const ORIGIN_LEN: usize = 16;

/// "Key `key` was invalidated by process `origin`."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationMessage {
    pub origin: Uuid,
    pub key: String,
}

impl InvalidationMessage {
    pub fn new(origin: Uuid, key: impl Into<String>) -> Self {
        Self {
            origin,
            key: key.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(ORIGIN_LEN + self.key.len());
        frame.extend_from_slice(self.origin.as_bytes());
        frame.extend_from_slice(self.key.as_bytes());
        frame
    }

    /// Decode a frame produced by [`encode`](Self::encode).
    ///
    /// Frames shorter than the origin identifier, or whose key is not valid
    /// UTF-8, are rejected.
    pub fn decode(frame: &[u8]) -> Result<Self, CacheError> {
        if frame.len() < ORIGIN_LEN {
            return Err(CacheError::MalformedMessage(format!(
                "expected at least {ORIGIN_LEN} bytes, got {}",
                frame.len()
            )));
        }
        let (origin, key) = frame.split_at(ORIGIN_LEN);
        let origin = Uuid::from_slice(origin)
            .map_err(|e| CacheError::MalformedMessage(e.to_string()))?;
        let key = std::str::from_utf8(key)
            .map_err(|e| CacheError::MalformedMessage(format!("key is not UTF-8: {e}")))?;

        Ok(Self::new(origin, key))
    }
}
