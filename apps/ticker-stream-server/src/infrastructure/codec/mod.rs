//! Compression Codec
//!
//! Encodes subscriber frames as JSON text compressed with zlib (RFC 1950,
//! the deflate container `pako.inflate` expects on the dashboard side) and
//! decodes them back.
//!
//! The codec is stateless: every frame is an independent zlib stream, so a
//! subscriber that joins mid-stream can decode the next frame it receives.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The compressed stream is malformed or truncated.
    #[error("deflate stream error: {0}")]
    Deflate(#[from] std::io::Error),

    /// Empty frame.
    #[error("empty frame")]
    Empty,
}

/// JSON + zlib frame codec.
#[derive(Debug, Clone, Copy)]
pub struct CompressionCodec {
    level: Compression,
}

impl Default for CompressionCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionCodec {
    /// Create a codec with the default compression level.
    #[must_use]
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
        }
    }

    /// Create a codec with an explicit compression level (0-9).
    #[must_use]
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }

    /// Serialize `value` to JSON and compress it.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or compression fails.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes, CodecError> {
        let json = serde_json::to_vec(value)?;
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(json.len() / 4), self.level);
        encoder.write_all(&json)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    /// Decompress a frame and parse the JSON inside.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] for an empty, malformed or truncated frame, or
    /// for JSON that does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        if data.is_empty() {
            return Err(CodecError::Empty);
        }
        let mut json = Vec::with_capacity(data.len() * 4);
        ZlibDecoder::new(data).read_to_end(&mut json)?;
        Ok(serde_json::from_slice(&json)?)
    }
}
