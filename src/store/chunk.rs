//! Chunk record and on-disk framing
//!
//! A chunk is a fixed-size slice of a payload, compressed with zstd and
//! optionally sealed with AES-256-GCM. The persisted record is a packed
//! little-endian format:
//!
//! ```text
//! original_size(8) | index(8) | is_encrypted(1) |
//! iv_len(4) | iv | tag_len(4) | tag | data_len(4) | data
//! ```
//!
//! `iv_len` and `tag_len` are zero for unencrypted chunks.

use thiserror::Error;

use crate::crypto::ChunkHash;

/// zstd compression level applied to every chunk body
pub const COMPRESSION_LEVEL: i32 = 3;

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("Truncated chunk record")]
    Truncated,
    #[error("Compression failed: {0}")]
    Compression(std::io::Error),
    #[error("Decompression failed: {0}")]
    Decompression(std::io::Error),
    #[error("Decompressed size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

/// A single stored chunk
///
/// `data` holds the compressed (and possibly encrypted) bytes; `hash` is
/// always the SHA-256 of `data`. Chunks are immutable once stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// SHA-256 of `data`
    pub hash: ChunkHash,
    /// Compressed, possibly encrypted bytes
    pub data: Vec<u8>,
    /// AES-GCM IV (12 bytes, empty when unencrypted)
    pub iv: Vec<u8>,
    /// AES-GCM authentication tag (16 bytes, empty when unencrypted)
    pub tag: Vec<u8>,
    /// Plaintext length in bytes
    pub original_size: u64,
    /// Ordinal position within the source payload (0-based)
    pub index: u64,
    /// Whether `data` is AES-256-GCM sealed
    pub is_encrypted: bool,
}

impl Chunk {
    /// Serialize to the packed record format (everything except the hash,
    /// which is the storage key)
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(29 + self.iv.len() + self.tag.len() + self.data.len());
        out.extend_from_slice(&self.original_size.to_le_bytes());
        out.extend_from_slice(&self.index.to_le_bytes());
        out.push(self.is_encrypted as u8);
        out.extend_from_slice(&(self.iv.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&(self.tag.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Parse a packed record back into a chunk keyed by `hash`
    pub fn decode(hash: ChunkHash, bytes: &[u8]) -> Result<Self, ChunkError> {
        let mut cursor = Cursor { bytes, pos: 0 };

        let original_size = u64::from_le_bytes(cursor.take::<8>()?);
        let index = u64::from_le_bytes(cursor.take::<8>()?);
        let is_encrypted = cursor.take::<1>()?[0] != 0;

        let iv_len = u32::from_le_bytes(cursor.take::<4>()?) as usize;
        let iv = cursor.take_slice(iv_len)?.to_vec();

        let tag_len = u32::from_le_bytes(cursor.take::<4>()?) as usize;
        let tag = cursor.take_slice(tag_len)?.to_vec();

        let data_len = u32::from_le_bytes(cursor.take::<4>()?) as usize;
        let data = cursor.take_slice(data_len)?.to_vec();

        Ok(Self {
            hash,
            data,
            iv,
            tag,
            original_size,
            index,
            is_encrypted,
        })
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], ChunkError> {
        let slice = self.take_slice(N)?;
        let mut arr = [0u8; N];
        arr.copy_from_slice(slice);
        Ok(arr)
    }

    fn take_slice(&mut self, len: usize) -> Result<&'a [u8], ChunkError> {
        let bytes = self.bytes;
        let end = self.pos.checked_add(len).ok_or(ChunkError::Truncated)?;
        if end > bytes.len() {
            return Err(ChunkError::Truncated);
        }
        let slice = &bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}

/// Compress a chunk body with zstd
pub fn compress(data: &[u8]) -> Result<Vec<u8>, ChunkError> {
    zstd::bulk::compress(data, COMPRESSION_LEVEL).map_err(ChunkError::Compression)
}

/// Decompress a chunk body to exactly `original_size` bytes
pub fn decompress(data: &[u8], original_size: u64) -> Result<Vec<u8>, ChunkError> {
    let out =
        zstd::bulk::decompress(data, original_size as usize).map_err(ChunkError::Decompression)?;
    if out.len() as u64 != original_size {
        return Err(ChunkError::SizeMismatch {
            expected: original_size,
            actual: out.len() as u64,
        });
    }
    Ok(out)
}
