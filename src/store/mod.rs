//! Content-addressed chunk store
//!
//! Splits payloads into fixed-size chunks, compresses each with zstd,
//! optionally seals them with AES-256-GCM under a per-content derived key,
//! and persists everything to a sled embedded database.
//!
//! Two key families in the database:
//! - `"chunk:" + hex_sha256` -> packed chunk record
//! - `"content_map:" + content_id` -> `salt_hex ';' hash1 ';' hash2 ...`
//!
//! The key-derivation salt is the first token of the content-map record so
//! encrypted content survives a process restart.

pub mod chunk;

pub use chunk::{compress, decompress, Chunk, ChunkError, COMPRESSION_LEVEL};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::crypto::{cipher, CipherError, ChunkHash, ContentKey, SALT_LEN};

/// Default chunk size: 256 KiB
pub const DEFAULT_CHUNK_SIZE: usize = 262_144;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Content not found: {0}")]
    ContentNotFound(String),
    #[error("Chunk not found: {0}")]
    ChunkNotFound(ChunkHash),
    #[error("Chunk hash mismatch: claimed {claimed}, computed {computed}")]
    HashMismatch {
        claimed: ChunkHash,
        computed: ChunkHash,
    },
    #[error("Corrupt content mapping for {0}")]
    CorruptContentMap(String),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
}

/// Chunk store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Payload slice size in bytes
    pub chunk_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Salt plus ordered chunk hashes for one content id
#[derive(Clone)]
struct ContentEntry {
    salt: [u8; SALT_LEN],
    hashes: Vec<ChunkHash>,
}

impl ContentEntry {
    fn encode(&self) -> String {
        let mut out = hex::encode(self.salt);
        for hash in &self.hashes {
            out.push(';');
            out.push_str(&hash.to_hex());
        }
        out
    }

    fn parse(raw: &str, content_id: &str) -> Result<Self, StoreError> {
        let corrupt = || StoreError::CorruptContentMap(content_id.to_string());

        let mut tokens = raw.split(';').filter(|t| !t.is_empty());
        let salt_hex = tokens.next().ok_or_else(corrupt)?;
        let salt: [u8; SALT_LEN] = hex::decode(salt_hex)
            .map_err(|_| corrupt())?
            .try_into()
            .map_err(|_| corrupt())?;

        let hashes = tokens
            .map(|t| ChunkHash::from_hex(t).map_err(|_| corrupt()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { salt, hashes })
    }
}

#[derive(Default)]
struct StoreInner {
    chunks: HashMap<ChunkHash, Arc<Chunk>>,
    content_map: HashMap<String, ContentEntry>,
}

/// Content-addressed chunk store backed by sled
///
/// All public operations lock the in-memory state for their full duration,
/// so a store shared behind `Arc` is safe under external parallelism.
pub struct ChunkStore {
    chunk_size: usize,
    db: sled::Db,
    inner: Mutex<StoreInner>,
}

impl ChunkStore {
    /// Open or create a chunk store at the given path
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        debug!(
            path = %path.as_ref().display(),
            chunk_size = config.chunk_size,
            "Opened chunk store"
        );
        Ok(Self {
            chunk_size: config.chunk_size,
            db,
            inner: Mutex::new(StoreInner::default()),
        })
    }

    /// Split, compress, optionally encrypt, and persist a payload
    ///
    /// Returns the ordered chunk hashes. With `encrypt = false` the hash
    /// sequence is a pure function of the payload and chunk size; with
    /// `encrypt = true` a fresh salt and fresh IVs make it unique per call.
    ///
    /// The operation is not transactional: on failure some chunks may be
    /// persisted without the content mapping. Retrying with the same inputs
    /// is safe because chunks are content-addressed.
    pub fn store(
        &self,
        payload: &[u8],
        content_id: &str,
        encrypt: bool,
    ) -> Result<Vec<ChunkHash>, StoreError> {
        let salt = ContentKey::generate_salt();
        let key = encrypt.then(|| ContentKey::derive(content_id, &salt));

        let mut inner = self.inner.lock();
        let mut hashes = Vec::with_capacity(payload.len().div_ceil(self.chunk_size.max(1)));

        let mut offset = 0;
        while offset < payload.len() {
            let end = usize::min(offset + self.chunk_size, payload.len());
            let plaintext = &payload[offset..end];

            let compressed = chunk::compress(plaintext)?;
            let (data, iv, tag) = match &key {
                Some(key) => {
                    let (ciphertext, iv, tag) = cipher::encrypt(key, &compressed)?;
                    (ciphertext, iv.to_vec(), tag.to_vec())
                }
                None => (compressed, Vec::new(), Vec::new()),
            };

            let hash = ChunkHash::from_data(&data);
            let chunk = Chunk {
                hash,
                data,
                iv,
                tag,
                original_size: plaintext.len() as u64,
                index: (offset / self.chunk_size) as u64,
                is_encrypted: encrypt,
            };

            self.db.insert(chunk_key(&hash), chunk.encode())?;
            inner.chunks.insert(hash, Arc::new(chunk));
            hashes.push(hash);

            offset = end;
        }

        let entry = ContentEntry {
            salt,
            hashes: hashes.clone(),
        };
        self.db
            .insert(content_key(content_id), entry.encode().into_bytes())?;
        inner.content_map.insert(content_id.to_string(), entry);

        debug!(content_id, chunks = hashes.len(), encrypt, "Stored content");
        Ok(hashes)
    }

    /// Reassemble a payload from its stored chunks
    pub fn retrieve(&self, content_id: &str) -> Result<Vec<u8>, StoreError> {
        let mut inner = self.inner.lock();
        let entry = self.resolve_content(&mut inner, content_id)?;

        let mut key: Option<ContentKey> = None;
        let mut payload = Vec::new();

        for hash in &entry.hashes {
            let chunk = match inner.chunks.get(hash) {
                Some(chunk) => Arc::clone(chunk),
                None => {
                    let raw = self
                        .db
                        .get(chunk_key(hash))?
                        .ok_or(StoreError::ChunkNotFound(*hash))?;
                    let chunk = Arc::new(Chunk::decode(*hash, &raw)?);
                    inner.chunks.insert(*hash, Arc::clone(&chunk));
                    chunk
                }
            };

            let body = if chunk.is_encrypted {
                let key = key.get_or_insert_with(|| ContentKey::derive(content_id, &entry.salt));
                cipher::decrypt(key, &chunk.data, &chunk.iv, &chunk.tag)?
            } else {
                chunk.data.clone()
            };

            let plain = chunk::decompress(&body, chunk.original_size)?;
            payload.extend_from_slice(&plain);
        }

        Ok(payload)
    }

    /// Get a chunk from the in-memory table
    pub fn get_chunk(&self, hash: &ChunkHash) -> Option<Arc<Chunk>> {
        self.inner.lock().chunks.get(hash).cloned()
    }

    /// Insert and persist a prefabricated chunk (e.g. received from a peer)
    ///
    /// The claimed hash must match the chunk bytes; mismatches are rejected.
    pub fn store_chunk(&self, hash: ChunkHash, chunk: Chunk) -> Result<(), StoreError> {
        let computed = ChunkHash::from_data(&chunk.data);
        if computed != hash || chunk.hash != hash {
            warn!(claimed = %hash, %computed, "Rejecting chunk with mismatched hash");
            return Err(StoreError::HashMismatch {
                claimed: hash,
                computed,
            });
        }

        let mut inner = self.inner.lock();
        self.db.insert(chunk_key(&hash), chunk.encode())?;
        inner.chunks.insert(hash, Arc::new(chunk));
        Ok(())
    }

    /// Stable content root: SHA-256 over the concatenated chunk hashes
    pub fn get_content_address(&self, content_id: &str) -> Result<ChunkHash, StoreError> {
        let mut inner = self.inner.lock();
        let entry = self.resolve_content(&mut inner, content_id)?;

        let mut combined = String::with_capacity(entry.hashes.len() * 64);
        for hash in &entry.hashes {
            combined.push_str(&hash.to_hex());
        }
        Ok(ChunkHash::from_data(combined.as_bytes()))
    }

    /// Ordered chunk hashes for a content id
    pub fn list_chunks(&self, content_id: &str) -> Result<Vec<ChunkHash>, StoreError> {
        let mut inner = self.inner.lock();
        Ok(self.resolve_content(&mut inner, content_id)?.hashes)
    }

    /// Check whether a chunk is present in memory or on disk
    pub fn contains_chunk(&self, hash: &ChunkHash) -> Result<bool, StoreError> {
        let inner = self.inner.lock();
        if inner.chunks.contains_key(hash) {
            return Ok(true);
        }
        Ok(self.db.contains_key(chunk_key(hash))?)
    }

    /// Evict a chunk from memory and disk
    pub fn remove_chunk(&self, hash: &ChunkHash) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.chunks.remove(hash);
        self.db.remove(chunk_key(hash))?;
        Ok(())
    }

    /// Force a durable flush of the backing database
    pub fn flush_to_disk(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// Resolve a content entry from memory, falling back to disk
    fn resolve_content(
        &self,
        inner: &mut StoreInner,
        content_id: &str,
    ) -> Result<ContentEntry, StoreError> {
        if let Some(entry) = inner.content_map.get(content_id) {
            return Ok(entry.clone());
        }

        let raw = self
            .db
            .get(content_key(content_id))?
            .ok_or_else(|| StoreError::ContentNotFound(content_id.to_string()))?;
        let raw = std::str::from_utf8(&raw)
            .map_err(|_| StoreError::CorruptContentMap(content_id.to_string()))?;
        let entry = ContentEntry::parse(raw, content_id)?;

        inner
            .content_map
            .insert(content_id.to_string(), entry.clone());
        Ok(entry)
    }
}

impl Drop for ChunkStore {
    fn drop(&mut self) {
        // Shutdown flush is best-effort
        if let Err(e) = self.db.flush() {
            warn!("Flush on shutdown failed: {e}");
        }
    }
}

fn chunk_key(hash: &ChunkHash) -> String {
    format!("chunk:{hash}")
}

fn content_key(content_id: &str) -> String {
    format!("content_map:{content_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_store(dir: &Path) -> ChunkStore {
        ChunkStore::open(dir, StoreConfig { chunk_size: 64 }).unwrap()
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 256) as u8).collect()
    }

    #[test]
    fn test_roundtrip_plain() {
        let dir = tempdir().unwrap();
        let store = small_store(dir.path());

        let data = payload(200);
        store.store(&data, "doc1", false).unwrap();
        assert_eq!(store.retrieve("doc1").unwrap(), data);
    }

    #[test]
    fn test_roundtrip_encrypted() {
        let dir = tempdir().unwrap();
        let store = small_store(dir.path());

        let data = payload(200);
        let hashes = store.store(&data, "doc1", true).unwrap();
        for hash in &hashes {
            let chunk = store.get_chunk(hash).unwrap();
            assert!(chunk.is_encrypted);
            assert_eq!(chunk.iv.len(), 12);
            assert_eq!(chunk.tag.len(), 16);
        }
        assert_eq!(store.retrieve("doc1").unwrap(), data);
    }

    #[test]
    fn test_chunk_boundaries() {
        let dir = tempdir().unwrap();
        let store = small_store(dir.path());

        let data = payload(200);
        let hashes = store.store(&data, "doc1", false).unwrap();
        assert_eq!(hashes.len(), 4);

        let sizes: Vec<u64> = hashes
            .iter()
            .map(|h| store.get_chunk(h).unwrap().original_size)
            .collect();
        assert_eq!(sizes, vec![64, 64, 64, 8]);
    }

    #[test]
    fn test_content_addressing_deterministic() {
        let dir = tempdir().unwrap();
        let store = small_store(dir.path());

        let data = payload(500);
        let h1 = store.store(&data, "doc1", false).unwrap();
        let h2 = store.store(&data, "doc1", false).unwrap();
        assert_eq!(h1, h2);

        let addr1 = store.get_content_address("doc1").unwrap();
        let addr2 = store.get_content_address("doc1").unwrap();
        assert_eq!(addr1, addr2);
    }

    #[test]
    fn test_encrypted_hashes_fresh_per_call() {
        let dir = tempdir().unwrap();
        let store = small_store(dir.path());

        let data = payload(100);
        let h1 = store.store(&data, "doc1", true).unwrap();
        let h2 = store.store(&data, "doc1", true).unwrap();
        assert_ne!(h1, h2);

        // Latest mapping wins; content still retrievable
        assert_eq!(store.retrieve("doc1").unwrap(), data);
    }

    #[test]
    fn test_retrieve_unknown_content() {
        let dir = tempdir().unwrap();
        let store = small_store(dir.path());
        assert!(matches!(
            store.retrieve("nope"),
            Err(StoreError::ContentNotFound(_))
        ));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let data = payload(300);

        {
            let store = small_store(dir.path());
            store.store(&data, "doc1", true).unwrap();
            store.flush_to_disk().unwrap();
        }

        let store = small_store(dir.path());
        assert_eq!(store.retrieve("doc1").unwrap(), data);
    }

    #[test]
    fn test_store_chunk_rejects_mismatch() {
        let dir = tempdir().unwrap();
        let store = small_store(dir.path());

        let body = chunk::compress(b"peer chunk").unwrap();
        let hash = ChunkHash::from_data(&body);
        let chunk = Chunk {
            hash,
            data: body,
            iv: Vec::new(),
            tag: Vec::new(),
            original_size: 10,
            index: 0,
            is_encrypted: false,
        };

        let wrong = ChunkHash::from_data(b"other");
        assert!(matches!(
            store.store_chunk(wrong, chunk.clone()),
            Err(StoreError::HashMismatch { .. })
        ));

        store.store_chunk(hash, chunk).unwrap();
        assert!(store.contains_chunk(&hash).unwrap());
    }

    #[test]
    fn test_remove_chunk() {
        let dir = tempdir().unwrap();
        let store = small_store(dir.path());

        let hashes = store.store(&payload(10), "doc1", false).unwrap();
        assert!(store.contains_chunk(&hashes[0]).unwrap());

        store.remove_chunk(&hashes[0]).unwrap();
        assert!(!store.contains_chunk(&hashes[0]).unwrap());
        assert!(matches!(
            store.retrieve("doc1"),
            Err(StoreError::ChunkNotFound(_))
        ));
    }

    #[test]
    fn test_list_chunks_ordered() {
        let dir = tempdir().unwrap();
        let store = small_store(dir.path());

        let hashes = store.store(&payload(200), "doc1", false).unwrap();
        assert_eq!(store.list_chunks("doc1").unwrap(), hashes);
    }
}
