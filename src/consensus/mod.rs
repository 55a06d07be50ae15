//! CRDT metadata ledger
//!
//! An append-only per-chunk DAG of placement records. Each entry names the
//! devices holding a chunk at a logical version; remote entries merge in
//! idempotently by entry id, which makes the ledger safe to replicate over
//! gossip. Conflict resolution is last-write-wins: timestamp, then version,
//! then entry id.
//!
//! Entries are never rewritten or deleted.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::crypto::{sha256, ChunkHash};
use crate::telemetry::now_millis;
use crate::DeviceId;

/// Identifier of a ledger entry: SHA-256 over the entry's canonical fields
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub [u8; 32]);

impl EntryId {
    /// Convert to lowercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({}...)", &self.to_hex()[..8])
    }
}

/// One placement record in a chunk's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagEntry {
    /// Pure function of `chunk_hash`, `device_ids` and `version`
    pub entry_id: EntryId,
    pub chunk_hash: ChunkHash,
    /// Replica set at this version
    pub device_ids: Vec<DeviceId>,
    /// Immediate predecessors in this chunk's history
    pub parent_ids: Vec<EntryId>,
    /// Unix milliseconds at creation
    pub timestamp: u64,
    /// Monotonic per chunk on the creating device, >= 1
    pub version: u64,
    /// Device that created this entry
    pub creator: DeviceId,
}

impl DagEntry {
    /// Derive the entry id from the canonical serialization
    /// `chunk_hash || join(device_ids) || decimal(version)`
    pub fn compute_id(chunk_hash: &ChunkHash, device_ids: &[DeviceId], version: u64) -> EntryId {
        let mut canonical = chunk_hash.to_hex();
        for device in device_ids {
            canonical.push_str(device);
        }
        canonical.push_str(&version.to_string());
        EntryId(sha256(canonical.as_bytes()))
    }
}

/// Pick the winner between two entries: greater timestamp, then greater
/// version, then lexicographically greater entry id
///
/// Total and deterministic, so any two replicas agree on the winner.
pub fn resolve_conflict<'a>(a: &'a DagEntry, b: &'a DagEntry) -> &'a DagEntry {
    let ordering = a
        .timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.version.cmp(&b.version))
        .then_with(|| a.entry_id.cmp(&b.entry_id));
    match ordering {
        std::cmp::Ordering::Greater => a,
        _ => b,
    }
}

#[derive(Default)]
struct LedgerInner {
    /// Per-chunk history, non-decreasing by timestamp
    histories: HashMap<ChunkHash, Vec<Arc<DagEntry>>>,
    /// Flat index for idempotent merges
    by_id: HashMap<EntryId, Arc<DagEntry>>,
}

/// Append-only DAG ledger of chunk placements
#[derive(Default)]
pub struct DagLedger {
    inner: Mutex<LedgerInner>,
}

impl DagLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a locally-created entry for a chunk
    ///
    /// The new entry's parent is the latest local entry for the chunk and
    /// its version is the parent's plus one (or 1 for a fresh history).
    pub fn add_entry(
        &self,
        chunk_hash: ChunkHash,
        device_ids: Vec<DeviceId>,
        creator: impl Into<DeviceId>,
    ) -> EntryId {
        let mut inner = self.inner.lock();
        let history = inner.histories.entry(chunk_hash).or_default();

        let (version, parent_ids) = match history.last() {
            Some(latest) => (latest.version + 1, vec![latest.entry_id]),
            None => (1, Vec::new()),
        };

        let entry = Arc::new(DagEntry {
            entry_id: DagEntry::compute_id(&chunk_hash, &device_ids, version),
            chunk_hash,
            device_ids,
            parent_ids,
            timestamp: now_millis(),
            version,
            creator: creator.into(),
        });

        let entry_id = entry.entry_id;
        history.push(Arc::clone(&entry));
        inner.by_id.insert(entry_id, entry);
        entry_id
    }

    /// Ingest a remote entry, keeping the history sorted by timestamp
    ///
    /// Idempotent: an entry whose id is already indexed is ignored, so
    /// replaying a gossip stream never changes the ledger.
    pub fn merge_entry(&self, entry: DagEntry) {
        let mut inner = self.inner.lock();
        if inner.by_id.contains_key(&entry.entry_id) {
            debug!(entry = %entry.entry_id, "Skipping already-merged entry");
            return;
        }

        let entry = Arc::new(entry);
        let history = inner.histories.entry(entry.chunk_hash).or_default();
        let pos = history.partition_point(|e| e.timestamp < entry.timestamp);
        history.insert(pos, Arc::clone(&entry));
        inner.by_id.insert(entry.entry_id, entry);
    }

    /// Latest entry for a chunk (greatest timestamp after merges)
    pub fn get_latest(&self, chunk_hash: &ChunkHash) -> Option<Arc<DagEntry>> {
        self.inner
            .lock()
            .histories
            .get(chunk_hash)
            .and_then(|h| h.last().cloned())
    }

    /// Full history for a chunk in timestamp order
    pub fn get_history(&self, chunk_hash: &ChunkHash) -> Vec<Arc<DagEntry>> {
        self.inner
            .lock()
            .histories
            .get(chunk_hash)
            .cloned()
            .unwrap_or_default()
    }

    /// Look up an entry by id
    pub fn get_entry(&self, entry_id: &EntryId) -> Option<Arc<DagEntry>> {
        self.inner.lock().by_id.get(entry_id).cloned()
    }

    /// Replica set from the latest entry, empty for unknown chunks
    pub fn resolve_locations(&self, chunk_hash: &ChunkHash) -> Vec<DeviceId> {
        self.get_latest(chunk_hash)
            .map(|e| e.device_ids.clone())
            .unwrap_or_default()
    }

    /// All chunk hashes with a history
    pub fn list_chunks(&self) -> Vec<ChunkHash> {
        self.inner.lock().histories.keys().copied().collect()
    }
}
