//! Replica placement scheduler
//!
//! Scores registered devices against storage and compute workloads using
//! their latest telemetry snapshots and selects the top candidates up to
//! the replication factor. The scheduler is pure: telemetry in, ranking
//! out, nothing persisted.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::crypto::ChunkHash;
use crate::telemetry::{ScoreWeights, Telemetry};
use crate::DeviceId;

/// Default number of replicas per chunk
pub const DEFAULT_REPLICATION_FACTOR: usize = 3;

/// Devices chosen to hold a chunk or shard
///
/// An empty `device_ids` with score 0 means no registered device had the
/// capacity — a placement failure the caller must handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placement {
    /// Chunk hash hex or shard id
    pub target: String,
    /// Chosen replicas, at most the replication factor
    pub device_ids: Vec<DeviceId>,
    /// Arithmetic mean of the chosen devices' individual scores
    pub score: f32,
}

/// Metadata for one layer-range slice of a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelShard {
    pub shard_id: String,
    pub model_name: String,
    /// Inclusive layer range
    pub layer_start: u32,
    pub layer_end: u32,
    /// Devices hosting this shard
    pub device_ids: Vec<DeviceId>,
    pub size_bytes: u64,
    /// Hash of the shard weights
    pub content_hash: ChunkHash,
}

/// Telemetry-driven replica placement
pub struct Scheduler {
    replication_factor: usize,
    weights: ScoreWeights,
    devices: RwLock<HashMap<DeviceId, Telemetry>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICATION_FACTOR)
    }
}

impl Scheduler {
    /// Create a scheduler with the given replication factor (min 1)
    pub fn new(replication_factor: usize) -> Self {
        Self::with_weights(replication_factor, ScoreWeights::default())
    }

    /// Create a scheduler with explicit compute score weights
    pub fn with_weights(replication_factor: usize, weights: ScoreWeights) -> Self {
        Self {
            replication_factor: replication_factor.max(1),
            weights,
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Register a device by its telemetry snapshot
    pub fn register_device(&self, telemetry: Telemetry) {
        debug!(device = %telemetry.device_id, "Registered device");
        self.devices
            .write()
            .insert(telemetry.device_id.clone(), telemetry);
    }

    /// Replace a device's telemetry snapshot
    pub fn update_telemetry(&self, telemetry: Telemetry) {
        self.devices
            .write()
            .insert(telemetry.device_id.clone(), telemetry);
    }

    /// Forget a device
    pub fn remove_device(&self, device_id: &str) {
        self.devices.write().remove(device_id);
    }

    /// Latest telemetry snapshot for a device
    pub fn get_telemetry(&self, device_id: &str) -> Option<Telemetry> {
        self.devices.read().get(device_id).cloned()
    }

    /// Place each chunk hash on the top-scoring storage devices
    pub fn place_chunks(&self, hashes: &[ChunkHash], chunk_size_bytes: u64) -> Vec<Placement> {
        let devices = self.devices.read();
        let chosen = select_devices(
            devices
                .values()
                .map(|t| (t.device_id.clone(), storage_score(t, chunk_size_bytes))),
            self.replication_factor,
        );

        hashes
            .iter()
            .map(|hash| placement(hash.to_hex(), &chosen))
            .collect()
    }

    /// Place a model shard, weighting compute capability over storage
    pub fn place_shard(&self, shard_id: &str, size_bytes: u64) -> Placement {
        let devices = self.devices.read();
        let chosen = select_devices(
            devices
                .values()
                .map(|t| (t.device_id.clone(), shard_score(t, size_bytes, &self.weights))),
            self.replication_factor,
        );
        placement(shard_id.to_string(), &chosen)
    }

    /// Place a shard from its metadata and return it with the chosen hosts
    pub fn place_model_shard(&self, shard: &ModelShard) -> (ModelShard, Placement) {
        let placement = self.place_shard(&shard.shard_id, shard.size_bytes);
        let placed = ModelShard {
            device_ids: placement.device_ids.clone(),
            ..shard.clone()
        };
        (placed, placement)
    }

    /// Top `count` devices by compute capability
    pub fn get_compute_devices(&self, count: usize) -> Vec<DeviceId> {
        let devices = self.devices.read();
        select_devices(
            devices
                .values()
                .map(|t| (t.device_id.clone(), t.weighted_score(&self.weights))),
            count,
        )
        .into_iter()
        .map(|(id, _)| id)
        .collect()
    }
}

/// Capacity-gated storage score
///
/// A device that cannot hold the chunk scores 0 and is never selected.
pub fn storage_score(telemetry: &Telemetry, size_bytes: u64) -> f32 {
    let required_mb = size_bytes.div_ceil(1024 * 1024).max(1);
    if telemetry.available_storage_mb < required_mb {
        return 0.0;
    }

    let mut score = f32::min(
        30.0,
        (telemetry.available_storage_mb as f32 / required_mb as f32) * 5.0,
    );

    if telemetry.is_plugged_in {
        score += 25.0;
    } else {
        score += (telemetry.battery_percent / 100.0) * 25.0;
    }

    score += telemetry.link_quality * 25.0;
    score += ((100.0 - telemetry.cpu_load_percent) / 100.0) * 10.0;
    score += ((100.0 - telemetry.ram_usage_percent) / 100.0) * 10.0;

    score
}

/// Blended score for model shards: 40% storage, 60% compute
pub fn shard_score(telemetry: &Telemetry, size_bytes: u64, weights: &ScoreWeights) -> f32 {
    storage_score(telemetry, size_bytes) * 0.4 + telemetry.weighted_score(weights) * 0.6
}

/// Keep positive-scored candidates, best first, up to `count`
///
/// Ties break on device id so rankings are deterministic.
fn select_devices(
    candidates: impl Iterator<Item = (DeviceId, f32)>,
    count: usize,
) -> Vec<(DeviceId, f32)> {
    let mut viable: Vec<_> = candidates.filter(|(_, score)| *score > 0.0).collect();
    viable.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    viable.truncate(count);
    viable
}

fn placement(target: String, chosen: &[(DeviceId, f32)]) -> Placement {
    let score = if chosen.is_empty() {
        0.0
    } else {
        chosen.iter().map(|(_, s)| s).sum::<f32>() / chosen.len() as f32
    };
    Placement {
        target,
        device_ids: chosen.iter().map(|(id, _)| id.clone()).collect(),
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    fn device(id: &str, storage_mb: u64, plugged: bool, battery: f32) -> Telemetry {
        let mut t = Telemetry::new(id);
        t.available_storage_mb = storage_mb;
        t.is_plugged_in = plugged;
        t.battery_percent = battery;
        t
    }

    #[test]
    fn test_capacity_gate() {
        let t = device("d1", 10, false, 100.0);
        assert_eq!(storage_score(&t, 50 * MB), 0.0);
        assert!(storage_score(&t, 5 * MB) > 0.0);
    }

    #[test]
    fn test_capacity_gate_rounds_up() {
        let t = device("d1", 1, false, 100.0);
        // 1.5 MB requires 2 MB
        assert_eq!(storage_score(&t, MB + MB / 2), 0.0);
        assert!(storage_score(&t, MB) > 0.0);
    }

    #[test]
    fn test_gated_device_never_placed() {
        let scheduler = Scheduler::new(3);
        scheduler.register_device(device("big", 10_000, true, 100.0));
        scheduler.register_device(device("tiny", 1, true, 100.0));

        let hash = ChunkHash::from_data(b"chunk");
        let placements = scheduler.place_chunks(&[hash], 50 * MB);
        assert_eq!(placements[0].device_ids, vec!["big".to_string()]);
    }

    #[test]
    fn test_placement_cardinality() {
        let scheduler = Scheduler::new(2);
        for i in 0..5 {
            scheduler.register_device(device(&format!("d{i}"), 10_000, true, 100.0));
        }

        let hash = ChunkHash::from_data(b"chunk");
        let placements = scheduler.place_chunks(&[hash], MB);
        assert_eq!(placements[0].device_ids.len(), 2);
    }

    #[test]
    fn test_no_viable_devices_is_placement_failure() {
        let scheduler = Scheduler::new(3);
        scheduler.register_device(device("tiny", 1, true, 100.0));

        let hash = ChunkHash::from_data(b"chunk");
        let placements = scheduler.place_chunks(&[hash], 500 * MB);
        assert!(placements[0].device_ids.is_empty());
        assert_eq!(placements[0].score, 0.0);
    }

    #[test]
    fn test_plugged_outranks_low_battery() {
        let scheduler = Scheduler::new(1);
        scheduler.register_device(device("plugged", 1_000, true, 0.0));
        scheduler.register_device(device("draining", 1_000, false, 20.0));

        let hash = ChunkHash::from_data(b"chunk");
        let placements = scheduler.place_chunks(&[hash], MB);
        assert_eq!(placements[0].device_ids, vec!["plugged".to_string()]);
    }

    #[test]
    fn test_placement_score_is_mean() {
        let scheduler = Scheduler::new(2);
        let d1 = device("d1", 10_000, true, 100.0);
        let d2 = device("d2", 10_000, false, 50.0);
        let expected =
            (storage_score(&d1, MB) + storage_score(&d2, MB)) / 2.0;
        scheduler.register_device(d1);
        scheduler.register_device(d2);

        let hash = ChunkHash::from_data(b"chunk");
        let placements = scheduler.place_chunks(&[hash], MB);
        assert!((placements[0].score - expected).abs() < 0.001);
    }

    #[test]
    fn test_place_shard_prefers_compute() {
        let scheduler = Scheduler::new(1);

        // Similar storage, very different compute headroom
        let mut strong = device("strong", 2_000, true, 100.0);
        strong.cpu_load_percent = 5.0;
        let mut weak = device("weak", 2_000, true, 100.0);
        weak.cpu_load_percent = 95.0;
        weak.ram_usage_percent = 90.0;
        weak.idle_percent = 5.0;

        scheduler.register_device(strong);
        scheduler.register_device(weak);

        let placement = scheduler.place_shard("shard-0", 100 * MB);
        assert_eq!(placement.device_ids, vec!["strong".to_string()]);
    }

    #[test]
    fn test_place_model_shard_assigns_hosts() {
        let scheduler = Scheduler::new(2);
        scheduler.register_device(device("d1", 10_000, true, 100.0));
        scheduler.register_device(device("d2", 10_000, true, 100.0));
        scheduler.register_device(device("d3", 1, true, 100.0));

        let shard = ModelShard {
            shard_id: "llm-7b:0".to_string(),
            model_name: "llm-7b".to_string(),
            layer_start: 0,
            layer_end: 15,
            device_ids: Vec::new(),
            size_bytes: 800 * MB,
            content_hash: ChunkHash::from_data(b"shard weights"),
        };

        let (placed, placement) = scheduler.place_model_shard(&shard);
        assert_eq!(placed.device_ids, placement.device_ids);
        assert_eq!(placement.target, "llm-7b:0");
        // d3 loses its storage term to the capacity gate and is outranked
        assert_eq!(
            placed.device_ids,
            vec!["d1".to_string(), "d2".to_string()]
        );
        assert_eq!(placed.layer_end, 15);
    }

    #[test]
    fn test_get_compute_devices_ranked() {
        let scheduler = Scheduler::new(3);
        let mut slow = device("slow", 1_000, false, 10.0);
        slow.cpu_load_percent = 90.0;
        slow.idle_percent = 0.0;
        scheduler.register_device(slow);
        scheduler.register_device(device("fast", 1_000, true, 100.0));

        let ranked = scheduler.get_compute_devices(2);
        assert_eq!(ranked[0], "fast");
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn test_update_replaces_snapshot() {
        let scheduler = Scheduler::new(3);
        scheduler.register_device(device("d1", 1_000, true, 100.0));
        scheduler.update_telemetry(device("d1", 5, false, 10.0));

        let t = scheduler.get_telemetry("d1").unwrap();
        assert_eq!(t.available_storage_mb, 5);
        assert!(!t.is_plugged_in);

        scheduler.remove_device("d1");
        assert!(scheduler.get_telemetry("d1").is_none());
    }
}
