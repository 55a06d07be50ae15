//! Device telemetry snapshots
//!
//! A telemetry value summarises a device's current capability and feeds the
//! placement scheduler. Snapshots are pure values: every update wholly
//! replaces the previous one.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::DeviceId;

/// Weights for the compute capability score, summing to 100
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Battery / power contribution
    pub battery: f32,
    /// CPU availability contribution
    pub cpu: f32,
    /// RAM availability contribution
    pub ram: f32,
    /// Idle-state contribution
    pub idle: f32,
    /// Link quality contribution
    pub link: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            battery: 20.0,
            cpu: 30.0,
            ram: 20.0,
            idle: 20.0,
            link: 10.0,
        }
    }
}

/// Snapshot of a device's current capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    pub device_id: DeviceId,
    /// 0.0 - 100.0
    pub battery_percent: f32,
    /// 0.0 - 100.0
    pub cpu_load_percent: f32,
    /// 0.0 - 100.0
    pub ram_usage_percent: f32,
    /// 0.0 - 100.0 (inverse of activity)
    pub idle_percent: f32,
    /// 0.0 - 1.0
    pub link_quality: f32,
    pub available_storage_mb: u64,
    pub is_plugged_in: bool,
    /// Unix milliseconds at capture time
    pub timestamp: u64,
}

impl Telemetry {
    /// New snapshot with optimistic defaults, stamped now
    pub fn new(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            battery_percent: 100.0,
            cpu_load_percent: 0.0,
            ram_usage_percent: 0.0,
            idle_percent: 100.0,
            link_quality: 1.0,
            available_storage_mb: 1024,
            is_plugged_in: false,
            timestamp: now_millis(),
        }
    }

    /// Compute capability score (0-100) with the default weights
    pub fn compute_score(&self) -> f32 {
        self.weighted_score(&ScoreWeights::default())
    }

    /// Compute capability score (0-100) with explicit weights
    pub fn weighted_score(&self, weights: &ScoreWeights) -> f32 {
        let mut score = 0.0;

        if self.is_plugged_in {
            score += weights.battery;
        } else {
            score += (self.battery_percent / 100.0) * weights.battery;
        }

        score += ((100.0 - self.cpu_load_percent) / 100.0) * weights.cpu;
        score += ((100.0 - self.ram_usage_percent) / 100.0) * weights.ram;
        score += (self.idle_percent / 100.0) * weights.idle;
        score += self.link_quality * weights.link;

        score
    }
}

/// Wall-clock milliseconds since the Unix epoch
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
