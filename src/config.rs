//! Tunable thresholds, persisted as JSON.
//! Every struct is `#[serde(default)]` so a partial document only overrides
//! the keys it names.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::Millis;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub gesture: GestureConfig,
    pub sync: SyncConfig,
    pub network: NetworkConfig,
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    /// Contacts shorter than this are tap candidates.
    pub tap_max_duration_ms: Millis,
    /// Contacts longer than this are long presses.
    pub long_press_min_duration_ms: Millis,
    pub double_tap_interval_ms: Millis,
    pub double_tap_max_distance: f64,
    /// Max travel from start for a contact to still count as a tap or long press.
    pub tap_max_movement: f64,
    /// px/ms
    pub swipe_min_velocity: f64,
    pub pinch_threshold: f64,
    pub rotate_threshold_deg: f64,
    pub path_capacity: usize,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            tap_max_duration_ms: 250,
            long_press_min_duration_ms: 500,
            double_tap_interval_ms: 300,
            double_tap_max_distance: 40.0,
            tap_max_movement: 10.0,
            swipe_min_velocity: 0.5,
            pinch_threshold: 10.0,
            rotate_threshold_deg: 5.0,
            path_capacity: 32,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub relay_perfect_ms: Millis,
    pub relay_good_ms: Millis,
    pub perfect_bonus: f64,
    /// How many envelope keys are remembered for duplicate suppression.
    pub dedupe_capacity: usize,
    pub completion_points: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            relay_perfect_ms: 100,
            relay_good_ms: 500,
            perfect_bonus: 0.5,
            dedupe_capacity: 256,
            completion_points: 100,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// World units a player must move before a fresh state is broadcast.
    pub position_threshold: f64,
    pub rotation_threshold_deg: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            position_threshold: 0.05,
            rotation_threshold_deg: 5.0,
        }
    }
}
