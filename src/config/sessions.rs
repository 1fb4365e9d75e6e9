//! Session window configuration
//!
//! Boundaries are UTC times of day written as `HH:MM`; they are parsed and
//! checked by `SessionSchedule::from_settings`.

use serde::{Deserialize, Serialize};

/// Settings for both regional sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub us: RegionSettings,
    pub eu: RegionSettings,
    /// Length of the pre-queue window opening before each session
    pub pre_queue_minutes: u32,
}

/// One regional session window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionSettings {
    /// Name shown in the status preamble
    pub label: String,
    pub start: String,
    pub end: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            us: RegionSettings {
                label: "USTZ SRE".to_string(),
                start: "01:00".to_string(),
                end: "07:00".to_string(),
            },
            eu: RegionSettings {
                label: "EUTZ SRE".to_string(),
                start: "14:00".to_string(),
                end: "22:00".to_string(),
            },
            pre_queue_minutes: 30,
        }
    }
}
