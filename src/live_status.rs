use crate::error::Result;
use crate::geocode::EngineStats;
use crate::power::{PowerMode, SamplingConfig};
use crate::types::{AddressData, GeoPosition};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Snapshot of the pipeline, written periodically for external monitors
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    // Power
    pub mode: PowerMode,
    pub sampling: SamplingConfig,
    pub visible: bool,
    pub idle_seconds: u64,
    // GPS
    pub gps_fixes: u64,
    pub invalid_fixes: u64,
    pub last_position: Option<GeoPosition>,
    // Geocoding
    pub geocode: EngineStats,
    pub cache_entries: usize,
    pub pending_lookup: bool,
    pub last_address: Option<AddressData>,
    pub last_error: Option<String>,
}

impl LiveStatus {
    pub fn new(mode: PowerMode, sampling: SamplingConfig) -> Self {
        Self {
            timestamp: current_timestamp(),
            uptime_seconds: 0,
            mode,
            sampling,
            visible: true,
            idle_seconds: 0,
            gps_fixes: 0,
            invalid_fixes: 0,
            last_position: None,
            geocode: EngineStats::default(),
            cache_entries: 0,
            pending_lookup: false,
            last_address: None,
            last_error: None,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Wall-clock seconds since the Unix epoch
pub fn current_timestamp() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
