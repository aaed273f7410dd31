use crate::error::{LocationSenseError, Result};
use crate::geocode::speed::SpeedThresholds;
use crate::power::mode::{PowerMode, SamplingConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level pipeline configuration.
///
/// Every field has a default, so a config file only needs to name the
/// values it overrides:
///
/// ```json
/// {
///   "geocode": { "cache_max_size": 250 },
///   "providers": { "poi_proxy_url": "https://proxy.local" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub power: PowerConfig,
    pub geocode: GeocodeConfig,
    pub providers: ProvidersConfig,
}

impl PipelineConfig {
    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            LocationSenseError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)
            .map_err(|e| LocationSenseError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.power.validate()?;
        self.geocode.validate()?;
        Ok(())
    }
}

/// Power mode controller settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// Idle time after which a visible session is considered inactive
    pub inactivity_timeout_ms: u64,
    pub foreground: SamplingConfig,
    pub background: SamplingConfig,
    pub inactive: SamplingConfig,
    pub battery: BatteryPolicy,
}

impl PowerConfig {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    /// Base sampling config for a mode
    pub fn sampling_for(&self, mode: PowerMode) -> SamplingConfig {
        match mode {
            PowerMode::Foreground => self.foreground,
            PowerMode::Background => self.background,
            PowerMode::Inactive => self.inactive,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.inactivity_timeout_ms == 0 {
            return Err(LocationSenseError::Config(
                "inactivity_timeout_ms must be positive".to_string(),
            ));
        }
        for (name, cfg) in [
            ("foreground", &self.foreground),
            ("background", &self.background),
            ("inactive", &self.inactive),
        ] {
            if cfg.interval_ms == 0 || cfg.timeout_ms == 0 {
                return Err(LocationSenseError::Config(format!(
                    "{} sampling interval and timeout must be positive",
                    name
                )));
            }
        }
        self.battery.validate()
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        PowerConfig {
            inactivity_timeout_ms: 5 * 60 * 1000,
            foreground: SamplingConfig {
                high_accuracy: true,
                max_age_ms: 5_000,
                timeout_ms: 10_000,
                interval_ms: 5_000,
            },
            background: SamplingConfig {
                high_accuracy: false,
                max_age_ms: 30_000,
                timeout_ms: 20_000,
                interval_ms: 30_000,
            },
            inactive: SamplingConfig {
                high_accuracy: false,
                max_age_ms: 60_000,
                timeout_ms: 30_000,
                interval_ms: 60_000,
            },
            battery: BatteryPolicy::default(),
        }
    }
}

/// How sampling widens as the battery drains (only while not charging)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryPolicy {
    /// Below this level: aggressive widening, high accuracy off
    pub low_percent: f64,
    /// Below this level: moderate widening
    pub moderate_percent: f64,
    pub low_factor: f64,
    pub moderate_factor: f64,
}

impl BatteryPolicy {
    fn validate(&self) -> Result<()> {
        if self.low_percent >= self.moderate_percent {
            return Err(LocationSenseError::Config(
                "battery low_percent must be below moderate_percent".to_string(),
            ));
        }
        if self.low_factor < 1.0 || self.moderate_factor < 1.0 {
            return Err(LocationSenseError::Config(
                "battery widening factors must be >= 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BatteryPolicy {
    fn default() -> Self {
        BatteryPolicy {
            low_percent: 20.0,
            moderate_percent: 50.0,
            low_factor: 3.0,
            moderate_factor: 1.5,
        }
    }
}

/// Geocoding engine settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodeConfig {
    pub cache_max_size: usize,
    pub cache_ttl_ms: u64,
    /// Decimal places kept in the cache key (3 = ~100 m buckets)
    pub cache_precision: usize,
    pub thresholds: SpeedThresholds,
}

impl GeocodeConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.cache_max_size == 0 {
            return Err(LocationSenseError::Config(
                "cache_max_size must be positive".to_string(),
            ));
        }
        if self.cache_ttl_ms == 0 {
            return Err(LocationSenseError::Config(
                "cache_ttl_ms must be positive".to_string(),
            ));
        }
        if self.cache_precision > 8 {
            return Err(LocationSenseError::Config(
                "cache_precision above 8 decimals defeats caching".to_string(),
            ));
        }
        self.thresholds.validate()
    }
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        GeocodeConfig {
            cache_max_size: 100,
            cache_ttl_ms: 30 * 60 * 1000,
            cache_precision: 3,
            thresholds: SpeedThresholds::default(),
        }
    }
}

/// Provider endpoints
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Proxy in front of the point-of-interest/address match service
    pub poi_proxy_url: Option<String>,
    pub nominatim_url: String,
    pub user_agent: String,
    pub request_timeout_ms: u64,
    pub language: String,
}

impl ProvidersConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            poi_proxy_url: None,
            nominatim_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: "location_sense/0.1.0".to_string(),
            request_timeout_ms: 8_000,
            language: "de".to_string(),
        }
    }
}
