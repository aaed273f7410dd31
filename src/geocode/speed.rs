use crate::error::{LocationSenseError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Discretized velocity range used to select adaptive lookup thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeedBucket {
    Walking,
    Cycling,
    Driving,
    Highway,
}

impl Display for SpeedBucket {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            SpeedBucket::Walking => write!(f, "walking"),
            SpeedBucket::Cycling => write!(f, "cycling"),
            SpeedBucket::Driving => write!(f, "driving"),
            SpeedBucket::Highway => write!(f, "highway"),
        }
    }
}

/// Minimum movement and minimum spacing between lookups for one bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedThreshold {
    /// Exclusive upper edge of the bucket (km/h)
    pub max_speed_kmh: f64,
    pub min_distance_m: f64,
    pub min_delay_ms: u64,
}

impl SpeedThreshold {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }
}

/// Threshold table. Faster buckets require more movement and more time
/// between lookups.
///
/// Buckets partition `[0, ∞)`: `[0,5)`, `[5,20)`, `[20,50)`, `[50,∞)` km/h.
/// The highway edge (80) is nominal; anything faster stays highway.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedThresholds {
    pub walking: SpeedThreshold,
    pub cycling: SpeedThreshold,
    pub driving: SpeedThreshold,
    pub highway: SpeedThreshold,
}

impl Default for SpeedThresholds {
    fn default() -> Self {
        SpeedThresholds {
            walking: SpeedThreshold {
                max_speed_kmh: 5.0,
                min_distance_m: 20.0,
                min_delay_ms: 2_000,
            },
            cycling: SpeedThreshold {
                max_speed_kmh: 20.0,
                min_distance_m: 50.0,
                min_delay_ms: 3_000,
            },
            driving: SpeedThreshold {
                max_speed_kmh: 50.0,
                min_distance_m: 100.0,
                min_delay_ms: 5_000,
            },
            highway: SpeedThreshold {
                max_speed_kmh: 80.0,
                min_distance_m: 200.0,
                min_delay_ms: 8_000,
            },
        }
    }
}

pub fn ms_to_kmh(speed_ms: f64) -> f64 {
    speed_ms * 3.6
}

impl SpeedThresholds {
    /// Resolve the bucket for an instantaneous speed in m/s.
    ///
    /// NaN and negative speeds are treated as standing still. Positive
    /// infinity lands in the fastest bucket.
    pub fn bucket_for(&self, speed_ms: f64) -> SpeedBucket {
        let kmh = if speed_ms.is_nan() || speed_ms < 0.0 {
            0.0
        } else {
            ms_to_kmh(speed_ms)
        };

        if kmh < self.walking.max_speed_kmh {
            SpeedBucket::Walking
        } else if kmh < self.cycling.max_speed_kmh {
            SpeedBucket::Cycling
        } else if kmh < self.driving.max_speed_kmh {
            SpeedBucket::Driving
        } else {
            SpeedBucket::Highway
        }
    }

    pub fn threshold(&self, bucket: SpeedBucket) -> &SpeedThreshold {
        match bucket {
            SpeedBucket::Walking => &self.walking,
            SpeedBucket::Cycling => &self.cycling,
            SpeedBucket::Driving => &self.driving,
            SpeedBucket::Highway => &self.highway,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let ordered = [&self.walking, &self.cycling, &self.driving, &self.highway];
        for pair in ordered.windows(2) {
            if pair[1].max_speed_kmh <= pair[0].max_speed_kmh {
                return Err(LocationSenseError::Config(
                    "speed bucket edges must be strictly increasing".to_string(),
                ));
            }
        }
        if ordered.iter().any(|t| t.min_distance_m < 0.0 || !t.min_distance_m.is_finite()) {
            return Err(LocationSenseError::Config(
                "min_distance_m must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }
}
