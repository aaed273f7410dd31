use crate::config::BatteryPolicy;
use crate::error::BatteryError;
use crate::power::mode::SamplingConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryStatus {
    /// 0-100
    pub level_percent: f64,
    pub charging: bool,
}

/// Source of battery readings.
///
/// `Ok(None)` means the platform exposes no battery API; errors mean a
/// read was attempted and failed. Both degrade to the base config.
#[async_trait]
pub trait BatterySource: Send + Sync {
    async fn read(&self) -> Result<Option<BatteryStatus>, BatteryError>;
}

/// Platform without a battery API (desktops, servers)
pub struct NoBattery;

#[async_trait]
impl BatterySource for NoBattery {
    async fn read(&self) -> Result<Option<BatteryStatus>, BatteryError> {
        Ok(None)
    }
}

/// Fixed reading, for CLI overrides and tests
pub struct FixedBattery(pub BatteryStatus);

#[async_trait]
impl BatterySource for FixedBattery {
    async fn read(&self) -> Result<Option<BatteryStatus>, BatteryError> {
        Ok(Some(self.0))
    }
}

/// Linux power-supply class reader
///
/// Reads `{root}/{name}/capacity` (integer percent) and
/// `{root}/{name}/status` (`Charging`, `Discharging`, `Full`, ...).
pub struct SysfsBattery {
    dir: PathBuf,
}

impl SysfsBattery {
    pub fn new(name: &str) -> Self {
        Self::with_root(PathBuf::from("/sys/class/power_supply"), name)
    }

    pub fn with_root(root: PathBuf, name: &str) -> Self {
        SysfsBattery {
            dir: root.join(name),
        }
    }
}

#[async_trait]
impl BatterySource for SysfsBattery {
    async fn read(&self) -> Result<Option<BatteryStatus>, BatteryError> {
        if !self.dir.exists() {
            return Ok(None);
        }

        let capacity = tokio::fs::read_to_string(self.dir.join("capacity"))
            .await
            .map_err(|e| BatteryError::Io(e.to_string()))?;
        let level_percent: f64 = capacity
            .trim()
            .parse()
            .map_err(|_| BatteryError::Parse(capacity.trim().to_string()))?;

        // Missing status file: assume discharging
        let status = tokio::fs::read_to_string(self.dir.join("status"))
            .await
            .unwrap_or_default();
        let charging = matches!(status.trim(), "Charging" | "Full");

        Ok(Some(BatteryStatus {
            level_percent: level_percent.clamp(0.0, 100.0),
            charging,
        }))
    }
}

/// Apply the battery policy to a base sampling config.
pub fn adjust_for_battery(
    base: SamplingConfig,
    battery: Option<BatteryStatus>,
    policy: &BatteryPolicy,
) -> SamplingConfig {
    let Some(status) = battery else {
        return base;
    };
    if status.charging {
        return base;
    }

    if status.level_percent < policy.low_percent {
        SamplingConfig {
            high_accuracy: false,
            ..base.widened(policy.low_factor)
        }
    } else if status.level_percent < policy.moderate_percent {
        base.widened(policy.moderate_factor)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn base() -> SamplingConfig {
        SamplingConfig {
            high_accuracy: true,
            max_age_ms: 5_000,
            timeout_ms: 10_000,
            interval_ms: 5_000,
        }
    }

    fn status(level: f64, charging: bool) -> Option<BatteryStatus> {
        Some(BatteryStatus {
            level_percent: level,
            charging,
        })
    }

    #[test]
    fn test_low_battery_aggressive() {
        let policy = BatteryPolicy::default();
        let adjusted = adjust_for_battery(base(), status(15.0, false), &policy);

        assert!(!adjusted.high_accuracy);
        assert_eq!(adjusted.max_age_ms, 15_000);
        assert_eq!(adjusted.interval_ms, 15_000);
        assert_eq!(adjusted.timeout_ms, 10_000);
    }

    #[test]
    fn test_moderate_battery() {
        let policy = BatteryPolicy::default();
        let adjusted = adjust_for_battery(base(), status(35.0, false), &policy);

        assert!(adjusted.high_accuracy);
        assert_eq!(adjusted.max_age_ms, 7_500);
        assert_eq!(adjusted.interval_ms, 7_500);
    }

    #[test]
    fn test_unchanged_cases() {
        let policy = BatteryPolicy::default();
        assert_eq!(adjust_for_battery(base(), status(80.0, false), &policy), base());
        assert_eq!(adjust_for_battery(base(), status(5.0, true), &policy), base());
        assert_eq!(adjust_for_battery(base(), None, &policy), base());
        // Boundary: 50% is not below 50%
        assert_eq!(adjust_for_battery(base(), status(50.0, false), &policy), base());
    }

    #[tokio::test]
    async fn test_sysfs_reader() {
        let root = std::env::temp_dir().join("location_sense_sysfs_test");
        let dir = root.join("BAT0");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("capacity"), "42\n").unwrap();
        fs::write(dir.join("status"), "Discharging\n").unwrap();

        let reading = SysfsBattery::with_root(root.clone(), "BAT0").read().await.unwrap();
        assert_eq!(reading, status(42.0, false));

        fs::write(dir.join("status"), "Charging\n").unwrap();
        let reading = SysfsBattery::with_root(root.clone(), "BAT0").read().await.unwrap();
        assert_eq!(reading, status(42.0, true));

        fs::write(dir.join("capacity"), "n/a\n").unwrap();
        let err = SysfsBattery::with_root(root.clone(), "BAT0").read().await;
        assert!(matches!(err, Err(BatteryError::Parse(_))));

        let missing = SysfsBattery::with_root(root.clone(), "BAT9").read().await.unwrap();
        assert_eq!(missing, None);

        fs::remove_dir_all(&root).unwrap();
    }
}
