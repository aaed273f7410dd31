use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Application-lifecycle power mode. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerMode {
    /// Visible and recently used
    Foreground,
    /// Hidden (tab/app not visible)
    Background,
    /// Visible but idle past the inactivity timeout
    Inactive,
}

impl Display for PowerMode {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            PowerMode::Foreground => write!(f, "foreground"),
            PowerMode::Background => write!(f, "background"),
            PowerMode::Inactive => write!(f, "inactive"),
        }
    }
}

/// GPS sampling configuration implied by a power mode.
///
/// Immutable value: battery adjustments produce a new instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub high_accuracy: bool,
    /// Oldest cached fix the location API may return
    pub max_age_ms: u64,
    pub timeout_ms: u64,
    /// Time between position acquisitions
    pub interval_ms: u64,
}

impl SamplingConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Derive a config with `max_age` and `interval` scaled by `factor`.
    pub fn widened(&self, factor: f64) -> SamplingConfig {
        let scale = |ms: u64| (ms as f64 * factor.max(1.0)).round() as u64;
        SamplingConfig {
            max_age_ms: scale(self.max_age_ms),
            interval_ms: scale(self.interval_ms),
            ..*self
        }
    }
}

/// Current values of the transition inputs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeInputs {
    pub visible: bool,
    pub focused: bool,
    pub last_activity_age: Duration,
}

/// Transition rule.
///
/// Pure function of the current inputs: hidden wins over everything,
/// then idle time, otherwise foreground. Focus does not participate.
pub fn resolve_mode(inputs: &ModeInputs, inactivity_timeout: Duration) -> PowerMode {
    if !inputs.visible {
        PowerMode::Background
    } else if inputs.last_activity_age > inactivity_timeout {
        PowerMode::Inactive
    } else {
        PowerMode::Foreground
    }
}
