pub mod battery;
pub mod controller;
pub mod mode;

pub use battery::{
    adjust_for_battery, BatterySource, BatteryStatus, FixedBattery, NoBattery, SysfsBattery,
};
pub use controller::{PowerEvent, PowerModeController};
pub use mode::{resolve_mode, ModeInputs, PowerMode, SamplingConfig};
