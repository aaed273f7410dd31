//! Adaptive location sensing and reverse geocoding.
//!
//! Two cooperating pieces:
//! - [`power::PowerModeController`] turns visibility, focus and activity
//!   into a power mode and a battery-adjusted GPS sampling config
//! - [`geocode::GeocodeEngine`] turns a stream of position samples into
//!   debounced, cached reverse-geocoding lookups across a provider chain

pub mod config;
pub mod error;
pub mod events;
pub mod geocode;
pub mod live_status;
pub mod power;
pub mod sensors;
pub mod types;

pub use config::PipelineConfig;
pub use error::{LocationSenseError, ProviderError, Result};
pub use events::Subscription;
pub use geocode::{GeocodeEngine, GeocodeEvent, ProviderChain, ResultSource};
pub use power::{PowerEvent, PowerMode, PowerModeController, SamplingConfig};
pub use types::{is_valid_coordinate, AddressData, GeoPosition, GpsFix};
