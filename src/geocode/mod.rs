pub mod cache;
pub mod engine;
pub mod http;
pub mod provider;
pub mod speed;

pub use cache::{cache_key, GeocodeCache, InsertOutcome};
pub use engine::{EngineStats, GeocodeEngine, GeocodeEvent, ResultSource};
pub use http::{NominatimProvider, PoiMatchProvider};
pub use provider::{ChainOutcome, CoordinateFallback, GeocodeProvider, ProviderChain};
pub use speed::{SpeedBucket, SpeedThreshold, SpeedThresholds};
