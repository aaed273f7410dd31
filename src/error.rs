use thiserror::Error;

/// Errors raised by a single reverse-geocoding provider.
///
/// These never escape the provider chain; they are logged and the next
/// provider is tried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    HttpStatus(u16),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No usable address in response")]
    Empty,

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if let Some(status) = e.status() {
            ProviderError::HttpStatus(status.as_u16())
        } else if e.is_decode() {
            ProviderError::Parse(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

/// Battery subsystem errors. Always degraded to the base sampling config.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatteryError {
    #[error("Battery read failed: {0}")]
    Io(String),

    #[error("Battery value unparseable: {0}")]
    Parse(String),
}

/// Top-level error type for the location sensing pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocationSenseError {
    #[error("Invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("All geocoding providers failed: {0}")]
    Exhausted(String),

    #[error("Invalid track: {0}")]
    Track(String),
}

impl From<std::io::Error> for LocationSenseError {
    fn from(e: std::io::Error) -> Self {
        LocationSenseError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LocationSenseError>;
