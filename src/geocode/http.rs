use super::provider::GeocodeProvider;
use crate::config::ProvidersConfig;
use crate::error::ProviderError;
use crate::types::{AddressData, GeoPosition};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

fn build_client(user_agent: &str, timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .unwrap_or_else(|e| {
            log::warn!("[geocode] HTTP client builder failed ({}), using defaults", e);
            reqwest::Client::new()
        })
}

async fn fetch_body(request: reqwest::RequestBuilder) -> Result<String, ProviderError> {
    let response = request.send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::HttpStatus(status.as_u16()));
    }

    Ok(response.text().await?)
}

/// Point-of-interest / address match service behind the app's proxy
///
/// # Request
/// `GET {proxy}/reverse?lat={lat}&lon={lon}&lang={language}`
///
/// # Response
/// `{ "address": "Alter Platz 1", "city": "Klagenfurt" }`; either field may be
/// null or missing.
pub struct PoiMatchProvider {
    client: reqwest::Client,
    base_url: String,
    language: String,
}

#[derive(Debug, Deserialize)]
struct PoiResponse {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    city: Option<String>,
}

impl PoiMatchProvider {
    pub fn new(proxy_url: &str, config: &ProvidersConfig) -> Self {
        PoiMatchProvider {
            client: build_client(&config.user_agent, config.request_timeout()),
            base_url: proxy_url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
        }
    }

    fn build_url(&self, position: &GeoPosition) -> String {
        format!(
            "{}/reverse?lat={:.6}&lon={:.6}&lang={}",
            self.base_url,
            position.lat(),
            position.lon(),
            self.language
        )
    }
}

pub(crate) fn parse_poi_response(body: &str) -> Result<AddressData, ProviderError> {
    let parsed: PoiResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
    let data = AddressData::new(
        parsed.address.unwrap_or_default().trim(),
        parsed.city.unwrap_or_default().trim(),
    );
    if !data.is_usable() {
        return Err(ProviderError::Empty);
    }
    Ok(data)
}

#[async_trait]
impl GeocodeProvider for PoiMatchProvider {
    fn name(&self) -> &str {
        "poi"
    }

    async fn lookup(&self, position: GeoPosition) -> Result<AddressData, ProviderError> {
        let body = fetch_body(self.client.get(self.build_url(&position))).await?;
        parse_poi_response(&body)
    }
}

/// Free-text reverse geocoder speaking the Nominatim `jsonv2` format
///
/// # Rate Limiting
/// The public instance allows one request per second; the engine's
/// per-bucket minimum delay (>= 2 s) keeps well under that.
pub struct NominatimProvider {
    client: reqwest::Client,
    base_url: String,
    language: String,
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    address: Option<NominatimAddress>,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    road: Option<String>,
    pedestrian: Option<String>,
    footway: Option<String>,
    house_number: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
}

impl NominatimProvider {
    pub fn new(config: &ProvidersConfig) -> Self {
        NominatimProvider {
            client: build_client(&config.user_agent, config.request_timeout()),
            base_url: config.nominatim_url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
        }
    }

    fn build_url(&self, position: &GeoPosition) -> String {
        format!(
            "{}/reverse?format=jsonv2&lat={:.6}&lon={:.6}&zoom=18&addressdetails=1{}",
            self.base_url,
            position.lat(),
            position.lon(),
            format_args!("&accept-language={}", self.language)
        )
    }
}

pub(crate) fn parse_nominatim_response(body: &str) -> Result<AddressData, ProviderError> {
    let parsed: NominatimResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    if let Some(error) = parsed.error {
        return Err(ProviderError::Unavailable(error));
    }

    let address = parsed.address.unwrap_or_default();
    let street = address
        .road
        .or(address.pedestrian)
        .or(address.footway);

    let line = match (street, address.house_number) {
        (Some(street), Some(number)) => format!("{} {}", street, number),
        (Some(street), None) => street,
        // No street: first component of the display name
        (None, _) => parsed
            .display_name
            .as_deref()
            .and_then(|name| name.split(',').next())
            .unwrap_or_default()
            .trim()
            .to_string(),
    };
    let city = address
        .city
        .or(address.town)
        .or(address.village)
        .or(address.municipality)
        .unwrap_or_default();

    let data = AddressData::new(line, city);
    if !data.is_usable() {
        return Err(ProviderError::Empty);
    }
    Ok(data)
}

#[async_trait]
impl GeocodeProvider for NominatimProvider {
    fn name(&self) -> &str {
        "nominatim"
    }

    async fn lookup(&self, position: GeoPosition) -> Result<AddressData, ProviderError> {
        let body = fetch_body(self.client.get(self.build_url(&position))).await?;
        parse_nominatim_response(&body)
    }
}
