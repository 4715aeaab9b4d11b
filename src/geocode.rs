//! Reverse geocoding via Geoapify
//!
//! Turns the coordinates picked on the report map into a readable address.

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::GeocodingConfig;

pub const UNKNOWN_LOCATION: &str = "Unknown location";

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Properties,
}

#[derive(Debug, Default, Deserialize)]
struct Properties {
    formatted: Option<String>,
}

pub struct GeocodingClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GeocodingClient {
    /// Returns `None` when no API key is configured
    pub fn from_config(config: &GeocodingConfig) -> Option<Self> {
        if config.api_key.is_empty() {
            return None;
        }
        Some(Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Address for a coordinate pair, `None` when nothing was found
    pub async fn reverse(&self, lat: f64, lon: f64) -> Result<Option<String>> {
        debug!("Reverse geocoding {}, {}", lat, lon);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("apiKey", self.api_key.clone()),
            ])
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            warn!("Geoapify returned {}", status);
            anyhow::bail!("Geocoding request failed: {}", status);
        }

        let body = response.text().await?;
        parse_reverse(&body)
    }
}

/// Pull the first formatted address out of a Geoapify response body
pub fn parse_reverse(body: &str) -> Result<Option<String>> {
    let response: ReverseResponse = serde_json::from_str(body)?;
    Ok(response.features.into_iter().next().map(|f| {
        f.properties
            .formatted
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string())
    }))
}
