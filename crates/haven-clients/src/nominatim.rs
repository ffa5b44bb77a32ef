//! Nominatim forward-geocoding adapter.
//!
//! The only GET upstream in the relay. Results are cached for 24 hours by
//! the caller (the query rewriter), so request volume stays well inside
//! Nominatim's usage policy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::GeocodeApi;
use crate::error::{ClientError, Result};
use crate::stats::ServiceStats;
use haven_core::config::NominatimConfig;
use haven_core::types::{GeoLocation, GeoScope};

pub struct NominatimClient {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
    timeout_ms: u64,
    stats: Arc<ServiceStats>,
}

impl NominatimClient {
    pub fn new(cfg: &NominatimConfig, stats: Arc<ServiceStats>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: cfg.base_url.clone(),
            user_agent: cfg.user_agent.clone(),
            timeout_ms: cfg.timeout_ms,
            stats,
        }
    }
}

#[async_trait]
impl GeocodeApi for NominatimClient {
    async fn resolve(&self, text: &str) -> Result<Option<GeoLocation>> {
        let req_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let url = format!(
            "{}/search?q={}&format=json&addressdetails=1&limit=1",
            self.base_url,
            urlencoding::encode(text)
        );

        debug!(req_id, query_chars = text.len(), "geocode request");
        let started = Instant::now();

        let resp = self
            .client
            .get(&url)
            .header("user-agent", &self.user_agent)
            .timeout(Duration::from_millis(self.timeout_ms))
            .send()
            .await
            .map_err(|e| {
                self.stats.record("nominatim", started, false);
                ClientError::from_reqwest("nominatim", self.timeout_ms, e)
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(req_id, status, "geocode failed");
            self.stats.record("nominatim", started, false);
            return Err(ClientError::from_status("nominatim", status, None, text));
        }

        let places: Vec<Place> = resp.json().await.map_err(|e| {
            self.stats.record("nominatim", started, false);
            ClientError::Parse {
                service: "nominatim",
                message: e.without_url().to_string(),
            }
        })?;
        self.stats.record("nominatim", started, true);

        let Some(place) = places.into_iter().next() else {
            debug!(req_id, "geocode: no match");
            return Ok(None);
        };

        let location = normalize_place(&place);
        debug!(req_id, location = %location.location, is_us = location.is_us, "geocode ok");
        Ok(Some(location))
    }
}

/// Collapse a Nominatim place into the relay's location shape. The display
/// string prefers "City, State" and degrades to whatever is present.
fn normalize_place(place: &Place) -> GeoLocation {
    let addr = &place.address;
    let city = addr
        .city
        .as_deref()
        .or(addr.town.as_deref())
        .or(addr.village.as_deref());

    let (location, scope) = match (city, addr.county.as_deref(), addr.state.as_deref()) {
        (Some(city), _, Some(state)) => (format!("{city}, {state}"), GeoScope::City),
        (Some(city), _, None) => (city.to_string(), GeoScope::City),
        (None, Some(county), Some(state)) => (format!("{county}, {state}"), GeoScope::County),
        (None, None, Some(state)) => (state.to_string(), GeoScope::State),
        _ => (
            addr.country
                .clone()
                .unwrap_or_else(|| place.display_name.clone()),
            GeoScope::Country,
        ),
    };

    GeoLocation {
        location,
        is_us: addr
            .country_code
            .as_deref()
            .map(|c| c.eq_ignore_ascii_case("us"))
            .unwrap_or(false),
        scope,
    }
}

#[derive(Deserialize)]
struct Place {
    display_name: String,
    #[serde(default)]
    address: PlaceAddress,
}

#[derive(Deserialize, Default)]
struct PlaceAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    county: Option<String>,
    state: Option<String>,
    country: Option<String>,
    country_code: Option<String>,
}
