use crate::circuit_breaker::{create_geocoder_circuit_breaker, GeocoderCircuitBreaker};
use crate::config::Config;
use crate::errors::AppError;
use async_trait::async_trait;
use failsafe::CircuitBreaker;
use reqwest::header::USER_AGENT;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Nominatim usage policy: at most one request per second.
pub const NOMINATIM_MIN_INTERVAL: Duration = Duration::from_millis(1100);
const GEOCODER_TIMEOUT: Duration = Duration::from_secs(10);
const VALUATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Automated market value for a full one-line address.
#[async_trait]
pub trait ValuationProvider: Send + Sync {
    async fn lookup(&self, full_address: &str) -> Result<Option<f64>, AppError>;
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, full_address: &str) -> Result<Option<Coordinates>, AppError>;
}

// ============ Zillow zestimate ============

pub struct ZillowValuationService {
    client: Client,
    base_url: String,
    api_host: String,
    api_key: Option<String>,
}

impl ZillowValuationService {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(VALUATION_TIMEOUT)
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.zillow_api_base_url.clone(),
            api_host: config.zillow_api_host.clone(),
            api_key: config.zillow_api_key.clone(),
        })
    }
}

#[async_trait]
impl ValuationProvider for ZillowValuationService {
    async fn lookup(&self, full_address: &str) -> Result<Option<f64>, AppError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(AppError::NotConfigured(
                "ZILLOW_API_KEY is required for valuation lookups".to_string(),
            ));
        };

        let url = reqwest::Url::parse_with_params(
            &format!("{}/property", self.base_url),
            &[("address", full_address)],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        // Redact key from logs
        tracing::debug!("Zillow valuation lookup for '{}' (key redacted)", full_address);

        let response = self
            .client
            .get(url)
            .header("X-RapidAPI-Key", api_key)
            .header("X-RapidAPI-Host", &self.api_host)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Valuation request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::debug!("Valuation API returned {}: {}", status, error_text);
            return Err(AppError::ExternalApiError(format!(
                "Valuation API returned status {}",
                status
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            AppError::ParseError(format!("Failed to parse valuation response: {}", e))
        })?;

        Ok(body
            .get("zestimate")
            .and_then(|v| v.as_f64())
            .filter(|v| *v > 0.0))
    }
}

// ============ Nominatim ============

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

/// Nominatim search client.
///
/// Calls are serialized and spaced at least `min_interval` apart. After repeated
/// failures the circuit breaker opens and lookups return `None` without a request.
pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
    user_agent: String,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
    breaker: GeocoderCircuitBreaker,
}

impl NominatimGeocoder {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(GEOCODER_TIMEOUT)
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.nominatim_base_url.clone(),
            user_agent: config.geocoder_user_agent.clone(),
            min_interval: NOMINATIM_MIN_INTERVAL,
            last_call: Mutex::new(None),
            breaker: create_geocoder_circuit_breaker(),
        })
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    async fn request(&self, full_address: &str) -> Result<Option<Coordinates>, AppError> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", full_address),
                ("format", "json"),
                ("limit", "1"),
                ("countrycodes", "us"),
            ])
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Geocoder request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Geocoder returned status {}",
                response.status()
            )));
        }

        let places: Vec<NominatimPlace> = response.json().await.map_err(|e| {
            AppError::ParseError(format!("Failed to parse geocoder response: {}", e))
        })?;

        Ok(places.first().and_then(|place| {
            let latitude = place.lat.trim().parse().ok()?;
            let longitude = place.lon.trim().parse().ok()?;
            Some(Coordinates {
                latitude,
                longitude,
            })
        }))
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, full_address: &str) -> Result<Option<Coordinates>, AppError> {
        if !self.breaker.is_call_permitted() {
            tracing::debug!("Geocoder circuit open, skipping '{}'", full_address);
            return Ok(None);
        }

        // Held for the whole call so concurrent callers queue behind the spacing.
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }

        let outcome = self.request(full_address).await;
        *last_call = Some(Instant::now());
        drop(last_call);

        let succeeded = outcome.is_ok();
        let _ = self
            .breaker
            .call(|| if succeeded { Ok(()) } else { Err(()) });

        outcome
    }
}
