//! Post-dedup enrichment.
//!
//! Each record goes through valuation, ARV, equity and geocoding in that order. Every
//! step only fills fields that are still empty, and a failing step is logged without
//! touching the record. Records with a placeholder address skip the steps that need a
//! real location.

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::ScrapedProperty;
use crate::normalize::dedup_key;
use crate::services::{Geocoder, NominatimGeocoder, ValuationProvider, ZillowValuationService};

const ARV_FROM_VALUE: f64 = 1.10;
const ARV_FROM_LIST_PRICE: f64 = 1.30;
const VALUATION_CACHE_TTL: Duration = Duration::from_secs(3600);
const VALUATION_CACHE_CAPACITY: u64 = 10_000;
const DEFAULT_RECORD_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
pub trait Enricher: Send + Sync {
    /// Enrich a batch. Output has the same length and order as the input.
    async fn enrich_batch(
        &self,
        properties: &[ScrapedProperty],
    ) -> Result<Vec<ScrapedProperty>, AppError>;
}

/// After-repair value: zestimate or estimated value plus 10%, else list price plus 30%.
pub fn estimate_arv(property: &ScrapedProperty) -> Option<f64> {
    if let Some(value) = property.market_value() {
        return Some((value * ARV_FROM_VALUE).round());
    }
    property
        .list_price
        .map(|price| (price * ARV_FROM_LIST_PRICE).round())
}

/// `value - loan_balance`, rounded. Negative equity is kept as is.
pub fn compute_equity(property: &ScrapedProperty) -> Option<f64> {
    let value = property.market_value()?;
    let loan = property.loan_balance?;
    Some((value - loan).round())
}

pub struct EnrichmentChain {
    valuation: Arc<dyn ValuationProvider>,
    geocoder: Arc<dyn Geocoder>,
    valuation_cache: Cache<String, Option<f64>>,
    delay: Duration,
    record_timeout: Duration,
}

impl EnrichmentChain {
    pub fn new(
        valuation: Arc<dyn ValuationProvider>,
        geocoder: Arc<dyn Geocoder>,
        delay: Duration,
    ) -> Self {
        Self {
            valuation,
            geocoder,
            valuation_cache: Cache::builder()
                .max_capacity(VALUATION_CACHE_CAPACITY)
                .time_to_live(VALUATION_CACHE_TTL)
                .build(),
            delay,
            record_timeout: DEFAULT_RECORD_TIMEOUT,
        }
    }

    /// Zillow valuation plus Nominatim geocoding, as configured.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Ok(Self::new(
            Arc::new(ZillowValuationService::new(config)?),
            Arc::new(NominatimGeocoder::new(config)?),
            Duration::from_millis(config.enrichment_delay_ms),
        ))
    }

    pub fn with_record_timeout(mut self, record_timeout: Duration) -> Self {
        self.record_timeout = record_timeout;
        self
    }

    async fn cached_valuation(&self, property: &ScrapedProperty) -> Option<f64> {
        let full_address = property.full_address();
        let key = dedup_key(property).unwrap_or_else(|| full_address.to_uppercase());

        if let Some(cached) = self.valuation_cache.get(&key).await {
            tracing::debug!("Valuation cache hit for {}", key);
            return cached;
        }

        match self.valuation.lookup(&full_address).await {
            Ok(value) => {
                self.valuation_cache.insert(key, value).await;
                value
            }
            Err(e) => {
                tracing::warn!("Valuation lookup failed for '{}': {}", full_address, e);
                None
            }
        }
    }

    /// Run every step on one record.
    pub async fn enrich_one(&self, mut property: ScrapedProperty) -> ScrapedProperty {
        let locatable = !property.is_placeholder();

        if locatable && property.zestimate.is_none() {
            if let Some(value) = self.cached_valuation(&property).await {
                property.zestimate = Some(value);
                if property.estimated_value.is_none() {
                    property.estimated_value = Some(value);
                }
            }
        }

        if property.arv_estimate.is_none() {
            property.arv_estimate = estimate_arv(&property);
        }

        if property.equity_estimate.is_none() {
            property.equity_estimate = compute_equity(&property);
        }

        if locatable && !property.has_coordinates() {
            let full_address = property.full_address();
            match self.geocoder.geocode(&full_address).await {
                Ok(Some(coords)) => {
                    property.latitude = Some(coords.latitude);
                    property.longitude = Some(coords.longitude);
                }
                Ok(None) => tracing::debug!("No geocoding match for '{}'", full_address),
                Err(e) => tracing::warn!("Geocoding failed for '{}': {}", full_address, e),
            }
        }

        property
    }
}

#[async_trait]
impl Enricher for EnrichmentChain {
    async fn enrich_batch(
        &self,
        properties: &[ScrapedProperty],
    ) -> Result<Vec<ScrapedProperty>, AppError> {
        tracing::info!("Enriching {} properties", properties.len());
        let mut enriched = Vec::with_capacity(properties.len());

        for (index, property) in properties.iter().enumerate() {
            if index > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            match tokio::time::timeout(self.record_timeout, self.enrich_one(property.clone())).await
            {
                Ok(result) => enriched.push(result),
                Err(_) => {
                    tracing::warn!(
                        "Enrichment timed out after {}s for '{}', keeping original",
                        self.record_timeout.as_secs(),
                        property.full_address()
                    );
                    enriched.push(property.clone());
                }
            }
        }

        Ok(enriched)
    }
}
