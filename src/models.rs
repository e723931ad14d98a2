use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use crate::errors::AppError;

// ============ Distress Categories ============

/// Category tag describing why a property is considered distressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DistressType {
    #[serde(rename = "Pre-Foreclosure", alias = "pre-foreclosure", alias = "preforeclosure")]
    PreForeclosure,
    /// Notice of Default.
    #[serde(rename = "NOD", alias = "nod")]
    NoticeOfDefault,
    #[serde(rename = "Lis Pendens", alias = "lis-pendens", alias = "lis_pendens")]
    LisPendens,
    #[serde(rename = "Foreclosure", alias = "foreclosure")]
    Foreclosure,
    #[serde(rename = "Auction", alias = "auction")]
    Auction,
    /// Bank-owned (real estate owned).
    #[serde(rename = "REO", alias = "reo")]
    Reo,
    #[serde(rename = "Tax Lien", alias = "tax-lien", alias = "tax_lien")]
    TaxLien,
    #[serde(rename = "Tax Delinquent", alias = "tax-delinquent", alias = "tax_delinquent")]
    TaxDelinquent,
    #[serde(rename = "Probate", alias = "probate")]
    Probate,
}

/// Tags that signal interest in filings made before a foreclosure sale.
pub const PRE_FORECLOSURE_FAMILY: &[DistressType] = &[
    DistressType::PreForeclosure,
    DistressType::NoticeOfDefault,
    DistressType::LisPendens,
];

/// Tags that signal interest in scheduled or completed sales.
pub const FORECLOSURE_FAMILY: &[DistressType] = &[DistressType::Foreclosure, DistressType::Auction];

pub const REO_FAMILY: &[DistressType] = &[DistressType::Reo];

impl DistressType {
    pub const ALL: [DistressType; 9] = [
        DistressType::PreForeclosure,
        DistressType::NoticeOfDefault,
        DistressType::LisPendens,
        DistressType::Foreclosure,
        DistressType::Auction,
        DistressType::Reo,
        DistressType::TaxLien,
        DistressType::TaxDelinquent,
        DistressType::Probate,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DistressType::PreForeclosure => "Pre-Foreclosure",
            DistressType::NoticeOfDefault => "NOD",
            DistressType::LisPendens => "Lis Pendens",
            DistressType::Foreclosure => "Foreclosure",
            DistressType::Auction => "Auction",
            DistressType::Reo => "REO",
            DistressType::TaxLien => "Tax Lien",
            DistressType::TaxDelinquent => "Tax Delinquent",
            DistressType::Probate => "Probate",
        }
    }
}

impl fmt::Display for DistressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DistressType {
    type Err = AppError;

    /// Lenient parse: case, spaces, dashes and underscores are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match compact.as_str() {
            "preforeclosure" => Ok(DistressType::PreForeclosure),
            "nod" | "noticeofdefault" => Ok(DistressType::NoticeOfDefault),
            "lispendens" | "lis" => Ok(DistressType::LisPendens),
            "foreclosure" => Ok(DistressType::Foreclosure),
            "auction" | "trusteesale" | "sheriffsale" => Ok(DistressType::Auction),
            "reo" | "bankowned" => Ok(DistressType::Reo),
            "taxlien" => Ok(DistressType::TaxLien),
            "taxdelinquent" | "delinquenttax" => Ok(DistressType::TaxDelinquent),
            "probate" => Ok(DistressType::Probate),
            _ => Err(AppError::BadRequest(format!("Unknown distress type: {}", s))),
        }
    }
}

/// True when the filter means "all types" or shares at least one tag with `family`.
pub fn filter_implies(filter: &[DistressType], family: &[DistressType]) -> bool {
    filter.is_empty() || filter.iter().any(|t| family.contains(t))
}

/// How much the `address` field of a record can be trusted as a street location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressConfidence {
    /// Synthetic text such as "Filing by JOHN DOE"; not a location.
    Placeholder,
    /// Reconstructed from free text (e.g. a legal description).
    Inferred,
    /// Taken from a structured address field.
    #[default]
    Verified,
}

impl AddressConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressConfidence::Placeholder => "placeholder",
            AddressConfidence::Inferred => "inferred",
            AddressConfidence::Verified => "verified",
        }
    }
}

// ============ Pipeline Records ============

/// The pipeline's canonical unit: one property as seen by one or more sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapedProperty {
    /// Source-local identifier (zpid, attomId, recording number...). May be empty.
    pub source_id: String,
    /// Agent name; comma-joined after a merge.
    pub source: String,
    pub source_url: String,

    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub county: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    pub property_type: Option<String>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<f64>,
    pub sqft: Option<u32>,
    pub lot_size: Option<f64>,
    pub year_built: Option<i32>,

    pub list_price: Option<f64>,
    pub estimated_value: Option<f64>,
    pub zestimate: Option<f64>,
    /// After-repair value.
    pub arv_estimate: Option<f64>,
    pub last_sale_price: Option<f64>,
    pub last_sale_date: Option<String>,
    pub loan_balance: Option<f64>,
    pub equity_estimate: Option<f64>,

    pub owner_name: Option<String>,
    pub owner_occupied: Option<bool>,
    pub distress_types: BTreeSet<DistressType>,

    pub address_confidence: AddressConfidence,
    pub scraped_at: DateTime<Utc>,
    /// Opaque upstream payload kept for audit.
    pub raw_data: serde_json::Value,
}

impl ScrapedProperty {
    /// "{address}, {city}, {state} {zip}" with empty parts left out.
    pub fn full_address(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for part in [&self.address, &self.city] {
            if !part.trim().is_empty() {
                parts.push(part.trim());
            }
        }
        let state_zip = format!("{} {}", self.state.trim(), self.zip.trim());
        let state_zip = state_zip.trim();
        let mut full = parts.join(", ");
        if !state_zip.is_empty() {
            if !full.is_empty() {
                full.push_str(", ");
            }
            full.push_str(state_zip);
        }
        full
    }

    /// Price used by the search price filter.
    pub fn price_basis(&self) -> f64 {
        self.list_price.or(self.estimated_value).unwrap_or(0.0)
    }

    /// Best available market value: zestimate first, then estimated value.
    pub fn market_value(&self) -> Option<f64> {
        self.zestimate.or(self.estimated_value)
    }

    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    pub fn is_placeholder(&self) -> bool {
        self.address_confidence == AddressConfidence::Placeholder
    }

    pub fn with_distress(mut self, distress: DistressType) -> Self {
        self.distress_types.insert(distress);
        self
    }
}

// ============ Agent Envelopes ============

/// A failure observed by an agent (or by the orchestrator) that did not stop the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentError {
    pub agent: String,
    pub message: String,
    pub code: Option<String>,
    pub url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AgentError {
    pub fn new(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            message: message.into(),
            code: None,
            url: None,
            timestamp: Utc::now(),
        }
    }

    pub fn from_app_error(agent: impl Into<String>, err: &AppError) -> Self {
        Self {
            code: Some(err.code().to_string()),
            ..Self::new(agent, err.to_string())
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Per-agent output envelope. Every agent returns one, even on total failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent: String,
    pub properties: Vec<ScrapedProperty>,
    pub errors: Vec<AgentError>,
    pub duration_ms: u64,
    pub request_count: u32,
}

impl AgentResult {
    /// Envelope for an agent whose task never produced a result (e.g. it panicked).
    pub fn failed(agent: impl Into<String>, message: impl Into<String>) -> Self {
        let agent = agent.into();
        Self {
            errors: vec![AgentError::new(agent.clone(), message).with_code("agent_failed")],
            agent,
            properties: Vec::new(),
            duration_ms: 0,
            request_count: 0,
        }
    }
}

/// Accumulator an agent threads through its sub-steps.
///
/// Sub-steps return `Result`; the run absorbs successes into `properties` and failures
/// into `errors`, so nothing escapes the agent boundary.
#[derive(Debug)]
pub struct AgentRun {
    agent: String,
    started: Instant,
    properties: Vec<ScrapedProperty>,
    errors: Vec<AgentError>,
    requests: u32,
}

impl AgentRun {
    pub fn start(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            started: Instant::now(),
            properties: Vec::new(),
            errors: Vec::new(),
            requests: 0,
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn count_request(&mut self) {
        self.requests += 1;
    }

    pub fn push_property(&mut self, property: ScrapedProperty) {
        self.properties.push(property);
    }

    pub fn extend(&mut self, properties: impl IntoIterator<Item = ScrapedProperty>) {
        self.properties.extend(properties);
    }

    pub fn push_error(&mut self, error: AgentError) {
        tracing::warn!(agent = %self.agent, code = ?error.code, "{}", error.message);
        self.errors.push(error);
    }

    /// Record an `AppError` as an `AgentError`, optionally with the URL involved.
    pub fn record(&mut self, err: &AppError, url: Option<&str>) {
        let mut error = AgentError::from_app_error(self.agent.clone(), err);
        if let Some(u) = url {
            error = error.with_url(u);
        }
        self.push_error(error);
    }

    /// Keep the value of a fallible sub-step, or record its error and yield `None`.
    pub fn capture<T>(&mut self, result: Result<T, AppError>, url: Option<&str>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.record(&e, url);
                None
            }
        }
    }

    /// Fold a sub-scrape's envelope into this run.
    pub fn absorb(&mut self, other: AgentResult) {
        self.requests += other.request_count;
        self.properties.extend(other.properties);
        self.errors.extend(other.errors);
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn finish(self) -> AgentResult {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        tracing::info!(
            agent = %self.agent,
            properties = self.properties.len(),
            errors = self.errors.len(),
            requests = self.requests,
            duration_ms,
            "Agent finished"
        );
        AgentResult {
            agent: self.agent,
            properties: self.properties,
            errors: self.errors,
            duration_ms,
            request_count: self.requests,
        }
    }
}

// ============ Search Criteria & Results ============

/// Caller-supplied search criteria for one orchestrator run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchCriteria {
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub distress_types: Vec<DistressType>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_equity: Option<f64>,
    /// Restrict the run to the agent with this name.
    pub source: Option<String>,
}

impl SearchCriteria {
    pub fn new(city: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            state: state.into(),
            ..Default::default()
        }
    }

    pub fn agent_query(&self) -> AgentQuery {
        AgentQuery {
            city: self.city.trim().to_string(),
            state: self.state.trim().to_uppercase(),
            distress_types: self.distress_types.clone(),
            min_price: self.min_price,
            max_price: self.max_price,
        }
    }
}

/// What an agent receives: location plus its source-specific filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentQuery {
    pub city: String,
    pub state: String,
    pub distress_types: Vec<DistressType>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

impl AgentQuery {
    pub fn new(city: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            state: state.into(),
            ..Default::default()
        }
    }

    pub fn wants(&self, family: &[DistressType]) -> bool {
        filter_implies(&self.distress_types, family)
    }
}

/// Summary of one orchestrator run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorResult {
    pub total_found: usize,
    pub total_after_dedup: usize,
    pub total_enriched: usize,
    pub total_saved: usize,
    pub agent_results: Vec<AgentResult>,
    pub errors: Vec<AgentError>,
    pub duration_ms: u64,
}

/// Row written to `scrape_runs` after each search.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub city: String,
    pub state: String,
    pub criteria: serde_json::Value,
    pub agents: Vec<String>,
    pub total_found: usize,
    pub total_after_dedup: usize,
    pub total_enriched: usize,
    pub total_saved: usize,
    pub error_count: usize,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn from_result(criteria: &SearchCriteria, result: &OrchestratorResult) -> Self {
        Self {
            city: criteria.city.clone(),
            state: criteria.state.clone(),
            criteria: serde_json::to_value(criteria).unwrap_or_default(),
            agents: result.agent_results.iter().map(|r| r.agent.clone()).collect(),
            total_found: result.total_found,
            total_after_dedup: result.total_after_dedup,
            total_enriched: result.total_enriched,
            total_saved: result.total_saved,
            error_count: result.errors.len(),
            duration_ms: result.duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distress_type_lenient_parse() {
        assert_eq!(
            "pre-foreclosure".parse::<DistressType>().unwrap(),
            DistressType::PreForeclosure
        );
        assert_eq!("Tax_Lien".parse::<DistressType>().unwrap(), DistressType::TaxLien);
        assert_eq!("bank owned".parse::<DistressType>().unwrap(), DistressType::Reo);
        assert!("condemned".parse::<DistressType>().is_err());
    }

    #[test]
    fn test_distress_type_serde_labels() {
        let json = serde_json::to_string(&DistressType::NoticeOfDefault).unwrap();
        assert_eq!(json, "\"NOD\"");
        let parsed: DistressType = serde_json::from_str("\"reo\"").unwrap();
        assert_eq!(parsed, DistressType::Reo);
    }

    #[test]
    fn test_filter_implies() {
        assert!(filter_implies(&[], PRE_FORECLOSURE_FAMILY));
        assert!(filter_implies(&[DistressType::LisPendens], PRE_FORECLOSURE_FAMILY));
        assert!(!filter_implies(&[DistressType::Reo], PRE_FORECLOSURE_FAMILY));
    }

    #[test]
    fn test_full_address_skips_empty_parts() {
        let property = ScrapedProperty {
            address: "12 Elm St".to_string(),
            city: "Mesa".to_string(),
            state: "AZ".to_string(),
            ..Default::default()
        };
        assert_eq!(property.full_address(), "12 Elm St, Mesa, AZ");
    }

    #[test]
    fn test_agent_run_capture_records_error() {
        let mut run = AgentRun::start("test");
        let value: Option<u32> = run.capture(
            Err(AppError::ParseError("bad json".to_string())),
            Some("https://example.com"),
        );
        assert!(value.is_none());
        run.count_request();

        let result = run.finish();
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code.as_deref(), Some("parse"));
        assert_eq!(result.errors[0].url.as_deref(), Some("https://example.com"));
        assert_eq!(result.request_count, 1);
    }
}
