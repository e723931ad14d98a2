//! ATTOM foreclosure data agent.
//!
//! The API is credentialed and quota-limited, so every call first awaits the injected
//! [`RateLimiter`]. Records are mapped from typed serde structs one at a time; a
//! record that does not fit the shape is reported and skipped.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::sync::Arc;

use super::{SourceAgent, SourceKind};
use crate::config::Config;
use crate::errors::AppError;
use crate::http_client::PoliteClient;
use crate::models::{
    AddressConfidence, AgentQuery, AgentResult, AgentRun, DistressType, ScrapedProperty,
    FORECLOSURE_FAMILY, PRE_FORECLOSURE_FAMILY, REO_FAMILY,
};
use crate::normalize::empty_property;
use crate::rate_limiter::RateLimiter;

pub const AGENT_NAME: &str = "attom";

const SEARCH_PATH: &str = "/propertyapi/v1.0.0/foreclosure/snapshot";
const PAGE_SIZE: u32 = 100;
const MAX_PAGES: u32 = 2;

/// ATTOM sends coordinates and some amounts as strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    status: Option<ResponseStatus>,
    #[serde(default)]
    property: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ResponseStatus {
    #[serde(default)]
    total: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct AttomProperty {
    identifier: Identifier,
    address: Address,
    #[serde(default)]
    location: Option<Location>,
    #[serde(default)]
    summary: Option<Summary>,
    #[serde(default)]
    building: Option<Building>,
    #[serde(default)]
    lot: Option<Lot>,
    #[serde(default)]
    avm: Option<Avm>,
    #[serde(default)]
    sale: Option<Sale>,
    #[serde(default)]
    assessment: Option<Assessment>,
    #[serde(default)]
    foreclosure: Option<Foreclosure>,
}

#[derive(Debug, Deserialize)]
struct Identifier {
    #[serde(rename = "attomId")]
    attom_id: u64,
}

#[derive(Debug, Deserialize)]
struct Address {
    line1: String,
    locality: Option<String>,
    #[serde(rename = "countrySubd")]
    country_subd: Option<String>,
    postal1: Option<String>,
    #[serde(rename = "countrySecSubd")]
    county: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Location {
    #[serde(default, deserialize_with = "string_or_number")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "string_or_number")]
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Summary {
    #[serde(rename = "propType")]
    prop_type: Option<String>,
    #[serde(rename = "yearBuilt")]
    year_built: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct Building {
    rooms: Option<Rooms>,
    size: Option<Size>,
}

#[derive(Debug, Deserialize)]
struct Rooms {
    beds: Option<u32>,
    #[serde(default, deserialize_with = "string_or_number")]
    bathstotal: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Size {
    #[serde(default, deserialize_with = "string_or_number")]
    livingsize: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Lot {
    #[serde(default, deserialize_with = "string_or_number")]
    lotsize2: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Avm {
    amount: Option<AvmAmount>,
}

#[derive(Debug, Deserialize)]
struct AvmAmount {
    #[serde(default, deserialize_with = "string_or_number")]
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Sale {
    amount: Option<SaleAmount>,
}

#[derive(Debug, Deserialize)]
struct SaleAmount {
    #[serde(default, deserialize_with = "string_or_number")]
    saleamt: Option<f64>,
    salerecdate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Assessment {
    owner: Option<Owner>,
    mortgage: Option<Mortgage>,
}

#[derive(Debug, Deserialize)]
struct Owner {
    owner1: Option<OwnerName>,
    /// "O" owner occupied, "A" absentee.
    absenteeownerstatus: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwnerName {
    fullname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Mortgage {
    #[serde(default, deserialize_with = "string_or_number")]
    amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Foreclosure {
    #[serde(rename = "recordingType")]
    recording_type: Option<String>,
    #[serde(default, rename = "loanBalance", deserialize_with = "string_or_number")]
    loan_balance: Option<f64>,
    #[serde(rename = "auctionDate")]
    auction_date: Option<String>,
}

/// Map an ATTOM foreclosure recording type to a distress tag.
pub fn distress_for_recording_type(code: &str) -> DistressType {
    match code.trim().to_uppercase().as_str() {
        "NOD" => DistressType::NoticeOfDefault,
        "LIS" | "LP" => DistressType::LisPendens,
        "NTS" | "NOS" | "NFS" => DistressType::Foreclosure,
        "AUC" => DistressType::Auction,
        "REO" | "DEED" => DistressType::Reo,
        _ => DistressType::PreForeclosure,
    }
}

/// `recordingType` filter for the requested families; `None` means no restriction.
pub fn recording_type_filter(query: &AgentQuery) -> Option<String> {
    if query.distress_types.is_empty() {
        return None;
    }
    let mut codes: Vec<&str> = Vec::new();
    let wants = |family: &[DistressType]| query.distress_types.iter().any(|t| family.contains(t));
    if wants(PRE_FORECLOSURE_FAMILY) {
        codes.extend(["NOD", "LIS"]);
    }
    if wants(FORECLOSURE_FAMILY) {
        codes.extend(["NTS", "AUC"]);
    }
    if wants(REO_FAMILY) {
        codes.push("REO");
    }
    if codes.is_empty() {
        return None;
    }
    Some(codes.join(","))
}

fn to_property(record: AttomProperty, query: &AgentQuery, raw: Value) -> ScrapedProperty {
    let mut property = empty_property(AGENT_NAME, &query.city, &query.state);
    property.source_id = record.identifier.attom_id.to_string();
    property.address = record.address.line1;
    if let Some(city) = record.address.locality {
        property.city = city;
    }
    if let Some(state) = record.address.country_subd {
        property.state = state.to_uppercase();
    }
    property.zip = record.address.postal1.unwrap_or_default();
    property.county = record.address.county.unwrap_or_default();
    property.address_confidence = AddressConfidence::Verified;

    if let Some(location) = record.location {
        property.latitude = location.latitude;
        property.longitude = location.longitude;
    }
    if let Some(summary) = record.summary {
        property.property_type = summary.prop_type;
        property.year_built = summary.year_built;
    }
    if let Some(building) = record.building {
        if let Some(rooms) = building.rooms {
            property.bedrooms = rooms.beds;
            property.bathrooms = rooms.bathstotal;
        }
        property.sqft = building
            .size
            .and_then(|s| s.livingsize)
            .map(|v| v.round() as u32);
    }
    property.lot_size = record.lot.and_then(|l| l.lotsize2);
    property.estimated_value = record.avm.and_then(|a| a.amount).and_then(|a| a.value);
    if let Some(amount) = record.sale.and_then(|s| s.amount) {
        property.last_sale_price = amount.saleamt;
        property.last_sale_date = amount.salerecdate;
    }

    let mut mortgage_amount = None;
    if let Some(assessment) = record.assessment {
        if let Some(owner) = assessment.owner {
            property.owner_name = owner.owner1.and_then(|o| o.fullname);
            property.owner_occupied = owner
                .absenteeownerstatus
                .map(|s| s.trim().eq_ignore_ascii_case("O"));
        }
        mortgage_amount = assessment.mortgage.and_then(|m| m.amount);
    }

    match record.foreclosure {
        Some(foreclosure) => {
            property.loan_balance = foreclosure.loan_balance.or(mortgage_amount);
            let tag = foreclosure
                .recording_type
                .as_deref()
                .map(distress_for_recording_type)
                .unwrap_or(DistressType::PreForeclosure);
            property.distress_types.insert(tag);
            if foreclosure.auction_date.is_some() {
                property.distress_types.insert(DistressType::Auction);
            }
        }
        None => {
            property.loan_balance = mortgage_amount;
            property.distress_types.insert(DistressType::PreForeclosure);
        }
    }

    property.raw_data = json!({ "attom": raw });
    property
}

pub struct AttomAgent {
    http: PoliteClient,
    api_key: Option<String>,
    base_url: String,
    limiter: Arc<dyn RateLimiter>,
}

impl AttomAgent {
    pub fn new(config: &Config, limiter: Arc<dyn RateLimiter>) -> Result<Self, AppError> {
        Ok(Self {
            http: PoliteClient::from_config(config)?,
            api_key: config.attom_api_key.clone(),
            base_url: config.attom_base_url.clone(),
            limiter,
        })
    }

    async fn fetch_page(
        &self,
        run: &mut AgentRun,
        query: &AgentQuery,
        api_key: &str,
        page: u32,
    ) -> Result<SearchResponse, AppError> {
        let url = format!("{}{}", self.base_url, SEARCH_PATH);
        let mut params: Vec<(&str, String)> = vec![
            ("cityName", query.city.clone()),
            ("state", query.state.clone()),
            ("page", page.to_string()),
            ("pagesize", PAGE_SIZE.to_string()),
        ];
        if let Some(filter) = recording_type_filter(query) {
            params.push(("recordingType", filter));
        }
        if let Some(min) = query.min_price {
            params.push(("minAVMValue", format!("{:.0}", min)));
        }
        if let Some(max) = query.max_price {
            params.push(("maxAVMValue", format!("{:.0}", max)));
        }

        self.limiter.acquire().await;
        tracing::debug!("ATTOM request page {} for {}, {} (key redacted)", page, query.city, query.state);

        let request = self
            .http
            .get(&url)
            .query(&params)
            .header("apikey", api_key);
        self.http.get_json(run, request).await
    }
}

#[async_trait]
impl SourceAgent for AttomAgent {
    fn name(&self) -> &str {
        AGENT_NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::RateLimitedApi
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn search(&self, query: &AgentQuery) -> AgentResult {
        let mut run = AgentRun::start(AGENT_NAME);

        let Some(api_key) = self.api_key.as_deref() else {
            run.record(
                &AppError::NotConfigured("ATTOM_API_KEY is not set".to_string()),
                None,
            );
            return run.finish();
        };

        let url = format!("{}{}", self.base_url, SEARCH_PATH);
        for page in 1..=MAX_PAGES {
            let fetched = self.fetch_page(&mut run, query, api_key, page).await;
            let Some(response) = run.capture(fetched, Some(&url)) else {
                break;
            };

            let returned = response.property.len() as u32;
            for raw in response.property {
                match serde_json::from_value::<AttomProperty>(raw.clone()) {
                    Ok(record) => run.push_property(to_property(record, query, raw)),
                    Err(e) => run.record(
                        &AppError::ParseError(format!("Malformed ATTOM record: {}", e)),
                        Some(&url),
                    ),
                }
            }

            let total = response.status.and_then(|s| s.total).unwrap_or(returned);
            if returned < PAGE_SIZE || page * PAGE_SIZE >= total {
                break;
            }
        }

        run.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_type_mapping() {
        assert_eq!(distress_for_recording_type("nod"), DistressType::NoticeOfDefault);
        assert_eq!(distress_for_recording_type("LIS"), DistressType::LisPendens);
        assert_eq!(distress_for_recording_type("REO"), DistressType::Reo);
        assert_eq!(distress_for_recording_type("???"), DistressType::PreForeclosure);
    }

    #[test]
    fn test_recording_type_filter() {
        let mut query = AgentQuery::new("Phoenix", "AZ");
        assert_eq!(recording_type_filter(&query), None);

        query.distress_types = vec![DistressType::LisPendens];
        assert_eq!(recording_type_filter(&query).as_deref(), Some("NOD,LIS"));

        query.distress_types = vec![DistressType::TaxLien];
        assert_eq!(recording_type_filter(&query), None);
    }

    #[test]
    fn test_maps_typed_record() {
        let raw = json!({
            "identifier": { "attomId": 184_713_191u64 },
            "address": { "line1": "4529 W Winona St", "locality": "Phoenix", "countrySubd": "AZ", "postal1": "85031" },
            "location": { "latitude": "33.50", "longitude": "-112.15" },
            "building": { "rooms": { "beds": 3, "bathstotal": 2 }, "size": { "livingsize": 1320 } },
            "avm": { "amount": { "value": 280000 } },
            "assessment": { "owner": { "owner1": { "fullname": "JANE DOE" }, "absenteeownerstatus": "A" },
                            "mortgage": { "amount": 190000 } },
            "foreclosure": { "recordingType": "NOD" }
        });
        let record: AttomProperty = serde_json::from_value(raw.clone()).unwrap();
        let property = to_property(record, &AgentQuery::new("Phoenix", "AZ"), raw);

        assert_eq!(property.source, "attom");
        assert_eq!(property.source_id, "184713191");
        assert_eq!(property.latitude, Some(33.50));
        assert_eq!(property.estimated_value, Some(280_000.0));
        assert_eq!(property.loan_balance, Some(190_000.0));
        assert_eq!(property.owner_occupied, Some(false));
        assert!(property.distress_types.contains(&DistressType::NoticeOfDefault));
    }

    #[test]
    fn test_record_without_address_is_rejected() {
        let raw = json!({ "identifier": { "attomId": 1 } });
        assert!(serde_json::from_value::<AttomProperty>(raw).is_err());
    }
}
