//! Zillow search agent.
//!
//! With a RapidAPI key the keyed JSON search API is used. Without one the agent
//! falls back to the public search page: first the embedded `__NEXT_DATA__` JSON,
//! then the legacy `data-zrr-shared-data-key` blob, and finally DOM property cards.

use async_trait::async_trait;
use scraper::Html;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{SourceAgent, SourceKind};
use crate::config::Config;
use crate::errors::AppError;
use crate::extraction::{
    attr_within, element_text, has_match, inline_scripts, run_strategies, select_first_matching,
    selector, text_within, ExtractionStrategy,
};
use crate::http_client::PoliteClient;
use crate::models::{
    AgentQuery, AgentResult, AgentRun, DistressType, ScrapedProperty, PRE_FORECLOSURE_FAMILY,
    REO_FAMILY,
};
use crate::normalize::{
    absolute_url, empty_property, parse_price, parse_u32, slugify, split_full_address,
};

pub const AGENT_NAME: &str = "zillow";

const MAX_API_PAGES: u32 = 3;
const BOUNDS_HALF_SPAN_DEG: f64 = 0.25;
const SQFT_PER_ACRE: f64 = 43_560.0;

/// Metro centers used to build a search bounding box for the HTML path.
const METRO_CENTERS: &[(&str, &str, f64, f64)] = &[
    ("PHOENIX", "AZ", 33.4484, -112.0740),
    ("MESA", "AZ", 33.4152, -111.8315),
    ("TUCSON", "AZ", 32.2226, -110.9747),
    ("LAS VEGAS", "NV", 36.1699, -115.1398),
    ("HOUSTON", "TX", 29.7604, -95.3698),
    ("DALLAS", "TX", 32.7767, -96.7970),
    ("ATLANTA", "GA", 33.7490, -84.3880),
    ("MIAMI", "FL", 25.7617, -80.1918),
    ("CHICAGO", "IL", 41.8781, -87.6298),
    ("DETROIT", "MI", 42.3314, -83.0458),
    ("LOS ANGELES", "CA", 34.0522, -118.2437),
];

/// (query flag, families that request it) for the keyed API.
const API_FILTERS: &[(&str, &[DistressType])] = &[
    ("isPreForeclosure", PRE_FORECLOSURE_FAMILY),
    ("isForeclosure", &[DistressType::Foreclosure]),
    ("isAuction", &[DistressType::Auction]),
    ("isBankOwned", REO_FAMILY),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapBounds {
    pub west: f64,
    pub east: f64,
    pub south: f64,
    pub north: f64,
}

/// Bounding box around a known metro, or `None` when the city is not in the table.
pub fn map_bounds(city: &str, state: &str) -> Option<MapBounds> {
    let city = city.trim().to_uppercase();
    let state = state.trim().to_uppercase();
    METRO_CENTERS
        .iter()
        .find(|(c, s, _, _)| *c == city && *s == state)
        .map(|(_, _, lat, lng)| MapBounds {
            west: lng - BOUNDS_HALF_SPAN_DEG,
            east: lng + BOUNDS_HALF_SPAN_DEG,
            south: lat - BOUNDS_HALF_SPAN_DEG,
            north: lat + BOUNDS_HALF_SPAN_DEG,
        })
}

/// `filterState` clause restricting the search page to the requested categories.
pub fn filter_state(query: &AgentQuery) -> Value {
    let pre = query.wants(PRE_FORECLOSURE_FAMILY);
    let foreclosure = query.wants(&[DistressType::Foreclosure]);
    let auction = query.wants(&[DistressType::Auction]);
    let reo = query.wants(REO_FAMILY);

    let mut state = json!({
        "isPreMarketForeclosure": { "value": pre },
        "isForeclosure": { "value": foreclosure },
        "isAuction": { "value": auction },
        "isBankOwned": { "value": reo },
        "isForSaleByAgent": { "value": false },
        "isForSaleByOwner": { "value": false },
        "isNewConstruction": { "value": false },
        "isComingSoon": { "value": false },
    });

    let mut price = serde_json::Map::new();
    if let Some(min) = query.min_price {
        price.insert("min".to_string(), json!(min));
    }
    if let Some(max) = query.max_price {
        price.insert("max".to_string(), json!(max));
    }
    if !price.is_empty() {
        state["price"] = Value::Object(price);
    }
    state
}

pub fn search_query_state(query: &AgentQuery) -> Value {
    let mut state = json!({
        "pagination": {},
        "usersSearchTerm": format!("{}, {}", query.city, query.state),
        "isMapVisible": true,
        "isListVisible": true,
        "filterState": filter_state(query),
    });
    if let Some(bounds) = map_bounds(&query.city, &query.state) {
        state["mapBounds"] = json!({
            "west": bounds.west,
            "east": bounds.east,
            "south": bounds.south,
            "north": bounds.north,
        });
    }
    state
}

pub fn distress_from_status(text: &str) -> Option<DistressType> {
    let lower = text.to_lowercase();
    if lower.contains("pre-foreclosure") || lower.contains("preforeclosure") {
        Some(DistressType::PreForeclosure)
    } else if lower.contains("auction") {
        Some(DistressType::Auction)
    } else if lower.contains("bank owned")
        || lower.split(|c: char| !c.is_alphanumeric()).any(|w| w == "reo")
    {
        Some(DistressType::Reo)
    } else if lower.contains("foreclos") {
        Some(DistressType::Foreclosure)
    } else {
        None
    }
}

// ============ Keyed API ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSearchResponse {
    #[serde(default)]
    props: Vec<Value>,
    total_pages: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ListingSubType {
    #[serde(default, rename = "is_foreclosure")]
    is_foreclosure: bool,
    #[serde(default, rename = "is_bankOwned")]
    is_bank_owned: bool,
    #[serde(default, rename = "is_forAuction")]
    is_for_auction: bool,
    #[serde(default, rename = "is_preForeclosure")]
    is_pre_foreclosure: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiListing {
    zpid: Value,
    address: String,
    price: Option<f64>,
    zestimate: Option<f64>,
    bedrooms: Option<u32>,
    bathrooms: Option<f64>,
    living_area: Option<f64>,
    lot_area_value: Option<f64>,
    lot_area_unit: Option<String>,
    property_type: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    detail_url: Option<String>,
    #[serde(default)]
    listing_sub_type: ListingSubType,
}

/// Tag for untagged listings returned by one flag pass: the first requested type in
/// the pass's family, or the family's head when the filter is empty.
fn pass_tag(query: &AgentQuery, family: &[DistressType]) -> DistressType {
    query
        .distress_types
        .iter()
        .copied()
        .find(|t| family.contains(t))
        .or_else(|| family.first().copied())
        .unwrap_or(DistressType::Foreclosure)
}

fn zpid_string(zpid: &Value) -> String {
    match zpid {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

pub struct ZillowAgent {
    http: PoliteClient,
    api_key: Option<String>,
    api_host: String,
    api_base_url: String,
    web_base_url: String,
}

impl ZillowAgent {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        Ok(Self {
            http: PoliteClient::from_config(config)?,
            api_key: config.zillow_api_key.clone(),
            api_host: config.zillow_api_host.clone(),
            api_base_url: config.zillow_api_base_url.clone(),
            web_base_url: config.zillow_web_base_url.clone(),
        })
    }

    fn api_listing_to_property(&self, listing: ApiListing, query: &AgentQuery) -> ScrapedProperty {
        let parts = split_full_address(&listing.address);
        let mut property = empty_property(AGENT_NAME, &query.city, &query.state);

        property.source_id = zpid_string(&listing.zpid);
        property.source_url = listing
            .detail_url
            .as_deref()
            .map(|u| absolute_url(&self.web_base_url, u))
            .unwrap_or_default();
        property.address = parts.street;
        if let Some(city) = parts.city {
            property.city = city;
        }
        if let Some(state) = parts.state {
            property.state = state;
        }
        property.zip = parts.zip.unwrap_or_default();
        property.latitude = listing.latitude;
        property.longitude = listing.longitude;
        property.property_type = listing.property_type;
        property.bedrooms = listing.bedrooms;
        property.bathrooms = listing.bathrooms;
        property.sqft = listing.living_area.map(|a| a.round() as u32);
        property.lot_size = listing.lot_area_value.map(|v| {
            match listing.lot_area_unit.as_deref() {
                Some(unit) if unit.eq_ignore_ascii_case("acres") => v * SQFT_PER_ACRE,
                _ => v,
            }
        });
        property.list_price = listing.price;
        property.zestimate = listing.zestimate;

        let sub = &listing.listing_sub_type;
        if sub.is_pre_foreclosure {
            property.distress_types.insert(DistressType::PreForeclosure);
        }
        if sub.is_foreclosure {
            property.distress_types.insert(DistressType::Foreclosure);
        }
        if sub.is_for_auction {
            property.distress_types.insert(DistressType::Auction);
        }
        if sub.is_bank_owned {
            property.distress_types.insert(DistressType::Reo);
        }
        property
    }

    async fn search_api(&self, run: &mut AgentRun, query: &AgentQuery, api_key: &str) {
        let passes: Vec<(&str, DistressType)> = API_FILTERS
            .iter()
            .filter(|(_, family)| query.wants(family))
            .map(|(flag, family)| (*flag, pass_tag(query, family)))
            .collect();

        let url = format!("{}/propertyExtendedSearch", self.api_base_url);
        let location = format!("{}, {}", query.city, query.state);

        for (flag, tag) in passes {
            let mut page = 1;
            loop {
                let mut params: Vec<(&str, String)> = vec![
                    ("location", location.clone()),
                    ("status_type", "ForSale".to_string()),
                    ("page", page.to_string()),
                    (flag, "true".to_string()),
                ];
                if let Some(min) = query.min_price {
                    params.push(("minPrice", format!("{:.0}", min)));
                }
                if let Some(max) = query.max_price {
                    params.push(("maxPrice", format!("{:.0}", max)));
                }

                tracing::debug!(
                    "Zillow API search: location={}, flag={}, page={} (key redacted)",
                    location,
                    flag,
                    page
                );

                let request = self
                    .http
                    .get(&url)
                    .query(&params)
                    .header("X-RapidAPI-Key", api_key)
                    .header("X-RapidAPI-Host", &self.api_host);

                let fetched = self.http.get_json::<ApiSearchResponse>(run, request).await;
                let Some(response) = run.capture(fetched, Some(&url)) else {
                    break;
                };

                for item in response.props {
                    match serde_json::from_value::<ApiListing>(item) {
                        Ok(listing) => {
                            let mut property = self.api_listing_to_property(listing, query);
                            if property.distress_types.is_empty() {
                                property.distress_types.insert(tag);
                            }
                            run.push_property(property);
                        }
                        Err(e) => run.record(
                            &AppError::ParseError(format!("Malformed Zillow listing: {}", e)),
                            Some(&url),
                        ),
                    }
                }

                let total_pages = response.total_pages.unwrap_or(1);
                if page >= total_pages || page >= MAX_API_PAGES {
                    break;
                }
                page += 1;
            }
        }
    }

    async fn search_html(&self, run: &mut AgentRun, query: &AgentQuery) {
        let url = format!(
            "{}/{}-{}/foreclosures/",
            self.web_base_url,
            slugify(&query.city),
            query.state.to_lowercase()
        );
        let state = search_query_state(query).to_string();
        let request = self
            .http
            .get(&url)
            .query(&[("searchQueryState", state.as_str())]);

        let fetched = self.http.get_html(run, request).await;
        let Some(html) = run.capture(fetched, Some(&url)) else {
            return;
        };

        let results = {
            let document = Html::parse_document(&html);
            run_strategies(&document, &html_strategies())
        };
        let default_tag = query
            .distress_types
            .first()
            .copied()
            .unwrap_or(DistressType::Foreclosure);

        match results.strategy {
            Some(name) => tracing::info!(
                "Zillow HTML fallback parsed {} listing(s) via {}",
                results.items.len(),
                name
            ),
            None => {
                run.record(
                    &AppError::ParseError("No listings found in Zillow search page".to_string()),
                    Some(&url),
                );
                return;
            }
        }

        for item in results.items {
            match self.list_result_to_property(&item, query, default_tag) {
                Ok(property) => run.push_property(property),
                Err(e) => run.record(&e, Some(&url)),
            }
        }
    }

    /// Map a search-page `listResults` entry (or a card rendered into that shape).
    pub fn list_result_to_property(
        &self,
        item: &Value,
        query: &AgentQuery,
        default_tag: DistressType,
    ) -> Result<ScrapedProperty, AppError> {
        let text = |key: &str| item.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let home_info = item.pointer("/hdpData/homeInfo");

        let full_address = text("address").unwrap_or_default();
        let street = text("addressStreet").unwrap_or_else(|| split_full_address(&full_address).street);
        if street.trim().is_empty() {
            return Err(AppError::ParseError(
                "Zillow listing without an address".to_string(),
            ));
        }

        let parts = split_full_address(&full_address);
        let mut property = empty_property(AGENT_NAME, &query.city, &query.state);
        property.source_id = item
            .get("zpid")
            .map(zpid_string)
            .unwrap_or_default();
        property.source_url = text("detailUrl")
            .map(|u| absolute_url(&self.web_base_url, &u))
            .unwrap_or_default();
        property.address = street;
        if let Some(city) = text("addressCity").or(parts.city) {
            property.city = city;
        }
        if let Some(state) = text("addressState").or(parts.state) {
            property.state = state;
        }
        property.zip = text("addressZipcode").or(parts.zip).unwrap_or_default();

        property.list_price = item
            .get("unformattedPrice")
            .and_then(|v| v.as_f64())
            .or_else(|| text("price").as_deref().and_then(parse_price));
        property.bedrooms = item.get("beds").and_then(|v| v.as_u64()).map(|v| v as u32);
        property.bathrooms = item.get("baths").and_then(|v| v.as_f64());
        property.sqft = item
            .get("area")
            .and_then(|v| v.as_u64().map(|a| a as u32).or_else(|| v.as_str().and_then(parse_u32)));
        property.latitude = item.pointer("/latLong/latitude").and_then(|v| v.as_f64());
        property.longitude = item.pointer("/latLong/longitude").and_then(|v| v.as_f64());
        if let Some(info) = home_info {
            property.zestimate = info.get("zestimate").and_then(|v| v.as_f64());
            property.property_type = info
                .get("homeType")
                .and_then(|v| v.as_str())
                .map(str::to_string);
        }

        let tag = text("statusText")
            .as_deref()
            .and_then(distress_from_status)
            .unwrap_or(default_tag);
        property.distress_types.insert(tag);
        property.raw_data = json!({ "zillow": item });
        Ok(property)
    }
}

// ============ HTML strategies ============

fn list_results_at(data: &Value) -> Vec<Value> {
    [
        "/props/pageProps/searchPageState/cat1/searchResults/listResults",
        "/searchPageState/cat1/searchResults/listResults",
        "/cat1/searchResults/listResults",
        "/searchResults/listResults",
    ]
    .iter()
    .find_map(|path| data.pointer(path).and_then(|v| v.as_array()).cloned())
    .unwrap_or_default()
}

fn next_data_listings(document: &Html) -> Vec<Value> {
    let Some(sel) = selector(r#"script#__NEXT_DATA__"#) else {
        return Vec::new();
    };
    document
        .select(&sel)
        .next()
        .map(|el| el.text().collect::<String>())
        .and_then(|body| serde_json::from_str::<Value>(&body).ok())
        .map(|data| list_results_at(&data))
        .unwrap_or_default()
}

fn shared_data_listings(document: &Html) -> Vec<Value> {
    let Some(sel) = selector("script[data-zrr-shared-data-key]") else {
        return Vec::new();
    };
    document
        .select(&sel)
        .filter_map(|el| {
            let body = el.text().collect::<String>();
            let trimmed = body
                .trim()
                .trim_start_matches("<!--")
                .trim_end_matches("-->")
                .to_string();
            serde_json::from_str::<Value>(&trimmed).ok()
        })
        .map(|data| list_results_at(&data))
        .find(|items| !items.is_empty())
        .unwrap_or_default()
}

const CARD_GUESSES: &[&str] = &[
    r#"article[data-test="property-card"]"#,
    "article.list-card",
    "li.ListItem article",
];

fn card_listings(document: &Html) -> Vec<Value> {
    select_first_matching(document, CARD_GUESSES)
        .iter()
        .filter_map(|card| {
            let address = text_within(card, &[r#"address[data-test="property-card-addr"]"#, "address"])?;
            let price = text_within(card, &[r#"[data-test="property-card-price"]"#, ".list-card-price"]);
            let href = attr_within(card, &[r#"a[data-test="property-card-link"]"#, "a[href]"], "href");
            let card_text = element_text(card);
            Some(json!({
                "address": address,
                "price": price,
                "detailUrl": href,
                "statusText": card_text,
                "beds": crate::agents::listings::beds_from_text(&card_text),
                "baths": crate::agents::listings::baths_from_text(&card_text),
                "area": crate::agents::listings::sqft_from_text(&card_text),
            }))
        })
        .collect()
}

fn has_inline_state(document: &Html) -> bool {
    inline_scripts(document)
        .iter()
        .any(|body| body.contains("listResults"))
}

pub fn html_strategies() -> Vec<ExtractionStrategy<Value>> {
    vec![
        ExtractionStrategy {
            name: "next-data",
            applies: |d| has_match(d, "script#__NEXT_DATA__"),
            extract: next_data_listings,
        },
        ExtractionStrategy {
            name: "shared-data",
            applies: has_inline_state,
            extract: shared_data_listings,
        },
        ExtractionStrategy {
            name: "property-cards",
            applies: |_| true,
            extract: card_listings,
        },
    ]
}

#[async_trait]
impl SourceAgent for ZillowAgent {
    fn name(&self) -> &str {
        AGENT_NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::StructuredApi
    }

    async fn search(&self, query: &AgentQuery) -> AgentResult {
        let mut run = AgentRun::start(AGENT_NAME);
        tracing::info!(
            "Zillow search for {}, {} (filters: {:?})",
            query.city,
            query.state,
            query.distress_types
        );

        match self.api_key.as_deref() {
            Some(key) => self.search_api(&mut run, query, key).await,
            None => {
                tracing::info!("No Zillow API key configured, using HTML fallback");
                self.search_html(&mut run, query).await;
            }
        }

        run.finish()
    }
}
