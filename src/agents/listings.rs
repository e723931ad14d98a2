//! Foreclosure and REO listing sites, scraped together.
//!
//! Each site has a profile of selector guesses. Sites are fetched concurrently and a
//! failing site only adds an error to the shared result.

use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use scraper::Html;
use serde_json::json;
use std::sync::OnceLock;

use super::{SourceAgent, SourceKind};
use crate::config::Config;
use crate::errors::AppError;
use crate::extraction::{attr_within, element_text, select_first_matching, text_within};
use crate::http_client::PoliteClient;
use crate::models::{AgentQuery, AgentResult, AgentRun, DistressType, ScrapedProperty};
use crate::normalize::{
    absolute_url, empty_property, parse_f64, parse_price, parse_u32, slugify, split_full_address,
};

pub const AGENT_NAME: &str = "listings";

fn beds_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d+)\s*(?:bds|bd|beds|bed|br)\b").expect("beds regex"))
}

fn baths_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:baths|bath|ba)\b").expect("baths regex")
    })
}

fn sqft_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d[\d,]*)\s*(?:sq\.?\s*ft\.?|sqft|sf)\b").expect("sqft regex")
    })
}

fn price_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\s?[\d,]+(?:\.\d+)?[KkMm]?").expect("price regex"))
}

pub fn beds_from_text(text: &str) -> Option<u32> {
    beds_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_u32(m.as_str()))
}

pub fn baths_from_text(text: &str) -> Option<f64> {
    baths_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_f64(m.as_str()))
}

pub fn sqft_from_text(text: &str) -> Option<u32> {
    sqft_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_u32(m.as_str()))
}

/// Selector guesses and URL shape for one listing site.
#[derive(Debug, Clone, Copy)]
pub struct SiteProfile {
    pub name: &'static str,
    pub tag: DistressType,
    pub card_selectors: &'static [&'static str],
    pub address_selectors: &'static [&'static str],
    pub price_selectors: &'static [&'static str],
    pub link_selectors: &'static [&'static str],
    /// Path template; `{state}` and `{city}` are substituted.
    pub path: &'static str,
}

pub const AUCTION_COM: SiteProfile = SiteProfile {
    name: "auction_com",
    tag: DistressType::Auction,
    card_selectors: &[
        r#"[data-elm-id="asset-card"]"#,
        "div.property-card",
        "article.asset-card",
    ],
    address_selectors: &[
        r#"[data-elm-id="asset-card-address"]"#,
        ".property-address",
        "address",
    ],
    price_selectors: &[r#"[data-elm-id="asset-card-price"]"#, ".opening-bid", ".price"],
    link_selectors: &["a[href]"],
    path: "/residential/{state}/{city}",
};

pub const HUD_HOMESTORE: SiteProfile = SiteProfile {
    name: "hud_homestore",
    tag: DistressType::Reo,
    card_selectors: &["div.property-card", "tr.property-row", "div.search-result"],
    address_selectors: &[".property-address", ".address", "td.address"],
    price_selectors: &[".list-price", ".price", "td.price"],
    link_selectors: &["a.property-link", "a[href]"],
    path: "/searchresult?state={state}&city={city}",
};

pub const FORECLOSURE_LISTINGS: SiteProfile = SiteProfile {
    name: "foreclosure_listings",
    tag: DistressType::Foreclosure,
    card_selectors: &["div.listing-card", "div.property", "li.listing"],
    address_selectors: &[".listing-address", ".address", "h3"],
    price_selectors: &[".listing-price", ".price"],
    link_selectors: &["a.listing-link", "a[href]"],
    path: "/list/{state}/{city}/",
};

/// Parse one site's page into records. Cards without an address are skipped.
pub fn parse_site_cards(
    profile: &SiteProfile,
    base_url: &str,
    html: &str,
    query: &AgentQuery,
) -> Vec<ScrapedProperty> {
    let document = Html::parse_document(html);
    let cards = select_first_matching(&document, profile.card_selectors);
    if cards.is_empty() {
        tracing::debug!("{}: no card selector matched", profile.name);
        return Vec::new();
    }

    cards
        .iter()
        .filter_map(|card| {
            let text = element_text(card);
            let Some(address) = text_within(card, profile.address_selectors) else {
                tracing::debug!("{}: skipping card without address", profile.name);
                return None;
            };

            let parts = split_full_address(&address);
            let mut property = empty_property(AGENT_NAME, &query.city, &query.state);
            property.address = parts.street;
            if let Some(city) = parts.city {
                property.city = city;
            }
            if let Some(state) = parts.state {
                property.state = state;
            }
            property.zip = parts.zip.unwrap_or_default();

            property.list_price = text_within(card, profile.price_selectors)
                .as_deref()
                .and_then(parse_price)
                .or_else(|| price_re().find(&text).and_then(|m| parse_price(m.as_str())));
            property.bedrooms = beds_from_text(&text);
            property.bathrooms = baths_from_text(&text);
            property.sqft = sqft_from_text(&text);

            let href = attr_within(card, profile.link_selectors, "href")
                .or_else(|| card.value().attr("href").map(str::to_string));
            if let Some(href) = href {
                property.source_url = absolute_url(base_url, &href);
                property.source_id = href
                    .trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string();
            }

            property.distress_types.insert(profile.tag);
            property.raw_data = json!({ "listing_site": profile.name, "card_text": text });
            Some(property)
        })
        .collect()
}

pub struct ListingsAgent {
    http: PoliteClient,
    sites: Vec<(SiteProfile, String)>,
}

impl ListingsAgent {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        Ok(Self {
            http: PoliteClient::from_config(config)?,
            sites: vec![
                (AUCTION_COM, config.auction_base_url.clone()),
                (HUD_HOMESTORE, config.hud_base_url.clone()),
                (FORECLOSURE_LISTINGS, config.foreclosure_listings_base_url.clone()),
            ],
        })
    }

    async fn scrape_site(&self, profile: &SiteProfile, base_url: &str, query: &AgentQuery) -> AgentResult {
        let mut run = AgentRun::start(AGENT_NAME);
        let path = profile
            .path
            .replace("{state}", &query.state.to_lowercase())
            .replace("{city}", &slugify(&query.city));
        let url = format!("{}{}", base_url, path);

        let fetched = self.http.get_html(&mut run, self.http.get(&url)).await;
        if let Some(html) = run.capture(fetched, Some(&url)) {
            let mut properties = parse_site_cards(profile, base_url, &html, query);
            properties.retain(|p| within_price(p, query));
            tracing::info!("{}: {} listing(s) from {}", profile.name, properties.len(), url);
            run.extend(properties);
        }

        run.finish()
    }
}

fn within_price(property: &ScrapedProperty, query: &AgentQuery) -> bool {
    let Some(price) = property.list_price else {
        return true;
    };
    query.min_price.map_or(true, |min| price >= min) && query.max_price.map_or(true, |max| price <= max)
}

#[async_trait]
impl SourceAgent for ListingsAgent {
    fn name(&self) -> &str {
        AGENT_NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::ListingAggregator
    }

    async fn search(&self, query: &AgentQuery) -> AgentResult {
        let mut run = AgentRun::start(AGENT_NAME);

        let wanted: Vec<&(SiteProfile, String)> = self
            .sites
            .iter()
            .filter(|(profile, _)| query.wants(&[profile.tag]))
            .collect();

        let results = join_all(
            wanted
                .iter()
                .map(|(profile, base_url)| self.scrape_site(profile, base_url, query)),
        )
        .await;

        for result in results {
            run.absorb(result);
        }

        run.finish()
    }
}
