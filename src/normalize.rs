//! Address canonicalization, dedup keys, request politeness helpers and tolerant
//! number parsing shared by every agent.

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;
use std::time::Duration;

use crate::models::{AddressConfidence, ScrapedProperty};

/// Normalized streets shorter than this are too sparse to merge on.
pub const MIN_KEY_STREET_LEN: usize = 5;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
];

const STREET_SUFFIXES: &[(&str, &str)] = &[
    ("STREET", "ST"),
    ("STR", "ST"),
    ("AVENUE", "AVE"),
    ("AV", "AVE"),
    ("ROAD", "RD"),
    ("DRIVE", "DR"),
    ("LANE", "LN"),
    ("BOULEVARD", "BLVD"),
    ("COURT", "CT"),
    ("PLACE", "PL"),
    ("CIRCLE", "CIR"),
    ("TERRACE", "TER"),
    ("PARKWAY", "PKWY"),
    ("HIGHWAY", "HWY"),
    ("TRAIL", "TRL"),
    ("SQUARE", "SQ"),
    ("LOOP", "LOOP"),
];

const DIRECTIONALS: &[(&str, &str)] = &[
    ("NORTH", "N"),
    ("SOUTH", "S"),
    ("EAST", "E"),
    ("WEST", "W"),
    ("NORTHEAST", "NE"),
    ("NORTHWEST", "NW"),
    ("SOUTHEAST", "SE"),
    ("SOUTHWEST", "SW"),
];

/// A designator only counts as a unit when a numbered or single-letter token follows,
/// so street names like "Ste Genevieve" survive.
fn unit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:\b(?:APT|APARTMENT|UNIT|STE|SUITE|BLDG|BUILDING|SPC|SPACE|RM|ROOM)\b\.?\s*(?:[A-Z0-9-]*\d[A-Z0-9-]*|[A-Z]\b)|#\s*[A-Z0-9-]+)",
        )
        .expect("unit designator regex")
    })
}

fn zip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{5})(?:-\d{4})?\b").expect("zip regex"))
}

fn state_zip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z]{2})(?:\s+(\d{5})(?:-\d{4})?)?$").expect("state zip regex")
    })
}

/// Canonical street form used for dedup: uppercase, unit designators stripped,
/// suffixes and directionals abbreviated, whitespace collapsed, punctuation removed.
pub fn normalize_street(address: &str) -> String {
    let upper = address.to_uppercase();
    let without_units = unit_re().replace_all(&upper, " ");

    let cleaned: String = without_units
        .chars()
        .map(|c| match c {
            '.' | ',' | ';' | ':' => ' ',
            other => other,
        })
        .collect();

    cleaned
        .split_whitespace()
        .map(|token| {
            STREET_SUFFIXES
                .iter()
                .chain(DIRECTIONALS.iter())
                .find(|(long, _)| *long == token)
                .map(|(_, short)| *short)
                .unwrap_or(token)
        })
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_string()
}

/// First five digits of a ZIP / ZIP+4, or empty.
pub fn normalize_zip(zip: &str) -> String {
    zip_re()
        .captures(zip)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Dedup key `"{street}, {city}, {state} {zip}"`, or `None` when the record must not
/// be merged with anything (sparse street or placeholder address).
pub fn dedup_key(property: &ScrapedProperty) -> Option<String> {
    if property.address_confidence == AddressConfidence::Placeholder {
        return None;
    }

    let street = normalize_street(&property.address);
    if street.len() < MIN_KEY_STREET_LEN {
        return None;
    }

    Some(format!(
        "{}, {}, {} {}",
        street,
        collapse_whitespace(&property.city.to_uppercase()),
        property.state.trim().to_uppercase(),
        normalize_zip(&property.zip)
    ))
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A blank record tagged with its source and search location.
pub fn empty_property(source: &str, city: &str, state: &str) -> ScrapedProperty {
    ScrapedProperty {
        source: source.to_string(),
        city: city.to_string(),
        state: state.to_uppercase(),
        scraped_at: Utc::now(),
        raw_data: json!({}),
        ..Default::default()
    }
}

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Uniformly random duration in `[min, max]`.
pub fn random_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let millis = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(millis)
}

/// Sleep for a random duration in `[min, max]`.
pub async fn jitter_delay(min: Duration, max: Duration) {
    let delay = random_delay(min, max);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Parse "$1,234,567", "1.2M", "450K" or plain numbers.
pub fn parse_price(raw: &str) -> Option<f64> {
    let trimmed = raw.trim().to_uppercase();
    let (body, multiplier) = if let Some(stripped) = trimmed.strip_suffix('M') {
        (stripped, 1_000_000.0)
    } else if let Some(stripped) = trimmed.strip_suffix('K') {
        (stripped, 1_000.0)
    } else {
        (trimmed.as_str(), 1.0)
    };

    let digits: String = body
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits
        .parse::<f64>()
        .ok()
        .map(|v| v * multiplier)
        .filter(|v| *v > 0.0)
}

/// Parse an integer that may carry thousands separators ("1,850").
pub fn parse_u32(raw: &str) -> Option<u32> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

pub fn parse_f64(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse().ok()
}

/// Resolve a scraped `href` against the site it came from. Unparseable input is
/// returned as is.
pub fn absolute_url(base: &str, href: &str) -> String {
    url::Url::parse(base)
        .and_then(|base| base.join(href))
        .map(String::from)
        .unwrap_or_else(|_| href.to_string())
}

/// "San Antonio" -> "san-antonio"
pub fn slugify(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// Pieces of a one-line address such as "123 Main St, Phoenix, AZ 85001".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressParts {
    pub street: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

pub fn split_full_address(raw: &str) -> AddressParts {
    let parts: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut result = AddressParts {
        street: parts.first().map(|s| collapse_whitespace(s)).unwrap_or_default(),
        ..Default::default()
    };

    match parts.len() {
        0 | 1 => {}
        2 => {
            if let Some(caps) = state_zip_re().captures(parts[1]) {
                result.state = caps.get(1).map(|m| m.as_str().to_uppercase());
                result.zip = caps.get(2).map(|m| m.as_str().to_string());
            } else {
                result.city = Some(parts[1].to_string());
            }
        }
        n => {
            result.city = Some(parts[n - 2].to_string());
            if let Some(caps) = state_zip_re().captures(parts[n - 1]) {
                result.state = caps.get(1).map(|m| m.as_str().to_uppercase());
                result.zip = caps.get(2).map(|m| m.as_str().to_string());
            }
        }
    }

    result
}
