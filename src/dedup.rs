//! Address-keyed deduplication and field-level record merging.

use std::collections::HashMap;

use crate::models::ScrapedProperty;
use crate::normalize::dedup_key;

fn first_text(base: String, incoming: String) -> String {
    if base.trim().is_empty() {
        incoming
    } else {
        base
    }
}

/// Ordered union of comma-joined source names, first-seen order kept.
pub fn merge_sources(base: &str, incoming: &str) -> String {
    let mut names: Vec<&str> = Vec::new();
    for name in base.split(',').chain(incoming.split(',')) {
        let name = name.trim();
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    names.join(",")
}

fn merge_raw(base: serde_json::Value, incoming: serde_json::Value) -> serde_json::Value {
    match (base, incoming) {
        (serde_json::Value::Object(mut existing), serde_json::Value::Object(extra)) => {
            for (key, value) in extra {
                existing.insert(key, value);
            }
            serde_json::Value::Object(existing)
        }
        (serde_json::Value::Null, other) => other,
        (existing, serde_json::Value::Null) => existing,
        (_, other) => other,
    }
}

/// Merge `incoming` into `base`.
///
/// Every field is listed so that a new field on `ScrapedProperty` fails to compile
/// here until its merge rule is chosen. Scalars are first-non-null-wins, distress
/// types are unioned, sources concatenated, and `raw_data` keys from `incoming`
/// are laid over the existing bag.
pub fn merge_property(base: ScrapedProperty, incoming: ScrapedProperty) -> ScrapedProperty {
    let ScrapedProperty {
        source_id,
        source,
        source_url,
        address,
        city,
        state,
        zip,
        county,
        latitude,
        longitude,
        property_type,
        bedrooms,
        bathrooms,
        sqft,
        lot_size,
        year_built,
        list_price,
        estimated_value,
        zestimate,
        arv_estimate,
        last_sale_price,
        last_sale_date,
        loan_balance,
        equity_estimate,
        owner_name,
        owner_occupied,
        distress_types,
        address_confidence,
        scraped_at,
        raw_data,
    } = incoming;

    let mut merged_distress = base.distress_types;
    merged_distress.extend(distress_types);

    ScrapedProperty {
        source_id: first_text(base.source_id, source_id),
        source: merge_sources(&base.source, &source),
        source_url: first_text(base.source_url, source_url),
        address: first_text(base.address, address),
        city: first_text(base.city, city),
        state: first_text(base.state, state),
        zip: first_text(base.zip, zip),
        county: first_text(base.county, county),
        latitude: base.latitude.or(latitude),
        longitude: base.longitude.or(longitude),
        property_type: base.property_type.or(property_type),
        bedrooms: base.bedrooms.or(bedrooms),
        bathrooms: base.bathrooms.or(bathrooms),
        sqft: base.sqft.or(sqft),
        lot_size: base.lot_size.or(lot_size),
        year_built: base.year_built.or(year_built),
        list_price: base.list_price.or(list_price),
        estimated_value: base.estimated_value.or(estimated_value),
        zestimate: base.zestimate.or(zestimate),
        arv_estimate: base.arv_estimate.or(arv_estimate),
        last_sale_price: base.last_sale_price.or(last_sale_price),
        last_sale_date: base.last_sale_date.or(last_sale_date),
        loan_balance: base.loan_balance.or(loan_balance),
        equity_estimate: base.equity_estimate.or(equity_estimate),
        owner_name: base.owner_name.or(owner_name),
        owner_occupied: base.owner_occupied.or(owner_occupied),
        distress_types: merged_distress,
        // The better-supported address reading wins.
        address_confidence: base.address_confidence.max(address_confidence),
        scraped_at: base.scraped_at.min(scraped_at),
        raw_data: merge_raw(base.raw_data, raw_data),
    }
}

/// Collapse records describing the same address into one, preserving first-seen order.
///
/// Records without a usable key (sparse street, placeholder address) are kept as-is
/// and never merged with anything.
pub fn deduplicate(properties: Vec<ScrapedProperty>) -> Vec<ScrapedProperty> {
    let mut slots: Vec<Option<ScrapedProperty>> = Vec::with_capacity(properties.len());
    let mut index_by_key: HashMap<String, usize> = HashMap::new();
    let mut merged = 0usize;

    for property in properties {
        match dedup_key(&property) {
            Some(key) => match index_by_key.get(&key) {
                Some(&idx) => {
                    if let Some(existing) = slots[idx].take() {
                        slots[idx] = Some(merge_property(existing, property));
                        merged += 1;
                    }
                }
                None => {
                    index_by_key.insert(key, slots.len());
                    slots.push(Some(property));
                }
            },
            None => {
                // Unique key: stands alone.
                let placeholder_key = format!("__unkeyed:{}", uuid::Uuid::new_v4());
                index_by_key.insert(placeholder_key, slots.len());
                slots.push(Some(property));
            }
        }
    }

    tracing::debug!(
        "Dedup merged {} record(s) into {} unique key(s)",
        merged,
        index_by_key.len()
    );

    slots.into_iter().flatten().collect()
}
