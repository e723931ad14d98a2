use crate::dedup::merge_property;
use crate::errors::{AppError, ResultExt};
use crate::models::{RunSummary, ScrapedProperty};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::str::FromStr;

/// Where finished records and run summaries go.
#[async_trait]
pub trait PropertySink: Send + Sync {
    /// Upsert one batch, returning the number of rows written.
    async fn upsert_batch(&self, properties: &[ScrapedProperty]) -> Result<usize, AppError>;

    async fn record_run(&self, summary: &RunSummary) -> Result<(), AppError>;
}

const INSERT_COLUMNS: &str = "INSERT INTO properties (\
    source_id, source, source_url, address, city, state, zip, county, \
    latitude, longitude, property_type, bedrooms, bathrooms, sqft, lot_size, year_built, \
    list_price, estimated_value, zestimate, arv_estimate, last_sale_price, last_sale_date, \
    loan_balance, equity_estimate, has_equity, owner_name, owner_occupied, \
    distress_types, address_confidence, raw_data, scraped_at) ";

// Incoming values win when present; stored values are never replaced by NULL.
const UPSERT_TAIL: &str = r#"
ON CONFLICT (address, city, state) DO UPDATE SET
    source_id = COALESCE(EXCLUDED.source_id, properties.source_id),
    source = COALESCE((
        SELECT string_agg(name, ',' ORDER BY first_seen)
        FROM (
            SELECT name, MIN(pos) AS first_seen
            FROM unnest(string_to_array(properties.source || ',' || EXCLUDED.source, ','))
                WITH ORDINALITY AS parts(name, pos)
            WHERE name <> ''
            GROUP BY name
        ) AS merged
    ), properties.source),
    source_url = COALESCE(EXCLUDED.source_url, properties.source_url),
    zip = COALESCE(EXCLUDED.zip, properties.zip),
    county = COALESCE(EXCLUDED.county, properties.county),
    latitude = COALESCE(EXCLUDED.latitude, properties.latitude),
    longitude = COALESCE(EXCLUDED.longitude, properties.longitude),
    property_type = COALESCE(EXCLUDED.property_type, properties.property_type),
    bedrooms = COALESCE(EXCLUDED.bedrooms, properties.bedrooms),
    bathrooms = COALESCE(EXCLUDED.bathrooms, properties.bathrooms),
    sqft = COALESCE(EXCLUDED.sqft, properties.sqft),
    lot_size = COALESCE(EXCLUDED.lot_size, properties.lot_size),
    year_built = COALESCE(EXCLUDED.year_built, properties.year_built),
    list_price = COALESCE(EXCLUDED.list_price, properties.list_price),
    estimated_value = COALESCE(EXCLUDED.estimated_value, properties.estimated_value),
    zestimate = COALESCE(EXCLUDED.zestimate, properties.zestimate),
    arv_estimate = COALESCE(EXCLUDED.arv_estimate, properties.arv_estimate),
    last_sale_price = COALESCE(EXCLUDED.last_sale_price, properties.last_sale_price),
    last_sale_date = COALESCE(EXCLUDED.last_sale_date, properties.last_sale_date),
    loan_balance = COALESCE(EXCLUDED.loan_balance, properties.loan_balance),
    equity_estimate = COALESCE(EXCLUDED.equity_estimate, properties.equity_estimate),
    has_equity = CASE
        WHEN COALESCE(EXCLUDED.equity_estimate, properties.equity_estimate) IS NULL THEN NULL
        ELSE COALESCE(EXCLUDED.equity_estimate, properties.equity_estimate) > 0
    END,
    owner_name = COALESCE(EXCLUDED.owner_name, properties.owner_name),
    owner_occupied = COALESCE(EXCLUDED.owner_occupied, properties.owner_occupied),
    distress_types = ARRAY(
        SELECT DISTINCT unnest(properties.distress_types || EXCLUDED.distress_types)
    ),
    address_confidence = CASE
        WHEN 'verified' IN (properties.address_confidence, EXCLUDED.address_confidence) THEN 'verified'
        WHEN 'inferred' IN (properties.address_confidence, EXCLUDED.address_confidence) THEN 'inferred'
        ELSE 'placeholder'
    END,
    raw_data = COALESCE(properties.raw_data, '{}'::jsonb) || EXCLUDED.raw_data,
    scraped_at = EXCLUDED.scraped_at,
    updated_at = now()
"#;

fn money(value: Option<f64>) -> Option<BigDecimal> {
    value.and_then(|v| BigDecimal::from_str(&v.to_string()).ok())
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// `true`/`false` by the sign of equity, `None` when equity is unknown.
pub fn has_equity(property: &ScrapedProperty) -> Option<bool> {
    property.equity_estimate.map(|equity| equity > 0.0)
}

/// Collapse rows that share the table's natural key, merging them in order.
///
/// Postgres rejects an `ON CONFLICT DO UPDATE` statement that touches one row twice.
pub fn collapse_natural_key(properties: &[ScrapedProperty]) -> Vec<ScrapedProperty> {
    let mut index: HashMap<(String, String, String), usize> = HashMap::new();
    let mut collapsed: Vec<ScrapedProperty> = Vec::with_capacity(properties.len());

    for property in properties {
        let key = (
            property.address.trim().to_string(),
            property.city.trim().to_string(),
            property.state.trim().to_string(),
        );
        match index.get(&key) {
            Some(&i) => {
                let existing = std::mem::take(&mut collapsed[i]);
                collapsed[i] = merge_property(existing, property.clone());
            }
            None => {
                index.insert(key, collapsed.len());
                collapsed.push(property.clone());
            }
        }
    }

    collapsed
}

/// Postgres-backed property store.
pub struct PropertyStore {
    pool: PgPool,
}

impl PropertyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PropertySink for PropertyStore {
    async fn upsert_batch(&self, properties: &[ScrapedProperty]) -> Result<usize, AppError> {
        if properties.is_empty() {
            return Ok(0);
        }

        let rows = collapse_natural_key(properties);
        if rows.len() < properties.len() {
            tracing::debug!(
                "Collapsed {} rows sharing a natural key within batch",
                properties.len() - rows.len()
            );
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(INSERT_COLUMNS);
        builder.push_values(rows.iter(), |mut b, p| {
            b.push_bind(non_empty(&p.source_id))
                .push_bind(p.source.clone())
                .push_bind(non_empty(&p.source_url))
                .push_bind(p.address.trim().to_string())
                .push_bind(p.city.trim().to_string())
                .push_bind(p.state.trim().to_string())
                .push_bind(non_empty(&p.zip))
                .push_bind(non_empty(&p.county))
                .push_bind(p.latitude)
                .push_bind(p.longitude)
                .push_bind(p.property_type.clone())
                .push_bind(p.bedrooms.map(|v| v as i32))
                .push_bind(p.bathrooms)
                .push_bind(p.sqft.map(|v| v as i32))
                .push_bind(p.lot_size)
                .push_bind(p.year_built)
                .push_bind(money(p.list_price))
                .push_bind(money(p.estimated_value))
                .push_bind(money(p.zestimate))
                .push_bind(money(p.arv_estimate))
                .push_bind(money(p.last_sale_price))
                .push_bind(p.last_sale_date.clone())
                .push_bind(money(p.loan_balance))
                .push_bind(money(p.equity_estimate))
                .push_bind(has_equity(p))
                .push_bind(p.owner_name.clone())
                .push_bind(p.owner_occupied)
                .push_bind(
                    p.distress_types
                        .iter()
                        .map(|t| t.label().to_string())
                        .collect::<Vec<String>>(),
                )
                .push_bind(p.address_confidence.as_str())
                .push_bind(p.raw_data.clone())
                .push_bind(p.scraped_at);
        });
        builder.push(UPSERT_TAIL);

        let result = builder.build().execute(&self.pool).await.map_err(|e| {
            tracing::error!("Property upsert failed for batch of {}: {:?}", rows.len(), e);
            AppError::DatabaseError(e)
        })?;

        tracing::info!("Upserted {} properties", result.rows_affected());
        Ok(result.rows_affected() as usize)
    }

    async fn record_run(&self, summary: &RunSummary) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO scrape_runs (
                city, state, criteria, agents, total_found, total_after_dedup,
                total_enriched, total_saved, error_count, duration_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&summary.city)
        .bind(&summary.state)
        .bind(&summary.criteria)
        .bind(&summary.agents)
        .bind(summary.total_found as i64)
        .bind(summary.total_after_dedup as i64)
        .bind(summary.total_enriched as i64)
        .bind(summary.total_saved as i64)
        .bind(summary.error_count as i64)
        .bind(summary.duration_ms as i64)
        .execute(&self.pool)
        .await
        .context("Failed to record scrape run")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::county_records::{infer_address, jurisdiction_for};
    use crate::models::DistressType;

    fn property(address: &str, source: &str) -> ScrapedProperty {
        ScrapedProperty {
            address: address.to_string(),
            city: "Phoenix".to_string(),
            state: "AZ".to_string(),
            source: source.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_has_equity_follows_sign() {
        let mut p = property("1 A St", "zillow");
        assert_eq!(has_equity(&p), None);
        p.equity_estimate = Some(-50_000.0);
        assert_eq!(has_equity(&p), Some(false));
        p.equity_estimate = Some(1.0);
        assert_eq!(has_equity(&p), Some(true));
    }

    #[test]
    fn test_collapse_natural_key_merges_same_row() {
        let mut a = property("22 Elm St", "county_records");
        a.distress_types.insert(DistressType::LisPendens);
        let mut b = property("22 Elm St", "county_records");
        b.distress_types.insert(DistressType::PreForeclosure);
        b.owner_name = Some("DOE JOHN".to_string());
        let c = property("9 Oak Ln", "zillow");

        let rows = collapse_natural_key(&[a, b, c]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].distress_types.len(), 2);
        assert_eq!(rows[0].owner_name.as_deref(), Some("DOE JOHN"));
        assert_eq!(rows[1].address, "9 Oak Ln");
    }

    #[test]
    fn test_separate_filings_by_one_grantor_stay_separate() {
        let jurisdiction = jurisdiction_for("AZ").unwrap();
        let filing = |id: &str| {
            let inferred = infer_address(jurisdiction, "LOT 7 TRACT B", "DOE JOHN", id);
            let mut p = property(&inferred.street, "county_records");
            p.source_id = id.to_string();
            p.address_confidence = inferred.confidence;
            p
        };

        let rows = collapse_natural_key(&[filing("20240011"), filing("20240999")]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].source_id, "20240011");
        assert_eq!(rows[1].source_id, "20240999");
    }

    #[test]
    fn test_money_conversion() {
        assert_eq!(money(Some(125_000.5)), BigDecimal::from_str("125000.5").ok());
        assert_eq!(money(None), None);
    }
}
