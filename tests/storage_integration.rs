/// Postgres upsert behavior. Needs a migrated database:
///
/// ```text
/// psql "$TEST_DATABASE_URL" -f migrations/0001_create_properties.sql
/// TEST_DATABASE_URL=postgres://... cargo test --test storage_integration -- --ignored
/// ```
use rust_distress_leads::db::Database;
use rust_distress_leads::db_storage::{PropertySink, PropertyStore};
use rust_distress_leads::models::{
    AddressConfidence, DistressType, OrchestratorResult, RunSummary, SearchCriteria,
};
use rust_distress_leads::normalize::empty_property;
use serde_json::json;

type StoredRow = (
    String,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<bool>,
    Vec<String>,
    String,
    serde_json::Value,
);

async fn connect() -> Database {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    Database::new(&url).await.expect("database should be reachable and migrated")
}

#[tokio::test]
#[ignore]
async fn test_upsert_merges_with_stored_row() {
    let db = connect().await;
    assert!(db.is_healthy().await);
    let store = PropertyStore::new(db.pool.clone());

    let address = format!("{} W Test St", uuid::Uuid::new_v4().simple());

    let mut first = empty_property("zillow", "Phoenix", "AZ");
    first.address = address.clone();
    first.list_price = Some(100_000.0);
    first.equity_estimate = Some(20_000.0);
    first.address_confidence = AddressConfidence::Inferred;
    first.raw_data = json!({ "zillow": { "zpid": "1" } });
    let first = first.with_distress(DistressType::Foreclosure);

    let mut second = empty_property("attom", "Phoenix", "AZ");
    second.address = address.clone();
    second.equity_estimate = Some(-5_000.0);
    second.address_confidence = AddressConfidence::Verified;
    second.raw_data = json!({ "attom": { "attomId": 7 } });
    let second = second.with_distress(DistressType::Auction);

    assert_eq!(store.upsert_batch(&[first]).await.unwrap(), 1);
    assert_eq!(store.upsert_batch(&[second.clone()]).await.unwrap(), 1);
    // Same source again must not repeat it in the source list.
    store.upsert_batch(&[second]).await.unwrap();

    let row: StoredRow = sqlx::query_as(
        r#"
        SELECT source, list_price::float8, loan_balance::float8, equity_estimate::float8,
               has_equity, distress_types, address_confidence, raw_data
        FROM properties
        WHERE address = $1 AND city = 'Phoenix' AND state = 'AZ'
        "#,
    )
    .bind(&address)
    .fetch_one(&db.pool)
    .await
    .unwrap();

    let (source, list_price, loan_balance, equity, has_equity, mut distress, confidence, raw) = row;
    distress.sort();

    assert_eq!(source, "zillow,attom");
    assert_eq!(list_price, Some(100_000.0));
    assert_eq!(loan_balance, None);
    assert_eq!(equity, Some(-5_000.0));
    assert_eq!(has_equity, Some(false));
    assert_eq!(distress, vec!["Auction".to_string(), "Foreclosure".to_string()]);
    assert_eq!(confidence, "verified");
    assert!(raw.get("zillow").is_some());
    assert!(raw.get("attom").is_some());

    sqlx::query("DELETE FROM properties WHERE address = $1")
        .bind(&address)
        .execute(&db.pool)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore]
async fn test_merged_source_lists_union_element_by_element() {
    let db = connect().await;
    let store = PropertyStore::new(db.pool.clone());

    let address = format!("{} N Source Rd", uuid::Uuid::new_v4().simple());
    let record = |source: &str| {
        let mut p = empty_property(source, "Phoenix", "AZ");
        p.address = address.clone();
        p
    };

    store.upsert_batch(&[record("zillow")]).await.unwrap();
    store.upsert_batch(&[record("zillow,attom")]).await.unwrap();
    store.upsert_batch(&[record("attom,listings,zillow")]).await.unwrap();

    let (source,): (String,) = sqlx::query_as("SELECT source FROM properties WHERE address = $1")
        .bind(&address)
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(source, "zillow,attom,listings");

    sqlx::query("DELETE FROM properties WHERE address = $1")
        .bind(&address)
        .execute(&db.pool)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore]
async fn test_unknown_equity_stores_null_has_equity() {
    let db = connect().await;
    let store = PropertyStore::new(db.pool.clone());

    let address = format!("{} E Null Ave", uuid::Uuid::new_v4().simple());
    let mut p = empty_property("listings", "Mesa", "AZ");
    p.address = address.clone();
    store.upsert_batch(&[p]).await.unwrap();

    let (has_equity,): (Option<bool>,) =
        sqlx::query_as("SELECT has_equity FROM properties WHERE address = $1")
            .bind(&address)
            .fetch_one(&db.pool)
            .await
            .unwrap();
    assert_eq!(has_equity, None);

    sqlx::query("DELETE FROM properties WHERE address = $1")
        .bind(&address)
        .execute(&db.pool)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore]
async fn test_run_summary_is_written() {
    let db = connect().await;
    let store = PropertyStore::new(db.pool.clone());

    let criteria = SearchCriteria::new("Tempe", "AZ");
    let result = OrchestratorResult {
        total_found: 3,
        total_after_dedup: 2,
        total_enriched: 2,
        total_saved: 2,
        ..Default::default()
    };

    store
        .record_run(&RunSummary::from_result(&criteria, &result))
        .await
        .unwrap();
}
