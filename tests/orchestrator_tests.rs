/// Orchestrator pipeline tests with in-process agents, enricher and sink
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use rust_distress_leads::agents::{SourceAgent, SourceKind};
use rust_distress_leads::config::Config;
use rust_distress_leads::db::Database;
use rust_distress_leads::integrations::storage::PropertySink;
use rust_distress_leads::enrichment::Enricher;
use rust_distress_leads::errors::AppError;
use rust_distress_leads::api::handlers::{self, AppState};
use rust_distress_leads::models::{
    AgentError, AgentQuery, AgentResult, DistressType, RunSummary, ScrapedProperty,
    SearchCriteria,
};
use rust_distress_leads::normalize::empty_property;
use rust_distress_leads::core::orchestrator::Orchestrator;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============ Test doubles ============

enum Behavior {
    Return(Vec<ScrapedProperty>),
    Fail(String),
    Panic,
}

struct StubAgent {
    name: &'static str,
    kind: SourceKind,
    configured: bool,
    behavior: Behavior,
    calls: AtomicUsize,
}

impl StubAgent {
    fn new(name: &'static str, kind: SourceKind, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            kind,
            configured: true,
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    fn unconfigured(name: &'static str, kind: SourceKind) -> Arc<Self> {
        Arc::new(Self {
            name,
            kind,
            configured: false,
            behavior: Behavior::Return(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAgent for StubAgent {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn search(&self, _query: &AgentQuery) -> AgentResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Return(properties) => AgentResult {
                agent: self.name.to_string(),
                properties: properties.clone(),
                errors: Vec::new(),
                duration_ms: 1,
                request_count: 1,
            },
            Behavior::Fail(message) => AgentResult {
                agent: self.name.to_string(),
                properties: Vec::new(),
                errors: vec![AgentError::new(self.name, message.clone()).with_code("external_api")],
                duration_ms: 1,
                request_count: 1,
            },
            Behavior::Panic => panic!("agent {} blew up", self.name),
        }
    }
}

/// Adds a fixed equity to every record that has none.
struct StubEnricher {
    equity: Option<f64>,
    fail: bool,
}

#[async_trait]
impl Enricher for StubEnricher {
    async fn enrich_batch(
        &self,
        properties: &[ScrapedProperty],
    ) -> Result<Vec<ScrapedProperty>, AppError> {
        if self.fail {
            return Err(AppError::InternalError("enrichment offline".to_string()));
        }
        Ok(properties
            .iter()
            .cloned()
            .map(|mut p| {
                if p.equity_estimate.is_none() {
                    p.equity_estimate = self.equity;
                }
                p
            })
            .collect())
    }
}

#[derive(Default)]
struct MemorySink {
    saved: Mutex<Vec<ScrapedProperty>>,
    runs: Mutex<Vec<RunSummary>>,
    fail_batches: Vec<usize>,
    batch_calls: AtomicUsize,
}

#[async_trait]
impl PropertySink for MemorySink {
    async fn upsert_batch(&self, properties: &[ScrapedProperty]) -> Result<usize, AppError> {
        let index = self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_batches.contains(&index) {
            return Err(AppError::InternalError(format!("batch {} rejected", index)));
        }
        let mut saved = self.saved.lock().unwrap();
        saved.extend(properties.iter().cloned());
        Ok(properties.len())
    }

    async fn record_run(&self, summary: &RunSummary) -> Result<(), AppError> {
        self.runs.lock().unwrap().push(summary.clone());
        Ok(())
    }
}

fn property(source: &str, address: &str, price: Option<f64>) -> ScrapedProperty {
    let mut p = empty_property(source, "Phoenix", "AZ");
    p.address = address.to_string();
    p.zip = "85004".to_string();
    p.list_price = price;
    p.with_distress(DistressType::Foreclosure)
}

fn pass_through() -> Arc<StubEnricher> {
    Arc::new(StubEnricher {
        equity: None,
        fail: false,
    })
}

fn orchestrator(
    agents: Vec<Arc<StubAgent>>,
    enricher: Arc<StubEnricher>,
    sink: Arc<MemorySink>,
    batch_size: usize,
) -> Orchestrator {
    let agents: Vec<Arc<dyn SourceAgent>> = agents
        .into_iter()
        .map(|a| a as Arc<dyn SourceAgent>)
        .collect();
    Orchestrator::new(agents, enricher, sink, batch_size)
}

fn four_agents(failing: bool) -> Vec<Arc<StubAgent>> {
    let attom_behavior = if failing {
        Behavior::Fail("upstream returned 503".to_string())
    } else {
        Behavior::Return(vec![property("attom", "400 N 4th Ave", Some(90_000.0))])
    };
    vec![
        StubAgent::new(
            "zillow",
            SourceKind::StructuredApi,
            Behavior::Return(vec![
                property("zillow", "100 W Main St", Some(150_000.0)),
                property("zillow", "200 E Oak Ave", Some(250_000.0)),
            ]),
        ),
        StubAgent::new(
            "listings",
            SourceKind::ListingAggregator,
            Behavior::Return(vec![property("listings", "300 S Elm Dr", Some(120_000.0))]),
        ),
        StubAgent::new("attom", SourceKind::RateLimitedApi, attom_behavior),
        StubAgent::new(
            "county_records",
            SourceKind::MunicipalRecords,
            Behavior::Return(vec![property("county_records", "500 W Pine Rd", None)]),
        ),
    ]
}

// ============ Pipeline ============

#[tokio::test]
async fn test_missing_city_runs_no_agents() {
    let agents = four_agents(false);
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator(agents.clone(), pass_through(), sink.clone(), 50);

    let result = orch.run_search(SearchCriteria::new("", "AZ")).await;

    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].code.as_deref(), Some("bad_request"));
    assert_eq!(result.total_found, 0);
    assert_eq!(result.total_saved, 0);
    assert!(agents.iter().all(|a| a.calls() == 0));
    assert_eq!(sink.batch_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_one_failing_agent_does_not_stop_the_others() {
    let agents = four_agents(true);
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator(agents.clone(), pass_through(), sink.clone(), 50);

    let result = orch.run_search(SearchCriteria::new("Phoenix", "AZ")).await;

    assert!(agents.iter().all(|a| a.calls() == 1));
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].agent, "attom");
    assert_eq!(result.total_found, 4);
    assert_eq!(result.total_after_dedup, 4);
    assert_eq!(result.total_saved, 4);
    assert_eq!(result.agent_results.len(), 4);
    assert_eq!(sink.saved.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_panicking_agent_becomes_an_error() {
    let agents = vec![
        StubAgent::new("exploding", SourceKind::StructuredApi, Behavior::Panic),
        StubAgent::new(
            "steady",
            SourceKind::StructuredApi,
            Behavior::Return(vec![property("steady", "100 W Main St", Some(1.0))]),
        ),
    ];
    let orch = orchestrator(agents, pass_through(), Arc::new(MemorySink::default()), 50);

    let result = orch.run_search(SearchCriteria::new("Phoenix", "AZ")).await;

    assert_eq!(result.total_found, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].agent, "exploding");
    assert_eq!(result.errors[0].code.as_deref(), Some("agent_failed"));
}

#[tokio::test]
async fn test_duplicates_across_agents_are_merged() {
    let agents = vec![
        StubAgent::new(
            "zillow",
            SourceKind::StructuredApi,
            Behavior::Return(vec![property("zillow", "123 North Main Street", Some(200_000.0))]),
        ),
        StubAgent::new(
            "listings",
            SourceKind::ListingAggregator,
            Behavior::Return(vec![property("listings", "123 N Main St", None)
                .with_distress(DistressType::Auction)]),
        ),
    ];
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator(agents, pass_through(), sink.clone(), 50);

    let result = orch.run_search(SearchCriteria::new("Phoenix", "AZ")).await;

    assert_eq!(result.total_found, 2);
    assert_eq!(result.total_after_dedup, 1);
    let saved = sink.saved.lock().unwrap();
    assert_eq!(saved[0].source, "zillow,listings");
    assert!(saved[0].distress_types.contains(&DistressType::Auction));
    assert!(saved[0].distress_types.contains(&DistressType::Foreclosure));
}

#[tokio::test]
async fn test_price_bounds_are_inclusive() {
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator(four_agents(false), pass_through(), sink.clone(), 50);

    let mut criteria = SearchCriteria::new("Phoenix", "AZ");
    criteria.min_price = Some(120_000.0);
    criteria.max_price = Some(150_000.0);
    let result = orch.run_search(criteria).await;

    assert_eq!(result.total_found, 5);
    assert_eq!(result.total_saved, 2);
    let mut addresses: Vec<String> = sink
        .saved
        .lock()
        .unwrap()
        .iter()
        .map(|p| p.address.clone())
        .collect();
    addresses.sort();
    assert_eq!(addresses, vec!["100 W Main St", "300 S Elm Dr"]);
}

#[tokio::test]
async fn test_equity_filter_drops_unknown_and_low_equity() {
    let mut rich = property("zillow", "100 W Main St", Some(300_000.0));
    rich.equity_estimate = Some(80_000.0);
    let mut poor = property("zillow", "200 E Oak Ave", Some(300_000.0));
    poor.equity_estimate = Some(10_000.0);
    let unknown = property("zillow", "300 S Elm Dr", Some(300_000.0));

    let agents = vec![StubAgent::new(
        "zillow",
        SourceKind::StructuredApi,
        Behavior::Return(vec![rich, poor, unknown]),
    )];
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator(agents, pass_through(), sink.clone(), 50);

    let mut criteria = SearchCriteria::new("Phoenix", "AZ");
    criteria.min_equity = Some(50_000.0);
    let result = orch.run_search(criteria).await;

    assert_eq!(result.total_enriched, 3);
    assert_eq!(result.total_saved, 1);
    assert_eq!(sink.saved.lock().unwrap()[0].address, "100 W Main St");
}

#[tokio::test]
async fn test_enricher_output_feeds_equity_filter() {
    let sink = Arc::new(MemorySink::default());
    let enricher = Arc::new(StubEnricher {
        equity: Some(75_000.0),
        fail: false,
    });
    let orch = orchestrator(four_agents(false), enricher, sink.clone(), 50);

    let mut criteria = SearchCriteria::new("Phoenix", "AZ");
    criteria.min_equity = Some(75_000.0);
    let result = orch.run_search(criteria).await;

    assert_eq!(result.total_saved, 5);
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn test_enrichment_failure_keeps_records() {
    let sink = Arc::new(MemorySink::default());
    let enricher = Arc::new(StubEnricher {
        equity: None,
        fail: true,
    });
    let orch = orchestrator(four_agents(false), enricher, sink.clone(), 50);

    let result = orch.run_search(SearchCriteria::new("Phoenix", "AZ")).await;

    assert_eq!(result.total_enriched, 5);
    assert_eq!(result.total_saved, 5);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].agent, "enrichment");
}

#[tokio::test]
async fn test_source_restriction_runs_only_named_agent() {
    let agents = four_agents(false);
    let orch = orchestrator(
        agents.clone(),
        pass_through(),
        Arc::new(MemorySink::default()),
        50,
    );

    let mut criteria = SearchCriteria::new("Phoenix", "AZ");
    criteria.source = Some("LISTINGS".to_string());
    let result = orch.run_search(criteria).await;

    let calls: Vec<(&str, usize)> = agents.iter().map(|a| (a.name, a.calls())).collect();
    assert_eq!(
        calls,
        vec![("zillow", 0), ("listings", 1), ("attom", 0), ("county_records", 0)]
    );
    assert_eq!(result.total_found, 1);
}

#[tokio::test]
async fn test_unknown_source_reports_no_agents() {
    let orch = orchestrator(
        four_agents(false),
        pass_through(),
        Arc::new(MemorySink::default()),
        50,
    );

    let mut criteria = SearchCriteria::new("Phoenix", "AZ");
    criteria.source = Some("redfin".to_string());
    let result = orch.run_search(criteria).await;

    assert_eq!(result.total_found, 0);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].code.as_deref(), Some("no_agents"));
}

#[tokio::test]
async fn test_distress_filter_selects_agent_kinds() {
    let agents = vec![
        StubAgent::new("zillow", SourceKind::StructuredApi, Behavior::Return(Vec::new())),
        StubAgent::new("listings", SourceKind::ListingAggregator, Behavior::Return(Vec::new())),
        StubAgent::unconfigured("attom", SourceKind::RateLimitedApi),
        StubAgent::new(
            "county_records",
            SourceKind::MunicipalRecords,
            Behavior::Return(Vec::new()),
        ),
    ];
    let orch = orchestrator(
        agents.clone(),
        pass_through(),
        Arc::new(MemorySink::default()),
        50,
    );

    let mut criteria = SearchCriteria::new("Phoenix", "AZ");
    criteria.distress_types = vec![DistressType::NoticeOfDefault];
    orch.run_search(criteria).await;

    let calls: Vec<usize> = agents.iter().map(|a| a.calls()).collect();
    // Unconfigured rate-limited agents are skipped even when their family matches.
    assert_eq!(calls, vec![1, 0, 0, 1]);
}

#[tokio::test]
async fn test_failed_batch_is_one_error_and_others_still_save() {
    let sink = Arc::new(MemorySink {
        fail_batches: vec![1],
        ..Default::default()
    });
    let orch = orchestrator(four_agents(false), pass_through(), sink.clone(), 2);

    let result = orch.run_search(SearchCriteria::new("Phoenix", "AZ")).await;

    assert_eq!(sink.batch_calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.total_saved, 3);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].agent, "persistence");
    assert_eq!(result.errors[0].url.as_deref(), Some("batch:1"));
}

#[tokio::test]
async fn test_run_summary_is_recorded() {
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator(four_agents(true), pass_through(), sink.clone(), 50);

    orch.run_search(SearchCriteria::new("Phoenix", "AZ")).await;

    let runs = sink.runs.lock().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].city, "Phoenix");
    assert_eq!(runs[0].total_found, 4);
    assert_eq!(runs[0].error_count, 1);
    assert_eq!(runs[0].agents.len(), 4);
}

// ============ Handlers ============

fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/unused".to_string(),
        port: 0,
        zillow_api_key: None,
        zillow_api_host: "zillow.test".to_string(),
        zillow_api_base_url: "http://127.0.0.1:9".to_string(),
        zillow_web_base_url: "http://127.0.0.1:9".to_string(),
        attom_api_key: None,
        attom_base_url: "http://127.0.0.1:9".to_string(),
        attom_rate_limit: 10,
        attom_rate_window_secs: 60,
        recorder_base_url: "http://127.0.0.1:9".to_string(),
        treasurer_base_url: "http://127.0.0.1:9".to_string(),
        auction_base_url: "http://127.0.0.1:9".to_string(),
        hud_base_url: "http://127.0.0.1:9".to_string(),
        foreclosure_listings_base_url: "http://127.0.0.1:9".to_string(),
        nominatim_base_url: "http://127.0.0.1:9".to_string(),
        geocoder_user_agent: "test-agent".to_string(),
        scrape_min_delay_ms: 0,
        scrape_max_delay_ms: 0,
        enrichment_delay_ms: 0,
        upsert_batch_size: 50,
    }
}

fn app_state(agents: Vec<Arc<StubAgent>>) -> Arc<AppState> {
    let config = test_config();
    let pool = sqlx::postgres::PgPoolOptions::new()
        .acquire_timeout(Duration::from_secs(1))
        .connect_lazy(&config.database_url)
        .unwrap();
    Arc::new(AppState {
        db: Database { pool },
        config,
        orchestrator: Arc::new(orchestrator(
            agents,
            pass_through(),
            Arc::new(MemorySink::default()),
            50,
        )),
    })
}

#[tokio::test]
async fn test_search_handler_rejects_missing_state() {
    let agents = four_agents(false);
    let state = app_state(agents.clone());

    let response = handlers::run_search(State(state), Json(SearchCriteria::new("Phoenix", " ")))
        .await
        .into_response();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(agents.iter().all(|a| a.calls() == 0));
}

#[tokio::test]
async fn test_search_handler_returns_summary() {
    let state = app_state(four_agents(true));

    let Json(result) =
        handlers::run_search(State(state), Json(SearchCriteria::new("Phoenix", "AZ")))
            .await
            .unwrap();

    assert_eq!(result.total_found, 4);
    assert_eq!(result.total_saved, 4);
    assert_eq!(result.errors.len(), 1);
}

#[tokio::test]
async fn test_sources_handler_lists_agents() {
    let state = app_state(vec![
        StubAgent::new("zillow", SourceKind::StructuredApi, Behavior::Return(Vec::new())),
        StubAgent::unconfigured("attom", SourceKind::RateLimitedApi),
    ]);

    let Json(body) = handlers::list_sources(State(state)).await;

    let sources = body["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0]["name"], "zillow");
    assert_eq!(sources[0]["kind"], "structured_api");
    assert_eq!(sources[1]["configured"], false);
}

#[tokio::test]
async fn test_health_reports_degraded_without_database() {
    let mut state = (*app_state(Vec::new())).clone();
    state.db = Database {
        pool: sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(Duration::from_secs(1))
            .connect_lazy("postgres://distress@127.0.0.1:9/unused")
            .unwrap(),
    };

    let (status, Json(body)) = handlers::health(State(Arc::new(state))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["database"], false);
}
