//! One search, end to end: select agents, run them concurrently, flatten, dedup,
//! filter, enrich, persist and summarize.
//!
//! `run_search` never fails. Every problem on the way becomes an entry in
//! `OrchestratorResult::errors`.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;

use crate::agents::{SourceAgent, SourceKind};
use crate::db_storage::PropertySink;
use crate::dedup::deduplicate;
use crate::enrichment::Enricher;
use crate::models::{
    filter_implies, AgentError, AgentResult, DistressType, OrchestratorResult, RunSummary,
    ScrapedProperty, SearchCriteria, FORECLOSURE_FAMILY, PRE_FORECLOSURE_FAMILY, REO_FAMILY,
};

const ORCHESTRATOR: &str = "orchestrator";
const PERSISTENCE: &str = "persistence";
const ENRICHMENT: &str = "enrichment";

pub struct Orchestrator {
    agents: Vec<Arc<dyn SourceAgent>>,
    enricher: Arc<dyn Enricher>,
    sink: Arc<dyn PropertySink>,
    batch_size: usize,
}

fn union(families: &[&[DistressType]]) -> Vec<DistressType> {
    families.iter().flat_map(|f| f.iter().copied()).collect()
}

/// Whether an agent of `kind` should run for the given filter.
pub fn kind_selected(kind: SourceKind, configured: bool, filter: &[DistressType]) -> bool {
    match kind {
        SourceKind::StructuredApi => true,
        SourceKind::ListingAggregator => {
            filter_implies(filter, &union(&[FORECLOSURE_FAMILY, REO_FAMILY]))
        }
        SourceKind::RateLimitedApi => {
            configured
                && filter_implies(filter, &union(&[PRE_FORECLOSURE_FAMILY, FORECLOSURE_FAMILY]))
        }
        SourceKind::MunicipalRecords => filter_implies(filter, PRE_FORECLOSURE_FAMILY),
    }
}

/// Inclusive `[min, max]` on `list_price ?? estimated_value ?? 0`. Min defaults to 0.
pub fn within_price_range(property: &ScrapedProperty, min: Option<f64>, max: Option<f64>) -> bool {
    let price = property.price_basis();
    price >= min.unwrap_or(0.0) && max.map_or(true, |max| price <= max)
}

impl Orchestrator {
    pub fn new(
        agents: Vec<Arc<dyn SourceAgent>>,
        enricher: Arc<dyn Enricher>,
        sink: Arc<dyn PropertySink>,
        batch_size: usize,
    ) -> Self {
        Self {
            agents,
            enricher,
            sink,
            batch_size: batch_size.max(1),
        }
    }

    pub fn agents(&self) -> &[Arc<dyn SourceAgent>] {
        &self.agents
    }

    pub fn select_agents(&self, criteria: &SearchCriteria) -> Vec<Arc<dyn SourceAgent>> {
        if let Some(source) = criteria.source.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            return self
                .agents
                .iter()
                .filter(|a| a.name().eq_ignore_ascii_case(source))
                .cloned()
                .collect();
        }

        self.agents
            .iter()
            .filter(|a| kind_selected(a.kind(), a.is_configured(), &criteria.distress_types))
            .cloned()
            .collect()
    }

    pub async fn run_search(&self, criteria: SearchCriteria) -> OrchestratorResult {
        let started = Instant::now();
        let mut result = OrchestratorResult::default();

        if criteria.city.trim().is_empty() || criteria.state.trim().is_empty() {
            tracing::warn!("Rejecting search without city/state: {:?}", criteria);
            result.errors.push(
                AgentError::new(ORCHESTRATOR, "city and state are required")
                    .with_code("bad_request"),
            );
            result.duration_ms = started.elapsed().as_millis() as u64;
            return result;
        }

        let selected = self.select_agents(&criteria);
        if selected.is_empty() {
            let message = match criteria.source.as_deref() {
                Some(source) => format!("No agent named '{}'", source),
                None => "No agent matches the requested distress types".to_string(),
            };
            result.errors.push(AgentError::new(ORCHESTRATOR, message).with_code("no_agents"));
        }

        tracing::info!(
            "Search {}, {}: running {} agent(s): {:?}",
            criteria.city,
            criteria.state,
            selected.len(),
            selected.iter().map(|a| a.name().to_string()).collect::<Vec<_>>()
        );

        // Stage 1: agents, all settled.
        let query = criteria.agent_query();
        let handles: Vec<_> = selected
            .iter()
            .map(|agent| {
                let agent = Arc::clone(agent);
                let query = query.clone();
                tokio::spawn(async move { agent.search(&query).await })
            })
            .collect();

        let joined = join_all(handles).await;
        let mut found: Vec<ScrapedProperty> = Vec::new();
        for (agent, outcome) in selected.iter().zip(joined) {
            let agent_result = match outcome {
                Ok(agent_result) => agent_result,
                Err(e) => {
                    tracing::error!("Agent '{}' task failed: {}", agent.name(), e);
                    AgentResult::failed(agent.name(), format!("Agent task failed: {}", e))
                }
            };
            found.extend(agent_result.properties.iter().cloned());
            result.errors.extend(agent_result.errors.iter().cloned());
            result.agent_results.push(agent_result);
        }
        result.total_found = found.len();

        // Stage 2: dedup.
        let mut properties = deduplicate(found);
        result.total_after_dedup = properties.len();
        tracing::info!(
            "Found {} properties, {} after dedup",
            result.total_found,
            result.total_after_dedup
        );

        // Stage 3: price filter.
        if criteria.min_price.is_some() || criteria.max_price.is_some() {
            let before = properties.len();
            properties.retain(|p| within_price_range(p, criteria.min_price, criteria.max_price));
            tracing::info!("Price filter kept {} of {}", properties.len(), before);
        }

        // Stage 4: enrichment.
        let enrichment = self.enricher.enrich_batch(&properties).await;
        properties = match enrichment {
            Ok(enriched) => enriched,
            Err(e) => {
                tracing::warn!("Enrichment failed, continuing with unenriched records: {}", e);
                result
                    .errors
                    .push(AgentError::from_app_error(ENRICHMENT, &e));
                properties
            }
        };
        result.total_enriched = properties.len();

        // Stage 5: equity filter.
        if let Some(min_equity) = criteria.min_equity.filter(|m| *m > 0.0) {
            let before = properties.len();
            properties.retain(|p| p.equity_estimate.map_or(false, |e| e >= min_equity));
            tracing::info!("Equity filter (>= {}) kept {} of {}", min_equity, properties.len(), before);
        }

        // Stage 6: persistence.
        result.total_saved = self.save_in_batches(&properties, &mut result.errors).await;

        result.duration_ms = started.elapsed().as_millis() as u64;

        let summary = RunSummary::from_result(&criteria, &result);
        if let Err(e) = self.sink.record_run(&summary).await {
            tracing::warn!("Failed to record run summary: {}", e);
        }

        tracing::info!(
            "Search {}, {} done: found={}, deduped={}, enriched={}, saved={}, errors={}, {}ms",
            criteria.city,
            criteria.state,
            result.total_found,
            result.total_after_dedup,
            result.total_enriched,
            result.total_saved,
            result.errors.len(),
            result.duration_ms
        );

        result
    }

    async fn save_in_batches(
        &self,
        properties: &[ScrapedProperty],
        errors: &mut Vec<AgentError>,
    ) -> usize {
        let mut saved = 0;
        for (index, batch) in properties.chunks(self.batch_size).enumerate() {
            match self.sink.upsert_batch(batch).await {
                Ok(count) => saved += count,
                Err(e) => {
                    tracing::error!("Batch {} ({} rows) failed to save: {}", index, batch.len(), e);
                    errors.push(
                        AgentError::from_app_error(PERSISTENCE, &e)
                            .with_url(format!("batch:{}", index)),
                    );
                }
            }
        }
        saved
    }
}
