//! Source agents.
//!
//! Each agent turns an [`AgentQuery`] into an [`AgentResult`]. Failures are data:
//! `search` has no error channel, so an agent cannot fail past its own boundary.

pub mod attom;
pub mod county_records;
pub mod listings;
pub mod zillow;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::{AgentQuery, AgentResult};
use crate::rate_limiter::SlidingWindowLimiter;

pub use attom::AttomAgent;
pub use county_records::CountyRecordsAgent;
pub use listings::ListingsAgent;
pub use zillow::ZillowAgent;

/// Acquisition strategy of an agent; drives orchestrator selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Keyed real-estate search API with an HTML fallback.
    StructuredApi,
    /// Credentialed, quota-limited foreclosure data API.
    RateLimitedApi,
    /// County recorder / treasurer scraping.
    MunicipalRecords,
    /// Several foreclosure/REO listing sites scraped together.
    ListingAggregator,
}

#[async_trait]
pub trait SourceAgent: Send + Sync {
    /// Name written into every record's `source` field.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Whether the credentials this agent needs are present.
    fn is_configured(&self) -> bool {
        true
    }

    async fn search(&self, query: &AgentQuery) -> AgentResult;
}

/// Build the four production agents from configuration.
pub fn default_agents(config: &Config) -> Result<Vec<Arc<dyn SourceAgent>>, AppError> {
    let limiter = Arc::new(SlidingWindowLimiter::new(
        config.attom_rate_limit,
        Duration::from_secs(config.attom_rate_window_secs),
    ));

    let agents: Vec<Arc<dyn SourceAgent>> = vec![
        Arc::new(ZillowAgent::new(config)?),
        Arc::new(ListingsAgent::new(config)?),
        Arc::new(AttomAgent::new(config, limiter)?),
        Arc::new(CountyRecordsAgent::new(config)?),
    ];

    for agent in &agents {
        tracing::info!(
            "Registered agent '{}' ({:?}, configured: {})",
            agent.name(),
            agent.kind(),
            agent.is_configured()
        );
    }

    Ok(agents)
}
