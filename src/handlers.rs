use crate::config::Config;
use crate::db::Database;
use crate::errors::AppError;
use crate::models::{OrchestratorResult, SearchCriteria};
use crate::orchestrator::Orchestrator;
use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database handle.
    pub db: Database,
    /// Application configuration.
    pub config: Config,
    /// Search pipeline wired with the production agents, enricher and store.
    pub orchestrator: Arc<Orchestrator>,
}

/// Health check endpoint.
///
/// Reports the service as healthy while the database answers, degraded otherwise.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database_ok = state.db.is_healthy().await;
    let status = if database_ok { "healthy" } else { "degraded" };

    (
        StatusCode::OK,
        Json(json!({
            "status": status,
            "service": "rust-distress-leads",
            "version": env!("CARGO_PKG_VERSION"),
            "database": database_ok,
        })),
    )
}

/// POST /api/v1/search
///
/// Runs one search synchronously and returns the run summary. Partial failures are
/// reported in the body's `errors`; only a request without city/state is rejected.
pub async fn run_search(
    State(state): State<Arc<AppState>>,
    Json(criteria): Json<SearchCriteria>,
) -> Result<Json<OrchestratorResult>, AppError> {
    tracing::info!("POST /search - criteria: {:?}", criteria);

    if criteria.city.trim().is_empty() || criteria.state.trim().is_empty() {
        return Err(AppError::BadRequest(
            "Both city and state are required".to_string(),
        ));
    }

    let result = state.orchestrator.run_search(criteria).await;

    tracing::info!(
        "Search finished: {} saved, {} error(s)",
        result.total_saved,
        result.errors.len()
    );

    Ok(Json(result))
}

/// GET /api/v1/sources
///
/// Lists registered agents with their kind and whether their credentials are present.
pub async fn list_sources(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let sources: Vec<serde_json::Value> = state
        .orchestrator
        .agents()
        .iter()
        .map(|agent| {
            json!({
                "name": agent.name(),
                "kind": agent.kind(),
                "configured": agent.is_configured(),
            })
        })
        .collect();

    Json(json!({ "sources": sources }))
}
