//! Distressed-Property Lead Ingestion Library
//!
//! Finds properties in financial distress (pre-foreclosure, foreclosure, auction,
//! bank-owned, tax-delinquent) for a city and state by querying several independent
//! sources concurrently, merging duplicates, enriching with valuation and location
//! data, and upserting the result into Postgres.
//!
//! # Modules
//!
//! - `api`: HTTP-layer namespace.
//! - `core`: Domain namespace (records, dedup, enrichment, orchestration).
//! - `integrations`: Upstream sources and external services.
//! - `agents`: Source agents (Zillow, ATTOM, county records, listing sites).
//! - `circuit_breaker`: Geocoder circuit breaker.
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `db_storage`: Property upserts and run summaries.
//! - `dedup`: Address-keyed deduplication and record merging.
//! - `enrichment`: Valuation, ARV, equity and geocoding chain.
//! - `errors`: Error handling types.
//! - `extraction`: Cascading HTML/JSON extraction strategies.
//! - `handlers`: HTTP request handlers.
//! - `http_client`: Jittered, user-agent-rotating HTTP client for agents.
//! - `models`: Core data models.
//! - `normalize`: Address normalization and parsing helpers.
//! - `orchestrator`: End-to-end search pipeline.
//! - `rate_limiter`: Sliding-window request limiter.
//! - `services`: Valuation and geocoding clients.

pub mod api;
pub mod core;
pub mod integrations;

pub mod agents;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod dedup;
pub mod enrichment;
pub mod errors;
pub mod extraction;
pub mod handlers;
pub mod http_client;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod rate_limiter;
pub mod services;
