use crate::config::Config;
use crate::errors::AppError;
use crate::models::AgentRun;
use crate::normalize::{jitter_delay, random_user_agent};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// HTTP client shared by the scraping agents.
///
/// Every request waits a random jitter first and goes out with a randomly chosen
/// browser user agent. Requests are counted against the calling agent's run.
#[derive(Clone)]
pub struct PoliteClient {
    client: Client,
    min_delay: Duration,
    max_delay: Duration,
}

impl PoliteClient {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            min_delay,
            max_delay,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(
            Duration::from_millis(config.scrape_min_delay_ms),
            Duration::from_millis(config.scrape_max_delay_ms),
        )
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    /// Send a prepared request after the jitter pause, failing on non-2xx statuses.
    pub async fn send(
        &self,
        run: &mut AgentRun,
        request: RequestBuilder,
    ) -> Result<Response, AppError> {
        jitter_delay(self.min_delay, self.max_delay).await;
        run.count_request();

        let response = request
            .header(USER_AGENT, random_user_agent())
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let url = response.url().to_string();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::debug!("{} returned {}: {}", url, status, error_text);
            return Err(AppError::ExternalApiError(format!(
                "{} returned status {}",
                url, status
            )));
        }

        Ok(response)
    }

    pub async fn get_html(&self, run: &mut AgentRun, request: RequestBuilder) -> Result<String, AppError> {
        let response = self
            .send(run, request.header(ACCEPT, "text/html,application/xhtml+xml"))
            .await?;
        response
            .text()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Failed to read body: {}", e)))
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        run: &mut AgentRun,
        request: RequestBuilder,
    ) -> Result<T, AppError> {
        let response = self
            .send(run, request.header(ACCEPT, "application/json"))
            .await?;
        response
            .json()
            .await
            .map_err(|e| AppError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}
