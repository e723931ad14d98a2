use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// RapidAPI key for the Zillow search API; `None` switches the agent to HTML scraping.
    pub zillow_api_key: Option<String>,
    pub zillow_api_host: String,
    pub zillow_api_base_url: String,
    pub zillow_web_base_url: String,
    pub attom_api_key: Option<String>,
    pub attom_base_url: String,
    pub attom_rate_limit: usize,
    pub attom_rate_window_secs: u64,
    pub recorder_base_url: String,
    pub treasurer_base_url: String,
    pub auction_base_url: String,
    pub hud_base_url: String,
    pub foreclosure_listings_base_url: String,
    pub nominatim_base_url: String,
    pub geocoder_user_agent: String,
    /// Lower/upper bound of the random pause before every scrape request.
    pub scrape_min_delay_ms: u64,
    pub scrape_max_delay_ms: u64,
    /// Pause between records during batch enrichment.
    pub enrichment_delay_ms: u64,
    pub upsert_batch_size: usize,
}

fn optional_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok())
        .filter(|s| !s.trim().is_empty())
}

fn url_var(name: &str, default: &str) -> anyhow::Result<String> {
    let url = std::env::var(name).unwrap_or_else(|_| default.to_string());
    if url.trim().is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url.trim_end_matches('/').to_string())
}

fn number_var<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number", name)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("DB_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATABASE_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            zillow_api_key: optional_var(&["ZILLOW_API_KEY", "RAPIDAPI_KEY"]),
            zillow_api_host: std::env::var("ZILLOW_API_HOST")
                .unwrap_or_else(|_| "zillow-com1.p.rapidapi.com".to_string()),
            zillow_api_base_url: url_var(
                "ZILLOW_API_BASE_URL",
                "https://zillow-com1.p.rapidapi.com",
            )?,
            zillow_web_base_url: url_var("ZILLOW_WEB_BASE_URL", "https://www.zillow.com")?,
            attom_api_key: optional_var(&["ATTOM_API_KEY"]),
            attom_base_url: url_var("ATTOM_BASE_URL", "https://api.gateway.attomdata.com")?,
            attom_rate_limit: number_var("ATTOM_RATE_LIMIT", 10)?,
            attom_rate_window_secs: number_var("ATTOM_RATE_WINDOW_SECS", 60)?,
            recorder_base_url: url_var("RECORDER_BASE_URL", "https://recorder.maricopa.gov")?,
            treasurer_base_url: url_var("TREASURER_BASE_URL", "https://treasurer.maricopa.gov")?,
            auction_base_url: url_var("AUCTION_BASE_URL", "https://www.auction.com")?,
            hud_base_url: url_var("HUD_BASE_URL", "https://www.hudhomestore.gov")?,
            foreclosure_listings_base_url: url_var(
                "FORECLOSURE_LISTINGS_BASE_URL",
                "https://www.foreclosurelistings.com",
            )?,
            nominatim_base_url: url_var(
                "NOMINATIM_BASE_URL",
                "https://nominatim.openstreetmap.org",
            )?,
            geocoder_user_agent: std::env::var("GEOCODER_USER_AGENT")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "rust-distress-leads/0.1".to_string()),
            scrape_min_delay_ms: number_var("SCRAPE_MIN_DELAY_MS", 1000)?,
            scrape_max_delay_ms: number_var("SCRAPE_MAX_DELAY_MS", 3000)?,
            enrichment_delay_ms: number_var("ENRICHMENT_DELAY_MS", 1100)?,
            upsert_batch_size: number_var("UPSERT_BATCH_SIZE", 50)?,
        };

        if config.scrape_min_delay_ms > config.scrape_max_delay_ms {
            anyhow::bail!("SCRAPE_MIN_DELAY_MS cannot exceed SCRAPE_MAX_DELAY_MS");
        }
        if config.upsert_batch_size == 0 {
            anyhow::bail!("UPSERT_BATCH_SIZE must be at least 1");
        }
        if config.attom_rate_limit == 0 {
            anyhow::bail!("ATTOM_RATE_LIMIT must be at least 1");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        if config.zillow_api_key.is_none() {
            tracing::warn!("ZILLOW_API_KEY not set, Zillow agent will scrape HTML instead");
        }
        if config.attom_api_key.is_none() {
            tracing::warn!("ATTOM_API_KEY not set, ATTOM agent disabled");
        }
        tracing::debug!(
            "Scrape jitter: {}-{}ms, upsert batch size: {}",
            config.scrape_min_delay_ms,
            config.scrape_max_delay_ms,
            config.upsert_batch_size
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
