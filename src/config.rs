use crate::error::{IngestError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::info;

/// Matching tunables. The duplicate window and similarity threshold are
/// deliberately configurable rather than baked-in business rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Candidate start dates within +/- this many days are compared by name.
    pub duplicate_window_days: i64,
    /// Normalized name similarity strictly above this flags a duplicate.
    pub name_similarity_threshold: f64,
    /// Maximum venues pulled from the store before scoring.
    pub venue_pool_cap: usize,
    /// Venue scores at or below this are discarded.
    pub venue_score_floor: f64,
    /// Bonus when the supplied city closely matches the candidate's city.
    pub venue_city_bonus: f64,
    /// City similarity must exceed this for the city bonus to apply.
    pub venue_city_similarity_floor: f64,
    /// Bonus when the supplied state matches case-insensitively.
    pub venue_state_bonus: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            duplicate_window_days: 7,
            name_similarity_threshold: 0.85,
            venue_pool_cap: 50,
            venue_score_floor: 0.6,
            venue_city_bonus: 0.15,
            venue_city_similarity_floor: 0.8,
            venue_state_bonus: 0.10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Events fetched per sync batch.
    pub batch_size: usize,
    /// Hard upper bound on batches per driver run.
    pub safety_cap: usize,
    /// Concurrent ticket-page fetches within one batch.
    pub workers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            safety_cap: 100,
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Per-caller budget for duplicate-check and venue-match requests.
    pub rate_limit_per_min: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            rate_limit_per_min: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_seconds: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 20,
            user_agent: format!("eventdir-ingest/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// External AI extraction service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// POST endpoint of the extraction service. Extraction degrades to
    /// manual entry when unset.
    pub endpoint: Option<String>,
}

/// One configured origin site for the generic JSON-LD listing scraper.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_listing_path")]
    pub listing_path: String,
    /// Listing links must contain this substring to be treated as events.
    #[serde(default = "default_link_pattern")]
    pub link_pattern: String,
}

fn default_listing_path() -> String {
    "/events".to_string()
}

fn default_link_pattern() -> String {
    "/event".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub matching: MatchingConfig,
    pub sync: SyncConfig,
    pub server: ServerConfig,
    pub fetch: FetchConfig,
    pub ai: AiConfig,
    pub sources: Vec<SourceConfig>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("Failed to read config file '{path}': {e}"))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads `config.toml` when present, defaults otherwise.
    pub fn load_or_default() -> Self {
        let path = "config.toml";
        if Path::new(path).exists() {
            match Self::load(path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable config file '{path}': {e}");
                }
            }
        } else {
            info!("No config.toml found, using built-in defaults");
        }
        Config::default()
    }
}
