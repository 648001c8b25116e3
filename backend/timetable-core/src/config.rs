// src/config.rs

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::client::{ClientConfig, DEFAULT_CACHE_DIR, DEFAULT_CACHE_DURATION_SECS};
use crate::error::ConfigError;
use crate::periods::PeriodGrid;

pub const ENV_PREFIX: &str = "TIMETABLE_";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}

fn default_cache_duration() -> u64 {
    DEFAULT_CACHE_DURATION_SECS
}

/// Settings read from `TIMETABLE_*` environment variables (and `.env`).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub api_base_url: Option<String>,
    pub api_token: Option<String>,
    /// Branch/campus scope for conflict queries and assignments.
    pub scope: Option<String>,
    pub academic_year: Option<String>,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_cache_duration")]
    pub cache_duration_secs: u64,
    pub period_grid_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            api_token: None,
            scope: None,
            academic_year: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            cache_dir: default_cache_dir(),
            cache_duration_secs: DEFAULT_CACHE_DURATION_SECS,
            period_grid_path: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();
        let config = envy::prefixed(ENV_PREFIX).from_env::<AppConfig>()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::prefixed(ENV_PREFIX).from_iter::<_, AppConfig>(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.api_base_url {
            Url::parse(url).map_err(|e| {
                ConfigError::Invalid(format!("TIMETABLE_API_BASE_URL '{}': {}", url, e))
            })?;
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "TIMETABLE_REQUEST_TIMEOUT_SECS must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn period_grid(&self) -> Result<PeriodGrid, ConfigError> {
        match &self.period_grid_path {
            Some(path) => PeriodGrid::load(path),
            None => Ok(PeriodGrid::standard().clone()),
        }
    }

    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let raw = self.api_base_url.as_deref().ok_or_else(|| {
            ConfigError::Invalid("TIMETABLE_API_BASE_URL is required unless --snapshot is used".to_string())
        })?;
        let base_url = Url::parse(raw)
            .map_err(|e| ConfigError::Invalid(format!("TIMETABLE_API_BASE_URL '{}': {}", raw, e)))?;
        Ok(ClientConfig {
            base_url,
            api_token: self.api_token.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            cache_dir: self.cache_dir.clone(),
            cache_duration_secs: self.cache_duration_secs,
        })
    }
}
