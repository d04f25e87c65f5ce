//! Runtime tuning for a scrape run.
//!
//! Every field has a default, so a YAML file only needs the keys it wants to
//! change:
//!
//! ```yaml
//! page_concurrency: 10
//! phone_concurrency: 4
//! termination: empty_batch
//! all_pages_batch: 5
//! ```
//!
//! Command-line flags are applied on top of whatever the file provides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};

use crate::api::Backoff;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// When an open-ended ("all") run stops paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationPolicy {
    /// Stop after the batch containing the first page that yields no records.
    FirstEmptyPage,
    /// Stop only once every page in a batch yielded no records.
    EmptyBatch,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub base_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Simultaneous listing page requests.
    pub page_concurrency: usize,
    /// Simultaneous show-phone requests.
    pub phone_concurrency: usize,
    pub phone_batch_size: usize,
    pub phone_batch_delay_ms: u64,
    pub rate_limit_pause_ms: u64,
    pub fetch_retries: usize,
    pub auth_retries: usize,
    pub enrich_retries: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub session_max_age_secs: u64,
    pub termination: TerminationPolicy,
    /// Pages per batch in open-ended mode.
    pub all_pages_batch: usize,
    /// Also fetch each CV page for birth date, education and languages.
    pub detailed: bool,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.hellojob.az".to_string(),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36".to_string(),
            request_timeout_secs: 30,
            page_concurrency: 20,
            phone_concurrency: 8,
            phone_batch_size: 25,
            phone_batch_delay_ms: 500,
            rate_limit_pause_ms: 5_000,
            fetch_retries: 3,
            auth_retries: 3,
            enrich_retries: 1,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            session_max_age_secs: 3_600,
            termination: TerminationPolicy::FirstEmptyPage,
            all_pages_batch: 1,
            detailed: false,
        }
    }
}

impl ScraperConfig {
    /// Load a YAML config file, falling back to defaults for missing keys.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Read {
            path: path_str.clone(),
            source,
        })?;
        let config = Self::from_yaml(&raw).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path_str.clone(),
                source,
            },
            other => other,
        })?;
        info!(?config.page_concurrency, ?config.phone_concurrency, "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: ScraperConfig = serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_concurrency == 0 || self.phone_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency limits must be at least 1".into(),
            ));
        }
        if self.phone_batch_size == 0 || self.all_pages_batch == 0 {
            return Err(ConfigError::Invalid("batch sizes must be at least 1".into()));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Invalid(format!("base_url {:?}: {e}", self.base_url)))?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn phone_batch_delay(&self) -> Duration {
        Duration::from_millis(self.phone_batch_delay_ms)
    }

    pub fn rate_limit_pause(&self) -> Duration {
        Duration::from_millis(self.rate_limit_pause_ms)
    }

    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.session_max_age_secs)
    }

    /// Backoff schedule with `retries` attempts on top of the first call.
    pub fn backoff(&self, retries: usize) -> Backoff {
        Backoff::new(retries, Duration::from_millis(self.backoff_base_ms))
            .with_max_delay(Duration::from_millis(self.backoff_max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ScraperConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.phone_concurrency < config.page_concurrency);
        assert_eq!(config.termination, TerminationPolicy::FirstEmptyPage);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = ScraperConfig::from_yaml(
            "page_concurrency: 5\ntermination: empty_batch\nall_pages_batch: 4\n",
        )
        .unwrap();
        assert_eq!(config.page_concurrency, 5);
        assert_eq!(config.termination, TerminationPolicy::EmptyBatch);
        assert_eq!(config.all_pages_batch, 4);
        assert_eq!(config.phone_batch_size, 25);
        assert_eq!(config.base_url, "https://www.hellojob.az");
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = ScraperConfig::from_yaml("phone_concurrency: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let err = ScraperConfig::from_yaml("base_url: not a url\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_unknown_policy_is_parse_error() {
        let err = ScraperConfig::from_yaml("termination: whenever\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ScraperConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_durations() {
        let config = ScraperConfig::default();
        assert_eq!(config.phone_batch_delay(), Duration::from_millis(500));
        assert_eq!(config.rate_limit_pause(), Duration::from_secs(5));
        assert_eq!(config.session_max_age(), Duration::from_secs(3600));
    }
}
