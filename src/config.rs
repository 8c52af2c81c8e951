/*!
 * Configuration for the plan engine
 *
 * Runtime options for loading data, the text-search index and plan
 * execution. A configuration is fixed once an engine is built.
 */

use std::path::{Path, PathBuf};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::normalize::parse_date_str;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Provider CSV file
    #[serde(default)]
    pub providers_path: Option<PathBuf>,

    /// Claims CSV file
    #[serde(default)]
    pub claims_path: Option<PathBuf>,

    /// Whether to show progress bars while loading
    #[serde(default)]
    pub show_progress: bool,

    /// Whether to skip invalid rows instead of failing the load
    #[serde(default = "default_skip_invalid")]
    pub skip_invalid_records: bool,

    /// Semantic text-search settings
    #[serde(default)]
    pub text_search: TextSearchConfig,

    /// Fixed "now" for relative date filters (today when unset)
    #[serde(default)]
    pub reference_date: Option<NaiveDate>,

    /// Budget for one plan's filter chain, in milliseconds
    #[serde(default)]
    pub filter_timeout_ms: Option<u64>,

    /// Default log filter for the command line tool
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Settings of the TF-IDF provider index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSearchConfig {
    /// Build the semantic index at all; keyword search is used otherwise
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Vocabulary cap
    #[serde(default = "default_max_features")]
    pub max_features: usize,

    /// Hits at or below this cosine similarity are discarded
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,

    /// Maximum hits per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for TextSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_features: default_max_features(),
            min_similarity: default_min_similarity(),
            top_k: default_top_k(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            providers_path: None,
            claims_path: None,
            show_progress: false,
            skip_invalid_records: default_skip_invalid(),
            text_search: TextSearchConfig::default(),
            reference_date: None,
            filter_timeout_ms: None,
            log_level: default_log_level(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_skip_invalid() -> bool {
    true
}

fn default_max_features() -> usize {
    constants::DEFAULT_MAX_FEATURES
}

fn default_min_similarity() -> f64 {
    constants::DEFAULT_MIN_SIMILARITY
}

fn default_top_k() -> usize {
    constants::DEFAULT_TOP_K
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - `HCP_PROVIDERS_PATH`, `HCP_CLAIMS_PATH`: file paths
    /// - `HCP_PROGRESS_BAR`: "true" or "false"
    /// - `HCP_SKIP_INVALID`: "true" or "false"
    /// - `HCP_TEXT_SEARCH`: "true" or "false"
    /// - `HCP_TEXT_MAX_FEATURES`, `HCP_TEXT_TOP_K`: numbers
    /// - `HCP_TEXT_MIN_SIMILARITY`: number between 0 and 1
    /// - `HCP_REFERENCE_DATE`: date such as 2024-03-01
    /// - `HCP_FILTER_TIMEOUT_MS`: number, or "none"
    /// - `HCP_LOG_LEVEL`: tracing filter directive
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let flag = |val: String| val.trim().eq_ignore_ascii_case("true");

        if let Some(val) = lookup("HCP_PROVIDERS_PATH") {
            config.providers_path = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup("HCP_CLAIMS_PATH") {
            config.claims_path = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup("HCP_PROGRESS_BAR") {
            config.show_progress = flag(val);
        }
        if let Some(val) = lookup("HCP_SKIP_INVALID") {
            config.skip_invalid_records = flag(val);
        }
        if let Some(val) = lookup("HCP_TEXT_SEARCH") {
            config.text_search.enabled = flag(val);
        }
        if let Some(size) = lookup("HCP_TEXT_MAX_FEATURES").and_then(|v| v.trim().parse().ok()) {
            config.text_search.max_features = size;
        }
        if let Some(sim) = lookup("HCP_TEXT_MIN_SIMILARITY").and_then(|v| v.trim().parse().ok()) {
            config.text_search.min_similarity = sim;
        }
        if let Some(k) = lookup("HCP_TEXT_TOP_K").and_then(|v| v.trim().parse().ok()) {
            config.text_search.top_k = k;
        }
        if let Some(val) = lookup("HCP_REFERENCE_DATE") {
            config.reference_date = parse_date_str(&val);
        }
        if let Some(val) = lookup("HCP_FILTER_TIMEOUT_MS") {
            config.filter_timeout_ms = match val.trim().to_lowercase().as_str() {
                "none" | "0" | "" => None,
                num => num.parse().ok(),
            };
        }
        if let Some(val) = lookup("HCP_LOG_LEVEL") {
            config.log_level = val;
        }

        config
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| crate::PlanError::Configuration {
                message: format!("Failed to parse config file: {}", e),
                suggestion: Some("Check that the file is valid TOML format".to_string()),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| crate::PlanError::Configuration {
                message: format!("Failed to serialize config: {}", e),
                suggestion: None,
            })?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/hcp-targeting/config.toml` on Unix-like systems
    /// or `%APPDATA%\hcp-targeting\config.toml` on Windows
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "hcp-targeting")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from the default location, environment, or defaults
    ///
    /// Priority order:
    /// 1. Default config file (if exists)
    /// 2. Environment variables
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Some(config_path) = Self::default_config_path() {
            if config_path.exists() {
                match Self::from_file(&config_path) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!(path = %config_path.display(), error = %e, "ignoring config file"),
                }
            }
        }

        Self::from_env()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        let ts = &self.text_search;
        if !(0.0..1.0).contains(&ts.min_similarity) {
            return Err(crate::PlanError::Configuration {
                message: format!("text_search.min_similarity must be in [0, 1), got {}", ts.min_similarity),
                suggestion: Some("The usual value is 0.1".to_string()),
            });
        }
        if ts.max_features == 0 || ts.top_k == 0 {
            return Err(crate::PlanError::Configuration {
                message: "text_search.max_features and text_search.top_k must be positive".to_string(),
                suggestion: None,
            });
        }
        Ok(())
    }
}

/// Builder for customizing configuration
#[derive(Default)]
pub struct ConfigBuilder {
    config: EngineConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn providers_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.providers_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn claims_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.claims_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set progress bar enabled
    pub fn progress_bar(mut self, enabled: bool) -> Self {
        self.config.show_progress = enabled;
        self
    }

    /// Set skip invalid records
    pub fn skip_invalid_records(mut self, skip: bool) -> Self {
        self.config.skip_invalid_records = skip;
        self
    }

    pub fn text_search(mut self, enabled: bool) -> Self {
        self.config.text_search.enabled = enabled;
        self
    }

    pub fn max_features(mut self, max_features: usize) -> Self {
        self.config.text_search.max_features = max_features;
        self
    }

    pub fn min_similarity(mut self, min_similarity: f64) -> Self {
        self.config.text_search.min_similarity = min_similarity;
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.config.text_search.top_k = top_k;
        self
    }

    /// Pin the date relative filters are computed from
    pub fn reference_date(mut self, date: NaiveDate) -> Self {
        self.config.reference_date = Some(date);
        self
    }

    pub fn filter_timeout_ms(mut self, budget: Option<u64>) -> Self {
        self.config.filter_timeout_ms = budget;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert!(config.skip_invalid_records);
        assert!(config.text_search.enabled);
        assert_eq!(config.text_search.max_features, 5000);
        assert_eq!(config.text_search.min_similarity, 0.1);
        assert_eq!(config.text_search.top_k, 100);
        assert_eq!(config.filter_timeout_ms, None);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .progress_bar(true)
            .text_search(false)
            .top_k(25)
            .reference_date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
            .filter_timeout_ms(Some(250))
            .build();

        assert!(config.show_progress);
        assert!(!config.text_search.enabled);
        assert_eq!(config.text_search.top_k, 25);
        assert_eq!(config.reference_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(config.filter_timeout_ms, Some(250));
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("HCP_SKIP_INVALID", "false"),
            ("HCP_TEXT_TOP_K", "7"),
            ("HCP_REFERENCE_DATE", "2024-03-01"),
            ("HCP_FILTER_TIMEOUT_MS", "none"),
        ].into_iter().collect();
        let config = EngineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert!(!config.skip_invalid_records);
        assert_eq!(config.text_search.top_k, 7);
        assert_eq!(config.reference_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(config.filter_timeout_ms, None);
    }

    #[test]
    fn test_config_file_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let config = ConfigBuilder::new().top_k(12).log_level("debug").build();
        config.save(file.path()).unwrap();
        let loaded = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_similarity_rejected() {
        let config = ConfigBuilder::new().min_similarity(1.5).build();
        assert!(matches!(config.validate(), Err(crate::PlanError::Configuration { .. })));
    }
}
