//! Configuration management for Laana
//!
//! Configuration is loaded from TOML, overridden from the environment and
//! validated before use. Components receive the section they need at
//! construction; nothing reads configuration globally.

use crate::error::{LaanaError, Result};
use crate::vector::ModelRegistry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub backfill: BackfillConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Local corpus storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub database: String,
    /// Word list used to compute quality ratios on import
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocabulary_file: Option<PathBuf>,
}

impl StorageConfig {
    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(expand_path(&self.data_dir)?.join(&self.database))
    }
}

/// Embedding service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "http", "local" or "deterministic"
    pub provider: String,
    pub service_url: String,
    /// Per-call timeout
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub small_model: String,
    pub large_model: String,
}

impl EmbeddingConfig {
    pub fn models(&self) -> ModelRegistry {
        ModelRegistry {
            small: self.small_model.clone(),
            large: self.large_model.clone(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let models = ModelRegistry::default();
        Self {
            provider: "http".to_string(),
            service_url: "http://localhost:5000".to_string(),
            timeout_secs: 300,
            connect_timeout_secs: 10,
            small_model: models.small,
            large_model: models.large,
        }
    }
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// "document_store", "relational" or "embedded"
    pub backend: String,
    pub engine_url: String,
    pub documents_index: String,
    pub sentences_index: String,
    pub documents_table: String,
    pub sentences_table: String,
    pub quality_field: String,
    pub near_window: usize,
    pub default_k: usize,
    /// Candidates per requested hit for k-NN
    pub knn_candidate_multiplier: usize,
    /// Over-fetch factor for the sub-queries of a hybrid search
    pub hybrid_candidate_multiplier: usize,
    pub highlight: HighlightConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<WeightsConfig>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: "embedded".to_string(),
            engine_url: "http://localhost:9200".to_string(),
            documents_index: "hawaiian".to_string(),
            sentences_index: "hawaiian_sentences".to_string(),
            documents_table: "sources".to_string(),
            sentences_table: "sentences".to_string(),
            quality_field: "hawaiian_word_ratio".to_string(),
            near_window: 2,
            default_k: 10,
            knn_candidate_multiplier: 10,
            hybrid_candidate_multiplier: 5,
            highlight: HighlightConfig::default(),
            weights: None,
        }
    }
}

/// Highlight markers and fragment sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighlightConfig {
    pub start_marker: String,
    pub end_marker: String,
    pub document_fragment_size: usize,
    pub document_fragments: usize,
    pub sentence_fragment_size: usize,
    pub sentence_fragments: usize,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            start_marker: "__START_HIGHLIGHT__".to_string(),
            end_marker: "__END_HIGHLIGHT__".to_string(),
            document_fragment_size: 500,
            document_fragments: 3,
            sentence_fragment_size: 200,
            sentence_fragments: 5,
        }
    }
}

/// Blend weight overrides for hybrid ranking
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeightsConfig {
    pub text: f32,
    pub vector: f32,
    pub quality: f32,
}

/// Backfill configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    pub batch_size: usize,
    /// Embedding calls in flight per batch
    pub concurrency: usize,
    /// "keyset" or "leased"
    pub cursor: String,
    /// Scroll keep-alive for leased cursors, e.g. "10m"
    pub keep_alive: String,
    pub lease_timeout_secs: u64,
    /// "document" or "sentence"
    pub target: String,
    /// "small" or "large"
    pub tier: String,
    /// Error details kept on the report
    pub error_detail_limit: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 8,
            cursor: "keyset".to_string(),
            keep_alive: "10m".to_string(),
            lease_timeout_secs: 30,
            target: "document".to_string(),
            tier: "large".to_string(),
            error_detail_limit: 10,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LaanaError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| LaanaError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| LaanaError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: LAANA_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        let overrides: Vec<(String, String)> = std::env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix("LAANA_")
                    .map(|k| (k.to_string(), value))
            })
            .collect();
        self.apply_overrides(overrides);
    }

    fn apply_overrides(&mut self, overrides: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in overrides {
            if let Err(e) = self.set_value_from_env(&key, &value) {
                tracing::warn!("Failed to apply env override LAANA_{}: {}", key, e);
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "STORAGE__DATABASE" => self.storage.database = value.to_string(),
            "EMBEDDING__PROVIDER" => self.embedding.provider = value.to_string(),
            "EMBEDDING__SERVICE_URL" => self.embedding.service_url = value.to_string(),
            "EMBEDDING__TIMEOUT_SECS" => self.embedding.timeout_secs = parse_value(path, value)?,
            "EMBEDDING__SMALL_MODEL" => self.embedding.small_model = value.to_string(),
            "EMBEDDING__LARGE_MODEL" => self.embedding.large_model = value.to_string(),
            "SEARCH__BACKEND" => self.search.backend = value.to_string(),
            "SEARCH__ENGINE_URL" => self.search.engine_url = value.to_string(),
            "SEARCH__DOCUMENTS_INDEX" => self.search.documents_index = value.to_string(),
            "SEARCH__SENTENCES_INDEX" => self.search.sentences_index = value.to_string(),
            "SEARCH__NEAR_WINDOW" => self.search.near_window = parse_value(path, value)?,
            "SEARCH__DEFAULT_K" => self.search.default_k = parse_value(path, value)?,
            "BACKFILL__BATCH_SIZE" => self.backfill.batch_size = parse_value(path, value)?,
            "BACKFILL__CONCURRENCY" => self.backfill.concurrency = parse_value(path, value)?,
            "BACKFILL__CURSOR" => self.backfill.cursor = value.to_string(),
            "BACKFILL__TARGET" => self.backfill.target = value.to_string(),
            "BACKFILL__TIER" => self.backfill.tier = value.to_string(),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| LaanaError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("laana").join("config.toml"))
    }
}

fn parse_value<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| LaanaError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| LaanaError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| LaanaError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Parse a duration string such as "30s", "10m" or "1h"
pub fn parse_duration(s: &str) -> Option<std::time::Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit())?;
    let (num, unit) = s.split_at(split);
    let n: u64 = num.parse().ok()?;
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        _ => return None,
    };
    Some(std::time::Duration::from_secs(secs))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.laana"),
                database: "corpus.db".to_string(),
                vocabulary_file: None,
            },
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            backfill: BackfillConfig::default(),
        }
    }
}
