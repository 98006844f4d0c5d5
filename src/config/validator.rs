use crate::config::{parse_duration, Config};
use crate::error::{LaanaError, Result, ValidationError};
use crate::vector::ModelTier;

const PROVIDERS: [&str; 3] = ["http", "local", "deterministic"];
const BACKENDS: [&str; 3] = ["document_store", "relational", "embedded"];
const CURSORS: [&str; 2] = ["keyset", "leased"];
const TARGETS: [&str; 2] = ["document", "sentence"];

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_search(config, &mut errors);
        Self::validate_backfill(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LaanaError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }
        if config.storage.database.is_empty() {
            errors.push(ValidationError::new(
                "storage.database",
                "Database file name cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let embedding = &config.embedding;
        Self::check_one_of(
            "embedding.provider",
            &embedding.provider,
            &PROVIDERS,
            errors,
        );

        if embedding.provider == "http" && !embedding.service_url.starts_with("http") {
            errors.push(ValidationError::new(
                "embedding.service_url",
                format!("Service URL must be http(s), got '{}'", embedding.service_url),
            ));
        }

        if embedding.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "embedding.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }

        if embedding.small_model.is_empty() || embedding.large_model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.small_model",
                "Model identifiers cannot be empty",
            ));
        }
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        let search = &config.search;
        Self::check_one_of("search.backend", &search.backend, &BACKENDS, errors);

        if search.near_window == 0 {
            errors.push(ValidationError::new(
                "search.near_window",
                "Near window must be at least 1",
            ));
        }

        if search.default_k == 0 {
            errors.push(ValidationError::new(
                "search.default_k",
                "Default k must be greater than 0",
            ));
        }

        if search.knn_candidate_multiplier == 0 || search.hybrid_candidate_multiplier == 0 {
            errors.push(ValidationError::new(
                "search.knn_candidate_multiplier",
                "Candidate multipliers must be greater than 0",
            ));
        }

        let highlight = &search.highlight;
        if highlight.start_marker.is_empty()
            || highlight.end_marker.is_empty()
            || highlight.start_marker == highlight.end_marker
        {
            errors.push(ValidationError::new(
                "search.highlight",
                "Highlight markers must be non-empty and distinct",
            ));
        }

        if let Some(weights) = &search.weights {
            if weights.text < 0.0 || weights.vector < 0.0 || weights.quality < 0.0 {
                errors.push(ValidationError::new(
                    "search.weights",
                    "Weights cannot be negative",
                ));
            }
        }
    }

    fn validate_backfill(config: &Config, errors: &mut Vec<ValidationError>) {
        let backfill = &config.backfill;

        if backfill.batch_size == 0 {
            errors.push(ValidationError::new(
                "backfill.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if backfill.concurrency == 0 {
            errors.push(ValidationError::new(
                "backfill.concurrency",
                "Concurrency must be greater than 0",
            ));
        }

        Self::check_one_of("backfill.cursor", &backfill.cursor, &CURSORS, errors);
        Self::check_one_of("backfill.target", &backfill.target, &TARGETS, errors);

        if ModelTier::parse(&backfill.tier).is_none() {
            errors.push(ValidationError::new(
                "backfill.tier",
                format!("Tier must be 'small' or 'large', got '{}'", backfill.tier),
            ));
        }

        if parse_duration(&backfill.keep_alive).is_none() {
            errors.push(ValidationError::new(
                "backfill.keep_alive",
                format!("Invalid duration format: {}", backfill.keep_alive),
            ));
        }

        if backfill.cursor == "leased" && config.search.backend != "document_store" {
            errors.push(ValidationError::new(
                "backfill.cursor",
                "Leased cursors require the document_store backend",
            ));
        }
        if backfill.cursor == "keyset" && config.search.backend == "document_store" {
            errors.push(ValidationError::new(
                "backfill.cursor",
                "The document_store backend is traversed with the leased cursor",
            ));
        }
    }

    fn check_one_of(path: &str, value: &str, allowed: &[&str], errors: &mut Vec<ValidationError>) {
        if !allowed.contains(&value) {
            errors.push(ValidationError::new(
                path,
                format!("Must be one of {:?}, got '{}'", allowed, value),
            ));
        }
    }
}
