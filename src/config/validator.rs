use crate::config::{parse_duration, Config};
use crate::error::{LexError, Result, ValidationError};
use std::collections::HashSet;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem before failing
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_router(config, &mut errors);
        Self::validate_context(config, &mut errors);
        Self::validate_rate_limit(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_service(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LexError::ConfigValidation { errors })
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

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let embedding = &config.embedding;

        let valid_providers = ["http", "fastembed"];
        if !valid_providers.contains(&embedding.provider.as_str()) {
            errors.push(ValidationError::new(
                "embedding.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    valid_providers, embedding.provider
                ),
            ));
        }

        if embedding.provider == "http" && embedding.endpoint.is_empty() {
            errors.push(ValidationError::new(
                "embedding.endpoint",
                "Endpoint is required for the http provider",
            ));
        }

        if embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            ));
        }

        if embedding.cache_capacity == 0 {
            errors.push(ValidationError::new(
                "embedding.cache_capacity",
                "Cache capacity must be greater than 0",
            ));
        }
    }

    fn validate_router(config: &Config, errors: &mut Vec<ValidationError>) {
        let router = &config.router;

        let mut seen = HashSet::new();
        for collection in &router.collections {
            if !seen.insert(collection.as_str()) {
                errors.push(ValidationError::new(
                    "router.collections",
                    format!("Duplicate collection: {}", collection),
                ));
            }
        }

        if !seen.contains(router.default_collection.as_str()) {
            errors.push(ValidationError::new(
                "router.default_collection",
                format!(
                    "Default collection '{}' is not listed in router.collections",
                    router.default_collection
                ),
            ));
        }

        for (i, classifier) in router.classifiers.iter().enumerate() {
            if !seen.contains(classifier.collection.as_str()) {
                errors.push(ValidationError::new(
                    format!("router.classifiers[{}].collection", i),
                    format!("Unknown collection: {}", classifier.collection),
                ));
            }
            if let Err(e) = regex::Regex::new(&classifier.pattern) {
                errors.push(ValidationError::new(
                    format!("router.classifiers[{}].pattern", i),
                    format!("Invalid regex: {}", e),
                ));
            }
        }

        if !(0.0..=1.0).contains(&router.weight_step) {
            errors.push(ValidationError::new(
                "router.weight_step",
                format!("Weight step must be between 0.0 and 1.0, got {}", router.weight_step),
            ));
        }

        if !(0.0..=1.0).contains(&router.min_weight) {
            errors.push(ValidationError::new(
                "router.min_weight",
                format!("Minimum weight must be between 0.0 and 1.0, got {}", router.min_weight),
            ));
        }
    }

    fn validate_context(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.context.token_budget == 0 {
            errors.push(ValidationError::new(
                "context.token_budget",
                "Token budget must be greater than 0",
            ));
        }
    }

    fn validate_rate_limit(config: &Config, errors: &mut Vec<ValidationError>) {
        let limits = &config.rate_limit;

        if limits.window_ms <= 0 {
            errors.push(ValidationError::new(
                "rate_limit.window_ms",
                "Window must be greater than 0",
            ));
        }

        if limits.max_requests == 0 {
            errors.push(ValidationError::new(
                "rate_limit.max_requests",
                "Max requests must be greater than 0",
            ));
        }

        if limits.max_entries == 0 {
            errors.push(ValidationError::new(
                "rate_limit.max_entries",
                "Max entries must be greater than 0",
            ));
        }

        match parse_duration(&limits.sweep_interval) {
            Some(d) if !d.is_zero() => {}
            _ => errors.push(ValidationError::new(
                "rate_limit.sweep_interval",
                format!("Invalid duration format: {}", limits.sweep_interval),
            )),
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.retrieval.top_k_per_collection == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k_per_collection",
                "top_k_per_collection must be greater than 0",
            ));
        }

        if config.retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }

        let valid_rerankers = ["BAAI/bge-reranker-base", "BAAI/bge-reranker-v2-m3"];
        if config.retrieval.enable_reranking
            && !valid_rerankers.contains(&config.retrieval.reranker_model.as_str())
        {
            errors.push(ValidationError::new(
                "retrieval.reranker_model",
                format!(
                    "Reranker model must be one of {:?}, got '{}'",
                    valid_rerankers, config.retrieval.reranker_model
                ),
            ));
        }
    }

    fn validate_service(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.service.socket_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "service.socket_path",
                "Socket path cannot be empty",
            ));
        }

        if config.service.max_connections == 0 {
            errors.push(ValidationError::new(
                "service.max_connections",
                "Max connections must be greater than 0",
            ));
        }
    }
}
