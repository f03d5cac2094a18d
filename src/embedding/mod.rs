/// Query embedding
///
/// - EmbeddingProvider trait for abstraction over local and remote models
/// - HttpEmbeddingProvider for a hosted embedding service
/// - FastEmbedProvider for local embedding
/// - EmbeddingCache memoizing query vectors with bounded LRU eviction
mod cache;
mod provider;

pub use cache::{cache_key, normalize_text, CacheStats, EmbeddingCache, DEFAULT_CACHE_CAPACITY};
pub use provider::{
    EmbedOptions, EmbeddingError, EmbeddingProvider, FastEmbedProvider, HttpEmbeddingProvider,
    InputType, ProviderOutput, SparseVector,
};

use crate::config::EmbeddingConfig;
use std::sync::Arc;

/// Build the provider selected by `config.provider` ("http" or "fastembed")
pub fn build_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.provider.as_str() {
        "http" => Ok(Arc::new(HttpEmbeddingProvider::new(
            config.endpoint.clone(),
            config.model.clone(),
            config.dimension,
            &config.api_key_env,
        )?)),
        "fastembed" => {
            let provider = FastEmbedProvider::new(&config.model)?;
            if provider.dimension() != config.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: config.dimension,
                    actual: provider.dimension(),
                });
            }
            Ok(Arc::new(provider))
        }
        other => Err(EmbeddingError::InitializationError(format!(
            "Unknown embedding provider '{}'",
            other
        ))),
    }
}

/// Build the shared query cache on top of the configured provider
pub fn build_cache(config: &EmbeddingConfig) -> Result<EmbeddingCache, EmbeddingError> {
    let provider = build_provider(config)?;
    tracing::info!(
        provider = %config.provider,
        model = %provider.model_name(),
        capacity = config.cache_capacity,
        "Embedding cache initialized"
    );
    Ok(EmbeddingCache::new(
        provider,
        config.cache_capacity,
        config.truncate,
    ))
}
