use crate::embedding::EmbeddingError;
use crate::retrieval::SearchError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for lexcol
#[derive(Error, Debug)]
pub enum LexError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Embedding provider errors, including fatal shape mismatches
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Vector search service errors
    #[error("Vector search error in collection '{collection}': {message}")]
    VectorSearch { collection: String, message: String },

    /// Reranker errors
    #[error("Reranking error: {0}")]
    Rerank(String),

    /// Citation graph could not be loaded
    #[error("Citation graph error: {0}")]
    Graph(String),

    /// Service errors
    #[error("Service error: {0}")]
    Service(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<SearchError> for LexError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::EmbeddingError(e) => LexError::Embedding(e),
            SearchError::VectorSearchError {
                collection,
                message,
            } => LexError::VectorSearch {
                collection,
                message,
            },
            SearchError::RerankingError(message) => LexError::Rerank(message),
            SearchError::InvalidQuery(message) => LexError::Service(message),
        }
    }
}

/// Result type for lexcol operations
pub type Result<T> = std::result::Result<T, LexError>;
