/// Embedding provider trait with FastEmbed and HTTP implementations
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The provider answered with something other than one dense vector per
    /// input. Never retried.
    #[error("Unexpected embedding shape: {0}")]
    ProviderShape(String),
}

/// Whether the text being embedded is a search query or corpus content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Query,
    Document,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Query => "query",
            InputType::Document => "document",
        }
    }
}

/// Per-call options forwarded to the provider
#[derive(Debug, Clone, Copy)]
pub struct EmbedOptions {
    pub input_type: InputType,
    /// Let the provider truncate over-long inputs instead of failing
    pub truncate: bool,
}

impl EmbedOptions {
    pub fn query(truncate: bool) -> Self {
        Self {
            input_type: InputType::Query,
            truncate,
        }
    }
}

/// Sparse representation some providers return instead of dense vectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

/// Raw provider output before shape validation
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutput {
    Dense(Vec<Vec<f32>>),
    Sparse(Vec<SparseVector>),
}

impl ProviderOutput {
    /// Accept only dense output with `count` vectors of `dimension` floats
    pub fn into_dense(
        self,
        count: usize,
        dimension: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let vectors = match self {
            ProviderOutput::Dense(vectors) => vectors,
            ProviderOutput::Sparse(vectors) => {
                return Err(EmbeddingError::ProviderShape(format!(
                    "expected dense vectors, got {} sparse vectors",
                    vectors.len()
                )));
            }
        };

        if vectors.len() != count {
            return Err(EmbeddingError::ProviderShape(format!(
                "expected {} vectors, got {}",
                count,
                vectors.len()
            )));
        }

        for vector in &vectors {
            if vector.len() != dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
        }

        Ok(vectors)
    }
}

/// Trait for embedding providers
///
/// Allows abstraction over local models and remote embedding services.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts in one call
    async fn embed(
        &self,
        texts: &[String],
        options: EmbedOptions,
    ) -> Result<ProviderOutput, EmbeddingError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// FastEmbed provider for local embedding generation
///
/// Uses all-MiniLM-L6-v2 model (384 dimensions) by default.
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    /// Create a new FastEmbed provider with the specified model
    ///
    /// **Important**: Models are downloaded on-demand to `~/.cache/huggingface/`
    /// on first use. The multilingual model handles Spanish legal text best:
    /// - all-MiniLM-L6-v2: 90MB (384 dims)
    /// - multilingual-e5-small: 470MB (384 dims)
    /// - multilingual-e5-base: 1.1GB (768 dims)
    pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
        let (embedding_model, dimension) = match model_name {
            "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
            "multilingual-e5-small" => (EmbeddingModel::MultilingualE5Small, 384),
            "multilingual-e5-base" => (EmbeddingModel::MultilingualE5Base, 768),
            _ => {
                return Err(EmbeddingError::InitializationError(format!(
                    "Unsupported model: {}. Supported: all-MiniLM-L6-v2, multilingual-e5-small, multilingual-e5-base",
                    model_name
                )));
            }
        };

        tracing::info!(
            "Initializing local embedding model: {} ({}D)",
            model_name,
            dimension
        );

        let init_options = InitOptions::new(embedding_model).with_show_download_progress(true);

        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
            dimension,
        })
    }

    /// Create provider with default model (all-MiniLM-L6-v2)
    pub fn with_default_model() -> Result<Self, EmbeddingError> {
        Self::new("all-MiniLM-L6-v2")
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(
        &self,
        texts: &[String],
        options: EmbedOptions,
    ) -> Result<ProviderOutput, EmbeddingError> {
        if texts.is_empty() {
            return Ok(ProviderOutput::Dense(Vec::new()));
        }
        if texts.iter().any(|t| t.is_empty()) {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        // e5 models expect role prefixes
        let inputs: Vec<String> = if self.model_name.starts_with("multilingual-e5") {
            let prefix = match options.input_type {
                InputType::Query => "query: ",
                InputType::Document => "passage: ",
            };
            texts.iter().map(|t| format!("{}{}", prefix, t)).collect()
        } else {
            texts.to_vec()
        };

        let model = Arc::clone(&self.model);
        let embeddings = tokio::task::spawn_blocking(move || model.embed(inputs, None))
            .await
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        Ok(ProviderOutput::Dense(embeddings))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: EmbeddingPayload,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbeddingPayload {
    Dense(Vec<f32>),
    Sparse(SparseVector),
    Unknown(serde_json::Value),
}

/// Remote embedding service speaking the common `/embeddings` JSON shape
pub struct HttpEmbeddingProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model_name: String,
    dimension: usize,
}

impl HttpEmbeddingProvider {
    /// Create a client for `endpoint`; the API key is read from `api_key_env`
    /// when that variable is set.
    pub fn new(
        endpoint: impl Into<String>,
        model_name: impl Into<String>,
        dimension: usize,
        api_key_env: &str,
    ) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        let api_key = std::env::var(api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(
                "Environment variable {} is not set; embedding requests are unauthenticated",
                api_key_env
            );
        }

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            model_name: model_name.into(),
            dimension,
        })
    }

    fn parse_response(response: EmbeddingResponse) -> Result<ProviderOutput, EmbeddingError> {
        let mut data = response.data;
        data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));

        let mut dense = Vec::with_capacity(data.len());
        let mut sparse = Vec::new();
        for datum in data {
            match datum.embedding {
                EmbeddingPayload::Dense(v) => dense.push(v),
                EmbeddingPayload::Sparse(v) => sparse.push(v),
                EmbeddingPayload::Unknown(value) => {
                    return Err(EmbeddingError::ProviderShape(format!(
                        "unrecognized embedding payload: {}",
                        value
                    )));
                }
            }
        }

        match (dense.is_empty(), sparse.is_empty()) {
            (_, true) => Ok(ProviderOutput::Dense(dense)),
            (true, false) => Ok(ProviderOutput::Sparse(sparse)),
            (false, false) => Err(EmbeddingError::ProviderShape(
                "mixed dense and sparse embeddings".to_string(),
            )),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(
        &self,
        texts: &[String],
        options: EmbedOptions,
    ) -> Result<ProviderOutput, EmbeddingError> {
        if texts.is_empty() {
            return Ok(ProviderOutput::Dense(Vec::new()));
        }

        let body = json!({
            "input": texts,
            "model": self.model_name,
            "input_type": options.input_type.as_str(),
            "truncation": options.truncate,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmbeddingError::GenerationError(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::GenerationError(format!(
                "embedding service returned {}",
                response.status()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::ProviderShape(format!("invalid response body: {}", e)))?;

        Self::parse_response(parsed)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
