//! Configuration management for lexcol
//!
//! Loads the TOML config, applies `LEXCOL_SECTION__KEY` environment overrides
//! and validates the result before any component is built from it.

use crate::error::{LexError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub embedding: EmbeddingConfig,
    pub router: RouterConfig,
    pub graph: GraphConfig,
    pub context: ContextConfig,
    pub rate_limit: RateLimitConfig,
    pub retrieval: RetrievalConfig,
    pub service: ServiceConfig,
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

/// Embedding provider and query cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "http" or "fastembed"
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    pub dimension: usize,
    pub api_key_env: String,
    pub cache_capacity: usize,
    pub truncate: bool,
}

/// One intent classifier: a regex over the lowercased query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub name: String,
    pub collection: String,
    pub pattern: String,
}

/// Collection routing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub default_collection: String,
    /// All searchable collections, in fallback order
    pub collections: Vec<String>,
    /// Checked in order; the first match wins
    pub classifiers: Vec<ClassifierConfig>,
    /// Merge weight lost per priority position
    pub weight_step: f32,
    pub min_weight: f32,
}

/// Citation graph location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub path: PathBuf,
}

/// Context assembly limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    pub token_budget: usize,
    /// How many leading documents are enriched from the citation graph
    pub graph_top_documents: usize,
    pub max_related_per_article: usize,
}

/// Sliding-window throttle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_ms: i64,
    pub max_requests: usize,
    pub max_entries: usize,
    pub sweep_interval: String,
}

/// Vector search fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_k_per_collection: usize,
    /// Candidates kept after merging collections, before reranking
    pub top_k: usize,
    #[serde(default)]
    pub enable_reranking: bool,
    #[serde(default = "default_reranker_model")]
    pub reranker_model: String,
}

fn default_reranker_model() -> String {
    "BAAI/bge-reranker-base".to_string()
}

/// Unix socket service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub max_connections: usize,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LexError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| LexError::Io {
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
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LexError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| LexError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: LEXCOL_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("LEXCOL_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "EMBEDDING__PROVIDER" => self.embedding.provider = value.to_string(),
            "EMBEDDING__ENDPOINT" => self.embedding.endpoint = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__CACHE_CAPACITY" => {
                self.embedding.cache_capacity = parse_env(path, value)?;
            }
            "CONTEXT__TOKEN_BUDGET" => {
                self.context.token_budget = parse_env(path, value)?;
            }
            "RATE_LIMIT__MAX_REQUESTS" => {
                self.rate_limit.max_requests = parse_env(path, value)?;
            }
            "RATE_LIMIT__WINDOW_MS" => {
                self.rate_limit.window_ms = parse_env(path, value)?;
            }
            "GRAPH__PATH" => self.graph.path = PathBuf::from(value),
            "SERVICE__SOCKET_PATH" => self.service.socket_path = PathBuf::from(value),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| LexError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("lexcol").join("config.toml"))
    }

    /// Sweep interval of the rate limiter as a [`Duration`]
    pub fn sweep_interval(&self) -> Result<Duration> {
        parse_duration(&self.rate_limit.sweep_interval).ok_or_else(|| {
            LexError::InvalidConfigValue {
                path: "rate_limit.sweep_interval".to_string(),
                message: format!("Invalid duration: {}", self.rate_limit.sweep_interval),
            }
        })
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| LexError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Parse a duration string such as "500ms", "30s", "5m" or "1h".
/// A bare number is read as seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();

    // "ms" before "s" because "ms" ends with "s"
    if let Some(ms) = value.strip_suffix("ms") {
        ms.trim().parse().ok().map(Duration::from_millis)
    } else if let Some(secs) = value.strip_suffix('s') {
        secs.trim().parse().ok().map(Duration::from_secs)
    } else if let Some(mins) = value.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = value.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .ok()
            .map(|h| Duration::from_secs(h * 3600))
    } else {
        value.parse().ok().map(Duration::from_secs)
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "http".to_string(),
            endpoint: "https://api.voyageai.com/v1/embeddings".to_string(),
            model: "voyage-multilingual-2".to_string(),
            dimension: 1024,
            api_key_env: "VOYAGE_API_KEY".to_string(),
            cache_capacity: 500,
            truncate: true,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        let classifier = |name: &str, collection: &str, pattern: &str| ClassifierConfig {
            name: name.to_string(),
            collection: collection.to_string(),
            pattern: pattern.to_string(),
        };

        Self {
            default_collection: "estatuto".to_string(),
            collections: ["estatuto", "doctrina", "jurisprudencia", "decretos", "resoluciones", "leyes"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            classifiers: vec![
                classifier(
                    "doctrina",
                    "doctrina",
                    r"\b(concepto|oficio|doctrina|dian conceptu|interpretaci[oó]n oficial)",
                ),
                classifier(
                    "jurisprudencia",
                    "jurisprudencia",
                    r"\b(sentencia|corte constitucional|consejo de estado|jurisprudencia|fallo|exequib|inexequib)",
                ),
                classifier(
                    "decreto",
                    "decretos",
                    r"\b(decreto|reglamenta|dur\b|1625 de 2016)",
                ),
                classifier(
                    "resolucion",
                    "resoluciones",
                    r"\b(resoluci[oó]n|formulario|prescrib)",
                ),
                classifier(
                    "reforma",
                    "leyes",
                    r"\b(ley \d+|decreto ley|reforma tributaria|ley de financiamiento|ley de crecimiento|exposici[oó]n de motivos)",
                ),
            ],
            weight_step: 0.1,
            min_weight: 0.5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.lexcol");

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            embedding: EmbeddingConfig::default(),
            router: RouterConfig::default(),
            graph: GraphConfig {
                path: data_dir.join("citation_graph.json"),
            },
            context: ContextConfig {
                token_budget: 6000,
                graph_top_documents: 5,
                max_related_per_article: 3,
            },
            rate_limit: RateLimitConfig {
                window_ms: 60_000,
                max_requests: 20,
                max_entries: 10_000,
                sweep_interval: "5m".to_string(),
            },
            retrieval: RetrievalConfig {
                top_k_per_collection: 10,
                top_k: 20,
                enable_reranking: false,
                reranker_model: default_reranker_model(),
            },
            service: ServiceConfig {
                socket_path: data_dir.join("lexcol.sock"),
                max_connections: 64,
            },
        }
    }
}
