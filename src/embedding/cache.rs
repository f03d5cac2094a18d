//! Memoizing front for the embedding provider
//!
//! Keys are BLAKE3 hashes of the NFC-normalized text. The map is bounded and
//! evicts the least recently used vector once full.

use super::{EmbedOptions, EmbeddingError, EmbeddingProvider};
use crate::lru::LruMap;
use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

/// Default number of cached query vectors
pub const DEFAULT_CACHE_CAPACITY: usize = 500;

/// Cache counters for observability
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub capacity: usize,
}

struct CacheState {
    entries: LruMap<String, Vec<f32>>,
    hits: u64,
    misses: u64,
}

/// Bounded LRU cache of query embeddings shared by all requests
pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    state: Mutex<CacheState>,
    capacity: usize,
    truncate: bool,
}

/// Normalize text to NFC
pub fn normalize_text(text: &str) -> String {
    text.nfc().collect()
}

/// Cache key for already-normalized text
pub fn cache_key(normalized: &str) -> String {
    blake3::hash(normalized.as_bytes()).to_hex().to_string()
}

impl EmbeddingCache {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, capacity: usize, truncate: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            provider,
            state: Mutex::new(CacheState {
                entries: LruMap::with_capacity(capacity),
                hits: 0,
                misses: 0,
            }),
            capacity,
            truncate,
        }
    }

    /// Embed a single query, serving repeated text from the cache
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let normalized = normalize_text(text);
        if normalized.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }
        let key = cache_key(&normalized);

        {
            let mut state = self.lock();
            if let Some(vector) = state.entries.get(&key).cloned() {
                state.hits += 1;
                debug!(key = %&key[..12], "embedding cache hit");
                return Ok(vector);
            }
            state.misses += 1;
        }

        debug!(key = %&key[..12], "embedding cache miss");

        let output = self
            .provider
            .embed(&[normalized], EmbedOptions::query(self.truncate))
            .await?;
        let mut vectors = output.into_dense(1, self.provider.dimension())?;
        let vector = vectors.pop().ok_or_else(|| {
            EmbeddingError::ProviderShape("provider returned no vectors".to_string())
        })?;

        self.insert(key, vector.clone());
        Ok(vector)
    }

    /// Embed several queries with at most one provider call. Results keep the
    /// order of `texts`.
    pub async fn embed_queries(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut normalized = Vec::with_capacity(texts.len());
        for text in texts {
            let n = normalize_text(text);
            if n.trim().is_empty() {
                return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
            }
            normalized.push(n);
        }
        let keys: Vec<String> = normalized.iter().map(|n| cache_key(n)).collect();

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        // key -> position in the provider request
        let mut pending: AHashMap<String, usize> = AHashMap::new();
        let mut request: Vec<String> = Vec::new();

        {
            let mut state = self.lock();
            for (i, key) in keys.iter().enumerate() {
                if let Some(vector) = state.entries.get(key).cloned() {
                    state.hits += 1;
                    results[i] = Some(vector);
                } else {
                    state.misses += 1;
                    if !pending.contains_key(key) {
                        pending.insert(key.clone(), request.len());
                        request.push(normalized[i].clone());
                    }
                }
            }
        }

        debug!(
            total = texts.len(),
            uncached = request.len(),
            "embedding batch partitioned"
        );

        if !request.is_empty() {
            let output = self
                .provider
                .embed(&request, EmbedOptions::query(self.truncate))
                .await?;
            let fetched = output.into_dense(request.len(), self.provider.dimension())?;

            // input order, so the first uncached text is the least recent
            let mut state = self.lock();
            let mut stored = AHashSet::new();
            for (i, key) in keys.iter().enumerate() {
                if results[i].is_some() {
                    continue;
                }
                if let Some(&pos) = pending.get(key) {
                    if stored.insert(pos) {
                        Self::insert_locked(&mut state, self.capacity, key.clone(), fetched[pos].clone());
                    }
                    results[i] = Some(fetched[pos].clone());
                }
            }
        }

        results
            .into_iter()
            .map(|r| {
                r.ok_or_else(|| {
                    EmbeddingError::ProviderShape("missing vector for batch input".to_string())
                })
            })
            .collect()
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let total = state.hits + state.misses;
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                state.hits as f64 / total as f64
            },
            size: state.entries.len(),
            capacity: self.capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `text` currently has a cached vector. Does not touch recency.
    pub fn contains(&self, text: &str) -> bool {
        let key = cache_key(&normalize_text(text));
        self.lock().entries.contains_key(&key)
    }

    /// Drop all cached vectors; counters are kept
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    fn insert(&self, key: String, vector: Vec<f32>) {
        let mut state = self.lock();
        Self::insert_locked(&mut state, self.capacity, key, vector);
    }

    fn insert_locked(state: &mut CacheState, capacity: usize, key: String, vector: Vec<f32>) {
        if !state.entries.contains_key(&key) && state.entries.len() >= capacity {
            if let Some((evicted, _)) = state.entries.pop_front() {
                debug!(key = %&evicted[..12], "evicted least recently used embedding");
            }
        }
        // Concurrent misses on the same text compute the same vector
        state.entries.push_back(key, vector);
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
