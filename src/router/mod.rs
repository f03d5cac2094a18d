//! Collection routing by query intent
//!
//! Classifiers are compiled once and checked in declaration order against the
//! lowercased query. The first match puts its collection in front; everything
//! else stays searchable behind it. Overlapping patterns ("decreto" vs.
//! "decreto ley") are resolved by that order alone.

use crate::config::RouterConfig;
use crate::error::{LexError, Result};
use regex::Regex;
use tracing::debug;

/// Compiled intent classifier
#[derive(Debug, Clone)]
pub struct Classifier {
    pub name: String,
    pub collection: String,
    pub regex: Regex,
}

/// Orders corpus collections for fan-out and merge weighting
#[derive(Debug, Clone)]
pub struct NamespaceRouter {
    default_collection: String,
    collections: Vec<String>,
    classifiers: Vec<Classifier>,
    weight_step: f32,
    min_weight: f32,
}

impl NamespaceRouter {
    /// Compile the classifiers in `config`
    pub fn from_config(config: &RouterConfig) -> Result<Self> {
        if !config.collections.contains(&config.default_collection) {
            return Err(LexError::Config(format!(
                "Default collection '{}' is not a configured collection",
                config.default_collection
            )));
        }

        let mut classifiers = Vec::with_capacity(config.classifiers.len());
        for classifier in &config.classifiers {
            if !config.collections.contains(&classifier.collection) {
                return Err(LexError::Config(format!(
                    "Classifier '{}' targets unknown collection '{}'",
                    classifier.name, classifier.collection
                )));
            }
            let regex = Regex::new(&classifier.pattern).map_err(|e| {
                LexError::Config(format!(
                    "Invalid pattern for classifier '{}': {}",
                    classifier.name, e
                ))
            })?;
            classifiers.push(Classifier {
                name: classifier.name.clone(),
                collection: classifier.collection.clone(),
                regex,
            });
        }

        Ok(Self {
            default_collection: config.default_collection.clone(),
            collections: config.collections.clone(),
            classifiers,
            weight_step: config.weight_step,
            min_weight: config.min_weight,
        })
    }

    /// First classifier matching the query, if any
    pub fn classify(&self, query: &str) -> Option<&Classifier> {
        let lowered = query.to_lowercase();
        self.classifiers.iter().find(|c| c.regex.is_match(&lowered))
    }

    /// Collections in search priority order. Every configured collection is
    /// returned exactly once.
    pub fn prioritize_collections(&self, query: &str) -> Vec<String> {
        let mut ordered = Vec::with_capacity(self.collections.len());

        if let Some(classifier) = self.classify(query) {
            debug!(
                classifier = %classifier.name,
                collection = %classifier.collection,
                "query routed"
            );
            ordered.push(classifier.collection.clone());
        }

        if !ordered.contains(&self.default_collection) {
            ordered.push(self.default_collection.clone());
        }

        for collection in &self.collections {
            if !ordered.contains(collection) {
                ordered.push(collection.clone());
            }
        }

        ordered
    }

    /// Score multiplier for results from the collection at `position` in the
    /// priority order
    pub fn merge_weight(&self, position: usize) -> f32 {
        (1.0 - position as f32 * self.weight_step).max(self.min_weight)
    }

    pub fn default_collection(&self) -> &str {
        &self.default_collection
    }

    pub fn collections(&self) -> &[String] {
        &self.collections
    }
}
