//! Lexcol - retrieval and context assembly for Colombian tax law
//!
//! Routes questions to corpus collections, caches query embeddings, enriches
//! retrieved documents from a citation graph, throttles clients and assembles
//! token-budgeted, cited context for a language model.

pub mod cli;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod lru;
pub mod ratelimit;
pub mod retrieval;
pub mod router;
pub mod service;

pub use error::{LexError, Result};
