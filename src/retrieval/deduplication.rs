//! Result deduplication by chunk id

use crate::context::Chunk;
use ahash::AHashSet;

/// Drop repeated chunk ids, keeping the first occurrence.
///
/// Collections can index the same chunk; with input sorted by score the
/// kept instance is the highest-scored one and order is preserved.
pub fn deduplicate_chunks(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut seen: AHashSet<String> = AHashSet::new();

    chunks
        .into_iter()
        .filter(|chunk| seen.insert(chunk.id.clone()))
        .collect()
}
