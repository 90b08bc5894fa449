//! Sentence-boundary text chunker.
//!
//! Splits issue text into segments that stay within an approximate token
//! budget so each piece fits the embedding model's input window. Splitting
//! happens on the literal sentence delimiter `". "`; tokens are estimated as
//! whitespace-separated words.
//!
//! A single sentence longer than the budget is kept whole and produces an
//! oversized chunk. The budget is a target, not a hard limit.

/// Default token budget per chunk.
pub const DEFAULT_MAX_TOKENS: usize = 200;

const SENTENCE_DELIMITER: &str = ". ";

/// Approximate token count: number of whitespace-separated words.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split text into chunks of whole sentences, each at most `max_tokens`
/// estimated tokens unless a single sentence is larger on its own.
///
/// Sentences within a chunk are joined with a single space. Empty or
/// whitespace-only input yields no chunks.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut token_count = 0usize;

    for fragment in text.split(SENTENCE_DELIMITER) {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            continue;
        }

        let estimate = estimate_tokens(fragment);
        if token_count + estimate > max_tokens && !current.is_empty() {
            chunks.push(current.join(" "));
            current.clear();
            token_count = 0;
        }

        current.push(fragment);
        token_count += estimate;
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}
