use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// =============================================================================
// Ingest
// =============================================================================

/// A request to read one byte range of a source file as a document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLoadingConfig {
    /// Document identifier, e.g. `doc-42`.
    pub id: String,
    /// Source file to read from.
    pub file_path: PathBuf,
    /// Byte offset of the first byte to read.
    pub offset: u64,
    /// Maximum number of bytes to read.
    pub text_size: usize,
}

/// Raw document text as produced by the ingest stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
}

// =============================================================================
// Tokenize
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    pub term: String,
}

impl Token {
    pub fn new(term: impl Into<String>) -> Self {
        Self { term: term.into() }
    }
}

/// A document split into an ordered token stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedDoc {
    pub id: String,
    pub tokens: Vec<Token>,
}

// =============================================================================
// Embed / index
// =============================================================================

/// Fixed-length fingerprint of a document. Unit length unless the document
/// produced no nonzero bucket.
pub type Embedding = Vec<f32>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedDoc {
    pub id: String,
    pub embedding: Embedding,
}

/// Outcome of a dedup-and-index decision for one document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DedupResult {
    /// The document that was submitted.
    pub id: String,
    /// Whether a stored document was at least `threshold` similar.
    pub is_duplicate: bool,
    /// Most similar stored document, empty when the index was empty.
    pub nearest_id: String,
    /// Similarity to `nearest_id`, 0.0 when the index was empty.
    pub similarity: f32,
}
