//! docpipe vector crate - feature-hashing embedder and the dedup index.
//!
//! Provides the `Embedder` that turns token streams into unit vectors and
//! the `EmbeddingIndex` that decides, under concurrent use, whether an
//! embedded document duplicates one it has already stored.

pub mod embedding;
pub mod index;

pub use embedding::{fnv1a_64, normalize, Embedder};
pub use index::{EmbeddingIndex, SearchHit};
