//! Feature-hashed document embeddings.
//!
//! Each token is hashed with 64-bit FNV-1a. The hash picks a bucket
//! (`hash % dimensions`) and a sign (low bit clear is +1, set is -1), and
//! the signed unit is accumulated into that bucket. The finished vector is
//! L2-normalized so the index can compare documents with a plain dot
//! product. There is no vocabulary; distinct terms that land in the same
//! bucket simply collide.

use docpipe_core::error::{DocPipeError, Result};
use docpipe_core::types::{EmbeddedDoc, Embedding, Token, TokenizedDoc};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a hash of `bytes`.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// L2-normalize `vec` in place.
///
/// A zero vector is left as all zeros.
pub fn normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vec.iter_mut() {
            *val /= norm;
        }
    }
}

/// Maps token streams to fixed-dimension unit vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Embedder {
    dimensions: usize,
}

impl Embedder {
    /// Create an embedder producing vectors of length `dimensions`.
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(DocPipeError::Config(
                "embedding dimensions must be at least 1".to_string(),
            ));
        }
        Ok(Self { dimensions })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed a token stream. Accumulation is order-independent.
    pub fn embed(&self, tokens: &[Token]) -> Embedding {
        let mut vec = vec![0.0f32; self.dimensions];
        let dims = self.dimensions as u64;

        for token in tokens {
            let hash = fnv1a_64(token.term.as_bytes());
            let bucket = (hash % dims) as usize;
            let sign = if hash & 1 == 0 { 1.0 } else { -1.0 };
            vec[bucket] += sign;
        }

        normalize(&mut vec);
        vec
    }

    /// Stage transform: embed a tokenized document.
    pub fn embed_doc(&self, doc: TokenizedDoc) -> Result<EmbeddedDoc> {
        let embedding = self.embed(&doc.tokens);
        Ok(EmbeddedDoc {
            id: doc.id,
            embedding,
        })
    }
}
