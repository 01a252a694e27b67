//! Deterministic bag-of-words embedder.
//!
//! Each token (identifiers are also split on camelCase humps) is hashed
//! into one of `dimension` buckets with a hash-derived sign, then the vector
//! is L2-normalised. Texts sharing vocabulary land close together, which is
//! enough for offline smoke runs and for tests that need stable vectors
//! without a model server.


use super::{Embedder, normalize};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    #[inline]
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for token in tokens(text) {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Lowercased alphanumeric words plus the camelCase parts of each word
pub(crate) fn tokens(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
    {
        let parts = camel_parts(word);
        if parts.len() > 1 {
            out.extend(parts.iter().map(|part| part.to_lowercase()));
        }
        out.push(word.to_lowercase());
    }
    out
}

fn camel_parts(word: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut previous_lower = false;

    for (index, c) in word.char_indices() {
        if c.is_uppercase() && previous_lower {
            parts.push(&word[start..index]);
            start = index;
        }
        previous_lower = c.is_lowercase() || c.is_ascii_digit();
    }
    parts.push(&word[start..]);
    parts
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn describe(&self) -> String {
        format!("hashing embedder ({} dimensions)", self.dimension)
    }
}
