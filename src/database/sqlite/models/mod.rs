#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

use crate::chunking::{Category, Language};

/// One tracked source file; written last in a per-file commit, so its
/// presence means the file's vectors are complete for `content_hash`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path
    pub path: String,
    /// Hex SHA-256 of the file content
    pub content_hash: String,
    pub language: Language,
    pub category: Category,
    pub size: i64,
    pub chunk_count: i64,
    /// Strategy that produced the chunks
    pub chunker: String,
    pub indexed_at: DateTime<Utc>,
}

impl FileRecord {
    #[inline]
    pub fn is_current(&self, content_hash: &str) -> bool {
        self.content_hash == content_hash
    }
}

/// Per-language totals for statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageStats {
    pub language: Language,
    pub files: i64,
    pub chunks: i64,
}

/// Hex SHA-256 of `content`
#[inline]
pub fn content_hash(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    let mut hex = String::with_capacity(64);
    for byte in digest {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}
