// LanceDB vector database module
// Per-project chunk vectors plus a copy of each chunk's metadata


pub mod vector_store;

use crate::chunking::Chunk;

pub use vector_store::{VectorHit, VectorStore};

/// Name of the table holding chunk vectors inside a project store
pub const CHUNKS_TABLE: &str = "chunks";

/// Embedded chunk as persisted in the vector table
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub chunk: Chunk,
    /// Unit-length embedding of `chunk.contextualized`
    pub vector: Vec<f32>,
}

/// Quote a string literal for a LanceDB filter expression
#[inline]
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Filter expression matching every row owned by `path`
#[inline]
pub fn path_predicate(path: &str) -> String {
    format!("path = {}", sql_literal(path))
}
