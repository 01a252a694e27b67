// Similarity search over one project's store


use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::chunking::{Category, Chunk, Language};
use crate::database::VectorStoreRegistry;
use crate::database::lancedb::sql_literal;
use crate::embeddings::EmbeddingGate;
use crate::{CodeRagError, Result};

pub const DEFAULT_RESULTS: usize = 5;
pub const DEFAULT_ALL_RESULTS: usize = 10;
pub const MAX_RESULTS: usize = 100;
/// Extra candidates fetched so tie-breaking at the cut-off is stable
const CANDIDATE_MARGIN: usize = 10;

/// A search query and its filters
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub n: usize,
    pub language: Option<Language>,
    pub category: Option<Category>,
}

impl SearchRequest {
    #[inline]
    pub fn new(query: impl Into<String>, n: usize) -> Self {
        Self {
            query: query.into(),
            n,
            language: None,
            category: None,
        }
    }

    #[inline]
    pub fn with_language(mut self, language: Option<Language>) -> Self {
        self.language = language;
        self
    }

    #[inline]
    pub fn with_category(mut self, category: Option<Category>) -> Self {
        self.category = category;
        self
    }

    /// Reject malformed input before anything is embedded
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(CodeRagError::Protocol("query must not be empty".to_string()));
        }
        if !(1..=MAX_RESULTS).contains(&self.n) {
            return Err(CodeRagError::Protocol(format!(
                "n must be between 1 and {}, got {}",
                MAX_RESULTS, self.n
            )));
        }
        Ok(())
    }

    /// Metadata predicate applied inside the vector search
    #[inline]
    pub fn filter(&self) -> Option<String> {
        let mut clauses = Vec::new();
        if let Some(language) = self.language {
            clauses.push(format!("language = {}", sql_literal(language.as_str())));
        }
        if let Some(category) = self.category {
            clauses.push(format!("category = {}", sql_literal(category.as_str())));
        }
        (!clauses.is_empty()).then(|| clauses.join(" AND "))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f32,
}

/// Embeds queries and ranks stored chunks
pub struct SearchService {
    gate: EmbeddingGate,
    registry: Arc<VectorStoreRegistry>,
}

impl SearchService {
    #[inline]
    pub fn new(gate: EmbeddingGate, registry: Arc<VectorStoreRegistry>) -> Self {
        Self { gate, registry }
    }

    /// Up to `n` results for `request`, best first
    ///
    /// # Arguments
    /// * `root` - Project root whose store is searched
    /// * `request` - Query, result count and filters
    ///
    /// # Returns
    /// Results ordered by score, ties broken by chunk id. A project that was
    /// never indexed yields an empty list. Opening the store, embedding the
    /// query and the vector search share one deadline; exceeding it is a
    /// `Timeout` error.
    #[inline]
    pub async fn search(&self, root: &Path, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        request.validate()?;

        let deadline = self.gate.query_timeout();
        tokio::time::timeout(deadline, self.run(root, request))
            .await
            .map_err(|_| {
                warn!("Search in {} timed out after {:?}", root.display(), deadline);
                CodeRagError::Timeout(format!("search did not finish within {:?}", deadline))
            })?
    }

    async fn run(&self, root: &Path, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let Some(store) = self.registry.open_existing(root).await? else {
            debug!("No store under {}, returning no results", root.display());
            return Ok(Vec::new());
        };

        let vector = self.gate.embed_query(&request.query).await?;
        let filter = request.filter();
        let hits = store
            .search(&vector, request.n + CANDIDATE_MARGIN, filter.as_deref())
            .await?;

        let mut results: Vec<SearchResult> = hits
            .into_iter()
            .map(|hit| SearchResult {
                chunk: hit.chunk,
                score: hit.score,
            })
            .collect();
        rank(&mut results);
        results.truncate(request.n);

        debug!(
            "Query {:?} returned {} results (filter {:?})",
            request.query,
            results.len(),
            filter
        );
        Ok(results)
    }
}

/// Sort by descending score, then ascending chunk id
#[inline]
pub fn rank(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}
