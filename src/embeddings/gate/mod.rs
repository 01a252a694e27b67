//! One-slot admission gate in front of the embedding backend.
//!
//! The backend drives a single accelerator, so every embedding call in the
//! process goes through one permit. Waiters are admitted in arrival order
//! (tokio's semaphore is fair). The permit travels into the blocking task,
//! so a caller that gives up (timeout, dropped request) never lets a second
//! call start while the first is still running on the backend.


use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{Embedder, normalize};
use crate::{CodeRagError, Result};

#[derive(Debug, Default)]
struct GateCounters {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    waiting: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    texts: AtomicU64,
}

/// Snapshot of gate activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateMetrics {
    pub in_flight: usize,
    /// Highest concurrency ever observed inside the backend; never above 1
    pub max_in_flight: usize,
    pub waiting: usize,
    pub completed: u64,
    pub failed: u64,
    pub texts: u64,
}

/// Decrements the waiting count however the wait ends
struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct EmbeddingGate {
    embedder: Arc<dyn Embedder>,
    permit: Arc<Semaphore>,
    counters: Arc<GateCounters>,
    query_timeout: Duration,
}

impl EmbeddingGate {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>, query_timeout: Duration) -> Self {
        Self {
            embedder,
            permit: Arc::new(Semaphore::new(1)),
            counters: Arc::new(GateCounters::default()),
            query_timeout,
        }
    }

    /// Deadline applied to interactive query work
    #[inline]
    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    #[inline]
    pub fn describe(&self) -> String {
        self.embedder.describe()
    }

    #[inline]
    pub fn metrics(&self) -> GateMetrics {
        GateMetrics {
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            max_in_flight: self.counters.max_in_flight.load(Ordering::SeqCst),
            waiting: self.counters.waiting.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            texts: self.counters.texts.load(Ordering::SeqCst),
        }
    }

    /// Embed a batch of chunk texts; vectors come back unit length, in input order
    ///
    /// # Arguments
    /// * `texts` - Texts to embed, usually the contextualized chunk texts of one file
    ///
    /// # Returns
    /// One vector per text, or an `Embedding` error for the whole batch
    #[inline]
    pub async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let permit = {
            self.counters.waiting.fetch_add(1, Ordering::SeqCst);
            let _waiting = WaitingGuard(&self.counters.waiting);
            Arc::clone(&self.permit)
                .acquire_owned()
                .await
                .map_err(|e| CodeRagError::Embedding(format!("Embedding gate closed: {}", e)))?
        };

        let embedder = Arc::clone(&self.embedder);
        let counters = Arc::clone(&self.counters);
        let expected = texts.len();
        let dimension = embedder.dimension();

        let outcome = tokio::task::spawn_blocking(move || {
            let _permit = permit;

            let running = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            counters.max_in_flight.fetch_max(running, Ordering::SeqCst);
            let result = embedder.embed_batch(&texts);
            counters.in_flight.fetch_sub(1, Ordering::SeqCst);

            match &result {
                Ok(_) => {
                    counters.completed.fetch_add(1, Ordering::SeqCst);
                    counters.texts.fetch_add(texts.len() as u64, Ordering::SeqCst);
                }
                Err(_) => {
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                }
            }
            result
        })
        .await
        .map_err(|e| CodeRagError::Embedding(format!("Embedding task failed: {}", e)))?;

        let mut vectors = outcome.map_err(|e| {
            warn!("Embedding failed: {:#}", e);
            CodeRagError::Embedding(format!("{:#}", e))
        })?;

        if vectors.len() != expected {
            return Err(CodeRagError::Embedding(format!(
                "Expected {} vectors, backend returned {}",
                expected,
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(CodeRagError::Embedding(format!(
                "Expected {} dimensions, backend returned {}",
                dimension,
                bad.len()
            )));
        }

        for vector in &mut vectors {
            normalize(vector);
        }
        debug!("Embedded {} texts", expected);
        Ok(vectors)
    }

    /// Embed a search query under the query timeout
    ///
    /// A timeout fails only this call; if the backend was already running,
    /// it finishes in the background while still holding the gate.
    #[inline]
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let embedded = tokio::time::timeout(self.query_timeout, self.embed(vec![query.to_string()]))
            .await
            .map_err(|_| {
                warn!("Query embedding timed out after {:?}", self.query_timeout);
                CodeRagError::Timeout(format!(
                    "query embedding did not finish within {:?}",
                    self.query_timeout
                ))
            })??;

        embedded
            .into_iter()
            .next()
            .ok_or_else(|| CodeRagError::Embedding("backend returned no vector".to_string()))
    }
}
