//! File content to embedding-ready chunks.
//!
//! Chunking runs through an ordered chain of strategies. The first strategy
//! that supports the file's language and succeeds wins; a failing strategy
//! demotes the file to the next one. The last strategy (line windows) accepts
//! every file, so exhaustion is reported as a per-file error rather than
//! aborting a batch.


pub mod external;
pub mod grammar;
pub mod language;
pub mod window;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub use external::ExternalChunker;
pub use grammar::GrammarChunker;
pub use language::{Category, Language};
pub use window::WindowChunker;

/// Configuration for the chunking chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Ceiling on the raw text of any emitted chunk, in characters
    pub max_chunk_size: usize,
    /// Fragments smaller than this are folded into a neighbour when possible
    pub min_chunk_size: usize,
    /// Lines repeated between consecutive line windows
    pub overlap_lines: usize,
    /// Command line of the structural chunker subprocess; tier disabled when unset
    pub external_command: Option<Vec<String>>,
    pub external_timeout_seconds: u64,
    pub external_languages: Vec<Language>,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_chunk_size: 2000,
            min_chunk_size: 100,
            overlap_lines: 10,
            external_command: None,
            external_timeout_seconds: 30,
            external_languages: vec![
                Language::Java,
                Language::TypeScript,
                Language::JavaScript,
                Language::Python,
                Language::Rust,
                Language::Go,
            ],
        }
    }
}

/// A chunk ready for embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id, unique within the owning file's current content
    pub id: String,
    /// Absolute path of the owning file
    pub path: String,
    pub language: Language,
    pub category: Category,
    /// Raw source text, never longer than the configured ceiling
    pub text: String,
    /// Text actually embedded: location/scope preamble followed by the raw text
    pub contextualized: String,
    pub start_line: u32,
    pub end_line: u32,
    pub node_kind: String,
    pub scope: Vec<String>,
    pub imports: Vec<String>,
    pub signatures: Vec<String>,
    /// Name of the strategy that produced this chunk
    pub chunker: String,
}

/// Strategy output before ids, ceilings and preambles are applied
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkDraft {
    pub text: String,
    /// Preamble-enriched text when the strategy builds its own
    pub contextualized: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub node_kind: String,
    pub scope: Vec<String>,
    pub imports: Vec<String>,
    pub signatures: Vec<String>,
}

/// Input to a chunking strategy
#[derive(Debug, Clone, Copy)]
pub struct SourceFile<'a> {
    /// Absolute path
    pub path: &'a Path,
    /// Path shown in chunk preambles, usually relative to the project root
    pub display_path: &'a str,
    pub language: Language,
    pub content: &'a str,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkingError {
    #[error("{strategy} does not handle {language}")]
    Unsupported {
        strategy: &'static str,
        language: Language,
    },
    #[error("parse failed: {0}")]
    Parse(String),
    #[error("no structural boundaries found")]
    NoBoundaries,
    #[error("chunker timed out after {0:?}")]
    Timeout(Duration),
    #[error("chunker process failed: {0}")]
    Process(String),
    #[error("malformed chunker reply: {0}")]
    Protocol(String),
    #[error("strategy produced no chunks")]
    Empty,
    #[error("all chunking strategies failed: {}", format_demotions(.0))]
    Exhausted(Vec<Demotion>),
}

/// One strategy that gave up on a file, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demotion {
    pub strategy: &'static str,
    pub reason: String,
}

fn format_demotions(demotions: &[Demotion]) -> String {
    demotions
        .iter()
        .map(|d| format!("{}: {}", d.strategy, d.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<ChunkingError> for crate::CodeRagError {
    #[inline]
    fn from(error: ChunkingError) -> Self {
        Self::Chunking(error.to_string())
    }
}

#[async_trait]
pub trait ChunkingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, language: Language) -> bool;

    async fn chunk(&self, file: &SourceFile<'_>) -> Result<Vec<ChunkDraft>, ChunkingError>;

    /// Release any external resources held by the strategy
    async fn shutdown(&self) {}
}

/// Result of dispatching one file
#[derive(Debug, Clone)]
pub struct ChunkedFile {
    pub chunks: Vec<Chunk>,
    pub strategy: &'static str,
    pub demotions: Vec<Demotion>,
}

/// Ordered chain of chunking strategies
pub struct ChunkDispatcher {
    strategies: Vec<Arc<dyn ChunkingStrategy>>,
    max_chunk_size: usize,
}

impl ChunkDispatcher {
    /// Build the standard chain: external (when configured), grammar, line windows
    #[inline]
    pub fn new(config: &ChunkingConfig) -> Self {
        let mut strategies: Vec<Arc<dyn ChunkingStrategy>> = Vec::with_capacity(3);

        if let Some(command) = &config.external_command {
            strategies.push(Arc::new(ExternalChunker::new(
                command.clone(),
                config.external_languages.iter().copied(),
                Duration::from_secs(config.external_timeout_seconds),
                config.max_chunk_size,
            )));
        }
        strategies.push(Arc::new(GrammarChunker::new(
            config.max_chunk_size,
            config.min_chunk_size,
        )));
        strategies.push(Arc::new(WindowChunker::new(config)));

        Self::with_strategies(strategies, config.max_chunk_size)
    }

    #[inline]
    pub fn with_strategies(strategies: Vec<Arc<dyn ChunkingStrategy>>, max_chunk_size: usize) -> Self {
        Self {
            strategies,
            max_chunk_size: max_chunk_size.max(1),
        }
    }

    #[inline]
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Chunk one file through the chain
    #[inline]
    pub async fn dispatch(&self, file: &SourceFile<'_>) -> Result<ChunkedFile, ChunkingError> {
        let mut demotions = Vec::new();

        for strategy in &self.strategies {
            if !strategy.supports(file.language) {
                continue;
            }

            let outcome = match strategy.chunk(file).await {
                Ok(drafts) if drafts.is_empty() => Err(ChunkingError::Empty),
                other => other,
            };

            match outcome {
                Ok(drafts) => {
                    let chunks = self.finalize(file, strategy.name(), drafts);
                    debug!(
                        "{} produced {} chunks for {}",
                        strategy.name(),
                        chunks.len(),
                        file.display_path
                    );
                    return Ok(ChunkedFile {
                        chunks,
                        strategy: strategy.name(),
                        demotions,
                    });
                }
                Err(e) => {
                    debug!(
                        "{} failed for {}, demoting: {}",
                        strategy.name(),
                        file.display_path,
                        e
                    );
                    demotions.push(Demotion {
                        strategy: strategy.name(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        warn!(
            "No chunking strategy succeeded for {}",
            file.display_path
        );
        Err(ChunkingError::Exhausted(demotions))
    }

    #[inline]
    pub async fn shutdown(&self) {
        for strategy in &self.strategies {
            strategy.shutdown().await;
        }
    }

    /// Enforce the size ceiling, attach preambles and assign ids
    fn finalize(&self, file: &SourceFile<'_>, strategy: &'static str, drafts: Vec<ChunkDraft>) -> Vec<Chunk> {
        let path = file.path.to_string_lossy().into_owned();
        let category = file.language.category();

        drafts
            .into_iter()
            .flat_map(|draft| split_oversized(draft, self.max_chunk_size))
            .enumerate()
            .map(|(ordinal, draft)| {
                let contextualized = draft.contextualized.unwrap_or_else(|| {
                    contextualize(file.display_path, &draft.scope, &draft.text)
                });
                Chunk {
                    id: chunk_id(&path, ordinal, &draft.text),
                    path: path.clone(),
                    language: file.language,
                    category,
                    text: draft.text,
                    contextualized,
                    start_line: draft.start_line,
                    end_line: draft.end_line,
                    node_kind: draft.node_kind,
                    scope: draft.scope,
                    imports: draft.imports,
                    signatures: draft.signatures,
                    chunker: strategy.to_string(),
                }
            })
            .collect()
    }
}

/// Deterministic chunk id: SHA-256 over path, ordinal and raw text
#[inline]
pub fn chunk_id(path: &str, ordinal: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update([0]);
    hasher.update(ordinal.to_le_bytes());
    hasher.update([0]);
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();

    let mut id = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        let _ = write!(id, "{:02x}", byte);
    }
    id
}

/// Build the embedded text: file and scope preamble, blank line, raw text
#[inline]
pub fn contextualize(display_path: &str, scope: &[String], text: &str) -> String {
    let mut out = String::with_capacity(text.len() + display_path.len() + 32);
    let _ = writeln!(out, "File: {}", display_path);
    if !scope.is_empty() {
        let _ = writeln!(out, "Scope: {}", scope.join(" > "));
    }
    out.push('\n');
    out.push_str(text);
    out
}

/// Split a draft whose raw text exceeds `max_chars` on line boundaries;
/// a single line longer than the ceiling is cut on character boundaries.
#[inline]
pub fn split_oversized(draft: ChunkDraft, max_chars: usize) -> Vec<ChunkDraft> {
    if draft.text.chars().count() <= max_chars {
        return vec![draft];
    }

    let mut pieces: Vec<(String, u32, u32)> = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;
    let mut current_start = draft.start_line;
    let mut current_end = draft.start_line;

    for (offset, line) in draft.text.split_inclusive('\n').enumerate() {
        let line_no = draft.start_line + offset as u32;
        let line_chars = line.chars().count();

        if current_chars + line_chars > max_chars && !current.is_empty() {
            pieces.push((std::mem::take(&mut current), current_start, current_end));
            current_chars = 0;
        }

        if line_chars > max_chars {
            let chars: Vec<char> = line.chars().collect();
            pieces.extend(
                chars
                    .chunks(max_chars)
                    .map(|slice| (slice.iter().collect::<String>(), line_no, line_no)),
            );
            continue;
        }

        if current.is_empty() {
            current_start = line_no;
        }
        current.push_str(line);
        current_chars += line_chars;
        current_end = line_no;
    }

    if !current.is_empty() {
        pieces.push((current, current_start, current_end));
    }

    if pieces.iter().any(|(text, _, _)| !text.trim().is_empty()) {
        pieces.retain(|(text, _, _)| !text.trim().is_empty());
    }

    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(index, (text, start_line, end_line))| ChunkDraft {
            text,
            // strategy-built preambles describe the whole node, not a slice of it
            contextualized: None,
            start_line,
            end_line,
            node_kind: if total > 1 {
                format!("{}_part{}", draft.node_kind, index + 1)
            } else {
                draft.node_kind.clone()
            },
            scope: draft.scope.clone(),
            imports: draft.imports.clone(),
            signatures: if index == 0 {
                draft.signatures.clone()
            } else {
                Vec::new()
            },
        })
        .collect()
}

/// 1-based inclusive line span of `text` starting at `start_line`
#[inline]
pub fn line_span(start_line: u32, text: &str) -> (u32, u32) {
    let newlines = text.trim_end_matches('\n').matches('\n').count() as u32;
    (start_line, start_line + newlines)
}
