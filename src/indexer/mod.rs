// Indexer module
// Walks a project tree, detects changed files and keeps the project store in sync

pub mod report;
pub mod walker;
pub mod watcher;


use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunking::{ChunkDispatcher, Language, SourceFile};
use crate::config::exclusions::looks_generated;
use crate::config::{Config, ExclusionRules};
use crate::database::lancedb::VectorRecord;
use crate::database::{FileRecord, ProjectStore, WriteGuard, content_hash};
use crate::embeddings::EmbeddingGate;
use crate::{CodeRagError, Result};

pub use report::{FileFailure, FileOutcome, IndexReport};
pub use walker::{EligibleFile, collect_eligible};
pub use watcher::{ProjectWatcher, WatcherRegistry, WatcherStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    /// Skip files whose content hash matches the stored record
    #[default]
    Incremental,
    /// Re-chunk and re-embed everything
    Full,
}

/// Per-call knobs for a directory pass
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub mode: IndexMode,
    /// Drop every record before indexing
    pub clear: bool,
    /// Replaces the configured extension list
    pub extensions: Option<Vec<String>>,
    /// Added to whichever exclusion list is active
    pub exclude_dirs: Vec<String>,
    /// Disable the generated-code content heuristic
    pub no_generated_filter: bool,
    /// Cap on files processed; stale cleanup still sees every eligible file
    pub limit: Option<usize>,
}

/// Indexer-wide settings taken from the configuration
#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub extensions: Vec<String>,
    pub max_file_size: u64,
    pub generated_filter: bool,
    /// Texts per embedding call; the gate is released between calls
    pub embed_batch_size: usize,
}

impl IndexSettings {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            extensions: config.indexing.extensions.clone(),
            max_file_size: config.indexing.max_file_size,
            generated_filter: config.indexing.generated_filter,
            embed_batch_size: (config.ollama.batch_size as usize).max(1),
        }
    }
}

/// Progress hooks for interactive callers
pub trait IndexObserver: Send + Sync {
    fn started(&self, _total: usize) {}

    fn file_finished(&self, _relative: &str, _outcome: &FileOutcome) {}
}

/// Observer that ignores everything
pub struct NoopObserver;

impl IndexObserver for NoopObserver {}

/// Keeps project stores in sync with the files on disk
pub struct Indexer {
    dispatcher: Arc<ChunkDispatcher>,
    gate: EmbeddingGate,
    settings: IndexSettings,
}

impl Indexer {
    #[inline]
    pub fn new(dispatcher: Arc<ChunkDispatcher>, gate: EmbeddingGate, settings: IndexSettings) -> Self {
        Self {
            dispatcher,
            gate,
            settings,
        }
    }

    #[inline]
    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    #[inline]
    pub fn gate(&self) -> &EmbeddingGate {
        &self.gate
    }

    /// Exclusion rules in force for `root`
    #[inline]
    pub fn rules_for(&self, root: &Path, extra: &[String]) -> Result<ExclusionRules> {
        ExclusionRules::resolve(root, extra, self.settings.max_file_size).map_err(CodeRagError::from_anyhow)
    }

    /// Bring the store up to date with everything under `target`
    ///
    /// # Arguments
    /// * `store` - Store of the project owning `target`
    /// * `target` - Directory inside the project root (canonical)
    /// * `options` - Mode, clearing and scope overrides
    /// * `cancel` - Checked between files; a cancelled pass skips stale cleanup
    /// * `observer` - Progress hooks
    ///
    /// # Returns
    /// The pass report; per-file failures are reported, not returned as errors
    #[inline]
    pub async fn index_directory(
        &self,
        store: &ProjectStore,
        target: &Path,
        options: &IndexOptions,
        cancel: &CancellationToken,
        observer: &dyn IndexObserver,
    ) -> Result<IndexReport> {
        let started = Instant::now();
        let root = store.root();
        let rules = self.rules_for(root, &options.exclude_dirs)?;
        let extensions = options
            .extensions
            .as_ref()
            .unwrap_or(&self.settings.extensions);
        let generated_filter = self.settings.generated_filter && !options.no_generated_filter;

        let target_owned = target.to_path_buf();
        let root_owned = root.to_path_buf();
        let walk_rules = rules.clone();
        let walk_extensions = extensions.clone();
        let files = tokio::task::spawn_blocking(move || {
            collect_eligible(&root_owned, &target_owned, &walk_rules, &walk_extensions)
        })
        .await
        .map_err(|e| CodeRagError::Other(anyhow::anyhow!("Directory walk panicked: {}", e)))?;

        let mut report = IndexReport::new(target.to_path_buf(), rules.source().clone());
        report.eligible = files.len();

        let budget = options.limit.unwrap_or(usize::MAX).min(files.len());
        report.limited = budget < files.len();
        info!(
            "Indexing {} of {} eligible files under {} ({:?})",
            budget,
            files.len(),
            target.display(),
            options.mode
        );
        observer.started(budget);

        let writer = store.write().await;
        if options.clear {
            writer.clear().await?;
            report.cleared = true;
            info!("Cleared store {}", store.dir().display());
        }

        for file in files.iter().take(budget) {
            if cancel.is_cancelled() {
                info!("Indexing of {} cancelled", target.display());
                report.cancelled = true;
                break;
            }
            let outcome = self
                .process_file(&writer, file, options.mode, generated_filter)
                .await;
            report.record(&file.key(), file.language, &outcome);
            observer.file_finished(&file.relative, &outcome);
        }

        if !report.cancelled {
            let eligible: HashSet<String> = files.iter().map(EligibleFile::key).collect();
            report.removed += remove_stale(&writer, target, &eligible).await?;
        }

        report.elapsed = started.elapsed();
        info!("Indexed {}: {}", target.display(), report.summary_line());
        Ok(report)
    }

    /// Re-check specific files: eligible ones are indexed, vanished or
    /// ineligible ones are dropped from the store
    #[inline]
    pub async fn index_files(
        &self,
        store: &ProjectStore,
        paths: &[PathBuf],
        mode: IndexMode,
    ) -> Result<IndexReport> {
        let started = Instant::now();
        let root = store.root();
        let rules = self.rules_for(root, &[])?;
        let mut report = IndexReport::new(root.to_path_buf(), rules.source().clone());

        let writer = store.write().await;
        for path in paths {
            let key = path.to_string_lossy().into_owned();
            let language = Language::from_path(path);
            let outcome = if !path.exists() {
                forget(&writer, &key, FileOutcome::Removed).await
            } else {
                match walker::eligible_file(root, path, &rules, &self.settings.extensions) {
                    Some(file) => {
                        report.eligible += 1;
                        self.process_file(&writer, &file, mode, self.settings.generated_filter)
                            .await
                    }
                    None => forget(&writer, &key, FileOutcome::Excluded).await,
                }
            };
            report.record(&key, language, &outcome);
        }

        report.elapsed = started.elapsed();
        debug!("Re-checked {} files: {}", paths.len(), report.summary_line());
        Ok(report)
    }

    /// Chunk, embed and commit one file under the held write guard
    async fn process_file(
        &self,
        writer: &WriteGuard<'_>,
        file: &EligibleFile,
        mode: IndexMode,
        generated_filter: bool,
    ) -> FileOutcome {
        let key = file.key();

        let bytes = match tokio::fs::read(&file.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read {}: {}", file.relative, e);
                return FileOutcome::Failed(format!("unreadable: {}", e));
            }
        };
        let hash = content_hash(&bytes);

        if mode == IndexMode::Incremental {
            match writer.store().file_record(&key).await {
                Ok(Some(record)) if record.is_current(&hash) => return FileOutcome::Unchanged,
                Ok(_) => {}
                Err(e) => return FileOutcome::Failed(e.to_string()),
            }
        }

        let Ok(content) = String::from_utf8(bytes) else {
            return FileOutcome::Failed("not valid UTF-8".to_string());
        };

        if generated_filter && looks_generated(&content) {
            debug!("Skipping generated file {}", file.relative);
            return forget(writer, &key, FileOutcome::Excluded).await;
        }

        let (vectors, strategy, demoted) = if content.trim().is_empty() {
            (Vec::new(), "none", false)
        } else {
            let source = SourceFile {
                path: &file.path,
                display_path: &file.relative,
                language: file.language,
                content: &content,
            };
            let chunked = match self.dispatcher.dispatch(&source).await {
                Ok(chunked) => chunked,
                Err(e) => {
                    warn!("Chunking failed for {}: {}", file.relative, e);
                    return FileOutcome::Failed(e.to_string());
                }
            };

            let mut vectors = Vec::with_capacity(chunked.chunks.len());
            for batch in chunked.chunks.chunks(self.settings.embed_batch_size) {
                let texts = batch.iter().map(|c| c.contextualized.clone()).collect();
                let embeddings = match self.gate.embed(texts).await {
                    Ok(embeddings) => embeddings,
                    Err(e) => {
                        warn!("Embedding failed for {}: {}", file.relative, e);
                        return FileOutcome::Failed(e.to_string());
                    }
                };
                vectors.extend(
                    batch
                        .iter()
                        .cloned()
                        .zip(embeddings)
                        .map(|(chunk, vector)| VectorRecord { chunk, vector }),
                );
            }
            (vectors, chunked.strategy, !chunked.demotions.is_empty())
        };

        let record = FileRecord {
            path: key,
            content_hash: hash,
            language: file.language,
            category: file.language.category(),
            size: i64::try_from(file.size).unwrap_or(i64::MAX),
            chunk_count: vectors.len() as i64,
            chunker: strategy.to_string(),
            indexed_at: Utc::now(),
        };

        match writer.replace_file_chunks(&record, &vectors).await {
            Ok(()) => FileOutcome::Indexed {
                chunks: vectors.len(),
                strategy,
                demoted,
            },
            Err(e) => {
                warn!("Failed to store {}: {}", file.relative, e);
                FileOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Drop a path from the store, reporting `outcome` on success
async fn forget(writer: &WriteGuard<'_>, key: &str, outcome: FileOutcome) -> FileOutcome {
    match writer.remove_file(key).await {
        Ok(()) => outcome,
        Err(e) => FileOutcome::Failed(e.to_string()),
    }
}

/// Remove stored files under `subtree` that are no longer eligible
async fn remove_stale(
    writer: &WriteGuard<'_>,
    subtree: &Path,
    eligible: &HashSet<String>,
) -> Result<usize> {
    let stale: Vec<String> = writer
        .stored_paths()
        .await?
        .into_iter()
        .filter(|path| Path::new(path).starts_with(subtree) && !eligible.contains(path))
        .collect();

    if stale.is_empty() {
        return Ok(0);
    }
    debug!("Removing stale files {:?}", stale);
    writer.remove_files(&stale).await?;
    info!("Removed {} stale files under {}", stale.len(), subtree.display());
    Ok(stale.len())
}

/// Resolve a caller-supplied path against the project root; it must stay inside it
#[inline]
pub fn resolve_in_root(root: &Path, requested: &Path) -> Result<PathBuf> {
    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    };
    let resolved = joined.canonicalize().map_err(|e| {
        CodeRagError::Config(format!("Path {} cannot be resolved: {}", requested.display(), e))
    })?;
    if !resolved.starts_with(root) {
        return Err(CodeRagError::Config(format!(
            "Path {} is outside the project root {}",
            requested.display(),
            root.display()
        )));
    }
    Ok(resolved)
}

/// Like [`resolve_in_root`] but tolerates a path that no longer exists,
/// as long as its parent does
#[inline]
pub fn resolve_file_in_root(root: &Path, requested: &Path) -> Result<PathBuf> {
    match resolve_in_root(root, requested) {
        Ok(path) => Ok(path),
        Err(original) => {
            let joined = if requested.is_absolute() {
                requested.to_path_buf()
            } else {
                root.join(requested)
            };
            let (Some(parent), Some(name)) = (joined.parent(), joined.file_name()) else {
                return Err(original);
            };
            let parent = resolve_in_root(root, parent).map_err(|_| original)?;
            Ok(parent.join(name))
        }
    }
}
