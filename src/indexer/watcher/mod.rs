//! File watcher for automatic incremental re-indexing.
//!
//! Raw notify events are filtered by eligibility, merged per path and
//! debounced. A batch is deferred while git holds `.git/index.lock`, so a
//! checkout is processed once it settles rather than file by file.


use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::walker::has_indexed_extension;
use super::{IndexMode, Indexer};
use crate::config::{ExclusionRules, WatcherConfig};
use crate::database::VectorStoreRegistry;
use crate::{CodeRagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// Changes waiting for the next batch, merged per path
#[derive(Debug, Default)]
pub struct PendingChanges {
    changes: BTreeMap<PathBuf, ChangeKind>,
}

impl PendingChanges {
    /// Fold a new change into whatever is pending for `path`.
    ///
    /// A delete always wins; a create or modify after a delete means the
    /// file was replaced and becomes a modify.
    #[inline]
    pub fn merge(&mut self, path: PathBuf, kind: ChangeKind) {
        let merged = match (self.changes.get(&path), kind) {
            (_, ChangeKind::Deleted) => ChangeKind::Deleted,
            (Some(ChangeKind::Deleted), _) => ChangeKind::Modified,
            (Some(ChangeKind::Created), ChangeKind::Modified) => ChangeKind::Created,
            (_, other) => other,
        };
        self.changes.insert(path, merged);
    }

    /// Remove up to `max` changes, deletes first; the rest stay pending
    #[inline]
    pub fn take_batch(&mut self, max: usize) -> Vec<(PathBuf, ChangeKind)> {
        let mut ordered: Vec<(PathBuf, ChangeKind)> = std::mem::take(&mut self.changes).into_iter().collect();
        ordered.sort_by_key(|(_, kind)| *kind != ChangeKind::Deleted);

        let overflow = ordered.split_off(max.min(ordered.len()));
        if !overflow.is_empty() {
            debug!("Deferring {} changes to the next batch", overflow.len());
        }
        self.changes.extend(overflow);
        ordered
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    #[inline]
    pub fn get(&self, path: &Path) -> Option<ChangeKind> {
        self.changes.get(path).copied()
    }
}

/// Cumulative counters for one watcher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WatcherStats {
    pub files_indexed: u64,
    pub files_deleted: u64,
    pub batches_processed: u64,
    pub errors: u64,
}

/// Snapshot reported by `watcher_status`
#[derive(Debug, Clone, Serialize)]
pub struct WatcherStatus {
    pub root: PathBuf,
    pub pending: usize,
    pub processing: bool,
    pub stats: WatcherStats,
}

/// Translate one notify event into per-path changes
#[inline]
pub fn classify(event: &Event) -> Vec<(PathBuf, ChangeKind)> {
    let single = |kind: ChangeKind| -> Vec<(PathBuf, ChangeKind)> {
        event.paths.iter().map(|p| (p.clone(), kind)).collect()
    };

    match &event.kind {
        EventKind::Create(_) => single(ChangeKind::Created),
        EventKind::Remove(_) => single(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => single(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => single(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut changes = Vec::with_capacity(2);
            if let Some(from) = event.paths.first() {
                changes.push((from.clone(), ChangeKind::Deleted));
            }
            if let Some(to) = event.paths.get(1) {
                changes.push((to.clone(), ChangeKind::Created));
            }
            changes
        }
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Any => event
            .paths
            .iter()
            .map(|p| {
                let kind = if p.exists() {
                    ChangeKind::Modified
                } else {
                    ChangeKind::Deleted
                };
                (p.clone(), kind)
            })
            .collect(),
        EventKind::Modify(_) => single(ChangeKind::Modified),
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}

/// Whether git is in the middle of rewriting the work tree
#[inline]
pub fn git_busy(root: &Path) -> bool {
    root.join(".git").join("index.lock").exists()
}

struct Shared {
    pending: StdMutex<PendingChanges>,
    processing: AtomicBool,
    stats: StdMutex<WatcherStats>,
}

impl Shared {
    fn with_pending<T>(&self, f: impl FnOnce(&mut PendingChanges) -> T) -> Option<T> {
        self.pending.lock().ok().map(|mut pending| f(&mut pending))
    }
}

/// Watches one project root and re-indexes changed files in batches
pub struct ProjectWatcher {
    root: PathBuf,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    _watcher: RecommendedWatcher,
}

impl ProjectWatcher {
    /// Start watching `root` (canonical) recursively
    #[inline]
    pub fn start(
        root: PathBuf,
        registry: Arc<VectorStoreRegistry>,
        indexer: Arc<Indexer>,
        config: &WatcherConfig,
    ) -> Result<Self> {
        let rules = indexer.rules_for(&root, &[])?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })
        .map_err(|e| CodeRagError::Other(anyhow::anyhow!("Failed to create file watcher: {}", e)))?;
        watcher.watch(&root, RecursiveMode::Recursive).map_err(|e| {
            CodeRagError::Other(anyhow::anyhow!(
                "Failed to watch {}: {}",
                root.display(),
                e
            ))
        })?;

        let shared = Arc::new(Shared {
            pending: StdMutex::new(PendingChanges::default()),
            processing: AtomicBool::new(false),
            stats: StdMutex::new(WatcherStats::default()),
        });
        let cancel = CancellationToken::new();

        let worker = Worker {
            root: root.clone(),
            rules,
            registry,
            indexer,
            shared: Arc::clone(&shared),
            debounce: Duration::from_millis(config.debounce_ms),
            git_settle: Duration::from_millis(config.git_settle_ms),
            max_batch: config.max_batch_size.max(1),
        };
        let task = tokio::spawn(worker.run(rx, cancel.clone()));

        info!(
            "Started watching {} (debounce {}ms)",
            root.display(),
            config.debounce_ms
        );
        Ok(Self {
            root,
            shared,
            cancel,
            task,
            _watcher: watcher,
        })
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn status(&self) -> WatcherStatus {
        WatcherStatus {
            root: self.root.clone(),
            pending: self.shared.with_pending(|p| p.len()).unwrap_or(0),
            processing: self.shared.processing.load(Ordering::SeqCst),
            stats: self
                .shared
                .stats
                .lock()
                .map(|stats| stats.clone())
                .unwrap_or_default(),
        }
    }

    /// Stop the worker; a batch in progress finishes its current file set first
    #[inline]
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Watcher task for {} ended abnormally: {}", self.root.display(), e);
        }
        let stats = self
            .shared
            .stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default();
        info!(
            "Stopped watching {} (indexed={}, deleted={}, batches={})",
            self.root.display(),
            stats.files_indexed,
            stats.files_deleted,
            stats.batches_processed
        );
    }
}

struct Worker {
    root: PathBuf,
    rules: ExclusionRules,
    registry: Arc<VectorStoreRegistry>,
    indexer: Arc<Indexer>,
    shared: Arc<Shared>,
    debounce: Duration,
    git_settle: Duration,
    max_batch: usize,
}

impl Worker {
    async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
        cancel: CancellationToken,
    ) {
        let mut deadline: Option<Instant> = None;

        loop {
            let timer = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(Ok(event)) => {
                        if self.ingest(&event) {
                            deadline = Some(Instant::now() + self.debounce);
                        }
                    }
                    Some(Err(e)) => warn!("File watcher error for {}: {}", self.root.display(), e),
                    None => break,
                },
                () = timer => {
                    if git_busy(&self.root) {
                        debug!("Git operation in progress, deferring {:?}", self.git_settle);
                        deadline = Some(Instant::now() + self.git_settle);
                        continue;
                    }
                    self.process_batch().await;
                    let more = self.shared.with_pending(|p| !p.is_empty()).unwrap_or(false);
                    deadline = more.then(|| Instant::now() + self.debounce);
                }
            }
        }
    }

    /// Merge the relevant parts of `event`; true when anything was queued
    fn ingest(&self, event: &Event) -> bool {
        let changes: Vec<(PathBuf, ChangeKind)> = classify(event)
            .into_iter()
            .filter(|(path, _)| self.is_relevant(path))
            .collect();
        if changes.is_empty() {
            return false;
        }
        self.shared
            .with_pending(|pending| {
                for (path, kind) in changes {
                    pending.merge(path, kind);
                }
            })
            .is_some()
    }

    fn is_relevant(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        has_indexed_extension(path, &self.indexer.settings().extensions)
            && !self.rules.is_excluded_path(relative)
    }

    async fn process_batch(&self) {
        let Some(batch) = self.shared.with_pending(|p| p.take_batch(self.max_batch)) else {
            return;
        };
        if batch.is_empty() {
            return;
        }

        self.shared.processing.store(true, Ordering::SeqCst);
        let paths: Vec<PathBuf> = batch.into_iter().map(|(path, _)| path).collect();

        let outcome = match self.registry.open(&self.root).await {
            Ok(store) => self
                .indexer
                .index_files(&store, &paths, IndexMode::Incremental)
                .await,
            Err(e) => Err(e),
        };

        if let Ok(mut stats) = self.shared.stats.lock() {
            stats.batches_processed += 1;
            match &outcome {
                Ok(report) => {
                    stats.files_indexed += report.indexed as u64;
                    stats.files_deleted += report.removed as u64;
                    stats.errors += report.failed.len() as u64;
                }
                Err(_) => stats.errors += 1,
            }
        }

        match outcome {
            Ok(report) if report.indexed + report.removed > 0 || !report.failed.is_empty() => {
                info!(
                    "{}: processed {} changes: {}",
                    self.root.display(),
                    paths.len(),
                    report.summary_line()
                );
            }
            Ok(_) => {}
            Err(e) => warn!("Watcher batch for {} failed: {}", self.root.display(), e),
        }
        self.shared.processing.store(false, Ordering::SeqCst);
    }
}

/// All running watchers, at most one per project root
pub struct WatcherRegistry {
    watchers: Mutex<HashMap<PathBuf, ProjectWatcher>>,
    config: WatcherConfig,
}

impl WatcherRegistry {
    #[inline]
    pub fn new(config: WatcherConfig) -> Self {
        Self {
            watchers: Mutex::new(HashMap::new()),
            config,
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Start a watcher for `root` unless one runs already or watching is off.
    /// Returns whether a watcher is active for `root` afterwards.
    #[inline]
    pub async fn ensure(
        &self,
        root: &Path,
        registry: &Arc<VectorStoreRegistry>,
        indexer: &Arc<Indexer>,
    ) -> Result<bool> {
        if !self.config.enabled {
            return Ok(false);
        }
        let mut watchers = self.watchers.lock().await;
        if watchers.contains_key(root) {
            return Ok(true);
        }
        let watcher = ProjectWatcher::start(
            root.to_path_buf(),
            Arc::clone(registry),
            Arc::clone(indexer),
            &self.config,
        )?;
        watchers.insert(root.to_path_buf(), watcher);
        Ok(true)
    }

    #[inline]
    pub async fn status(&self) -> Vec<WatcherStatus> {
        let watchers = self.watchers.lock().await;
        let mut statuses: Vec<WatcherStatus> = watchers.values().map(ProjectWatcher::status).collect();
        statuses.sort_by(|a, b| a.root.cmp(&b.root));
        statuses
    }

    #[inline]
    pub async fn stop_all(&self) {
        let watchers: Vec<ProjectWatcher> = self.watchers.lock().await.drain().map(|(_, w)| w).collect();
        for watcher in watchers {
            watcher.stop().await;
        }
    }
}
