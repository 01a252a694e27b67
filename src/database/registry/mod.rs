// Registry of open per-project stores

#[cfg(test)]
mod tests;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use super::lancedb::{VectorHit, VectorRecord, VectorStore};
use super::lease::WriterLease;
use super::sqlite::{Database, FileRecord, LanguageStats};
use crate::CodeRagError;

/// Store directory created inside every indexed project root
pub const STORE_DIR_NAME: &str = ".code-rag";
pub const VECTORS_DIR_NAME: &str = "vectors";
pub const FILES_DB_NAME: &str = "files.db";

/// Location of the store for `root`
#[inline]
pub fn store_dir(root: &Path) -> PathBuf {
    root.join(STORE_DIR_NAME)
}

fn db_error(context: &str, error: &anyhow::Error) -> CodeRagError {
    CodeRagError::Database(format!("{}: {:#}", context, error))
}

/// Aggregate numbers for one store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub files: i64,
    pub chunks: usize,
    pub languages: Vec<LanguageStats>,
}

/// One open project store: vector table, file catalog and the writer lease
pub struct ProjectStore {
    root: PathBuf,
    dir: PathBuf,
    // write access only to swap the table on clear
    vectors: RwLock<VectorStore>,
    files: Database,
    write_lock: Mutex<()>,
    last_used: StdMutex<Instant>,
    _lease: WriterLease,
}

impl ProjectStore {
    /// Open (creating if needed) the store of `root`
    ///
    /// # Arguments
    /// * `root` - Canonical project root
    /// * `dimension` - Vector length of the embedding backend
    ///
    /// # Returns
    /// The open store, or `ResourceBusy` when another writer holds it
    #[inline]
    pub async fn open(root: &Path, dimension: usize) -> Result<Self, CodeRagError> {
        let dir = store_dir(root);
        std::fs::create_dir_all(&dir).map_err(|e| {
            CodeRagError::Database(format!(
                "Failed to create store directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let lease = WriterLease::acquire(&dir).await?;

        let files = Database::new(dir.join(FILES_DB_NAME))
            .await
            .map_err(|e| db_error("Failed to open file catalog", &e))?;
        let (vectors, reset) = VectorStore::open(&dir.join(VECTORS_DIR_NAME), dimension).await?;
        if reset {
            // every record now points at vectors that no longer exist
            let removed = files
                .clear()
                .await
                .map_err(|e| db_error("Failed to reset file catalog", &e))?;
            warn!(
                "Vector table of {} was rebuilt; {} files will be re-indexed",
                root.display(),
                removed
            );
        }

        info!("Opened store {}", dir.display());
        Ok(Self {
            root: root.to_path_buf(),
            dir,
            vectors: RwLock::new(vectors),
            files,
            write_lock: Mutex::new(()),
            last_used: StdMutex::new(Instant::now()),
            _lease: lease,
        })
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Wait for exclusive write access to this store
    #[inline]
    pub async fn write(&self) -> WriteGuard<'_> {
        let guard = self.write_lock.lock().await;
        self.touch();
        WriteGuard {
            store: self,
            _guard: guard,
        }
    }

    #[inline]
    pub async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        filter: Option<&str>,
    ) -> Result<Vec<VectorHit>, CodeRagError> {
        self.touch();
        self.vectors.read().await.search(query_vector, limit, filter).await
    }

    #[inline]
    pub async fn file_record(&self, path: &str) -> Result<Option<FileRecord>, CodeRagError> {
        self.touch();
        self.files
            .get_file(path)
            .await
            .map_err(|e| db_error("Failed to read file record", &e))
    }

    #[inline]
    pub async fn file_records(&self) -> Result<Vec<FileRecord>, CodeRagError> {
        self.touch();
        self.files
            .list_files()
            .await
            .map_err(|e| db_error("Failed to list file records", &e))
    }

    #[inline]
    pub async fn stats(&self) -> Result<StoreStats, CodeRagError> {
        self.touch();
        let files = self
            .files
            .count_files()
            .await
            .map_err(|e| db_error("Failed to count files", &e))?;
        let languages = self
            .files
            .language_stats()
            .await
            .map_err(|e| db_error("Failed to compute language statistics", &e))?;
        let chunks = self.vectors.read().await.count(None).await?;
        Ok(StoreStats {
            files,
            chunks,
            languages,
        })
    }

    #[inline]
    pub fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .map_or(Duration::ZERO, |last| last.elapsed())
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last_used.lock() {
            *last = Instant::now();
        }
    }

    async fn close(&self) {
        self.files.close().await;
        debug!("Closed store {}", self.dir.display());
    }
}

/// Exclusive write access to one store; the only way to mutate it
pub struct WriteGuard<'a> {
    store: &'a ProjectStore,
    _guard: MutexGuard<'a, ()>,
}

impl WriteGuard<'_> {
    #[inline]
    pub fn store(&self) -> &ProjectStore {
        self.store
    }

    /// Replace everything stored for one file.
    ///
    /// The record goes first and comes back last, so an interrupted
    /// replacement leaves no record and the next pass redoes the file.
    #[inline]
    pub async fn replace_file_chunks(
        &self,
        record: &FileRecord,
        vectors: &[VectorRecord],
    ) -> Result<(), CodeRagError> {
        let files = &self.store.files;
        files
            .delete_file(&record.path)
            .await
            .map_err(|e| db_error("Failed to delete file record", &e))?;

        {
            let table = self.store.vectors.read().await;
            table.delete_path(&record.path).await?;
            table.insert(vectors).await?;
        }

        files
            .upsert_file(record)
            .await
            .map_err(|e| db_error("Failed to store file record", &e))?;
        debug!("Committed {} chunks for {}", vectors.len(), record.path);
        Ok(())
    }

    /// Remove a file's record and vectors
    #[inline]
    pub async fn remove_file(&self, path: &str) -> Result<(), CodeRagError> {
        self.store
            .files
            .delete_file(path)
            .await
            .map_err(|e| db_error("Failed to delete file record", &e))?;
        self.store.vectors.read().await.delete_path(path).await
    }

    /// Remove several files; their records go in one transaction first
    #[inline]
    pub async fn remove_files(&self, paths: &[String]) -> Result<u64, CodeRagError> {
        let removed = self
            .store
            .files
            .delete_files(paths)
            .await
            .map_err(|e| db_error("Failed to delete file records", &e))?;
        let table = self.store.vectors.read().await;
        for path in paths {
            table.delete_path(path).await?;
        }
        Ok(removed)
    }

    /// Every path known to either the catalog or the vector table
    #[inline]
    pub async fn stored_paths(&self) -> Result<BTreeSet<String>, CodeRagError> {
        let mut paths: BTreeSet<String> = self
            .store
            .files
            .list_files()
            .await
            .map_err(|e| db_error("Failed to list file records", &e))?
            .into_iter()
            .map(|record| record.path)
            .collect();
        paths.extend(self.store.vectors.read().await.paths().await?);
        Ok(paths)
    }

    #[inline]
    pub async fn clear(&self) -> Result<(), CodeRagError> {
        self.store
            .files
            .clear()
            .await
            .map_err(|e| db_error("Failed to clear file records", &e))?;
        self.store.vectors.write().await.clear().await
    }
}

/// Cache of open stores keyed by canonical project root
pub struct VectorStoreRegistry {
    stores: Mutex<HashMap<PathBuf, Arc<ProjectStore>>>,
    dimension: usize,
}

impl VectorStoreRegistry {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
            dimension,
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Cached handle for `root`, opening the store on first use
    #[inline]
    pub async fn open(&self, root: &Path) -> Result<Arc<ProjectStore>, CodeRagError> {
        let root = canonical_root(root)?;
        let mut stores = self.stores.lock().await;

        if let Some(store) = stores.get(&root) {
            store.touch();
            return Ok(Arc::clone(store));
        }

        // a failed open is not cached, the next call retries
        let store = Arc::new(ProjectStore::open(&root, self.dimension).await?);
        stores.insert(root, Arc::clone(&store));
        Ok(store)
    }

    /// Like [`Self::open`] but never creates a store; `None` when the
    /// project has not been indexed yet
    #[inline]
    pub async fn open_existing(&self, root: &Path) -> Result<Option<Arc<ProjectStore>>, CodeRagError> {
        let canonical = canonical_root(root)?;
        if !store_dir(&canonical).join(FILES_DB_NAME).is_file() {
            let cached = self.stores.lock().await.get(&canonical).cloned();
            return Ok(cached);
        }
        self.open(&canonical).await.map(Some)
    }

    /// Close stores nobody has used for `idle`; returns how many were closed
    #[inline]
    pub async fn evict_idle(&self, idle: Duration) -> usize {
        let evicted: Vec<Arc<ProjectStore>> = {
            let mut stores = self.stores.lock().await;
            let expired: Vec<PathBuf> = stores
                .iter()
                .filter(|(_, store)| Arc::strong_count(store) == 1 && store.idle_for() >= idle)
                .map(|(root, _)| root.clone())
                .collect();
            expired
                .iter()
                .filter_map(|root| stores.remove(root))
                .collect()
        };

        for store in &evicted {
            info!("Evicting idle store {}", store.dir().display());
            store.close().await;
        }
        evicted.len()
    }

    /// Forget the handle for `root`; the lease is released once the last
    /// outstanding handle is dropped
    #[inline]
    pub async fn close(&self, root: &Path) -> bool {
        let Ok(root) = canonical_root(root) else {
            return false;
        };
        let removed = self.stores.lock().await.remove(&root);
        match removed {
            Some(store) => {
                if Arc::strong_count(&store) == 1 {
                    store.close().await;
                }
                true
            }
            None => false,
        }
    }

    #[inline]
    pub async fn close_all(&self) {
        let stores: Vec<Arc<ProjectStore>> = self.stores.lock().await.drain().map(|(_, s)| s).collect();
        for store in &stores {
            store.close().await;
        }
        if !stores.is_empty() {
            info!("Closed {} stores", stores.len());
        }
    }
}

/// Resolve a project root to the canonical directory used as registry key
#[inline]
pub fn canonical_root(root: &Path) -> Result<PathBuf, CodeRagError> {
    let canonical = root.canonicalize().map_err(|e| {
        CodeRagError::Config(format!(
            "Project root {} cannot be resolved: {}",
            root.display(),
            e
        ))
    })?;
    if !canonical.is_dir() {
        return Err(CodeRagError::Config(format!(
            "Project root {} is not a directory",
            root.display()
        )));
    }
    Ok(canonical)
}
