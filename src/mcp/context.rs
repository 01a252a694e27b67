// Shared server state and the per-call project context

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunking::ChunkDispatcher;
use crate::config::Config;
use crate::database::{VectorStoreRegistry, canonical_root, store_dir};
use crate::embeddings::{Embedder, EmbeddingGate};
use crate::indexer::{IndexSettings, Indexer, WatcherRegistry};
use crate::search::SearchService;
use crate::{CodeRagError, Result};

/// Header naming the project a call targets
pub const PROJECT_ROOT_HEADER: &str = "x-project-root";

/// Environment variable naming the project for the stdio transport
pub const PROJECT_ROOT_ENV: &str = "CODE_RAG_PROJECT_ROOT";

const PROJECT_ERROR_MSG: &str = "No project configured. Add to your .mcp.json:\n  \"headers\": {\"X-Project-Root\": \"/path/to/your/project\"}";

/// The project one call operates on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectContext {
    root: PathBuf,
}

impl ProjectContext {
    /// Resolve the raw project identifier sent with a call
    ///
    /// # Arguments
    /// * `raw` - Header value (HTTP) or configured root (stdio), if any
    ///
    /// # Returns
    /// The canonical project root, or a configuration error explaining how
    /// to supply one
    #[inline]
    pub fn resolve(raw: Option<&str>) -> Result<Self> {
        let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Err(CodeRagError::Config(PROJECT_ERROR_MSG.to_string()));
        };
        let root = canonical_root(Path::new(raw))?;
        Ok(Self { root })
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `path` relative to the project root when it lies inside it
    #[inline]
    pub fn display_path(&self, path: &str) -> String {
        Path::new(path)
            .strip_prefix(&self.root)
            .map_or_else(|_| path.to_string(), |relative| relative.display().to_string())
    }
}

/// Long-lived services shared by every session and transport
pub struct AppContext {
    config: Config,
    dispatcher: Arc<ChunkDispatcher>,
    gate: EmbeddingGate,
    registry: Arc<VectorStoreRegistry>,
    indexer: Arc<Indexer>,
    search: SearchService,
    watchers: WatcherRegistry,
    shutdown: CancellationToken,
}

impl AppContext {
    /// Wire the chunker, gate, registry, indexer and search service together
    #[inline]
    pub fn new(config: Config, embedder: Arc<dyn Embedder>) -> Self {
        let gate = EmbeddingGate::new(embedder, config.query_timeout());
        let dispatcher = Arc::new(ChunkDispatcher::new(&config.chunking));
        let registry = Arc::new(VectorStoreRegistry::new(gate.dimension()));
        let indexer = Arc::new(Indexer::new(
            Arc::clone(&dispatcher),
            gate.clone(),
            IndexSettings::from_config(&config),
        ));
        let search = SearchService::new(gate.clone(), Arc::clone(&registry));
        let watchers = WatcherRegistry::new(config.watcher.clone());

        Self {
            config,
            dispatcher,
            gate,
            registry,
            indexer,
            search,
            watchers,
            shutdown: CancellationToken::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn dispatcher(&self) -> &ChunkDispatcher {
        &self.dispatcher
    }

    #[inline]
    pub fn gate(&self) -> &EmbeddingGate {
        &self.gate
    }

    #[inline]
    pub fn registry(&self) -> &Arc<VectorStoreRegistry> {
        &self.registry
    }

    #[inline]
    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    #[inline]
    pub fn search(&self) -> &SearchService {
        &self.search
    }

    #[inline]
    pub fn watchers(&self) -> &WatcherRegistry {
        &self.watchers
    }

    /// Token for one long-running task; cancelled at shutdown
    #[inline]
    pub fn task_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Start watching an indexed project. Failures are logged, never returned.
    #[inline]
    pub async fn ensure_watcher(&self, root: &Path) {
        if !self.watchers.enabled() || self.is_shutting_down() || !store_dir(root).exists() {
            return;
        }
        match self.watchers.ensure(root, &self.registry, &self.indexer).await {
            Ok(_) => debug!("Watcher active for {}", root.display()),
            Err(e) => warn!("Could not watch {}: {}", root.display(), e),
        }
    }

    /// Cancel running index tasks, stop watchers and release every store
    #[inline]
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.watchers.stop_all().await;
        self.registry.close_all().await;
        self.dispatcher.shutdown().await;
        info!("Released all project stores");
    }
}
