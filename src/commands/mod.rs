
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, show_config};
use crate::database::canonical_root;
use crate::embeddings::build_embedder;
use crate::indexer::{FileOutcome, IndexObserver, IndexOptions, IndexReport};
use crate::mcp::{AppContext, McpServer, SessionStore, http};
use crate::{CodeRagError, Result};

/// Exit status for a failed command: 2 for bad input or configuration,
/// 3 when the store is held by another process, 1 otherwise
#[inline]
pub fn exit_code(error: &CodeRagError) -> u8 {
    match error {
        CodeRagError::Config(_) => 2,
        CodeRagError::ResourceBusy { .. } => 3,
        _ => 1,
    }
}

/// Load the configuration from the default directory with environment overrides
#[inline]
pub fn load_config() -> Result<Config> {
    Config::load_default().map_err(|e| CodeRagError::Config(format!("{:#}", e)))
}

/// Normalize a user-supplied extension list to `.ext` form
#[inline]
pub fn normalize_extensions(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|ext| ext.trim().to_lowercase())
        .filter(|ext| !ext.is_empty() && ext != ".")
        .map(|ext| {
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{}", ext)
            }
        })
        .collect()
}

async fn build_context(config: Config, preflight: bool) -> Result<Arc<AppContext>> {
    let backend_config = config.clone();
    let embedder = tokio::task::spawn_blocking(move || build_embedder(&backend_config, preflight))
        .await
        .map_err(|e| CodeRagError::Other(anyhow::anyhow!("Embedding backend setup panicked: {}", e)))?
        .map_err(|e| CodeRagError::Embedding(format!("{:#}", e)))?;
    Ok(Arc::new(AppContext::new(config, embedder)))
}

/// Progress bar fed by the indexer, hidden when stderr is not a terminal
struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    fn new() -> Self {
        let bar = if console::user_attended_stderr() {
            let style = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            ProgressBar::new(0).with_style(style)
        } else {
            ProgressBar::hidden()
        };
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl IndexObserver for ProgressObserver {
    fn started(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
    }

    fn file_finished(&self, relative: &str, outcome: &FileOutcome) {
        if let FileOutcome::Failed(reason) = outcome {
            self.bar.suspend(|| warn!("Failed to index {}: {}", relative, reason));
        }
        self.bar.set_message(relative.to_string());
        self.bar.inc(1);
    }
}

/// Index a project from the command line
///
/// # Arguments
/// * `config` - Effective configuration
/// * `path` - Project root to index
/// * `options` - Mode, clearing and scope overrides from the flags
///
/// # Returns
/// The pass report. Per-file failures do not fail the command; a busy store
/// or an invalid path does.
#[inline]
pub async fn index_project(config: Config, path: &Path, options: IndexOptions) -> Result<IndexReport> {
    let root = canonical_root(path)?;
    let context = build_context(config, true).await?;

    let cancel = context.task_token();
    let interrupt = cancel.clone();
    let on_interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current file");
            interrupt.cancel();
        }
    });

    let progress = ProgressObserver::new();
    let result = async {
        let store = context.registry().open(&root).await?;
        context
            .indexer()
            .index_directory(&store, &root, &options, &cancel, &progress)
            .await
    }
    .await;

    progress.finish();
    on_interrupt.abort();
    context.shutdown().await;
    result
}

/// Human-readable summary printed after `index`
#[inline]
pub fn render_index_summary(report: &IndexReport) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Indexed {}", report.target.display());
    let _ = writeln!(output, "  Files indexed:   {}", report.indexed);
    let _ = writeln!(output, "  Files unchanged: {}", report.unchanged);
    let _ = writeln!(output, "  Files removed:   {}", report.removed);
    let _ = writeln!(output, "  Files excluded:  {}", report.excluded);
    let _ = writeln!(output, "  Files failed:    {}", report.failed.len());
    let _ = writeln!(output, "  Chunks created:  {}", report.chunks);
    let _ = writeln!(
        output,
        "  Elapsed:         {:.1}s ({:.1} files/s)",
        report.elapsed.as_secs_f64(),
        report.files_per_second()
    );

    if !report.languages.is_empty() {
        output.push_str("Chunks by language:\n");
        let mut languages: Vec<_> = report.languages.iter().collect();
        languages.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (language, chunks) in languages {
            let _ = writeln!(output, "  {}: {}", language, chunks);
        }
    }

    let _ = writeln!(output, "Exclusions: {}", report.exclusion_source);
    if report.limited {
        let _ = writeln!(
            output,
            "Stopped at the file limit ({} of {} eligible files)",
            report.processed(),
            report.eligible
        );
    }
    if report.cancelled {
        output.push_str("Cancelled before completion; stale entries were kept.\n");
    } else if report.is_noop() && report.failed.is_empty() {
        output.push_str("All files up to date.\n");
    }

    if !report.failed.is_empty() {
        output.push_str("Failures:\n");
        for failure in &report.failed {
            let _ = writeln!(output, "  - {}: {}", failure.path, failure.reason);
        }
    }
    output
}

/// Run `index` and print its summary
#[inline]
pub async fn run_index(path: PathBuf, options: IndexOptions) -> Result<()> {
    let config = load_config()?;
    let report = index_project(config, &path, options).await?;
    print!("{}", render_index_summary(&report));
    if !report.failed.is_empty() {
        eprintln!(
            "{}",
            style(format!("{} files failed to index", report.failed.len())).yellow()
        );
    }
    Ok(())
}

/// Serve MCP over HTTP until interrupted
///
/// Writes the pid file, evicts idle stores and sessions in the background and
/// releases every store lease on the way out.
#[inline]
pub async fn serve_http(mut config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    let address = format!("{}:{}", config.server.host, config.server.port);
    let store_idle = Duration::from_secs(config.server.store_idle_seconds);
    let session_idle = Duration::from_secs(config.server.session_idle_seconds);
    let pid_file = config.pid_file_path();

    let listener = TcpListener::bind(address.as_str()).await?;
    let context = build_context(config, true).await?;
    let server = Arc::new(McpServer::new(Arc::clone(&context)));
    let sessions = Arc::new(SessionStore::new());

    write_pid_file(&pid_file);

    let shutdown = CancellationToken::new();
    let maintenance = tokio::spawn(run_maintenance(
        Arc::clone(&context),
        Arc::clone(&sessions),
        store_idle,
        session_idle,
        shutdown.clone(),
    ));
    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt signal, shutting down");
        }
        interrupt.cancel();
    });

    let served = http::serve(listener, http::router(server, sessions), shutdown.clone()).await;

    shutdown.cancel();
    if let Err(e) = maintenance.await {
        debug!("Maintenance task ended abnormally: {}", e);
    }
    context.shutdown().await;
    remove_pid_file(&pid_file);
    served.map_err(CodeRagError::Other)
}

async fn run_maintenance(
    context: Arc<AppContext>,
    sessions: Arc<SessionStore>,
    store_idle: Duration,
    session_idle: Duration,
    shutdown: CancellationToken,
) {
    let period = store_idle.min(session_idle).clamp(Duration::from_secs(5), Duration::from_secs(60));
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let stores = context.registry().evict_idle(store_idle).await;
                let expired = sessions.expire_idle(session_idle);
                if stores > 0 || expired > 0 {
                    debug!("Evicted {} idle stores and {} idle sessions", stores, expired);
                }
            }
        }
    }
}

fn write_pid_file(path: &Path) {
    let written = path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|()| std::fs::write(path, std::process::id().to_string()));
    match written {
        Ok(()) => debug!("Wrote pid file {}", path.display()),
        Err(e) => warn!("Could not write pid file {}: {}", path.display(), e),
    }
}

fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove pid file {}: {}", path.display(), e);
        }
    }
}

/// Serve MCP over stdin/stdout for a single project
#[inline]
pub async fn serve_stdio(config: Config, project_root: Option<PathBuf>) -> Result<()> {
    let requested = match project_root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let root = canonical_root(&requested)?;
    let context = build_context(config, true).await?;
    let server = Arc::new(McpServer::new(Arc::clone(&context)));

    let served = server.serve_stdio(root).await;
    context.shutdown().await;
    if let Err(e) = &served {
        error!("stdio transport failed: {:#}", e);
    }
    served.map_err(CodeRagError::Other)
}

/// Print the effective configuration, or write a default file when none exists
#[inline]
pub fn run_config(show: bool) -> Result<()> {
    let config = load_config()?;
    if show {
        return show_config(&config).map_err(CodeRagError::Other);
    }

    let path = config.config_file_path();
    if path.exists() {
        println!("Configuration file: {}", style(path.display()).cyan());
        println!("Use 'code-rag config --show' to print the effective settings.");
        return Ok(());
    }
    config.save().map_err(|e| CodeRagError::Config(format!("{:#}", e)))?;
    println!(
        "{} {}",
        style("Wrote default configuration to").green(),
        style(path.display()).cyan()
    );
    Ok(())
}
