//! MCP Tools Implementation
//!
//! Tool definitions, their handlers and the Markdown renderings returned to
//! clients. Every handler receives the project of the current call
//! explicitly; nothing about the project survives between calls except what
//! the store registry caches.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::chunking::{Category, Language};
use crate::database::{FileRecord, StoreStats, store_dir};
use crate::embeddings::GateMetrics;
use crate::indexer::watcher::WatcherStatus;
use crate::indexer::{
    IndexMode, IndexOptions, IndexReport, NoopObserver, resolve_file_in_root, resolve_in_root,
};
use crate::mcp::context::{AppContext, ProjectContext};
use crate::mcp::errors::{McpError, McpResult};
use crate::mcp::protocol::{CallToolResult, Tool};
use crate::mcp::validation::{ArgumentSchema, ToolArguments};
use crate::search::{DEFAULT_ALL_RESULTS, DEFAULT_RESULTS, MAX_RESULTS, SearchRequest, SearchResult};

/// Paths listed per category before the rest is summarised
const LIST_LIMIT: usize = 50;

/// Tool handler trait for implementing tool execution
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> Tool;

    async fn handle(&self, project: &ProjectContext, args: ToolArguments) -> McpResult<CallToolResult>;
}

/// Accept `search-code` as well as `search_code`
#[inline]
pub fn canonical_tool_name(name: &str) -> String {
    name.trim().replace('-', "_")
}

fn tool_error(tool: &str) -> impl Fn(crate::CodeRagError) -> McpError + '_ {
    move |error| McpError::from_tool_error(tool, error)
}

fn query_schema(description: &str, default_n: usize, extra: Option<(&str, Value)>) -> Value {
    let mut properties = json!({
        "query": {
            "type": "string",
            "description": description
        },
        "n": {
            "type": "integer",
            "description": format!("Number of results to return (default: {}, max: {})", default_n, MAX_RESULTS),
            "default": default_n
        }
    });
    if let (Some((name, schema)), Some(map)) = (extra, properties.as_object_mut()) {
        map.insert(name.to_string(), schema);
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": ["query"],
        "additionalProperties": false
    })
}

fn empty_schema() -> Value {
    json!({
        "type": "object",
        "properties": {},
        "required": [],
        "additionalProperties": false
    })
}

/// Semantic search restricted to source code
pub struct SearchCodeHandler {
    context: Arc<AppContext>,
}

impl SearchCodeHandler {
    #[inline]
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ToolHandler for SearchCodeHandler {
    fn definition(&self) -> Tool {
        let languages: Vec<&str> = Language::ALL
            .into_iter()
            .filter(|language| *language != Language::Unknown && language.category() == Category::Code)
            .map(Language::as_str)
            .collect();
        Tool {
            name: "search_code".to_string(),
            description: Some("Search the indexed codebase for relevant code snippets".to_string()),
            input_schema: query_schema(
                "Natural language search query (e.g., 'user authentication logic')",
                DEFAULT_RESULTS,
                Some((
                    "language",
                    json!({
                        "type": "string",
                        "description": "Filter by language",
                        "enum": languages
                    }),
                )),
            ),
        }
    }

    async fn handle(&self, project: &ProjectContext, args: ToolArguments) -> McpResult<CallToolResult> {
        let language = args
            .optional_str("language")
            .map(str::parse::<Language>)
            .transpose()
            .map_err(|message| McpError::InvalidToolArguments {
                tool: args.tool().to_string(),
                message,
            })?;
        let request = SearchRequest::new(args.required_str("query")?, args.count("n", DEFAULT_RESULTS)?)
            .with_category(Some(Category::Code))
            .with_language(language);

        let results = self
            .context
            .search()
            .search(project.root(), &request)
            .await
            .map_err(tool_error(args.tool()))?;
        Ok(CallToolResult::text(format_results(project, &results)))
    }
}

/// Semantic search restricted to documentation
pub struct SearchDocsHandler {
    context: Arc<AppContext>,
}

impl SearchDocsHandler {
    #[inline]
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ToolHandler for SearchDocsHandler {
    fn definition(&self) -> Tool {
        Tool {
            name: "search_docs".to_string(),
            description: Some(
                "Search the project documentation (Markdown and YAML) for information about components and architecture"
                    .to_string(),
            ),
            input_schema: query_schema(
                "Natural language query about the system (e.g., 'how does the scheduler work?')",
                DEFAULT_RESULTS,
                None,
            ),
        }
    }

    async fn handle(&self, project: &ProjectContext, args: ToolArguments) -> McpResult<CallToolResult> {
        let request = SearchRequest::new(args.required_str("query")?, args.count("n", DEFAULT_RESULTS)?)
            .with_category(Some(Category::Documentation));
        let results = self
            .context
            .search()
            .search(project.root(), &request)
            .await
            .map_err(tool_error(args.tool()))?;
        Ok(CallToolResult::text(format_results(project, &results)))
    }
}

/// Semantic search over every category, grouped in the output
pub struct SearchAllHandler {
    context: Arc<AppContext>,
}

impl SearchAllHandler {
    #[inline]
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ToolHandler for SearchAllHandler {
    fn definition(&self) -> Tool {
        Tool {
            name: "search_all".to_string(),
            description: Some("Search everything - code, documentation, and config files".to_string()),
            input_schema: query_schema("Natural language search query", DEFAULT_ALL_RESULTS, None),
        }
    }

    async fn handle(&self, project: &ProjectContext, args: ToolArguments) -> McpResult<CallToolResult> {
        let request = SearchRequest::new(args.required_str("query")?, args.count("n", DEFAULT_ALL_RESULTS)?);
        let results = self
            .context
            .search()
            .search(project.root(), &request)
            .await
            .map_err(tool_error(args.tool()))?;
        Ok(CallToolResult::text(format_results_grouped(project, &results)))
    }
}

/// Re-index one file, ignoring its stored hash
pub struct IndexFileHandler {
    context: Arc<AppContext>,
}

impl IndexFileHandler {
    #[inline]
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ToolHandler for IndexFileHandler {
    fn definition(&self) -> Tool {
        Tool {
            name: "index_file".to_string(),
            description: Some("Index or re-index a single file".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path to the file, absolute or relative to the project root"
                    }
                },
                "required": ["path"],
                "additionalProperties": false
            }),
        }
    }

    async fn handle(&self, project: &ProjectContext, args: ToolArguments) -> McpResult<CallToolResult> {
        let requested = args.required_str("path")?;
        let path = resolve_file_in_root(project.root(), Path::new(requested)).map_err(tool_error(args.tool()))?;
        if path.is_dir() {
            return Err(McpError::InvalidToolArguments {
                tool: args.tool().to_string(),
                message: format!("{} is a directory; use index_directory", requested),
            });
        }

        let store = self
            .context
            .registry()
            .open(project.root())
            .await
            .map_err(tool_error(args.tool()))?;
        let report = self
            .context
            .indexer()
            .index_files(&store, std::slice::from_ref(&path), IndexMode::Full)
            .await
            .map_err(tool_error(args.tool()))?;
        drop(store);

        let shown = project.display_path(&path.to_string_lossy());
        if let Some(failure) = report.failed.first() {
            return Ok(CallToolResult::error_text(format!(
                "Failed to index {}: {}",
                shown, failure.reason
            )));
        }
        let text = if report.removed > 0 {
            format!("Removed {} from the index (file no longer exists)", shown)
        } else if report.indexed == 0 {
            format!(
                "Skipped {}: not an indexable file (excluded, generated or unsupported extension)",
                shown
            )
        } else {
            format!("Indexed {}\n\n**Chunks created:** {}", shown, report.chunks)
        };
        Ok(CallToolResult::text(text))
    }
}

/// Incrementally index a directory of the project
pub struct IndexDirectoryHandler {
    context: Arc<AppContext>,
}

impl IndexDirectoryHandler {
    #[inline]
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ToolHandler for IndexDirectoryHandler {
    fn definition(&self) -> Tool {
        Tool {
            name: "index_directory".to_string(),
            description: Some("Index all supported files in a directory".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Directory to index, absolute or relative to the project root (default: the project root)"
                    },
                    "full": {
                        "type": "boolean",
                        "description": "Re-embed every file even when unchanged (default: false)"
                    }
                },
                "required": [],
                "additionalProperties": false
            }),
        }
    }

    async fn handle(&self, project: &ProjectContext, args: ToolArguments) -> McpResult<CallToolResult> {
        let requested = args.optional_str("path").unwrap_or(".");
        let target = resolve_in_root(project.root(), Path::new(requested)).map_err(tool_error(args.tool()))?;
        if !target.is_dir() {
            return Err(McpError::InvalidToolArguments {
                tool: args.tool().to_string(),
                message: format!("{} is not a directory", requested),
            });
        }
        let options = IndexOptions {
            mode: if args.optional_bool("full").unwrap_or(false) {
                IndexMode::Full
            } else {
                IndexMode::Incremental
            },
            ..IndexOptions::default()
        };

        // The pass runs detached so a dropped request stops it between files
        // instead of mid-commit.
        let cancel = self.context.task_token();
        let _cancel_on_drop = cancel.clone().drop_guard();
        let context = Arc::clone(&self.context);
        let root = project.root().to_path_buf();
        let pass_target = target.clone();
        let task = tokio::spawn(async move {
            let store = context.registry().open(&root).await?;
            context
                .indexer()
                .index_directory(&store, &pass_target, &options, &cancel, &NoopObserver)
                .await
        });

        let report = task
            .await
            .map_err(|e| McpError::ServerError {
                message: format!("Indexing task failed: {}", e),
            })?
            .map_err(tool_error(args.tool()))?;
        info!("index_directory {}: {}", target.display(), report.summary_line());

        let shown = project.display_path(&target.to_string_lossy());
        Ok(CallToolResult::text(format_index_report(
            if shown.is_empty() { "." } else { &shown },
            &report,
        )))
    }
}

/// Indexed files grouped by category
pub struct ListIndexedHandler {
    context: Arc<AppContext>,
}

impl ListIndexedHandler {
    #[inline]
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ToolHandler for ListIndexedHandler {
    fn definition(&self) -> Tool {
        Tool {
            name: "list_indexed".to_string(),
            description: Some("List all indexed files grouped by type".to_string()),
            input_schema: empty_schema(),
        }
    }

    async fn handle(&self, project: &ProjectContext, args: ToolArguments) -> McpResult<CallToolResult> {
        let Some(store) = self
            .context
            .registry()
            .open_existing(project.root())
            .await
            .map_err(tool_error(args.tool()))?
        else {
            return Ok(CallToolResult::text("No files indexed."));
        };
        let records = store.file_records().await.map_err(tool_error(args.tool()))?;
        Ok(CallToolResult::text(format_file_list(project, &records)))
    }
}

/// File, chunk and per-language totals
pub struct GetStatsHandler {
    context: Arc<AppContext>,
}

impl GetStatsHandler {
    #[inline]
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ToolHandler for GetStatsHandler {
    fn definition(&self) -> Tool {
        Tool {
            name: "get_stats".to_string(),
            description: Some("Get index statistics (file count, chunk count by language/type)".to_string()),
            input_schema: empty_schema(),
        }
    }

    async fn handle(&self, project: &ProjectContext, args: ToolArguments) -> McpResult<CallToolResult> {
        let Some(store) = self
            .context
            .registry()
            .open_existing(project.root())
            .await
            .map_err(tool_error(args.tool()))?
        else {
            return Ok(CallToolResult::text(format!(
                "No index found for {}. Run index_directory first.",
                project.root().display()
            )));
        };
        let stats = store.stats().await.map_err(tool_error(args.tool()))?;
        let mut text = format_stats(&stats, &store_dir(project.root()));
        text.push_str(&format_engine(
            &self.context.gate().describe(),
            &self.context.dispatcher().strategy_names(),
            &self.context.gate().metrics(),
        ));
        Ok(CallToolResult::text(text))
    }
}

/// Pending changes and counters of the project's file watcher
pub struct WatcherStatusHandler {
    context: Arc<AppContext>,
}

impl WatcherStatusHandler {
    #[inline]
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ToolHandler for WatcherStatusHandler {
    fn definition(&self) -> Tool {
        Tool {
            name: "watcher_status".to_string(),
            description: Some("Get file watcher status (pending changes, indexing stats)".to_string()),
            input_schema: empty_schema(),
        }
    }

    async fn handle(&self, project: &ProjectContext, _args: ToolArguments) -> McpResult<CallToolResult> {
        let statuses = self.context.watchers().status().await;
        let status = statuses.iter().find(|status| status.root == project.root());
        Ok(CallToolResult::text(format_watcher_status(status)))
    }
}

/// Tool registry keyed by canonical tool name
pub struct ToolRegistry {
    handlers: BTreeMap<String, Box<dyn ToolHandler>>,
    schemas: BTreeMap<String, ArgumentSchema>,
}

impl ToolRegistry {
    #[inline]
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            schemas: BTreeMap::new(),
        }
    }

    /// Register a handler; one whose input schema does not compile is skipped
    #[inline]
    pub fn register<H>(&mut self, handler: H)
    where
        H: ToolHandler + 'static,
    {
        let definition = handler.definition();
        match ArgumentSchema::compile(&definition) {
            Ok(schema) => {
                debug!("Registered tool: {}", definition.name);
                self.schemas.insert(definition.name.clone(), schema);
                self.handlers.insert(definition.name, Box::new(handler));
            }
            Err(e) => error!("Not registering tool {}: {}", definition.name, e),
        }
    }

    /// Validate call arguments against the named tool's schema
    #[inline]
    pub fn validate(&self, name: &str, arguments: Option<Map<String, Value>>) -> McpResult<ToolArguments> {
        let canonical = canonical_tool_name(name);
        let schema = self
            .schemas
            .get(&canonical)
            .ok_or(McpError::ToolNotFound { name: canonical })?;
        schema.validate(arguments)
    }

    /// Definitions of all registered tools, ordered by name
    #[inline]
    pub fn list_tools(&self) -> Vec<Tool> {
        self.handlers.values().map(|handler| handler.definition()).collect()
    }

    /// Look a tool up by name; hyphenated aliases resolve too
    #[inline]
    pub fn get(&self, name: &str) -> Option<&dyn ToolHandler> {
        self.handlers
            .get(&canonical_tool_name(name))
            .map(|handler| handler.as_ref())
    }

    /// Registry with every code search tool
    #[inline]
    pub fn create_default(context: &Arc<AppContext>) -> Self {
        let mut registry = Self::new();
        registry.register(SearchCodeHandler::new(Arc::clone(context)));
        registry.register(SearchDocsHandler::new(Arc::clone(context)));
        registry.register(SearchAllHandler::new(Arc::clone(context)));
        registry.register(IndexFileHandler::new(Arc::clone(context)));
        registry.register(IndexDirectoryHandler::new(Arc::clone(context)));
        registry.register(ListIndexedHandler::new(Arc::clone(context)));
        registry.register(GetStatsHandler::new(Arc::clone(context)));
        registry.register(WatcherStatusHandler::new(Arc::clone(context)));
        registry
    }
}

impl Default for ToolRegistry {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// Search results as Markdown, one section per chunk
#[inline]
pub fn format_results(project: &ProjectContext, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }

    let mut output = String::new();
    for result in results {
        let chunk = &result.chunk;
        let _ = writeln!(
            output,
            "### {}:{}-{}",
            project.display_path(&chunk.path),
            chunk.start_line,
            chunk.end_line
        );

        let mut meta = vec![
            format!("**Language:** {}", chunk.language),
            format!("**Type:** {}", chunk.category),
        ];
        if !chunk.scope.is_empty() {
            meta.push(format!("**Scope:** {}", chunk.scope.join(" > ")));
        }
        meta.push(format!("**Relevance:** {:.2}", result.score));
        let _ = writeln!(output, "{}", meta.join(" | "));
        let _ = writeln!(output, "```{}\n{}\n```\n", chunk.language, chunk.text.trim_end());
    }
    output
}

/// Search results grouped by category: documentation, code, config
#[inline]
pub fn format_results_grouped(project: &ProjectContext, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }

    let mut output = String::new();
    for category in [Category::Documentation, Category::Code, Category::Config] {
        let group: Vec<SearchResult> = results
            .iter()
            .filter(|result| result.chunk.category == category)
            .cloned()
            .collect();
        if group.is_empty() {
            continue;
        }
        let _ = writeln!(output, "## {} Results\n", title(category.as_str()));
        output.push_str(&format_results(project, &group));
    }
    output
}

/// Indexed files per category, at most [`LIST_LIMIT`] paths each
#[inline]
pub fn format_file_list(project: &ProjectContext, records: &[FileRecord]) -> String {
    if records.is_empty() {
        return "No files indexed.".to_string();
    }

    let mut grouped: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for record in records {
        grouped
            .entry(record.category.as_str())
            .or_default()
            .push(project.display_path(&record.path));
    }

    let mut output = String::new();
    for (category, mut paths) in grouped {
        paths.sort();
        let _ = writeln!(output, "## {} ({} files)\n", title(category), paths.len());
        for path in paths.iter().take(LIST_LIMIT) {
            let _ = writeln!(output, "- {}", path);
        }
        if paths.len() > LIST_LIMIT {
            let _ = writeln!(output, "\n...and {} more", paths.len() - LIST_LIMIT);
        }
        output.push('\n');
    }
    output
}

/// Store totals with per-language and per-category tables
#[inline]
pub fn format_stats(stats: &StoreStats, location: &Path) -> String {
    let mut by_category: BTreeMap<Category, (i64, i64)> = BTreeMap::new();
    for language in &stats.languages {
        let entry = by_category.entry(language.language.category()).or_insert((0, 0));
        entry.0 += language.files;
        entry.1 += language.chunks;
    }

    let mut output = String::new();
    let _ = writeln!(output, "**Total Files:** {}", stats.files);
    let _ = writeln!(output, "**Total Chunks:** {}", stats.chunks);

    output.push_str("\n### By Language\n\n| Language | Files | Chunks |\n|---|---:|---:|\n");
    for language in &stats.languages {
        let _ = writeln!(
            output,
            "| {} | {} | {} |",
            language.language, language.files, language.chunks
        );
    }

    let mut categories: Vec<(Category, (i64, i64))> = by_category.into_iter().collect();
    categories.sort_by(|a, b| b.1.1.cmp(&a.1.1).then(a.0.cmp(&b.0)));
    output.push_str("\n### By Type\n\n| Type | Files | Chunks |\n|---|---:|---:|\n");
    for (category, (files, chunks)) in categories {
        let _ = writeln!(output, "| {} | {} | {} |", category, files, chunks);
    }

    let _ = write!(output, "\n**Index Location:** {}", location.display());
    output
}

/// Chunking tiers and embedding activity shared by every project
#[inline]
pub fn format_engine(backend: &str, tiers: &[&str], metrics: &GateMetrics) -> String {
    let mut output = String::from("\n\n### Engine\n\n");
    let _ = writeln!(output, "**Embedding backend:** {}", backend);
    let _ = writeln!(output, "**Chunking tiers:** {}", tiers.join(" > "));
    let _ = write!(
        output,
        "**Embedding requests:** {} completed, {} failed, {} waiting ({} texts embedded)",
        metrics.completed, metrics.failed, metrics.waiting, metrics.texts
    );
    output
}

/// Summary of one directory pass
#[inline]
pub fn format_index_report(shown: &str, report: &IndexReport) -> String {
    let mut output = format!("Indexed {}\n\n", shown);
    let _ = writeln!(output, "**Files indexed:** {}", report.indexed);
    let _ = writeln!(output, "**Files unchanged:** {}", report.unchanged);
    if report.removed > 0 {
        let _ = writeln!(output, "**Files removed:** {}", report.removed);
    }
    if report.excluded > 0 {
        let _ = writeln!(output, "**Files excluded:** {}", report.excluded);
    }
    let _ = writeln!(output, "**Chunks created:** {}", report.chunks);
    if report.cancelled {
        output.push_str("\n*Indexing was cancelled; stale entries were not cleaned up.*\n");
    }

    if !report.failed.is_empty() {
        let _ = writeln!(output, "\n### Failures ({})", report.failed.len());
        for failure in &report.failed {
            let _ = writeln!(output, "- {}: {}", failure.path, failure.reason);
        }
    }

    if !report.languages.is_empty() {
        output.push_str("\n### By Language\n");
        let mut languages: Vec<(&Language, &usize)> = report.languages.iter().collect();
        languages.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (language, chunks) in languages {
            let _ = writeln!(output, "- {}: {} chunks", language, chunks);
        }
    }
    output
}

#[inline]
pub fn format_watcher_status(status: Option<&WatcherStatus>) -> String {
    let Some(status) = status else {
        return "No active file watcher for this project.".to_string();
    };
    let stats = &status.stats;
    [
        "**File Watcher:** active".to_string(),
        format!("**Pending changes:** {}", status.pending),
        format!("**Currently processing:** {}", status.processing),
        String::new(),
        "### Cumulative Stats".to_string(),
        format!("- Files indexed: {}", stats.files_indexed),
        format!("- Files deleted: {}", stats.files_deleted),
        format!("- Batches processed: {}", stats.batches_processed),
        format!("- Errors: {}", stats.errors),
    ]
    .join("\n")
}

fn title(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
