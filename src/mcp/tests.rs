//! MCP server tests
//!
//! Drive the transport-independent message handler end to end with the
//! hashing embedder, plus the Markdown renderings.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::chunking::{Category, Language};
use crate::config::Config;
use crate::database::{FileRecord, LanguageStats, StoreStats};
use crate::embeddings::{GateMetrics, HashingEmbedder};
use crate::indexer::WatcherStats;
use crate::indexer::watcher::WatcherStatus;
use crate::mcp::context::{AppContext, ProjectContext};
use crate::mcp::protocol::{error_codes, mcp_error_codes};
use crate::mcp::server::McpServer;
use crate::mcp::errors::McpError;
use crate::mcp::tools::{
    ToolRegistry, canonical_tool_name, format_engine, format_file_list, format_stats,
    format_watcher_status,
};

fn context() -> Arc<AppContext> {
    let mut config = Config::default();
    config.watcher.enabled = false;
    Arc::new(AppContext::new(config, Arc::new(HashingEmbedder::new(64))))
}

struct Project {
    _dir: TempDir,
    root: PathBuf,
}

impl Project {
    fn new() -> Self {
        let dir = TempDir::new().expect("should create temp dir");
        let root = dir.path().canonicalize().expect("should canonicalize");
        Self { _dir: dir, root }
    }

    fn write(&self, relative: &str, content: &str) {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("should create parent dirs");
        }
        std::fs::write(path, content).expect("should write file");
    }

    fn id(&self) -> String {
        self.root.to_string_lossy().into_owned()
    }
}

async fn call(server: &McpServer, project: Option<&str>, name: &str, arguments: Value) -> Value {
    let request = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": {"name": name, "arguments": arguments}
    });
    let response = server
        .handle_raw(&request.to_string(), project)
        .await
        .expect("should respond to a request");
    serde_json::to_value(response).expect("should serialize response")
}

fn text(response: &Value) -> &str {
    response["result"]["content"][0]["text"]
        .as_str()
        .expect("should carry text content")
}

fn error_code(response: &Value) -> i64 {
    response["error"]["code"].as_i64().expect("should be an error response")
}

const PARSER: &str = "def parse_configuration_file(path):\n    \"\"\"Parse the configuration file at path.\"\"\"\n    with open(path) as handle:\n        return load_config(handle.read())\n";

#[tokio::test]
async fn lists_every_tool_in_name_order() {
    let server = McpServer::new(context());
    let response = server
        .handle_raw(r#"{"jsonrpc":"2.0","id":"a","method":"tools/list"}"#, None)
        .await
        .expect("should respond");
    let value = serde_json::to_value(response).expect("should serialize");
    let names: Vec<&str> = value["result"]["tools"]
        .as_array()
        .expect("should list tools")
        .iter()
        .filter_map(|tool| tool["name"].as_str())
        .collect();
    assert_eq!(
        names,
        vec![
            "get_stats",
            "index_directory",
            "index_file",
            "list_indexed",
            "search_all",
            "search_code",
            "search_docs",
            "watcher_status",
        ]
    );
    assert_eq!(value["id"], "a");
}

#[tokio::test]
async fn initialize_negotiates_version() {
    let server = McpServer::new(context());
    let request = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "1999-01-01",
            "capabilities": {},
            "clientInfo": {"name": "test", "version": "0"}
        }
    });
    let response = server
        .handle_raw(&request.to_string(), None)
        .await
        .expect("should respond");
    let value = serde_json::to_value(response).expect("should serialize");
    assert_eq!(value["result"]["protocolVersion"], "2025-06-18");
    assert_eq!(value["result"]["serverInfo"]["name"], "code-rag");
    assert!(value["result"]["capabilities"]["tools"].is_object());
}

#[tokio::test]
async fn missing_project_is_a_configuration_error() {
    let server = McpServer::new(context());
    let response = call(&server, None, "search_code", json!({"query": "auth"})).await;
    assert_eq!(error_code(&response), i64::from(mcp_error_codes::CONFIGURATION));
    assert_eq!(response["error"]["data"]["kind"], "configuration");
    let message = response["error"]["message"].as_str().expect("should have message");
    assert!(message.contains("X-Project-Root"));
}

#[tokio::test]
async fn protocol_failures_use_standard_codes() {
    let server = McpServer::new(context());

    let parse = serde_json::to_value(server.handle_raw("{not json", None).await.expect("should respond"))
        .expect("should serialize");
    assert_eq!(error_code(&parse), i64::from(error_codes::PARSE_ERROR));
    assert!(parse["id"].is_null());

    let unknown = serde_json::to_value(
        server
            .handle_raw(r#"{"jsonrpc":"2.0","id":2,"method":"resources/list"}"#, None)
            .await
            .expect("should respond"),
    )
    .expect("should serialize");
    assert_eq!(error_code(&unknown), i64::from(error_codes::METHOD_NOT_FOUND));

    let notification = server
        .handle_raw(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#, None)
        .await;
    assert!(notification.is_none());
}

#[tokio::test]
async fn unknown_tool_and_bad_arguments_are_rejected() {
    let project = Project::new();
    let server = McpServer::new(context());

    let unknown = call(&server, Some(&project.id()), "list_sites", json!({})).await;
    assert_eq!(error_code(&unknown), i64::from(mcp_error_codes::TOOL_NOT_FOUND));

    for arguments in [json!({"query": "q", "n": 0}), json!({"n": 3}), json!({"query": "   "})] {
        let response = call(&server, Some(&project.id()), "search_code", arguments).await;
        assert_eq!(
            error_code(&response),
            i64::from(mcp_error_codes::INVALID_TOOL_ARGUMENTS)
        );
    }
    assert!(!project.root.join(".code-rag").exists());
}

#[tokio::test]
async fn unindexed_project_answers_without_creating_a_store() {
    let project = Project::new();
    let server = McpServer::new(context());

    let search = call(&server, Some(&project.id()), "search_all", json!({"query": "anything"})).await;
    assert_eq!(text(&search), "No results found.");
    let listed = call(&server, Some(&project.id()), "list_indexed", json!({})).await;
    assert_eq!(text(&listed), "No files indexed.");
    let stats = call(&server, Some(&project.id()), "get_stats", json!({})).await;
    assert!(text(&stats).starts_with("No index found"));
    assert!(!project.root.join(".code-rag").exists());
}

#[tokio::test]
async fn index_then_search_through_aliases() {
    let project = Project::new();
    project.write("src/config.py", PARSER);
    project.write("docs/setup.md", "# Setup\n\nParse the configuration file before starting the service.\n");
    let server = McpServer::new(context());

    let indexed = call(&server, Some(&project.id()), "index-directory", json!({})).await;
    let summary = text(&indexed);
    assert!(summary.contains("**Files indexed:** 2"), "{}", summary);
    assert!(summary.contains("- python:"));

    let code = call(
        &server,
        Some(&project.id()),
        "search-code",
        json!({"query": "parse configuration file", "language": "python"}),
    )
    .await;
    let code_text = text(&code);
    assert!(code_text.starts_with("### src/config.py:1-"), "{}", code_text);
    assert!(code_text.contains("**Language:** python"));
    assert!(code_text.contains("```python"));

    let docs = call(&server, Some(&project.id()), "search_docs", json!({"query": "configuration"})).await;
    assert!(text(&docs).contains("docs/setup.md"));
    assert!(!text(&docs).contains("config.py"));

    let all = call(&server, Some(&project.id()), "search_all", json!({"query": "configuration"})).await;
    let all_text = text(&all);
    let docs_at = all_text.find("## Documentation Results").expect("should group docs");
    let code_at = all_text.find("## Code Results").expect("should group code");
    assert!(docs_at < code_at);

    let listed = call(&server, Some(&project.id()), "list_indexed", json!({})).await;
    assert!(text(&listed).contains("## Code (1 files)"));
    assert!(text(&listed).contains("- src/config.py"));

    let stats = call(&server, Some(&project.id()), "get_stats", json!({})).await;
    let stats_text = text(&stats);
    assert!(stats_text.contains("**Total Files:** 2"));
    assert!(stats_text.contains("**Embedding backend:** hashing embedder (64 dimensions)"));
    assert!(stats_text.contains("**Chunking tiers:** grammar > window"));
    let completed = server.context().gate().metrics().completed;
    assert!(completed >= 4, "indexing and three searches should have gone through the gate");

    server.context().shutdown().await;
}

#[tokio::test]
async fn index_file_forces_reembedding_and_handles_removal() {
    let project = Project::new();
    project.write("config.py", PARSER);
    let server = McpServer::new(context());

    let first = call(&server, Some(&project.id()), "index_file", json!({"path": "config.py"})).await;
    assert!(text(&first).starts_with("Indexed config.py"));
    let again = call(&server, Some(&project.id()), "index_file", json!({"path": "config.py"})).await;
    assert!(text(&again).contains("**Chunks created:**"));

    std::fs::remove_file(project.root.join("config.py")).expect("should delete file");
    let removed = call(&server, Some(&project.id()), "index_file", json!({"path": "config.py"})).await;
    assert!(text(&removed).starts_with("Removed config.py"));

    let escaped = call(&server, Some(&project.id()), "index_directory", json!({"path": "/"})).await;
    assert_eq!(error_code(&escaped), i64::from(mcp_error_codes::CONFIGURATION));
}

#[tokio::test]
async fn store_held_elsewhere_reports_busy() {
    let project = Project::new();
    project.write("config.py", PARSER);

    let holder = context();
    let _store = holder.registry().open(&project.root).await.expect("should open store");

    let server = McpServer::new(context());
    let response = call(&server, Some(&project.id()), "index_directory", json!({})).await;
    assert_eq!(error_code(&response), i64::from(mcp_error_codes::RESOURCE_BUSY));
    assert_eq!(response["error"]["data"]["kind"], "resource_busy");
}

#[tokio::test]
async fn watcher_status_without_watcher() {
    let project = Project::new();
    let server = McpServer::new(context());
    let response = call(&server, Some(&project.id()), "watcher_status", json!({})).await;
    assert_eq!(text(&response), "No active file watcher for this project.");
}

#[test]
fn tool_names_accept_hyphens() {
    assert_eq!(canonical_tool_name("search-code"), "search_code");
    assert_eq!(canonical_tool_name(" get_stats "), "get_stats");
}

#[test]
fn project_context_requires_an_identifier() {
    assert!(ProjectContext::resolve(None).is_err());
    assert!(ProjectContext::resolve(Some("  ")).is_err());
    assert!(ProjectContext::resolve(Some("/definitely/not/a/project")).is_err());

    let project = Project::new();
    let context = ProjectContext::resolve(Some(&project.id())).expect("should resolve");
    assert_eq!(context.root(), project.root.as_path());
    let inside = project.root.join("src/a.py");
    assert_eq!(context.display_path(&inside.to_string_lossy()), "src/a.py");
    assert_eq!(context.display_path("/elsewhere/b.py"), "/elsewhere/b.py");
}

fn record(path: &Path, category: Category) -> FileRecord {
    FileRecord {
        path: path.to_string_lossy().into_owned(),
        content_hash: "0".repeat(64),
        language: Language::Python,
        category,
        size: 10,
        chunk_count: 1,
        chunker: "grammar".to_string(),
        indexed_at: Utc::now(),
    }
}

#[test]
fn file_list_caps_each_group() {
    let project = Project::new();
    let context = ProjectContext::resolve(Some(&project.id())).expect("should resolve");
    let mut records: Vec<FileRecord> = (0..60)
        .map(|i| record(&project.root.join(format!("m{:02}.py", i)), Category::Code))
        .collect();
    records.push(record(&project.root.join("README.md"), Category::Documentation));

    let listed = format_file_list(&context, &records);
    assert!(listed.starts_with("## Code (60 files)"));
    assert!(listed.contains("- m49.py"));
    assert!(!listed.contains("- m50.py"));
    assert!(listed.contains("...and 10 more"));
    assert!(listed.contains("## Documentation (1 files)"));
}

#[test]
fn stats_render_as_tables() {
    let stats = StoreStats {
        files: 3,
        chunks: 12,
        languages: vec![
            LanguageStats {
                language: Language::Python,
                files: 2,
                chunks: 10,
            },
            LanguageStats {
                language: Language::Markdown,
                files: 1,
                chunks: 2,
            },
        ],
    };
    let rendered = format_stats(&stats, Path::new("/p/.code-rag"));
    assert!(rendered.starts_with("**Total Files:** 3\n**Total Chunks:** 12"));
    assert!(rendered.contains("| python | 2 | 10 |"));
    assert!(rendered.contains("| code | 2 | 10 |"));
    assert!(rendered.contains("| documentation | 1 | 2 |"));
    assert!(rendered.ends_with("**Index Location:** /p/.code-rag"));
}

#[test]
fn watcher_status_renders_counters() {
    let status = WatcherStatus {
        root: PathBuf::from("/p"),
        pending: 2,
        processing: false,
        stats: WatcherStats {
            files_indexed: 5,
            files_deleted: 1,
            batches_processed: 3,
            errors: 0,
        },
    };
    let rendered = format_watcher_status(Some(&status));
    assert!(rendered.starts_with("**File Watcher:** active"));
    assert!(rendered.contains("**Pending changes:** 2"));
    assert!(rendered.contains("- Batches processed: 3"));
}

#[tokio::test]
async fn registry_checks_arguments_with_compiled_schemas() {
    let registry = ToolRegistry::create_default(&context());
    assert_eq!(registry.list_tools().len(), 8);

    let parsed = registry
        .validate("search-code", json!({"query": "login", "language": "python"}).as_object().cloned())
        .expect("should accept declared arguments");
    assert_eq!(parsed.optional_str("language"), Some("python"));

    let rejected = registry
        .validate("search_code", json!({"query": "login", "language": "cobol"}).as_object().cloned())
        .expect_err("should reject unknown language");
    assert!(matches!(rejected, McpError::InvalidToolArguments { .. }));

    let extra = registry
        .validate("get_stats", json!({"verbose": true}).as_object().cloned())
        .expect_err("should reject undeclared argument");
    assert!(extra.to_string().contains("verbose"));

    assert!(matches!(
        registry.validate("list_sites", None),
        Err(McpError::ToolNotFound { .. })
    ));
}

#[test]
fn engine_section_lists_tiers_and_gate_activity() {
    let metrics = GateMetrics {
        in_flight: 0,
        max_in_flight: 1,
        waiting: 2,
        completed: 7,
        failed: 1,
        texts: 40,
    };
    let rendered = format_engine("ollama nomic-embed-text", &["external", "grammar", "window"], &metrics);
    assert!(rendered.starts_with("\n\n### Engine"));
    assert!(rendered.contains("**Chunking tiers:** external > grammar > window"));
    assert!(rendered.ends_with("7 completed, 1 failed, 2 waiting (40 texts embedded)"));
}
