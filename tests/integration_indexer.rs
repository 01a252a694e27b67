#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! Integration tests for the indexing pipeline
//!
//! These tests run the walker, chunkers, embedding gate and project store
//! together on temporary projects:
//! - Incremental passes skip unchanged files and pick up edits
//! - Deleted or newly excluded files are cleaned out of the store
//! - `.ragignore` overrides replace the default exclusions
//! - Cancellation stops a pass between files

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use code_rag::chunking::Category;
use code_rag::config::{Config, ExclusionSource};
use code_rag::embeddings::HashingEmbedder;
use code_rag::indexer::{IndexMode, IndexOptions, IndexReport, NoopObserver};
use code_rag::mcp::AppContext;
use code_rag::search::SearchRequest;

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    context: AppContext,
}

impl Fixture {
    fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let root = dir.path().canonicalize()?;
        let mut config = Config::default();
        config.watcher.enabled = false;
        let context = AppContext::new(config, Arc::new(HashingEmbedder::new(64)));
        Ok(Self {
            _dir: dir,
            root,
            context,
        })
    }

    fn write(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    async fn index(&self, options: IndexOptions) -> Result<IndexReport> {
        self.index_with(options, &CancellationToken::new()).await
    }

    async fn index_with(&self, options: IndexOptions, cancel: &CancellationToken) -> Result<IndexReport> {
        let store = self.context.registry().open(&self.root).await?;
        let report = self
            .context
            .indexer()
            .index_directory(&store, &self.root, &options, cancel, &NoopObserver)
            .await?;
        Ok(report)
    }

    async fn stored_paths(&self) -> Result<Vec<String>> {
        let store = self.context.registry().open(&self.root).await?;
        let mut paths: Vec<String> = store
            .file_records()
            .await?
            .into_iter()
            .map(|record| relative(&self.root, &record.path))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

fn relative(root: &Path, path: &str) -> String {
    Path::new(path)
        .strip_prefix(root)
        .map_or_else(|_| path.to_string(), |p| p.to_string_lossy().replace('\\', "/"))
}

const HANDLER: &str = "package handlers\n\n// HandleLogin validates credentials and opens a session.\nfunc HandleLogin(user string, password string) error {\n\treturn openSession(user, password)\n}\n";

const SERVICE: &str = "class PaymentService:\n    \"\"\"Charges cards through the payment gateway.\"\"\"\n\n    def charge(self, card, amount):\n        return self.gateway.charge(card, amount)\n";

#[tokio::test]
async fn incremental_pass_tracks_edits() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.write("handlers/login.go", HANDLER)?;
    fixture.write("billing/service.py", SERVICE)?;
    fixture.write("docs/guide.md", "# Guide\n\nPayments are charged through the gateway.\n")?;

    let first = fixture.index(IndexOptions::default()).await?;
    assert_eq!(first.indexed, 3);
    assert!(first.failed.is_empty());
    assert_eq!(first.exclusion_source, ExclusionSource::Defaults);

    let second = fixture.index(IndexOptions::default()).await?;
    assert_eq!(second.indexed, 0);
    assert_eq!(second.unchanged, 3);

    fixture.write(
        "billing/service.py",
        &format!("{}\n    def refund(self, charge_id):\n        return self.gateway.refund(charge_id)\n", SERVICE),
    )?;
    let third = fixture.index(IndexOptions::default()).await?;
    assert_eq!(third.indexed, 1);
    assert_eq!(third.unchanged, 2);

    let full = fixture
        .index(IndexOptions {
            mode: IndexMode::Full,
            ..IndexOptions::default()
        })
        .await?;
    assert_eq!(full.indexed, 3);
    Ok(())
}

#[tokio::test]
async fn stale_files_are_removed() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.write("handlers/login.go", HANDLER)?;
    fixture.write("billing/service.py", SERVICE)?;
    fixture.index(IndexOptions::default()).await?;

    std::fs::remove_file(fixture.path("handlers/login.go"))?;
    let report = fixture.index(IndexOptions::default()).await?;
    assert_eq!(report.removed, 1);
    assert_eq!(fixture.stored_paths().await?, vec!["billing/service.py"]);

    let excluded = fixture
        .index(IndexOptions {
            exclude_dirs: vec!["billing".to_string()],
            ..IndexOptions::default()
        })
        .await?;
    assert_eq!(excluded.removed, 1);
    assert!(fixture.stored_paths().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn ragignore_replaces_defaults() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.write("vendor/lib.py", SERVICE)?;
    fixture.write("fixtures/sample.py", SERVICE)?;
    fixture.write("app.py", "def main():\n    return run_application()\n")?;

    let defaults = fixture.index(IndexOptions::default()).await?;
    assert_eq!(defaults.indexed, 2);
    assert_eq!(fixture.stored_paths().await?, vec!["app.py", "fixtures/sample.py"]);

    fixture.write(".ragignore", "# project rules\nfixtures\n")?;
    let overridden = fixture.index(IndexOptions::default()).await?;
    assert!(matches!(overridden.exclusion_source, ExclusionSource::OverrideFile(_)));
    assert_eq!(overridden.indexed, 1);
    assert_eq!(overridden.removed, 1);
    assert_eq!(fixture.stored_paths().await?, vec!["app.py", "vendor/lib.py"]);
    Ok(())
}

#[tokio::test]
async fn clear_and_limit() -> Result<()> {
    let fixture = Fixture::new()?;
    for i in 0..4 {
        fixture.write(&format!("mod_{}.py", i), &format!("def handler_{}():\n    return {}\n", i, i))?;
    }
    fixture.index(IndexOptions::default()).await?;

    let limited = fixture
        .index(IndexOptions {
            clear: true,
            limit: Some(2),
            ..IndexOptions::default()
        })
        .await?;
    assert!(limited.cleared);
    assert!(limited.limited);
    assert_eq!(limited.indexed, 2);
    assert_eq!(fixture.stored_paths().await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn cancelled_pass_keeps_existing_entries() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.write("a.py", SERVICE)?;
    fixture.index(IndexOptions::default()).await?;
    std::fs::remove_file(fixture.path("a.py"))?;
    fixture.write("b.py", SERVICE)?;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = fixture.index_with(IndexOptions::default(), &cancel).await?;
    assert!(report.cancelled);
    assert_eq!(report.indexed, 0);
    assert_eq!(report.removed, 0);
    assert_eq!(fixture.stored_paths().await?, vec!["a.py"]);
    Ok(())
}

#[tokio::test]
async fn search_filters_by_category() -> Result<()> {
    let fixture = Fixture::new()?;
    fixture.write("billing/service.py", SERVICE)?;
    fixture.write("docs/payments.md", "# Payments\n\nCards are charged through the payment gateway.\n")?;
    fixture.write("config/gateway.json", "{\"gateway\": {\"url\": \"https://payments.example\"}}\n")?;
    fixture.index(IndexOptions::default()).await?;

    let everything = fixture
        .context
        .search()
        .search(&fixture.root, &SearchRequest::new("payment gateway", 10))
        .await?;
    let categories: Vec<Category> = everything.iter().map(|r| r.chunk.category).collect();
    assert!(categories.contains(&Category::Code));
    assert!(categories.contains(&Category::Documentation));
    assert!(categories.contains(&Category::Config));
    for pair in everything.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    let docs = fixture
        .context
        .search()
        .search(
            &fixture.root,
            &SearchRequest::new("payment gateway", 10).with_category(Some(Category::Documentation)),
        )
        .await?;
    assert!(!docs.is_empty());
    assert!(docs.iter().all(|r| r.chunk.category == Category::Documentation));
    Ok(())
}
