use super::*;
use crate::chunking::{Chunk, Language, chunk_id};
use crate::database::sqlite::content_hash;
use chrono::Utc;
use tempfile::TempDir;

const DIMENSION: usize = 4;

fn file_record(path: &str, chunk_count: i64) -> FileRecord {
    FileRecord {
        path: path.to_string(),
        content_hash: content_hash(path.as_bytes()),
        language: Language::Python,
        category: Language::Python.category(),
        size: 12,
        chunk_count,
        chunker: "window".to_string(),
        indexed_at: Utc::now(),
    }
}

fn vector_record(path: &str, ordinal: usize, vector: [f32; 4]) -> VectorRecord {
    let text = format!("def f{}(): pass", ordinal);
    VectorRecord {
        chunk: Chunk {
            id: chunk_id(path, ordinal, &text),
            path: path.to_string(),
            language: Language::Python,
            category: Language::Python.category(),
            contextualized: text.clone(),
            text,
            start_line: 1,
            end_line: 1,
            node_kind: "window".to_string(),
            scope: Vec::new(),
            imports: Vec::new(),
            signatures: Vec::new(),
            chunker: "window".to_string(),
        },
        vector: vector.to_vec(),
    }
}

#[tokio::test]
async fn open_returns_cached_handle() {
    let dir = TempDir::new().expect("should create temp dir");
    let registry = VectorStoreRegistry::new(DIMENSION);

    let first = registry.open(dir.path()).await.expect("should open");
    let second = registry.open(dir.path()).await.expect("should reopen");
    assert!(Arc::ptr_eq(&first, &second));
    assert!(dir.path().join(STORE_DIR_NAME).join(FILES_DB_NAME).is_file());
}

#[tokio::test]
async fn missing_root_is_a_configuration_error() {
    let dir = TempDir::new().expect("should create temp dir");
    let registry = VectorStoreRegistry::new(DIMENSION);

    let result = registry.open(&dir.path().join("nope")).await;
    assert!(matches!(result, Err(CodeRagError::Config(_))));
}

#[tokio::test]
async fn open_existing_does_not_create_a_store() {
    let dir = TempDir::new().expect("should create temp dir");
    let registry = VectorStoreRegistry::new(DIMENSION);

    let store = registry
        .open_existing(dir.path())
        .await
        .expect("should resolve root");
    assert!(store.is_none());
    assert!(!dir.path().join(STORE_DIR_NAME).exists());
}

#[tokio::test]
async fn replace_and_remove_file_chunks() {
    let dir = TempDir::new().expect("should create temp dir");
    let registry = VectorStoreRegistry::new(DIMENSION);
    let store = registry.open(dir.path()).await.expect("should open");

    {
        let writer = store.write().await;
        writer
            .replace_file_chunks(
                &file_record("/p/a.py", 2),
                &[
                    vector_record("/p/a.py", 0, [1.0, 0.0, 0.0, 0.0]),
                    vector_record("/p/a.py", 1, [0.0, 1.0, 0.0, 0.0]),
                ],
            )
            .await
            .expect("should commit a.py");
        writer
            .replace_file_chunks(
                &file_record("/p/b.py", 1),
                &[vector_record("/p/b.py", 0, [0.0, 0.0, 1.0, 0.0])],
            )
            .await
            .expect("should commit b.py");

        // replacing drops the old chunk set
        writer
            .replace_file_chunks(
                &file_record("/p/a.py", 1),
                &[vector_record("/p/a.py", 0, [1.0, 0.0, 0.0, 0.0])],
            )
            .await
            .expect("should recommit a.py");
    }

    let stats = store.stats().await.expect("should compute stats");
    assert_eq!(stats.files, 2);
    assert_eq!(stats.chunks, 2);

    let hits = store
        .search(&[1.0, 0.0, 0.0, 0.0], 5, None)
        .await
        .expect("should search");
    assert_eq!(hits.iter().filter(|h| h.chunk.path == "/p/a.py").count(), 1);

    let writer = store.write().await;
    writer.remove_file("/p/a.py").await.expect("should remove");
    let paths = writer.stored_paths().await.expect("should list paths");
    assert_eq!(paths.into_iter().collect::<Vec<_>>(), vec!["/p/b.py".to_string()]);
    drop(writer);

    assert!(
        store
            .file_record("/p/a.py")
            .await
            .expect("should read")
            .is_none()
    );
}

#[tokio::test]
async fn clear_empties_both_sides() {
    let dir = TempDir::new().expect("should create temp dir");
    let registry = VectorStoreRegistry::new(DIMENSION);
    let store = registry.open(dir.path()).await.expect("should open");

    let writer = store.write().await;
    writer
        .replace_file_chunks(
            &file_record("/p/a.py", 1),
            &[vector_record("/p/a.py", 0, [1.0, 0.0, 0.0, 0.0])],
        )
        .await
        .expect("should commit");
    writer.clear().await.expect("should clear");
    drop(writer);

    let stats = store.stats().await.expect("should compute stats");
    assert_eq!(stats.files, 0);
    assert_eq!(stats.chunks, 0);
    assert!(store.file_records().await.expect("should list").is_empty());
}

#[tokio::test]
async fn second_registry_sees_store_busy() {
    let dir = TempDir::new().expect("should create temp dir");
    let server = VectorStoreRegistry::new(DIMENSION);
    let cli = VectorStoreRegistry::new(DIMENSION);

    let _held = server.open(dir.path()).await.expect("should open");
    let result = cli.open(dir.path()).await;
    assert!(matches!(result, Err(CodeRagError::ResourceBusy { .. })));

    // the failure was not cached and the store frees up once closed
    drop(_held);
    server.close_all().await;
    cli.open(dir.path()).await.expect("should open after release");
}

#[tokio::test]
async fn evicts_only_unheld_idle_stores() {
    let first_dir = TempDir::new().expect("should create temp dir");
    let second_dir = TempDir::new().expect("should create temp dir");
    let registry = VectorStoreRegistry::new(DIMENSION);

    let held = registry.open(first_dir.path()).await.expect("should open");
    registry.open(second_dir.path()).await.expect("should open");

    let evicted = registry.evict_idle(Duration::ZERO).await;
    assert_eq!(evicted, 1);
    let reopened = registry.open(first_dir.path()).await.expect("should stay cached");
    assert!(Arc::ptr_eq(&held, &reopened));
    drop(reopened);

    assert_eq!(registry.evict_idle(Duration::from_secs(3600)).await, 0);
}

#[tokio::test]
async fn dimension_change_resets_file_catalog() {
    let dir = TempDir::new().expect("should create temp dir");
    {
        let registry = VectorStoreRegistry::new(DIMENSION);
        let store = registry.open(dir.path()).await.expect("should open");
        store
            .write()
            .await
            .replace_file_chunks(
                &file_record("/p/a.py", 1),
                &[vector_record("/p/a.py", 0, [1.0, 0.0, 0.0, 0.0])],
            )
            .await
            .expect("should commit");
        drop(store);
        registry.close_all().await;
    }

    let registry = VectorStoreRegistry::new(8);
    let store = registry.open(dir.path()).await.expect("should reopen");
    let stats = store.stats().await.expect("should compute stats");
    assert_eq!(stats.files, 0);
    assert_eq!(stats.chunks, 0);
}

#[tokio::test]
async fn remove_files_drops_records_and_vectors() {
    let dir = TempDir::new().expect("should create temp dir");
    let registry = VectorStoreRegistry::new(DIMENSION);
    let store = registry.open(dir.path()).await.expect("should open");

    let writer = store.write().await;
    for (index, path) in ["/p/a.py", "/p/b.py", "/p/c.py"].into_iter().enumerate() {
        let mut vector = [0.0; 4];
        vector[index] = 1.0;
        writer
            .replace_file_chunks(&file_record(path, 1), &[vector_record(path, 0, vector)])
            .await
            .expect("should commit");
    }

    let removed = writer
        .remove_files(&["/p/a.py".to_string(), "/p/c.py".to_string(), "/p/missing.py".to_string()])
        .await
        .expect("should remove");
    assert_eq!(removed, 2);
    let paths = writer.stored_paths().await.expect("should list paths");
    assert_eq!(paths.into_iter().collect::<Vec<_>>(), vec!["/p/b.py".to_string()]);
    drop(writer);

    let stats = store.stats().await.expect("should compute stats");
    assert_eq!((stats.files, stats.chunks), (1, 1));
}

#[tokio::test]
async fn failed_replacement_leaves_no_record() {
    let dir = TempDir::new().expect("should create temp dir");
    let registry = VectorStoreRegistry::new(DIMENSION);
    let store = registry.open(dir.path()).await.expect("should open");

    let writer = store.write().await;
    writer
        .replace_file_chunks(
            &file_record("/p/a.py", 1),
            &[vector_record("/p/a.py", 0, [1.0, 0.0, 0.0, 0.0])],
        )
        .await
        .expect("should commit");

    let mut broken = vector_record("/p/a.py", 0, [1.0, 0.0, 0.0, 0.0]);
    broken.vector.push(0.0);
    let result = writer.replace_file_chunks(&file_record("/p/a.py", 1), &[broken]).await;
    assert!(matches!(result, Err(CodeRagError::Database(_))));
    drop(writer);

    // without a record the next incremental pass redoes the file
    assert!(store.file_record("/p/a.py").await.expect("should read").is_none());
}
