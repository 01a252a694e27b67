use super::*;
use crate::chunking::Category;
use tempfile::TempDir;

fn record(path: &str, ordinal: usize, language: Language, vector: [f32; 4]) -> VectorRecord {
    let text = format!("chunk {} of {}", ordinal, path);
    VectorRecord {
        chunk: Chunk {
            id: crate::chunking::chunk_id(path, ordinal, &text),
            path: path.to_string(),
            language,
            category: language.category(),
            contextualized: format!("File: {}\n\n{}", path, text),
            text,
            start_line: 1,
            end_line: 3,
            node_kind: "function_item".to_string(),
            scope: vec!["Outer".to_string()],
            imports: Vec::new(),
            signatures: vec!["fn run()".to_string()],
            chunker: "grammar".to_string(),
        },
        vector: vector.to_vec(),
    }
}

async fn open_store(dir: &TempDir) -> VectorStore {
    let (store, reset) = VectorStore::open(&dir.path().join("vectors"), 4)
        .await
        .expect("should open vector store");
    assert!(!reset);
    store
}

#[tokio::test]
async fn insert_search_and_filter() {
    let dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&dir).await;

    store
        .insert(&[
            record("/p/a.py", 0, Language::Python, [1.0, 0.0, 0.0, 0.0]),
            record("/p/b.java", 0, Language::Java, [0.9, 0.1, 0.0, 0.0]),
            record("/p/README.md", 0, Language::Markdown, [0.0, 1.0, 0.0, 0.0]),
        ])
        .await
        .expect("should insert");

    assert_eq!(store.count(None).await.expect("should count"), 3);

    let hits = store
        .search(&[1.0, 0.0, 0.0, 0.0], 10, None)
        .await
        .expect("should search");
    assert_eq!(hits.len(), 3);
    let best = hits
        .iter()
        .max_by(|a, b| a.score.total_cmp(&b.score))
        .expect("should have a best hit");
    assert_eq!(best.chunk.path, "/p/a.py");
    assert!((best.score - 1.0).abs() < 1e-4);
    assert_eq!(best.chunk.scope, vec!["Outer".to_string()]);
    assert_eq!(best.chunk.signatures, vec!["fn run()".to_string()]);
    assert_eq!(best.chunk.category, Category::Code);

    let java_only = store
        .search(&[1.0, 0.0, 0.0, 0.0], 10, Some("language = 'java'"))
        .await
        .expect("should search");
    assert_eq!(java_only.len(), 1);
    assert_eq!(java_only[0].chunk.language, Language::Java);
}

#[tokio::test]
async fn delete_path_removes_only_that_file() {
    let dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&dir).await;

    store
        .insert(&[
            record("/p/it's.py", 0, Language::Python, [1.0, 0.0, 0.0, 0.0]),
            record("/p/it's.py", 1, Language::Python, [0.0, 1.0, 0.0, 0.0]),
            record("/p/keep.py", 0, Language::Python, [0.0, 0.0, 1.0, 0.0]),
        ])
        .await
        .expect("should insert");

    store.delete_path("/p/it's.py").await.expect("should delete");

    let paths = store.paths().await.expect("should list paths");
    assert_eq!(paths.into_iter().collect::<Vec<_>>(), vec!["/p/keep.py".to_string()]);
}

#[tokio::test]
async fn clear_and_dimension_change() {
    let dir = TempDir::new().expect("should create temp dir");
    let mut store = open_store(&dir).await;
    store
        .insert(&[record("/p/a.py", 0, Language::Python, [1.0, 0.0, 0.0, 0.0])])
        .await
        .expect("should insert");

    store.clear().await.expect("should clear");
    assert_eq!(store.count(None).await.expect("should count"), 0);
    store
        .insert(&[record("/p/a.py", 0, Language::Python, [1.0, 0.0, 0.0, 0.0])])
        .await
        .expect("should insert after clear");
    drop(store);

    // same dimension keeps the data
    let reopened = open_store(&dir).await;
    assert_eq!(reopened.count(None).await.expect("should count"), 1);
    drop(reopened);

    // a different backend dimension recreates the table
    let (resized, reset) = VectorStore::open(&dir.path().join("vectors"), 8)
        .await
        .expect("should reopen");
    assert!(reset);
    assert_eq!(resized.dimension(), 8);
    assert_eq!(resized.count(None).await.expect("should count"), 0);
}

#[tokio::test]
async fn rejects_wrong_vector_length() {
    let dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&dir).await;

    let mut bad = record("/p/a.py", 0, Language::Python, [1.0, 0.0, 0.0, 0.0]);
    bad.vector.push(0.5);
    assert!(matches!(
        store.insert(&[bad]).await,
        Err(CodeRagError::Database(_))
    ));
}
