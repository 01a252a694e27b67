use super::*;

#[test]
fn hashes_are_stable_hex() {
    let hash = content_hash(b"hello");
    assert_eq!(
        hash,
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
    assert_ne!(hash, content_hash(b"hello "));
}

#[test]
fn current_when_hash_matches() {
    let record = FileRecord {
        path: "/p/a.py".to_string(),
        content_hash: content_hash(b"x = 1\n"),
        language: Language::Python,
        category: Category::Code,
        size: 6,
        chunk_count: 1,
        chunker: "window".to_string(),
        indexed_at: Utc::now(),
    };

    assert!(record.is_current(&content_hash(b"x = 1\n")));
    assert!(!record.is_current(&content_hash(b"x = 2\n")));
}
