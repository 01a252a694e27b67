// Storage layer
// Per-project stores: LanceDB for vectors, SQLite for the file catalog,
// a writer lease shared with other processes, and the registry owning them

pub mod lancedb;
pub mod lease;
pub mod registry;
pub mod sqlite;

pub use registry::{
    ProjectStore, STORE_DIR_NAME, StoreStats, VectorStoreRegistry, WriteGuard, canonical_root,
    store_dir,
};
pub use sqlite::{FileRecord, LanguageStats, content_hash};
