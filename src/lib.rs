use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CodeRagError>;

#[derive(Error, Debug)]
pub enum CodeRagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(
        "Store busy: {} is held by another process (pid {holder_pid}). Stop that process and retry.",
        store.display()
    )]
    ResourceBusy { store: PathBuf, holder_pid: u32 },

    #[error("Chunking error: {0}")]
    Chunking(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl CodeRagError {
    /// Stable, machine-readable name of the error kind
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration",
            Self::ResourceBusy { .. } => "resource_busy",
            Self::Chunking(_) => "chunking",
            Self::Embedding(_) => "embedding",
            Self::Database(_) => "database",
            Self::Protocol(_) => "protocol",
            Self::Timeout(_) => "timeout",
            Self::Io(_) => "io",
            Self::Other(_) => "internal",
        }
    }

    /// Recover a typed error that was carried through an `anyhow::Error`
    #[inline]
    pub fn from_anyhow(error: anyhow::Error) -> Self {
        match error.downcast::<Self>() {
            Ok(typed) => typed,
            Err(other) => Self::Other(other),
        }
    }
}

pub mod chunking;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod indexer;
pub mod mcp;
pub mod search;
