use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};


pub mod models;
pub mod queries;

pub use models::{FileRecord, LanguageStats, content_hash};
use queries::{CREATE_FILES_LANGUAGE_INDEX, CREATE_FILES_TABLE, FileQueries};

pub type DbPool = Pool<Sqlite>;

/// FileRecord catalog of one project store
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Preparing file catalog schema");

        sqlx::query(CREATE_FILES_TABLE)
            .execute(&self.pool)
            .await
            .context("Failed to create files table")?;
        sqlx::query(CREATE_FILES_LANGUAGE_INDEX)
            .execute(&self.pool)
            .await
            .context("Failed to create files index")?;

        debug!("File catalog schema ready");
        Ok(())
    }

    pub async fn get_file(&self, path: &str) -> Result<Option<FileRecord>> {
        FileQueries::get(&self.pool, path).await
    }

    pub async fn upsert_file(&self, record: &FileRecord) -> Result<()> {
        FileQueries::upsert(&self.pool, record).await
    }

    pub async fn delete_file(&self, path: &str) -> Result<bool> {
        FileQueries::delete(&self.pool, path).await
    }

    pub async fn list_files(&self) -> Result<Vec<FileRecord>> {
        FileQueries::list_all(&self.pool).await
    }

    pub async fn count_files(&self) -> Result<i64> {
        FileQueries::count(&self.pool).await
    }

    pub async fn language_stats(&self) -> Result<Vec<LanguageStats>> {
        FileQueries::language_stats(&self.pool).await
    }

    /// Delete several records in one transaction
    pub async fn delete_files(&self, paths: &[String]) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let mut removed = 0;
        for path in paths {
            if FileQueries::delete(&mut *tx, path).await? {
                removed += 1;
            }
        }

        tx.commit().await.context("Failed to commit deletions")?;
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<u64> {
        FileQueries::clear(&self.pool).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
